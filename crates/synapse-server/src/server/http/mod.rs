//! Axum HTTP adapter over the same broker/worker-pool core the gRPC service
//! uses: a small JSON/SSE surface plus an OpenAI-compatible chat-completions
//! surface, grounded on the original's `internal/server/http.go` and
//! `internal/models/openai.go` wire shapes.

mod error;
mod generate;
mod openai;

use axum::Router;
use axum::routing::{get, post};
use tower_http::cors::{Any, CorsLayer};

use crate::server::gateway::GatewayState;

pub fn router(state: GatewayState) -> Router {
    Router::new()
        .route("/models", get(generate::list_models))
        .route("/generate", post(generate::generate))
        .route("/v1/models", get(openai::list_models))
        .route("/v1/chat/completions", post(openai::chat_completions))
        .layer(CorsLayer::new().allow_origin(Any).allow_methods(Any).allow_headers(Any))
        .with_state(state)
}
