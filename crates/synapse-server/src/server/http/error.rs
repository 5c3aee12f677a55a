//! Maps the transport-agnostic core error onto HTTP status codes, the
//! axum-side counterpart to `synapse_proto::error_to_status`.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use serde_json::json;
use synapse_core::Error;

pub struct HttpError(pub Error);

impl From<Error> for HttpError {
    fn from(err: Error) -> Self {
        Self(err)
    }
}

impl IntoResponse for HttpError {
    fn into_response(self) -> Response {
        let (status, message) = match &self.0 {
            Error::ModelNotFound { .. } => (StatusCode::NOT_FOUND, self.0.to_string()),
            Error::Cancelled => (StatusCode::SERVICE_UNAVAILABLE, self.0.to_string()),
            Error::Provider { .. } => (StatusCode::BAD_GATEWAY, self.0.to_string()),
            Error::ChannelClosed { .. } | Error::Internal { .. } => {
                (StatusCode::INTERNAL_SERVER_ERROR, self.0.to_string())
            }
            _ => (StatusCode::INTERNAL_SERVER_ERROR, self.0.to_string()),
        };

        (status, Json(json!({ "error": message }))).into_response()
    }
}
