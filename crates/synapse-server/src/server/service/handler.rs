//! gRPC service implementation for the text-generation gateway.
//!
//! This module defines [`GenerateService`], the concrete implementation of
//! the `Generate` service defined in `synapse.proto`. Each request is
//! assigned a task id, subscribed on the broker *before* being enqueued (to
//! avoid a publish-before-subscribe race), handed to the worker pool, and
//! then drained into a response stream that also emits keep-alive frames
//! while the provider is still formulating its first token.

use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::Stream;
use synapse_core::task::{GenerationConfig, Task, SENTINEL};
use synapse_core::Broker;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tonic::{Request, Response, Status};
use uuid::Uuid;

use synapse_proto::proto::generate_response::ResponseType;
use synapse_proto::proto::generate_server::Generate;
use synapse_proto::proto::{
    GenerateRequest, GenerateResponse, GenerationConfig as ProtoGenerationConfig,
    ListModelsRequest, ListModelsResponse,
};

use crate::server::gateway::{CancelGuard, GatewayState, GuardedStream};
use crate::server::telemetry;

/// gRPC front end over the broker/worker-pool core. Cheap to clone: it wraps
/// one [`GatewayState`] handle shared with the HTTP front end.
#[derive(Clone)]
pub struct GenerateService {
    state: GatewayState,
}

impl GenerateService {
    pub fn new(state: GatewayState) -> Self {
        Self { state }
    }

    /// Initiates a graceful shutdown of the worker pool backing this
    /// service. Safe to call with other clones of this service still alive:
    /// [`synapse_core::WorkerPool::shutdown`] only needs `&self`.
    pub async fn shutdown(&self) {
        self.state.pool.shutdown().await;
    }
}

fn proto_config_to_core(config: Option<ProtoGenerationConfig>) -> Option<GenerationConfig> {
    config.map(|c| GenerationConfig {
        temperature: c.temperature,
        top_p: c.top_p,
        top_k: c.top_k,
        output_length: c.output_length,
    })
}

fn build_task(task_id: Uuid, req: GenerateRequest) -> Task {
    let images = if req.images.is_empty() {
        None
    } else {
        Some(req.images)
    };

    Task::new(task_id, req.prompt, req.model_code)
        .with_stream(req.stream)
        .with_config(proto_config_to_core(req.config))
        .with_images(images)
}

fn chunk_response(chunk: String) -> GenerateResponse {
    GenerateResponse {
        r#type: ResponseType::Chunk as i32,
        chunk,
    }
}

fn keepalive_response() -> GenerateResponse {
    GenerateResponse {
        r#type: ResponseType::Keepalive as i32,
        chunk: String::new(),
    }
}

const KEEPALIVE_INTERVAL: Duration = Duration::from_secs(5);

#[tonic::async_trait]
impl Generate for GenerateService {
    type GenerateTaskStream = Pin<Box<dyn Stream<Item = Result<GenerateResponse, Status>> + Send>>;

    #[cfg_attr(
        feature = "tracing",
        tracing::instrument(skip_all, fields(model_code = %req.get_ref().model_code))
    )]
    async fn generate_task(
        &self,
        req: Request<GenerateRequest>,
    ) -> Result<Response<Self::GenerateTaskStream>, Status> {
        let task_id = Uuid::new_v4();
        let task = build_task(task_id, req.into_inner());

        // Subscribe before enqueue: avoids a publish-before-subscribe race
        // against the worker that will dequeue this task.
        let (task_id, mut result_rx) = self
            .state
            .submit(task)
            .await
            .map_err(synapse_proto::error_to_status)?;

        telemetry::increment_tasks_enqueued();
        telemetry::increment_tasks_inflight();

        let (resp_tx, resp_rx) = mpsc::channel::<Result<GenerateResponse, Status>>(64);
        let done = Arc::new(AtomicBool::new(false));
        let broker = self.state.broker.clone();

        let drain = {
            let done = done.clone();
            async move {
                let start = Instant::now();
                let mut first_chunk_seen = false;
                let mut keepalive = tokio::time::interval(KEEPALIVE_INTERVAL);
                keepalive.tick().await; // first tick fires immediately; discard it

                loop {
                    tokio::select! {
                        biased;
                        chunk = result_rx.recv() => {
                            match chunk {
                                None => break,
                                Some(chunk) if chunk == SENTINEL => break,
                                Some(chunk) => {
                                    first_chunk_seen = true;
                                    telemetry::increment_chunks_streamed(1);
                                    if resp_tx.send(Ok(chunk_response(chunk))).await.is_err() {
                                        break;
                                    }
                                }
                            }
                        }
                        _ = keepalive.tick(), if !first_chunk_seen => {
                            if resp_tx.send(Ok(keepalive_response())).await.is_err() {
                                break;
                            }
                        }
                    }
                }

                broker.unsubscribe(task_id);
                done.store(true, Ordering::Release);
                telemetry::decrement_tasks_inflight();
                #[allow(clippy::cast_precision_loss)]
                telemetry::record_stream_duration(start.elapsed().as_millis() as f64);
            }
        };

        #[cfg(feature = "tracing")]
        let drain = {
            use tracing::Instrument;
            drain.instrument(tracing::info_span!("generate_task", %task_id))
        };

        tokio::spawn(drain);

        let guard = CancelGuard::new(self.state.broker.clone(), task_id, done);
        let stream = GuardedStream::new(ReceiverStream::new(resp_rx), guard);

        Ok(Response::new(Box::pin(stream)))
    }

    async fn list_models(
        &self,
        _req: Request<ListModelsRequest>,
    ) -> Result<Response<ListModelsResponse>, Status> {
        Ok(Response::new(ListModelsResponse {
            models: self.state.list_models(),
        }))
    }
}
