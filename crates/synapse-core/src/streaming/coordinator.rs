//! Per-task orchestration: the worker-side counterpart to the streaming
//! handler. Looks up the provider, dispatches to the streaming or
//! non-streaming processor, and guarantees exactly one sentinel is
//! published on every exit path — success, provider error, or
//! cancellation.

use tokio_util::sync::CancellationToken;

use super::processor;
use crate::broker::Broker;
use crate::error::{Error, Result};
use crate::provider::ProviderRegistry;
use crate::task::{Task, SENTINEL};

/// Processes one dequeued task to completion.
///
/// 1. Derives a task-scoped cancellation token from `shutdown`.
/// 2. Spawns a listener that races the broker's per-task cancellation latch
///    against the task token, so either a caller disconnect or a pool-wide
///    shutdown aborts the in-flight provider call.
/// 3. Looks up the provider; a miss is reported as an error chunk, not a
///    panic or a dropped task.
/// 4. Dispatches to [`processor::process`] or [`processor::process_stream`].
/// 5. Always publishes exactly one sentinel, regardless of which path was
///    taken.
pub async fn process_task(shutdown: CancellationToken, broker: Broker, registry: ProviderRegistry, task: Task) {
    let task_id = task.task_id;
    let task_ctx = shutdown.child_token();

    let cancel_latch = broker.is_cancelled(task_id);
    let listener_ctx = task_ctx.clone();
    let listener = tokio::spawn(async move {
        cancel_latch.cancelled().await;
        listener_ctx.cancel();
    });

    let result = run(task_ctx.clone(), &broker, &registry, &task).await;

    match result {
        Ok(()) => {}
        Err(Error::Cancelled) => {
            #[cfg(feature = "tracing")]
            tracing::debug!(%task_id, "task cancelled, no error chunk published");
        }
        Err(err) => {
            #[cfg(feature = "tracing")]
            tracing::warn!(%task_id, error = %err, "task failed");
            broker.publish(task_id, err.as_chunk()).await;
        }
    }

    broker.publish(task_id, SENTINEL).await;
    listener.abort();
}

async fn run(ctx: CancellationToken, broker: &Broker, registry: &ProviderRegistry, task: &Task) -> Result<()> {
    let provider = registry.get(&task.model_code)?;

    if task.stream {
        processor::process_stream(ctx, broker, task, &provider).await
    } else {
        processor::process(ctx, broker, task, &provider).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::{GenerateStream, Provider, ProviderBundle, ProviderRegistryBuilder};
    use crate::task::GenerationConfig;
    use async_trait::async_trait;
    use bytes::Bytes;
    use std::sync::Arc;
    use tokio::sync::mpsc;
    use uuid::Uuid;

    struct ChunkedProvider(Vec<&'static str>);

    #[async_trait]
    impl Provider for ChunkedProvider {
        fn name(&self) -> &str {
            "chunked"
        }

        async fn generate(
            &self,
            _ctx: CancellationToken,
            _prompt: &str,
            _images: Option<&[Bytes]>,
            _config: Option<&GenerationConfig>,
        ) -> Result<String> {
            Ok(self.0.concat())
        }

        async fn generate_stream(
            &self,
            _ctx: CancellationToken,
            _prompt: &str,
            _images: Option<&[Bytes]>,
            _config: Option<&GenerationConfig>,
        ) -> GenerateStream {
            let (tx, chunks) = mpsc::channel(8);
            let (_etx, errors) = mpsc::channel(1);
            for chunk in self.0.clone() {
                tx.send(chunk.to_string()).await.unwrap();
            }
            GenerateStream { chunks, errors }
        }

        fn count_tokens(&self, prompt: &str) -> Result<usize> {
            Ok(prompt.len())
        }
    }

    fn registry_with(code: &str, provider: Arc<dyn Provider>) -> ProviderRegistry {
        ProviderRegistryBuilder::new()
            .with_bundle(ProviderBundle::new(vec![(code.to_string(), provider)]))
            .build()
    }

    #[tokio::test]
    async fn happy_streaming_preserves_order_then_sentinel() {
        let broker = Broker::new(4, 16);
        let registry = registry_with(
            "m1",
            Arc::new(ChunkedProvider(vec!["Hel", "lo", " world"])),
        );

        let task_id = Uuid::new_v4();
        let mut rx = broker.subscribe(task_id);
        let task = Task::new(task_id, "hi", "m1").with_stream(true);

        process_task(CancellationToken::new(), broker, registry, task).await;

        assert_eq!(rx.recv().await.as_deref(), Some("Hel"));
        assert_eq!(rx.recv().await.as_deref(), Some("lo"));
        assert_eq!(rx.recv().await.as_deref(), Some(" world"));
        assert_eq!(rx.recv().await.as_deref(), Some(SENTINEL));
    }

    #[tokio::test]
    async fn non_streaming_aggregates_into_one_chunk() {
        let broker = Broker::new(4, 16);
        let registry = registry_with("m1", Arc::new(ChunkedProvider(vec!["foo", "bar", "baz"])));

        let task_id = Uuid::new_v4();
        let mut rx = broker.subscribe(task_id);
        let task = Task::new(task_id, "hi", "m1").with_stream(false);

        process_task(CancellationToken::new(), broker, registry, task).await;

        assert_eq!(rx.recv().await.as_deref(), Some("foobarbaz"));
        assert_eq!(rx.recv().await.as_deref(), Some(SENTINEL));
    }

    #[tokio::test]
    async fn unknown_model_reports_error_chunk_then_sentinel() {
        let broker = Broker::new(4, 16);
        let registry = ProviderRegistryBuilder::new().build();

        let task_id = Uuid::new_v4();
        let mut rx = broker.subscribe(task_id);
        let task = Task::new(task_id, "hi", "nope").with_stream(true);

        process_task(CancellationToken::new(), broker, registry, task).await;

        let first = rx.recv().await.unwrap();
        assert!(first.starts_with("Error: "));
        assert!(first.contains("not found"));
        assert_eq!(rx.recv().await.as_deref(), Some(SENTINEL));
    }
}
