//! Shared transport-agnostic state: the broker/registry/pool handles both
//! the gRPC and HTTP front ends dispatch through.

use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};

use futures::Stream;
use synapse_core::provider::ProviderRegistry;
use synapse_core::task::Task;
use synapse_core::{Broker, Error, Result, WorkerPool};
use tokio::sync::mpsc;
use uuid::Uuid;

#[derive(Clone)]
pub struct GatewayState {
    pub broker: Broker,
    pub registry: ProviderRegistry,
    pub pool: Arc<WorkerPool>,
}

impl GatewayState {
    pub fn new(broker: Broker, registry: ProviderRegistry, pool: Arc<WorkerPool>) -> Self {
        Self {
            broker,
            registry,
            pool,
        }
    }

    /// Subscribes on the broker and enqueues `task`, in that order, so the
    /// worker can never publish a chunk before the caller is listening.
    /// Refuses new work once the pool has stopped accepting (shutdown is in
    /// progress).
    pub async fn submit(&self, task: Task) -> Result<(Uuid, mpsc::Receiver<String>)> {
        if !self.pool.is_accepting() {
            return Err(Error::Cancelled);
        }

        let task_id = task.task_id;
        let rx = self.broker.subscribe(task_id);
        self.broker.enqueue(task).await?;
        Ok((task_id, rx))
    }

    pub fn list_models(&self) -> Vec<String> {
        self.registry.list_models()
    }
}

/// Signals `broker.signal_cancel(task_id)` when dropped, unless the
/// generation already finished on its own. Neither `tonic` nor `axum` gives a
/// handler a direct "client disconnected" future; the response stream being
/// dropped by the transport is the only observable signal, so this guard
/// rides inside that stream and fires on drop rather than on completion.
/// Shared between the gRPC and HTTP front ends, which both stream chunks back
/// over a dropped-on-disconnect transport.
pub struct CancelGuard {
    broker: Broker,
    task_id: Uuid,
    done: Arc<AtomicBool>,
}

impl CancelGuard {
    pub fn new(broker: Broker, task_id: Uuid, done: Arc<AtomicBool>) -> Self {
        Self {
            broker,
            task_id,
            done,
        }
    }
}

impl Drop for CancelGuard {
    fn drop(&mut self) {
        if !self.done.load(Ordering::Acquire) {
            self.broker.signal_cancel(self.task_id);
        }
    }
}

/// Wraps a response stream with a [`CancelGuard`] that only runs its `Drop`
/// logic; polling is delegated straight through to `inner`.
pub struct GuardedStream<S> {
    inner: S,
    _guard: CancelGuard,
}

impl<S> GuardedStream<S> {
    pub fn new(inner: S, guard: CancelGuard) -> Self {
        Self {
            inner,
            _guard: guard,
        }
    }
}

impl<S: Stream + Unpin> Stream for GuardedStream<S> {
    type Item = S::Item;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        Pin::new(&mut self.inner).poll_next(cx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use synapse_core::provider::{GenerateStream, Provider, ProviderBundle, ProviderRegistryBuilder};
    use synapse_core::task::GenerationConfig;
    use std::time::Duration;
    use tokio_util::sync::CancellationToken;

    struct Echo;

    #[async_trait]
    impl Provider for Echo {
        fn name(&self) -> &str {
            "echo"
        }

        async fn generate(
            &self,
            _ctx: CancellationToken,
            prompt: &str,
            _images: Option<&[bytes::Bytes]>,
            _config: Option<&GenerationConfig>,
        ) -> synapse_core::Result<String> {
            Ok(prompt.to_string())
        }

        async fn generate_stream(
            &self,
            _ctx: CancellationToken,
            prompt: &str,
            _images: Option<&[bytes::Bytes]>,
            _config: Option<&GenerationConfig>,
        ) -> GenerateStream {
            let (tx, chunks) = mpsc::channel(4);
            let (_etx, errors) = mpsc::channel(1);
            let prompt = prompt.to_string();
            tokio::spawn(async move {
                let _ = tx.send(prompt).await;
            });
            GenerateStream { chunks, errors }
        }

        fn count_tokens(&self, prompt: &str) -> synapse_core::Result<usize> {
            Ok(prompt.len())
        }
    }

    fn state() -> GatewayState {
        let broker = Broker::new(4, 16);
        let registry = ProviderRegistryBuilder::new()
            .with_bundle(ProviderBundle::new(vec![(
                "m1".to_string(),
                Arc::new(Echo) as Arc<dyn Provider>,
            )]))
            .build();
        let pool = Arc::new(WorkerPool::spawn(
            broker.clone(),
            registry.clone(),
            1,
            Duration::from_secs(1),
        ));
        GatewayState::new(broker, registry, pool)
    }

    #[tokio::test]
    async fn submit_subscribes_before_enqueueing() {
        let state = state();
        let task = Task::new(Uuid::new_v4(), "hi", "m1");
        let (_task_id, mut rx) = state.submit(task).await.unwrap();
        assert_eq!(rx.recv().await.as_deref(), Some("hi"));
    }

    #[tokio::test]
    async fn submit_refuses_work_once_shutdown_starts() {
        let state = state();
        state.pool.shutdown().await;

        let task = Task::new(Uuid::new_v4(), "hi", "m1");
        let err = state.submit(task).await.unwrap_err();
        assert!(matches!(err, Error::Cancelled));
    }

    #[tokio::test]
    async fn cancel_guard_signals_cancellation_when_dropped_before_done() {
        let broker = Broker::new(4, 4);
        let task_id = Uuid::new_v4();
        let token = broker.is_cancelled(task_id);

        {
            let _guard = CancelGuard::new(broker.clone(), task_id, Arc::new(AtomicBool::new(false)));
        }

        assert!(token.is_cancelled());
    }

    #[tokio::test]
    async fn cancel_guard_is_silent_once_marked_done() {
        let broker = Broker::new(4, 4);
        let task_id = Uuid::new_v4();
        let token = broker.is_cancelled(task_id);
        let done = Arc::new(AtomicBool::new(false));

        {
            let _guard = CancelGuard::new(broker.clone(), task_id, done.clone());
            done.store(true, Ordering::Release);
        }

        assert!(!token.is_cancelled());
    }
}
