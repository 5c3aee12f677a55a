//! The worker pool: a fixed-size set of tasks draining the broker's shared
//! queue, with a four-phase graceful shutdown.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout};
use tokio_util::sync::CancellationToken;

use super::worker;
use crate::broker::Broker;
use crate::provider::ProviderRegistry;

/// Default worker count: `concurrency_multiplier` workers per available CPU,
/// so a caller need not hardcode either number; pass a custom `worker_count`
/// to [`WorkerPool::spawn`] to override.
pub fn default_worker_count(concurrency_multiplier: usize) -> usize {
    concurrency_multiplier.max(1) * num_cpus::get().max(1)
}

/// A pool of workers sharing one [`Broker`] queue handle, with coordinated
/// startup and shutdown.
pub struct WorkerPool {
    shutdown_token: CancellationToken,
    shutdown_timeout: Duration,
    accepting: Arc<AtomicBool>,
    inflight: Arc<AtomicUsize>,
    handles: Mutex<Option<Vec<JoinHandle<()>>>>,
}

impl WorkerPool {
    /// Spawns `worker_count` workers, each draining `broker`'s shared queue
    /// and dispatching through `registry`.
    pub fn spawn(
        broker: Broker,
        registry: ProviderRegistry,
        worker_count: usize,
        shutdown_timeout: Duration,
    ) -> Self {
        let shutdown_token = CancellationToken::new();
        let inflight = Arc::new(AtomicUsize::new(0));
        let accepting = Arc::new(AtomicBool::new(true));

        let handles = (0..worker_count.max(1))
            .map(|worker_id| {
                tokio::spawn(worker::worker_loop(
                    worker_id,
                    broker.clone(),
                    registry.clone(),
                    shutdown_token.clone(),
                    inflight.clone(),
                ))
            })
            .collect();

        Self {
            shutdown_token,
            shutdown_timeout,
            accepting,
            inflight,
            handles: Mutex::new(Some(handles)),
        }
    }

    /// Whether new work should still be accepted. Handlers should consult
    /// this before enqueuing and refuse new tasks once it flips to `false`.
    pub fn is_accepting(&self) -> bool {
        self.accepting.load(Ordering::Relaxed)
    }

    /// A snapshot of the number of tasks currently being processed.
    pub fn inflight(&self) -> usize {
        self.inflight.load(Ordering::Relaxed)
    }

    /// Gracefully tears the pool down:
    ///
    /// 0. Flips `is_accepting` so callers stop enqueuing new tasks.
    /// 1. Waits (bounded by `shutdown_timeout`) for in-flight tasks to drain.
    /// 2. Cancels the shared shutdown token, aborting anything still running.
    /// 3. Awaits every worker's join handle, each bounded by its own timeout.
    ///
    /// Takes `&self` (rather than consuming the pool) so it can be invoked
    /// through an `Arc<WorkerPool>` shared with request handlers that only
    /// need [`WorkerPool::is_accepting`]/[`WorkerPool::inflight`]. Calling it
    /// more than once is harmless: the second call finds an empty handle
    /// list and returns immediately.
    pub async fn shutdown(&self) {
        #[cfg(feature = "tracing")]
        tracing::info!("refusing new tasks");
        self.accepting.store(false, Ordering::Relaxed);

        #[cfg(feature = "tracing")]
        tracing::info!(inflight = self.inflight(), "draining in-flight tasks");
        let drained = timeout(self.shutdown_timeout, async {
            while self.inflight.load(Ordering::Relaxed) > 0 {
                sleep(Duration::from_millis(100)).await;
            }
        })
        .await;

        #[cfg(feature = "tracing")]
        match drained {
            Ok(()) => tracing::debug!("all in-flight tasks drained"),
            Err(_) => tracing::warn!(inflight = self.inflight(), "drain timed out"),
        }
        #[cfg(not(feature = "tracing"))]
        let _ = drained;

        #[cfg(feature = "tracing")]
        tracing::debug!("cancelling remaining work");
        self.shutdown_token.cancel();

        #[cfg(feature = "tracing")]
        tracing::debug!("awaiting worker shutdown");
        let handles = self
            .handles
            .lock()
            .expect("worker pool handle list lock poisoned")
            .take()
            .unwrap_or_default();
        let awaits = handles.into_iter().enumerate().map(|(_i, handle)| async move {
            match timeout(Duration::from_secs(3), handle).await {
                Ok(Ok(())) => {
                    #[cfg(feature = "tracing")]
                    tracing::trace!(worker_id = _i, "worker stopped");
                }
                Ok(Err(_err)) => {
                    #[cfg(feature = "tracing")]
                    tracing::error!(worker_id = _i, error = %_err, "worker task panicked");
                }
                Err(_) => {
                    #[cfg(feature = "tracing")]
                    tracing::warn!(worker_id = _i, "worker shutdown timed out");
                }
            }
        });
        futures::future::join_all(awaits).await;

        #[cfg(feature = "tracing")]
        tracing::info!("worker pool shutdown complete");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::{GenerateStream, Provider, ProviderBundle, ProviderRegistryBuilder};
    use crate::task::{GenerationConfig, Task, SENTINEL};
    use async_trait::async_trait;
    use bytes::Bytes;
    use std::sync::Arc;
    use tokio::sync::mpsc;
    use uuid::Uuid;

    struct EchoOnce;

    #[async_trait]
    impl Provider for EchoOnce {
        fn name(&self) -> &str {
            "echo-once"
        }

        async fn generate(
            &self,
            _ctx: CancellationToken,
            prompt: &str,
            _images: Option<&[Bytes]>,
            _config: Option<&GenerationConfig>,
        ) -> crate::error::Result<String> {
            Ok(prompt.to_string())
        }

        async fn generate_stream(
            &self,
            _ctx: CancellationToken,
            prompt: &str,
            _images: Option<&[Bytes]>,
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

        fn count_tokens(&self, prompt: &str) -> crate::error::Result<usize> {
            Ok(prompt.len())
        }
    }

    #[tokio::test]
    async fn dequeued_task_is_processed_and_pool_shuts_down_cleanly() {
        let broker = Broker::new(4, 16);
        let registry = ProviderRegistryBuilder::new()
            .with_bundle(ProviderBundle::new(vec![(
                "m1".to_string(),
                Arc::new(EchoOnce) as Arc<dyn Provider>,
            )]))
            .build();

        let pool = WorkerPool::spawn(broker.clone(), registry, 2, Duration::from_secs(2));

        let task_id = Uuid::new_v4();
        let mut rx = broker.subscribe(task_id);
        broker
            .enqueue(Task::new(task_id, "hi", "m1").with_stream(true))
            .await
            .unwrap();

        assert_eq!(rx.recv().await.as_deref(), Some("hi"));
        assert_eq!(rx.recv().await.as_deref(), Some(SENTINEL));

        pool.shutdown().await;
    }

    #[tokio::test]
    async fn default_worker_count_scales_with_multiplier() {
        let base = default_worker_count(1);
        let doubled = default_worker_count(2);
        assert_eq!(doubled, base * 2);
    }
}
