//! A single worker's run loop: pull a task off the shared queue, process it
//! to completion, repeat until told to stop.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::broker::Broker;
use crate::provider::ProviderRegistry;
use crate::streaming;

/// Drains the broker's shared task queue until `shutdown` fires or the queue
/// itself closes.
///
/// Unlike a dedicated-channel-per-worker design, every worker clones the same
/// [`Broker::dequeue`] handle, so the queue's `N` competing consumers
/// naturally load-balance without a round-robin index to maintain.
pub async fn worker_loop(
    worker_id: usize,
    broker: Broker,
    registry: ProviderRegistry,
    shutdown: CancellationToken,
    inflight: Arc<AtomicUsize>,
) {
    #[cfg(feature = "tracing")]
    tracing::trace!(worker_id, "worker started");

    let queue = broker.dequeue();

    loop {
        tokio::select! {
            biased;
            () = shutdown.cancelled() => break,
            task = queue.recv() => {
                match task {
                    Ok(task) => {
                        inflight.fetch_add(1, Ordering::Relaxed);
                        streaming::process_task(shutdown.clone(), broker.clone(), registry.clone(), task).await;
                        inflight.fetch_sub(1, Ordering::Relaxed);
                    }
                    Err(_) => break,
                }
            }
        }
    }

    #[cfg(feature = "tracing")]
    tracing::trace!(worker_id, "worker stopped");
}
