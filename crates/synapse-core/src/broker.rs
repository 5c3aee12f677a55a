//! In-process task broker: a bounded FIFO queue, one chunk-subscription per
//! task, and one latched cancellation signal per task.
//!
//! The subscriber/cancellation maps are each guarded by a short-held
//! [`std::sync::RwLock`]; the task queue is a separately synchronized
//! bounded MPMC channel so that `enqueue`/`dequeue` never contend with
//! `subscribe`/`publish`.

use std::collections::HashMap;
use std::sync::RwLock;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::task::Task;

/// Coordinates task intake, per-task result delivery, and per-task
/// cancellation for the worker pool.
///
/// Cloning a `Broker` is cheap: it is a thin handle over shared state (the
/// queue sender/receiver and the subscriber/cancellation maps), matching the
/// handle-style sharing the worker pool already uses for its channels.
#[derive(Clone)]
pub struct Broker {
    tasks_tx: async_channel::Sender<Task>,
    tasks_rx: async_channel::Receiver<Task>,
    subscription_capacity: usize,
    subscribers: std::sync::Arc<RwLock<HashMap<Uuid, mpsc::Sender<String>>>>,
    cancellations: std::sync::Arc<RwLock<HashMap<Uuid, CancellationToken>>>,
}

impl Broker {
    /// Creates a broker with a bounded task queue of capacity `queue_capacity`
    /// and a per-task subscription buffer of `subscription_capacity`
    /// (buffered, blocking publish).
    pub fn new(queue_capacity: usize, subscription_capacity: usize) -> Self {
        let (tasks_tx, tasks_rx) = async_channel::bounded(queue_capacity.max(1));
        Self {
            tasks_tx,
            tasks_rx,
            subscription_capacity: subscription_capacity.max(1),
            subscribers: std::sync::Arc::new(RwLock::new(HashMap::new())),
            cancellations: std::sync::Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Pushes a task into the bounded FIFO. Blocks (asynchronously) when the
    /// queue is full, providing backpressure on ingress.
    pub async fn enqueue(&self, task: Task) -> Result<()> {
        self.tasks_tx
            .send(task)
            .await
            .map_err(|_| Error::channel("task queue closed"))
    }

    /// Returns a cloneable handle to the single lazy dequeue sequence
    /// consumed by the worker pool. All clones drain the same underlying
    /// queue (MPMC), so `N` workers calling `recv()` concurrently form a
    /// competing-consumers pool.
    pub fn dequeue(&self) -> async_channel::Receiver<Task> {
        self.tasks_rx.clone()
    }

    /// Creates the subscription record for `task_id` and returns the
    /// consumer handle. Must be called before [`Broker::enqueue`] to avoid a
    /// publish-before-subscribe race. Creating a subscription for an id that
    /// already has one is a programming error and will overwrite the prior
    /// entry (the caller is expected to uphold "at most one subscriber per
    /// task_id").
    pub fn subscribe(&self, task_id: Uuid) -> mpsc::Receiver<String> {
        let (tx, rx) = mpsc::channel(self.subscription_capacity);
        self.subscribers
            .write()
            .expect("subscribers lock poisoned")
            .insert(task_id, tx);
        rx
    }

    /// Tears down the subscription and the cancellation latch for
    /// `task_id`. Draining any pending chunks is the caller's responsibility;
    /// dropping the sender closes the receiver side so a concurrent drain
    /// loop observes end-of-stream rather than hanging.
    pub fn unsubscribe(&self, task_id: Uuid) {
        self.subscribers
            .write()
            .expect("subscribers lock poisoned")
            .remove(&task_id);
        self.cancellations
            .write()
            .expect("cancellations lock poisoned")
            .remove(&task_id);
    }

    /// Delivers `chunk` to the subscriber for `task_id`, if one exists. If no
    /// subscriber exists (the handler already unsubscribed), the chunk is
    /// discarded silently rather than erroring — a worker must never be
    /// blocked indefinitely by a caller that has already gone away.
    pub async fn publish(&self, task_id: Uuid, chunk: impl Into<String>) {
        let sender = self
            .subscribers
            .read()
            .expect("subscribers lock poisoned")
            .get(&task_id)
            .cloned();

        if let Some(sender) = sender {
            // The channel is bounded (capacity `subscription_capacity`), so
            // this can suspend the publishing worker if the subscriber is
            // slow to drain — the reference backpressure policy.
            let _ = sender.send(chunk.into()).await;
        }
    }

    /// Transitions the cancellation latch for `task_id` to `signalled`.
    /// Idempotent: signalling twice is a no-op after the first call. Lazily
    /// creates the latch if no observer has registered interest yet, so a
    /// signal that arrives before the first `is_cancelled` call is still
    /// latched and observed by that later call.
    pub fn signal_cancel(&self, task_id: Uuid) {
        let token = {
            let mut cancellations = self.cancellations.write().expect("cancellations lock poisoned");
            cancellations
                .entry(task_id)
                .or_insert_with(CancellationToken::new)
                .clone()
        };
        token.cancel();
    }

    /// Returns a handle that resolves once the latch for `task_id` is
    /// signalled. Lazily creates the latch on first registration, so a late
    /// registrant still observes a signal that fired before it asked.
    pub fn is_cancelled(&self, task_id: Uuid) -> CancellationToken {
        self.cancellations
            .write()
            .expect("cancellations lock poisoned")
            .entry(task_id)
            .or_insert_with(CancellationToken::new)
            .clone()
    }
}
