//! Bounded worker pool that drains the broker's task queue.

pub mod manager;
pub mod worker;

pub use manager::{default_worker_count, WorkerPool};
