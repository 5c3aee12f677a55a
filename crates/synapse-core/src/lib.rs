#![doc = include_str!("../README.md")]

pub mod broker;
pub mod error;
pub mod pool;
pub mod provider;
pub mod streaming;
pub mod task;

pub use broker::Broker;
pub use error::{Error, Result};
pub use pool::{default_worker_count, WorkerPool};
pub use provider::{GenerateStream, KeyPool, Provider, ProviderBundle, ProviderRegistry, ProviderRegistryBuilder};
pub use task::{GenerationConfig, Task, SENTINEL};
