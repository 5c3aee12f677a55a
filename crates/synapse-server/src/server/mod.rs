//! Binary-level wiring: configuration, telemetry, and the gRPC/HTTP service
//! implementations built on top of `synapse-core`.

pub mod config;
pub mod gateway;
pub mod http;
pub mod service;
pub mod telemetry;
