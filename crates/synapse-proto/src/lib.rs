#![doc = include_str!("../README.md")]

use synapse_core::error::Error;
use tonic::Status;

/// Generated gRPC bindings for `synapse.proto`: request/response message
/// types and the `Generate` service client/server traits.
pub mod proto {
    tonic::include_proto!("synapse");
}

/// The encoded file descriptor set for `synapse.proto`, used to register the
/// service with `tonic_reflection`.
pub const FILE_DESCRIPTOR_SET: &[u8] = tonic::include_file_descriptor_set!("synapse_descriptor");

/// Maps the transport-agnostic core error onto a gRPC status code and
/// message. Kept in this crate (rather than `synapse-core`) so the core
/// broker/provider logic has no dependency on `tonic`.
pub fn error_to_status(err: Error) -> Status {
    match err {
        Error::ChannelClosed { context } => Status::internal(format!("channel error: {context}")),
        Error::ModelNotFound { code } => Status::not_found(format!("model not found: {code}")),
        Error::Provider { source } => Status::unavailable(format!("provider error: {source}")),
        Error::Cancelled => Status::cancelled("request was cancelled"),
        Error::Internal { context } => Status::internal(context),
        _ => Status::internal("unclassified error"),
    }
}

impl From<Error> for Status {
    fn from(err: Error) -> Self {
        error_to_status(err)
    }
}
