//! Error types for the inference gateway core.
//!
//! This module defines the central `Error` enum, which captures all
//! recoverable and reportable error cases within the broker/worker-pool/
//! provider core. Transport crates (`synapse-proto`, `synapse-server`) map
//! these onto their own wire-level error representations (`tonic::Status`,
//! HTTP status codes); this crate stays transport-agnostic.
//!
//! ## Error Cases
//! - `ChannelClosed`: an internal communication failure between tasks.
//! - `ModelNotFound`: the requested `model_code` has no registered provider.
//! - `Provider`: the upstream provider rejected, timed out, or otherwise
//!   failed to produce a result, after exhausting any available credentials.
//! - `Cancelled`: the caller disconnected or a shutdown was requested.
//! - `Internal`: a broker invariant was violated or an unexpected panic was
//!   recovered.

pub type Result<T> = core::result::Result<T, Error>;

/// Unified error type for the broker/worker-pool/provider core.
#[derive(thiserror::Error, Debug)]
#[non_exhaustive]
pub enum Error {
    /// Internal channel send/receive failure (e.g., closed or full channel).
    #[error("channel error: {context}")]
    ChannelClosed { context: String },

    /// The requested `model_code` has no registered provider.
    #[error("model not found: {code}")]
    ModelNotFound { code: String },

    /// The upstream provider failed after exhausting all available
    /// credentials (or had none to try).
    #[error("provider error: {source}")]
    Provider {
        #[source]
        source: anyhow::Error,
    },

    /// The caller disconnected, or the server is shutting down.
    #[error("request cancelled")]
    Cancelled,

    /// A broker invariant was violated, or a worker task panicked.
    #[error("internal error: {context}")]
    Internal { context: String },
}

impl Error {
    pub fn channel(context: impl Into<String>) -> Self {
        Self::ChannelClosed {
            context: context.into(),
        }
    }

    pub fn model_not_found(code: impl Into<String>) -> Self {
        Self::ModelNotFound { code: code.into() }
    }

    pub fn provider(source: impl Into<anyhow::Error>) -> Self {
        Self::Provider {
            source: source.into(),
        }
    }

    pub fn internal(context: impl Into<String>) -> Self {
        Self::Internal {
            context: context.into(),
        }
    }

    /// Renders the error as the in-band error chunk the streaming contract
    /// uses to deliver failures (see `Task` lifecycle docs): an
    /// `"Error: ..."`-prefixed string, always followed by the sentinel.
    pub fn as_chunk(&self) -> String {
        format!("Error: {self}")
    }
}
