//! Error types for the service layer.

use std::sync::Arc;

use dockmatch_core::EngineError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ServiceError {
    #[error(transparent)]
    Engine(#[from] EngineError),

    #[error("match {request_id} timed out after {secs}s")]
    Timeout { request_id: String, secs: u64 },

    #[error("match worker panicked: {0}")]
    WorkerPanicked(String),

    /// Failure of a computation this request joined rather than started.
    #[error("shared computation failed: {0}")]
    Shared(Arc<ServiceError>),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Digest mismatch: expected {expected}, got {actual}")]
    DigestMismatch { expected: String, actual: String },

    #[error("descriptor not found: {0}")]
    DescriptorNotFound(String),
}

impl From<dockmatch_core::ParseError> for ServiceError {
    fn from(err: dockmatch_core::ParseError) -> Self {
        Self::Engine(EngineError::Parse(err))
    }
}

/// Result type for service operations
pub type Result<T> = std::result::Result<T, ServiceError>;
