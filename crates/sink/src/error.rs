//! Error types for the egress side

use thiserror::Error;

/// Result alias for sink operations.
pub type Result<T> = std::result::Result<T, SinkError>;

/// Errors raised by sink construction. Batch failures at runtime never
/// propagate to submitters; they are logged per rejected item.
#[derive(Error, Debug)]
pub enum SinkError {
    /// Invalid construction parameters, raised at setup time.
    #[error("configuration error: {message}")]
    Configuration { message: String },
}

impl SinkError {
    pub(crate) fn configuration(message: impl Into<String>) -> Self {
        SinkError::Configuration {
            message: message.into(),
        }
    }
}

/// A batch-level failure reported by the transport.
#[derive(Error, Debug)]
#[error("transport error: {message}")]
pub struct TransportError {
    message: String,
}

impl TransportError {
    pub fn new(message: impl Into<String>) -> Self {
        TransportError {
            message: message.into(),
        }
    }
}
