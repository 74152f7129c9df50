//! Error types for the processing stages

use thiserror::Error;

/// Result alias for processor operations.
pub type Result<T> = std::result::Result<T, ProcessorError>;

/// Errors raised by processor construction and the pipeline runtime.
///
/// Background work inside the stages never surfaces errors through this
/// type; failures on background tasks are logged and, where a listener
/// exists, converted into a callback.
#[derive(Error, Debug)]
pub enum ProcessorError {
    /// Invalid construction parameters, raised at setup time.
    #[error("configuration error: {message}")]
    Configuration { message: String },
}

impl ProcessorError {
    pub(crate) fn configuration(message: impl Into<String>) -> Self {
        ProcessorError::Configuration {
            message: message.into(),
        }
    }
}
