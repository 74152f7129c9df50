//! Error types for the file input side

use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Result alias for collector operations.
pub type Result<T> = std::result::Result<T, CollectorError>;

/// Errors raised by the file input components.
#[derive(Error, Debug)]
pub enum CollectorError {
    /// Invalid construction parameters, raised at setup time.
    #[error("configuration error: {message}")]
    Configuration { message: String },

    /// Position store errors.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// Tailer errors.
    #[error(transparent)]
    Tail(#[from] TailError),
}

impl CollectorError {
    pub(crate) fn configuration(message: impl Into<String>) -> Self {
        CollectorError::Configuration {
            message: message.into(),
        }
    }
}

/// Errors raised by the position store.
#[derive(Error, Debug)]
pub enum StoreError {
    /// The store path exists but is not a directory, or could not be
    /// created.
    #[error("store configuration error: {message}")]
    Configuration { message: String },

    /// The entry file is locked by another process. Callers demote this to
    /// "no persistence for this file" and continue.
    #[error("store entry for {path} is locked by another process")]
    Busy { path: PathBuf },

    /// Any other I/O failure while reading or writing an entry.
    #[error("store I/O error: {0}")]
    Io(#[from] io::Error),
}

/// Errors surfaced through a tailer's `on_error` callback.
#[derive(Error, Debug)]
pub enum TailError {
    /// An I/O failure other than the file being missing. The tailer exits
    /// after surfacing it.
    #[error("I/O error while tailing {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}
