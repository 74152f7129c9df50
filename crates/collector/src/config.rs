//! Configuration types for the file input side

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{CollectorError, Result};
use crate::store;

fn default_poll_interval_ms() -> u64 {
    500
}

fn default_buffer_size() -> usize {
    4096
}

fn default_queue_capacity() -> usize {
    500
}

fn default_enqueue_timeout_ms() -> u64 {
    60_000
}

fn default_store_directory() -> Option<PathBuf> {
    Some(store::default_directory())
}

/// Where a tailer starts reading a file.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StartPosition {
    /// Read the whole file from offset 0.
    Beginning,
    /// Only read lines appended after the tailer starts.
    #[default]
    End,
    /// Start at an explicit byte offset.
    Offset(u64),
    /// Resume from the position store when an offset is persisted for the
    /// file, otherwise behave like [`StartPosition::End`]. Resolved by the
    /// factory.
    Auto,
}

/// Configuration for a single tailer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TailerConfig {
    /// Period between length checks in milliseconds.
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    /// Where to start reading.
    #[serde(default)]
    pub start: StartPosition,

    /// Read chunk size in bytes. Must be at least 1.
    #[serde(default = "default_buffer_size")]
    pub buffer_size: usize,

    /// Close and re-open the file on every poll. For environments where a
    /// held handle inhibits deletion.
    #[serde(default)]
    pub reopen_each_poll: bool,
}

impl Default for TailerConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: default_poll_interval_ms(),
            start: StartPosition::default(),
            buffer_size: default_buffer_size(),
            reopen_each_poll: false,
        }
    }
}

impl TailerConfig {
    pub fn validate(&self) -> Result<()> {
        if self.poll_interval_ms == 0 {
            return Err(CollectorError::configuration(
                "poll_interval_ms must be greater than 0",
            ));
        }
        if self.buffer_size < 1 {
            return Err(CollectorError::configuration(
                "buffer_size cannot be less than 1",
            ));
        }
        Ok(())
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

/// Configuration for the tailer factory.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FactoryConfig {
    /// Capacity of the line queue shared by all tailers.
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,

    /// How long a tailer waits to enqueue a line before dropping it, in
    /// milliseconds. Dropping is the only backpressure signal to file
    /// readers and is intentionally lossy to preserve liveness.
    #[serde(default = "default_enqueue_timeout_ms")]
    pub enqueue_timeout_ms: u64,

    /// Directory for the position store. `None` disables persistence.
    #[serde(default = "default_store_directory")]
    pub store_directory: Option<PathBuf>,
}

impl Default for FactoryConfig {
    fn default() -> Self {
        Self {
            queue_capacity: default_queue_capacity(),
            enqueue_timeout_ms: default_enqueue_timeout_ms(),
            store_directory: default_store_directory(),
        }
    }
}

impl FactoryConfig {
    pub fn validate(&self) -> Result<()> {
        if self.queue_capacity == 0 {
            return Err(CollectorError::configuration(
                "queue_capacity must be greater than 0",
            ));
        }
        if self.enqueue_timeout_ms == 0 {
            return Err(CollectorError::configuration(
                "enqueue_timeout_ms must be greater than 0",
            ));
        }
        Ok(())
    }

    pub fn enqueue_timeout(&self) -> Duration {
        Duration::from_millis(self.enqueue_timeout_ms)
    }

    /// A config without position persistence.
    pub fn without_store(mut self) -> Self {
        self.store_directory = None;
        self
    }
}
