//! Configuration for the bulk sink

use std::time::Duration;

use serde::{Deserialize, Serialize};

use logalike_types::Destination;

use crate::error::{Result, SinkError};

/// Default destination prefix and document type label.
pub const DEFAULT_LABEL: &str = "logalike";

fn default_flush_interval_ms() -> u64 {
    60_000
}

fn default_max_actions() -> usize {
    1000
}

fn default_max_concurrent_flushes() -> usize {
    4
}

fn default_destination() -> Destination {
    Destination::daily(DEFAULT_LABEL).expect("literal prefix is non-empty")
}

fn default_doc_type() -> String {
    DEFAULT_LABEL.to_owned()
}

/// Configuration for [`BulkSink`](crate::BulkSink).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BulkConfig {
    /// Maximum staleness of a batch in milliseconds; a non-empty buffer is
    /// flushed at least this often.
    #[serde(default = "default_flush_interval_ms")]
    pub flush_interval_ms: u64,

    /// Maximum actions per batch; reaching it flushes immediately.
    #[serde(default = "default_max_actions")]
    pub max_actions: usize,

    /// Maximum concurrent in-flight batches; submitting blocks at the
    /// limit.
    #[serde(default = "default_max_concurrent_flushes")]
    pub max_concurrent_flushes: usize,

    /// Destination used for messages that carry none.
    #[serde(default = "default_destination")]
    pub default_destination: Destination,

    /// Document type label attached to every action.
    #[serde(default = "default_doc_type")]
    pub doc_type: String,
}

impl Default for BulkConfig {
    fn default() -> Self {
        Self {
            flush_interval_ms: default_flush_interval_ms(),
            max_actions: default_max_actions(),
            max_concurrent_flushes: default_max_concurrent_flushes(),
            default_destination: default_destination(),
            doc_type: default_doc_type(),
        }
    }
}

impl BulkConfig {
    pub fn validate(&self) -> Result<()> {
        if self.flush_interval_ms == 0 {
            return Err(SinkError::configuration(
                "flush_interval_ms cannot be zero or below",
            ));
        }
        if self.max_actions == 0 {
            return Err(SinkError::configuration("max_actions must be greater than 0"));
        }
        if self.max_concurrent_flushes == 0 {
            return Err(SinkError::configuration(
                "max_concurrent_flushes must be greater than 0",
            ));
        }
        if self.default_destination.prefix().is_empty() {
            return Err(SinkError::configuration("destination prefix cannot be empty"));
        }
        if self.doc_type.is_empty() {
            return Err(SinkError::configuration("doc_type cannot be empty"));
        }
        Ok(())
    }

    pub fn flush_interval(&self) -> Duration {
        Duration::from_millis(self.flush_interval_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_contract() {
        let config = BulkConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.flush_interval_ms, 60_000);
        assert_eq!(config.max_actions, 1000);
        assert_eq!(config.max_concurrent_flushes, 4);
        assert_eq!(config.default_destination.prefix(), "logalike");
        assert_eq!(config.doc_type, "logalike");
    }

    #[test]
    fn test_invalid_values_are_rejected() {
        let config = BulkConfig {
            flush_interval_ms: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());

        let config = BulkConfig {
            max_actions: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());

        let config = BulkConfig {
            doc_type: String::new(),
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }
}
