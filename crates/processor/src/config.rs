//! Configuration types for the processing stages

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{ProcessorError, Result};

fn default_workers() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(4)
}

fn default_handoff_capacity() -> usize {
    64
}

fn default_repetition_window_ms() -> u64 {
    2 * 60 * 1000
}

/// Configuration for the pipeline runtime.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Number of consumer workers draining the processed stream.
    #[serde(default = "default_workers")]
    pub workers: usize,

    /// Capacity of the handoff channel between the processed stream and the
    /// consumer workers.
    #[serde(default = "default_handoff_capacity")]
    pub handoff_capacity: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            workers: default_workers(),
            handoff_capacity: default_handoff_capacity(),
        }
    }
}

impl PipelineConfig {
    pub fn validate(&self) -> Result<()> {
        if self.workers == 0 {
            return Err(ProcessorError::configuration("workers must be greater than 0"));
        }
        if self.handoff_capacity == 0 {
            return Err(ProcessorError::configuration(
                "handoff_capacity must be greater than 0",
            ));
        }
        Ok(())
    }
}

/// Configuration for the repetition processor.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RepetitionConfig {
    /// Tumbling window width in milliseconds.
    #[serde(default = "default_repetition_window_ms")]
    pub window_ms: u64,
}

impl Default for RepetitionConfig {
    fn default() -> Self {
        Self {
            window_ms: default_repetition_window_ms(),
        }
    }
}

impl RepetitionConfig {
    pub fn validate(&self) -> Result<()> {
        if self.window_ms == 0 {
            return Err(ProcessorError::configuration(
                "window_ms must be greater than 0",
            ));
        }
        Ok(())
    }

    pub fn window_duration(&self) -> Duration {
        Duration::from_millis(self.window_ms)
    }
}

/// Configuration for the throttle processor.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ThrottleConfig {
    /// Per-emitter cycle width in milliseconds.
    pub cycle_ms: u64,

    /// Maximum messages an emitter may send per cycle before being dropped.
    pub limit: u64,
}

impl ThrottleConfig {
    pub fn validate(&self) -> Result<()> {
        if self.cycle_ms == 0 {
            return Err(ProcessorError::configuration(
                "cycle_ms must be greater than 0",
            ));
        }
        Ok(())
    }

    pub fn cycle_duration(&self) -> Duration {
        Duration::from_millis(self.cycle_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pipeline_config_defaults_are_valid() {
        assert!(PipelineConfig::default().validate().is_ok());
        assert!(RepetitionConfig::default().validate().is_ok());
    }

    #[test]
    fn test_zero_values_are_rejected() {
        let config = PipelineConfig {
            workers: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());

        let config = RepetitionConfig { window_ms: 0 };
        assert!(config.validate().is_err());

        let config = ThrottleConfig {
            cycle_ms: 0,
            limit: 10,
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_throttle_limit_zero_is_allowed() {
        // A zero limit is legal: every emitter is over-limit immediately.
        let config = ThrottleConfig {
            cycle_ms: 100,
            limit: 0,
        };
        assert!(config.validate().is_ok());
    }
}
