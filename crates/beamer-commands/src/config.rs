//! Protocol engine configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Timing and sizing of the protocol engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProtocolConfig {
    /// Transport read timeout, i.e. the tick granularity of the loop
    pub read_timeout_ms: u64,
    /// Age after which an undelimited partial line is discarded
    pub stale_line_secs: u64,
    /// Command queue capacity
    pub queue_capacity: usize,
    /// Interval between automatic lamp status queries
    pub refresh_interval_secs: u64,
    /// Delay of the lamp status query scheduled after a power command
    pub power_follow_up_secs: u64,
}

impl Default for ProtocolConfig {
    fn default() -> Self {
        Self {
            read_timeout_ms: 100,
            stale_line_secs: 10,
            queue_capacity: 10,
            refresh_interval_secs: 60,
            power_follow_up_secs: 5,
        }
    }
}

impl ProtocolConfig {
    /// Reject values that would stall or disable the engine.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.read_timeout_ms == 0 {
            return Err(ConfigError::Invalid("read_timeout_ms must be positive".into()));
        }
        if self.stale_line_secs == 0 {
            return Err(ConfigError::Invalid("stale_line_secs must be positive".into()));
        }
        if self.queue_capacity == 0 {
            return Err(ConfigError::Invalid("queue_capacity must be positive".into()));
        }
        if self.refresh_interval_secs == 0 {
            return Err(ConfigError::Invalid(
                "refresh_interval_secs must be positive".into(),
            ));
        }
        Ok(())
    }

    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms)
    }

    pub fn stale_line(&self) -> Duration {
        Duration::from_secs(self.stale_line_secs)
    }

    pub fn refresh_interval(&self) -> Duration {
        Duration::from_secs(self.refresh_interval_secs)
    }

    pub fn power_follow_up(&self) -> Duration {
        Duration::from_secs(self.power_follow_up_secs)
    }
}

/// Configuration error types.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}
