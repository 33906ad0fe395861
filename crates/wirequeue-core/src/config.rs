use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Default snapshot length; enough for link and network headers.
pub const DEFAULT_SNAPLEN: i32 = 1024;
/// Default poll interval of the live capture read, in milliseconds.
pub const DEFAULT_READ_TIMEOUT_MS: i32 = 100;
/// Default capacity of the activity stream.
pub const DEFAULT_ACTIVITY_CAPACITY: usize = 1024;

/// What the worker does when the activity stream is full.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OverflowPolicy {
    /// Wait for the consumer; released by `Queue::stop`.
    #[default]
    Block,
    /// Discard the new event and count it in `activities_dropped`.
    DropNewest,
}

/// Queue and capture settings.
///
/// Every field has a default, so a partial JSON document is valid.
///
/// # Examples
/// ```
/// use wirequeue_core::{OverflowPolicy, QueueConfig};
///
/// let config: QueueConfig = serde_json::from_str(r#"{"overflow": "drop_newest"}"#)?;
/// assert_eq!(config.snaplen, 1024);
/// assert_eq!(config.overflow, OverflowPolicy::DropNewest);
/// # Ok::<(), serde_json::Error>(())
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct QueueConfig {
    pub snaplen: i32,
    pub promiscuous: bool,
    pub read_timeout_ms: i32,
    pub immediate_mode: bool,
    pub activity_capacity: usize,
    pub overflow: OverflowPolicy,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            snaplen: DEFAULT_SNAPLEN,
            promiscuous: true,
            read_timeout_ms: DEFAULT_READ_TIMEOUT_MS,
            immediate_mode: true,
            activity_capacity: DEFAULT_ACTIVITY_CAPACITY,
            overflow: OverflowPolicy::Block,
        }
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("invalid config: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("invalid value for {field}: {reason}")]
    Invalid {
        field: &'static str,
        reason: &'static str,
    },
}

impl QueueConfig {
    pub fn from_json_file(path: &Path) -> Result<Self, ConfigError> {
        let text = fs::read_to_string(path)?;
        let config: QueueConfig = serde_json::from_str(&text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.snaplen <= 0 {
            return Err(ConfigError::Invalid {
                field: "snaplen",
                reason: "must be positive",
            });
        }
        if self.read_timeout_ms <= 0 {
            return Err(ConfigError::Invalid {
                field: "read_timeout_ms",
                reason: "must be positive so shutdown is observed",
            });
        }
        if self.activity_capacity == 0 {
            return Err(ConfigError::Invalid {
                field: "activity_capacity",
                reason: "must be at least 1",
            });
        }
        Ok(())
    }
}
