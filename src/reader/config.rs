//! Reader configuration
//!
//! Loaded by the orchestrator (JSON file or constructed in code) and
//! immutable once the reader exists. Every field has a default, so an empty
//! object is a valid configuration.

use std::fs;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::errors::{ReaderError, ReaderResult};
use crate::disk_queue::DiskQueueOptions;
use crate::observability::{log_event_with_fields, ReaderEvent};

/// Reader configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReaderConfig {
    /// Capacity of the handoff queue between workers and `next()`
    #[serde(default = "default_handoff_capacity")]
    pub handoff_capacity: usize,

    /// How long `next()` waits before returning a timeout
    #[serde(default = "default_read_timeout_ms")]
    pub read_timeout_ms: u64,

    /// Pause after a failed connect and after stream exhaustion
    #[serde(default = "default_reconnect_backoff_ms")]
    pub reconnect_backoff_ms: u64,

    /// Upper bound on a single open of the change stream
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,

    /// Longest the drain worker sleeps between checks when idle
    #[serde(default = "default_drain_idle_ms")]
    pub drain_idle_ms: u64,

    /// Overflow queue options
    #[serde(default)]
    pub disk_queue: DiskQueueOptions,
}

fn default_handoff_capacity() -> usize {
    8192
}
fn default_read_timeout_ms() -> u64 {
    3000
}
fn default_reconnect_backoff_ms() -> u64 {
    1000
}
fn default_connect_timeout_ms() -> u64 {
    10_000
}
fn default_drain_idle_ms() -> u64 {
    1000
}

impl Default for ReaderConfig {
    fn default() -> Self {
        Self {
            handoff_capacity: default_handoff_capacity(),
            read_timeout_ms: default_read_timeout_ms(),
            reconnect_backoff_ms: default_reconnect_backoff_ms(),
            connect_timeout_ms: default_connect_timeout_ms(),
            drain_idle_ms: default_drain_idle_ms(),
            disk_queue: DiskQueueOptions::default(),
        }
    }
}

impl ReaderConfig {
    /// Load configuration from a JSON file and validate it.
    pub fn load(path: &Path) -> ReaderResult<Self> {
        let content = fs::read_to_string(path).map_err(|e| {
            ReaderError::config(format!("Failed to read config {}: {}", path.display(), e))
        })?;

        let config: ReaderConfig = serde_json::from_str(&content)
            .map_err(|e| ReaderError::config(format!("Invalid config JSON: {}", e)))?;

        config.validate()?;

        log_event_with_fields(
            ReaderEvent::ConfigLoaded,
            &[
                ("path", &path.display().to_string()),
                ("handoff_capacity", &config.handoff_capacity.to_string()),
                ("disk_queue_directory", &config.disk_queue.directory.display().to_string()),
            ],
        );
        Ok(config)
    }

    pub fn validate(&self) -> ReaderResult<()> {
        if self.handoff_capacity == 0 {
            return Err(ReaderError::config("handoff_capacity must be > 0"));
        }
        if self.read_timeout_ms == 0 {
            return Err(ReaderError::config("read_timeout_ms must be > 0"));
        }
        if self.connect_timeout_ms == 0 {
            return Err(ReaderError::config("connect_timeout_ms must be > 0"));
        }
        if self.drain_idle_ms == 0 {
            return Err(ReaderError::config("drain_idle_ms must be > 0"));
        }
        self.disk_queue.validate().map_err(ReaderError::Config)
    }

    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms)
    }

    pub fn reconnect_backoff(&self) -> Duration {
        Duration::from_millis(self.reconnect_backoff_ms)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn drain_idle(&self) -> Duration {
        Duration::from_millis(self.drain_idle_ms)
    }
}
