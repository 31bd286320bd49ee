//! Disk queue tuning options

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Options for opening a [`DiskQueue`](super::DiskQueue).
///
/// Configured by the orchestrator, immutable once a queue is open.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiskQueueOptions {
    /// Directory holding segment and metadata files
    #[serde(default = "default_directory")]
    pub directory: PathBuf,

    /// Upper bound on unconsumed bytes across all segments (default 256000 MiB)
    #[serde(default = "default_max_size_bytes")]
    pub max_size_bytes: u64,

    /// Maximum records returned by one `read_batch` call
    #[serde(default = "default_read_batch_size")]
    pub read_batch_size: usize,

    /// A new segment is started once the current one would exceed this size
    #[serde(default = "default_segment_size_bytes")]
    pub segment_size_bytes: u64,

    /// Smallest accepted record
    #[serde(default)]
    pub min_record_bytes: u32,

    /// Largest accepted record (default 64 MiB)
    #[serde(default = "default_max_record_bytes")]
    pub max_record_bytes: u32,

    /// fsync after this many appended records
    #[serde(default = "default_sync_every")]
    pub sync_every: u64,

    /// fsync when this much time passed since the last one
    #[serde(default = "default_sync_interval_ms")]
    pub sync_interval_ms: u64,
}

fn default_directory() -> PathBuf {
    PathBuf::from("diskqueue")
}
fn default_max_size_bytes() -> u64 {
    256_000 * 1024 * 1024
}
fn default_read_batch_size() -> usize {
    50_000
}
fn default_segment_size_bytes() -> u64 {
    1 << 30
}
fn default_max_record_bytes() -> u32 {
    1 << 26
}
fn default_sync_every() -> u64 {
    1000
}
fn default_sync_interval_ms() -> u64 {
    2000
}

impl Default for DiskQueueOptions {
    fn default() -> Self {
        Self {
            directory: default_directory(),
            max_size_bytes: default_max_size_bytes(),
            read_batch_size: default_read_batch_size(),
            segment_size_bytes: default_segment_size_bytes(),
            min_record_bytes: 0,
            max_record_bytes: default_max_record_bytes(),
            sync_every: default_sync_every(),
            sync_interval_ms: default_sync_interval_ms(),
        }
    }
}

impl DiskQueueOptions {
    /// Default options rooted at `directory`.
    pub fn in_directory(directory: impl Into<PathBuf>) -> Self {
        Self {
            directory: directory.into(),
            ..Self::default()
        }
    }

    pub fn sync_interval(&self) -> Duration {
        Duration::from_millis(self.sync_interval_ms)
    }

    /// Checks option consistency, returning a description of the first problem.
    pub fn validate(&self) -> Result<(), String> {
        if self.directory.as_os_str().is_empty() {
            return Err("disk_queue.directory must not be empty".to_string());
        }
        if self.read_batch_size == 0 {
            return Err("disk_queue.read_batch_size must be > 0".to_string());
        }
        if self.segment_size_bytes == 0 {
            return Err("disk_queue.segment_size_bytes must be > 0".to_string());
        }
        if self.max_size_bytes == 0 {
            return Err("disk_queue.max_size_bytes must be > 0".to_string());
        }
        if self.min_record_bytes > self.max_record_bytes {
            return Err(format!(
                "disk_queue.min_record_bytes ({}) exceeds max_record_bytes ({})",
                self.min_record_bytes, self.max_record_bytes
            ));
        }
        if self.sync_every == 0 {
            return Err("disk_queue.sync_every must be > 0".to_string());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        assert!(DiskQueueOptions::default().validate().is_ok());
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let options: DiskQueueOptions =
            serde_json::from_str(r#"{"directory": "/var/lib/cdc", "sync_every": 10}"#).unwrap();
        assert_eq!(options.directory, PathBuf::from("/var/lib/cdc"));
        assert_eq!(options.sync_every, 10);
        assert_eq!(options.segment_size_bytes, 1 << 30);
        assert_eq!(options.sync_interval(), Duration::from_secs(2));
    }

    #[test]
    fn test_inverted_record_bounds_rejected() {
        let options = DiskQueueOptions {
            min_record_bytes: 10,
            max_record_bytes: 5,
            ..DiskQueueOptions::default()
        };
        assert!(options.validate().unwrap_err().contains("min_record_bytes"));
    }

    #[test]
    fn test_zero_batch_rejected() {
        let options = DiskQueueOptions {
            read_batch_size: 0,
            ..DiskQueueOptions::default()
        };
        assert!(options.validate().is_err());
    }
}
