//! Reader error types
//!
//! Error codes:
//! - CDC_FEED_FAILED, CDC_CONNECT_FAILED (ERROR, pipeline continues)
//! - CDC_READ_TIMEOUT (ERROR, consumer decides whether to keep polling)
//! - CDC_DISK_QUEUE_* (severity of the underlying disk queue error)
//! - CDC_CORRUPT_RECORD, CDC_INVARIANT_VIOLATION (FATAL)
//! - CDC_CONFIG_INVALID, CDC_RUNTIME_MISSING, CDC_READER_CLOSED (ERROR)

use std::time::Duration;

use thiserror::Error;

use crate::disk_queue::{self, DiskQueueError};
use crate::feed::FeedError;

/// Severity of a reader error
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    /// Reported to the caller, the reader keeps running
    Error,
    /// The process must stop
    Fatal,
}

/// Result type for reader operations
pub type ReaderResult<T> = Result<T, ReaderError>;

/// Errors surfaced by the reader
#[derive(Debug, Error)]
pub enum ReaderError {
    /// The change-feed client failed while streaming
    #[error("Change feed error on {replset}: {source}")]
    Feed {
        replset: String,
        #[source]
        source: FeedError,
    },

    /// Opening the change stream failed or timed out
    #[error("Connect to {replset} failed: {message}")]
    Connect { replset: String, message: String },

    /// No event arrived within the read timeout
    #[error("No event received within {0:?}")]
    Timeout(Duration),

    /// Overflow queue operation failed
    #[error("Disk queue error: {0}")]
    DiskQueue(#[from] DiskQueueError),

    /// A persisted or received record could not be decoded
    #[error("Corrupt record: {0}")]
    CorruptRecord(String),

    /// Operation requested in a state that forbids it
    #[error("Invariant violation: {0}")]
    InvariantViolation(String),

    /// Configuration rejected
    #[error("Configuration error: {0}")]
    Config(String),

    /// Workers need a tokio runtime
    #[error("No tokio runtime available: {0}")]
    Runtime(String),

    /// The reader has shut down
    #[error("Reader closed")]
    Closed,
}

impl ReaderError {
    pub fn invariant(message: impl Into<String>) -> Self {
        ReaderError::InvariantViolation(message.into())
    }

    pub fn config(message: impl Into<String>) -> Self {
        ReaderError::Config(message.into())
    }

    /// Returns the string code
    pub fn code(&self) -> &'static str {
        match self {
            ReaderError::Feed { .. } => "CDC_FEED_FAILED",
            ReaderError::Connect { .. } => "CDC_CONNECT_FAILED",
            ReaderError::Timeout(_) => "CDC_READ_TIMEOUT",
            ReaderError::DiskQueue(e) => match e.code() {
                disk_queue::DiskQueueErrorCode::AppendFailed => "CDC_DISK_QUEUE_APPEND_FAILED",
                disk_queue::DiskQueueErrorCode::Full => "CDC_DISK_QUEUE_FULL",
                disk_queue::DiskQueueErrorCode::InvalidRecord => "CDC_DISK_QUEUE_INVALID_RECORD",
                disk_queue::DiskQueueErrorCode::FsyncFailed => "CDC_DISK_QUEUE_FSYNC_FAILED",
                disk_queue::DiskQueueErrorCode::MetadataFailed => "CDC_DISK_QUEUE_METADATA_FAILED",
                disk_queue::DiskQueueErrorCode::Corruption => "CDC_DISK_QUEUE_CORRUPTION",
            },
            ReaderError::CorruptRecord(_) => "CDC_CORRUPT_RECORD",
            ReaderError::InvariantViolation(_) => "CDC_INVARIANT_VIOLATION",
            ReaderError::Config(_) => "CDC_CONFIG_INVALID",
            ReaderError::Runtime(_) => "CDC_RUNTIME_MISSING",
            ReaderError::Closed => "CDC_READER_CLOSED",
        }
    }

    pub fn severity(&self) -> Severity {
        match self {
            ReaderError::DiskQueue(e) if e.is_fatal() => Severity::Fatal,
            ReaderError::CorruptRecord(_) | ReaderError::InvariantViolation(_) => Severity::Fatal,
            _ => Severity::Error,
        }
    }

    /// Returns whether this error requires process termination
    pub fn is_fatal(&self) -> bool {
        self.severity() == Severity::Fatal
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, ReaderError::Timeout(_))
    }
}
