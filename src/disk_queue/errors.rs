//! Disk queue error types
//!
//! Error codes:
//! - CDC_DQ_APPEND_FAILED (ERROR severity)
//! - CDC_DQ_FULL (ERROR severity)
//! - CDC_DQ_INVALID_RECORD (ERROR severity)
//! - CDC_DQ_FSYNC_FAILED (FATAL severity)
//! - CDC_DQ_METADATA_FAILED (FATAL severity)
//! - CDC_DQ_CORRUPTION (FATAL severity)

use std::fmt;
use std::io;

/// Severity of a disk queue error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    /// Operation fails, the queue stays usable
    Error,
    /// Durability can no longer be guaranteed; the process must stop
    Fatal,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Severity::Error => write!(f, "ERROR"),
            Severity::Fatal => write!(f, "FATAL"),
        }
    }
}

/// Disk queue error codes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiskQueueErrorCode {
    /// Segment write failed
    AppendFailed,
    /// Queue reached its configured size limit
    Full,
    /// Record smaller or larger than the configured bounds
    InvalidRecord,
    /// fsync of a segment failed
    FsyncFailed,
    /// Metadata could not be read or persisted
    MetadataFailed,
    /// Stored frame failed validation
    Corruption,
}

impl DiskQueueErrorCode {
    /// Returns the string code
    pub fn code(&self) -> &'static str {
        match self {
            DiskQueueErrorCode::AppendFailed => "CDC_DQ_APPEND_FAILED",
            DiskQueueErrorCode::Full => "CDC_DQ_FULL",
            DiskQueueErrorCode::InvalidRecord => "CDC_DQ_INVALID_RECORD",
            DiskQueueErrorCode::FsyncFailed => "CDC_DQ_FSYNC_FAILED",
            DiskQueueErrorCode::MetadataFailed => "CDC_DQ_METADATA_FAILED",
            DiskQueueErrorCode::Corruption => "CDC_DQ_CORRUPTION",
        }
    }

    /// Returns the severity level for this error
    pub fn severity(&self) -> Severity {
        match self {
            DiskQueueErrorCode::AppendFailed
            | DiskQueueErrorCode::Full
            | DiskQueueErrorCode::InvalidRecord => Severity::Error,
            DiskQueueErrorCode::FsyncFailed
            | DiskQueueErrorCode::MetadataFailed
            | DiskQueueErrorCode::Corruption => Severity::Fatal,
        }
    }
}

impl fmt::Display for DiskQueueErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.code())
    }
}

/// Disk queue error with context
#[derive(Debug)]
pub struct DiskQueueError {
    code: DiskQueueErrorCode,
    message: String,
    details: Option<String>,
    source: Option<io::Error>,
}

impl DiskQueueError {
    fn new(code: DiskQueueErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            details: None,
            source: None,
        }
    }

    /// Segment write failed
    pub fn append_failed(message: impl Into<String>, source: io::Error) -> Self {
        Self {
            source: Some(source),
            ..Self::new(DiskQueueErrorCode::AppendFailed, message)
        }
    }

    /// Appending would exceed `max_size_bytes`
    pub fn full(used: u64, limit: u64) -> Self {
        Self {
            details: Some(format!("used_bytes: {}, max_size_bytes: {}", used, limit)),
            ..Self::new(DiskQueueErrorCode::Full, "disk queue is full")
        }
    }

    /// Record size outside `[min_record_bytes, max_record_bytes]`
    pub fn invalid_record(len: usize, min: u32, max: u32) -> Self {
        Self::new(
            DiskQueueErrorCode::InvalidRecord,
            format!("record of {} bytes outside allowed range [{}, {}]", len, min, max),
        )
    }

    pub fn fsync_failed(message: impl Into<String>, source: io::Error) -> Self {
        Self {
            source: Some(source),
            ..Self::new(DiskQueueErrorCode::FsyncFailed, message)
        }
    }

    pub fn metadata_failed(message: impl Into<String>) -> Self {
        Self::new(DiskQueueErrorCode::MetadataFailed, message)
    }

    /// Stored data failed validation
    pub fn corruption(message: impl Into<String>) -> Self {
        Self::new(DiskQueueErrorCode::Corruption, message)
    }

    /// Corruption at a known segment and byte offset
    pub fn corruption_at(segment: u64, offset: u64, reason: impl Into<String>) -> Self {
        Self {
            details: Some(format!("segment: {}, byte_offset: {}", segment, offset)),
            ..Self::new(DiskQueueErrorCode::Corruption, reason)
        }
    }

    pub fn code(&self) -> DiskQueueErrorCode {
        self.code
    }

    pub fn severity(&self) -> Severity {
        self.code.severity()
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn details(&self) -> Option<&str> {
        self.details.as_deref()
    }

    /// Returns whether this error requires process termination
    pub fn is_fatal(&self) -> bool {
        self.severity() == Severity::Fatal
    }
}

impl fmt::Display for DiskQueueError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}] {}: {}",
            self.code.severity(),
            self.code.code(),
            self.message
        )?;
        if let Some(ref details) = self.details {
            write!(f, " ({})", details)?;
        }
        if let Some(ref source) = self.source {
            write!(f, " (caused by: {})", source)?;
        }
        Ok(())
    }
}

impl std::error::Error for DiskQueueError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.source.as_ref().map(|e| e as &(dyn std::error::Error + 'static))
    }
}

/// Result type for disk queue operations
pub type DiskQueueResult<T> = Result<T, DiskQueueError>;
