//! Named lifecycle events emitted by the reader
//!
//! Events are explicit and typed; the string form is what appears in the
//! `event` field of a log line.

use std::fmt;

/// Observable events in the ingestion reader
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReaderEvent {
    // Lifecycle
    /// Configuration file loaded and validated
    ConfigLoaded,
    /// Fetch worker spawned
    FetcherStarted,
    /// Fetch worker exited after shutdown
    FetcherTerminated,
    /// Drain worker spawned
    DrainStarted,
    /// Drain worker exited
    DrainStopped,
    /// Shutdown requested
    ShutdownRequested,

    // Orchestration
    /// Fetch stage changed
    StageUpdated,
    /// Query position overwritten
    PositionUpdated,
    /// Overflow queue opened
    DiskQueueOpened,
    /// Disk stage active but no overflow queue opened yet; event held
    DiskQueuePending,

    // Disk queue
    /// Unsynced records found past the persisted write cursor
    DiskQueueRecovered,
    /// Torn or mismatched tail frame cut off on open
    DiskQueueTailTruncated,
    /// Consumed segment could not be deleted
    DiskQueueSegmentRemoveFailed,

    // Connection
    /// Change stream opened
    ConnectOpened,
    /// Change stream open failed
    ConnectFailed,
    /// Change stream reported no more data for now
    StreamExhausted,
    /// Change stream read failed
    StreamFailed,
    /// Transport reported the connection is gone
    StreamDisconnected,

    // Buffering
    /// Event already present in the overflow queue was skipped
    DuplicateSkipped,
    /// Appending to the overflow queue failed
    SpillFailed,
    /// Event header could not be decoded
    UndecodableEvent,

    // Fatal
    /// Orchestration or programming error
    InvariantViolation,
    /// Persisted data failed validation
    DiskQueueCorruption,
}

impl ReaderEvent {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReaderEvent::ConfigLoaded => "CDC_CONFIG_LOADED",
            ReaderEvent::FetcherStarted => "CDC_FETCHER_STARTED",
            ReaderEvent::FetcherTerminated => "CDC_FETCHER_TERMINATED",
            ReaderEvent::DrainStarted => "CDC_DRAIN_STARTED",
            ReaderEvent::DrainStopped => "CDC_DRAIN_STOPPED",
            ReaderEvent::ShutdownRequested => "CDC_SHUTDOWN_REQUESTED",
            ReaderEvent::StageUpdated => "CDC_STAGE_UPDATED",
            ReaderEvent::PositionUpdated => "CDC_POSITION_UPDATED",
            ReaderEvent::DiskQueueOpened => "CDC_DISK_QUEUE_OPENED",
            ReaderEvent::DiskQueuePending => "CDC_DISK_QUEUE_PENDING",
            ReaderEvent::DiskQueueRecovered => "CDC_DISK_QUEUE_RECOVERED",
            ReaderEvent::DiskQueueTailTruncated => "CDC_DISK_QUEUE_TAIL_TRUNCATED",
            ReaderEvent::DiskQueueSegmentRemoveFailed => "CDC_DISK_QUEUE_SEGMENT_REMOVE_FAILED",
            ReaderEvent::ConnectOpened => "CDC_CONNECT_OPENED",
            ReaderEvent::ConnectFailed => "CDC_CONNECT_FAILED",
            ReaderEvent::StreamExhausted => "CDC_STREAM_EXHAUSTED",
            ReaderEvent::StreamFailed => "CDC_STREAM_FAILED",
            ReaderEvent::StreamDisconnected => "CDC_STREAM_DISCONNECTED",
            ReaderEvent::DuplicateSkipped => "CDC_DUPLICATE_SKIPPED",
            ReaderEvent::SpillFailed => "CDC_SPILL_FAILED",
            ReaderEvent::UndecodableEvent => "CDC_UNDECODABLE_EVENT",
            ReaderEvent::InvariantViolation => "CDC_INVARIANT_VIOLATION",
            ReaderEvent::DiskQueueCorruption => "CDC_DISK_QUEUE_CORRUPTION",
        }
    }

    /// Returns true if this event terminates the process
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            ReaderEvent::InvariantViolation | ReaderEvent::DiskQueueCorruption
        )
    }
}

impl fmt::Display for ReaderEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
