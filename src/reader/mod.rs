//! Change-feed reader
//!
//! Pulls events from one replica set's change stream and hands them to a
//! single consumer, optionally detouring through a durable overflow queue
//! while the orchestrator is busy with a full sync.
//!
//! Components:
//! - [`FetchStageController`]: buffering strategy, single writer
//! - [`PositionTracker`]: where the stream (re)opens
//! - [`ConnectionManager`]: lazy, idempotent connection lifecycle
//! - [`OverflowQueue`]: disk queue handle, disk stages only
//! - fetch and drain workers: tokio tasks feeding the handoff queue
//! - [`EventReader`]: the façade the orchestrator talks to

mod config;
mod connection;
mod drain;
mod errors;
mod event_reader;
mod fetcher;
mod handoff;
mod overflow;
mod position;
mod stage;

pub use config::ReaderConfig;
pub use connection::{ConnectionManager, StreamRead};
pub use drain::DrainPass;
pub use errors::{ReaderError, ReaderResult, Severity};
pub use event_reader::EventReader;
pub use fetcher::FetchState;
pub use handoff::FetchResult;
pub use overflow::OverflowQueue;
pub use position::PositionTracker;
pub use stage::{FetchStage, FetchStageController};

use crate::observability::{halt, ReaderEvent};

/// Halts the process for a fatal reader error.
pub(crate) fn halt_on_fatal(replset: &str, err: &ReaderError) -> ! {
    let event = match err {
        ReaderError::DiskQueue(_) | ReaderError::CorruptRecord(_) => {
            ReaderEvent::DiskQueueCorruption
        }
        _ => ReaderEvent::InvariantViolation,
    };
    halt(
        event,
        &[
            ("replset", replset),
            ("code", err.code()),
            ("error", &err.to_string()),
        ],
    )
}
