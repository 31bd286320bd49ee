//! Fetch worker
//!
//! Pulls events from the change stream and routes each one according to
//! the fetch stage observed when it arrives:
//!
//! - `DirectApply`: onto the handoff queue
//! - `StoreDiskNoApply` / `StoreDiskApply`: into the overflow queue
//!
//! State machine:
//!
//! ```text
//! Idle -> Connecting -> Streaming -> (Reconnecting -> Connecting)* -> Terminated
//! ```
//!
//! Connect failures and stream errors are pushed to the consumer and
//! retried. Fatal disk queue errors halt the process.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Notify;
use uuid::Uuid;

use super::connection::{ConnectionManager, StreamRead};
use super::handoff::Handoff;
use super::overflow::OverflowQueue;
use super::position::PositionTracker;
use super::stage::FetchStageController;
use super::halt_on_fatal;
use crate::feed::ChangeStreamConnector;
use crate::observability::{
    log_event_at, log_event_with_fields, ReaderEvent, ReaderMetrics, Severity,
};
use crate::position::{extract_position, Position};

/// Fetch worker lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchState {
    Idle,
    Connecting,
    Streaming,
    Reconnecting,
    Terminated,
}

/// Shared pieces a fetch worker operates on
pub struct FetchWorker<C: ChangeStreamConnector> {
    pub(crate) reader_id: Uuid,
    pub(crate) connection: ConnectionManager<C>,
    pub(crate) stage: Arc<FetchStageController>,
    pub(crate) positions: Arc<PositionTracker>,
    pub(crate) overflow: Arc<OverflowQueue>,
    pub(crate) metrics: Arc<ReaderMetrics>,
    /// Signalled after every successful spill so an idle drain wakes up
    pub(crate) spilled: Arc<Notify>,
    pub(crate) handoff: Handoff,
    pub(crate) backoff: Duration,
}

impl<C: ChangeStreamConnector> FetchWorker<C> {
    fn replset(&self) -> &str {
        self.connection.source().replset()
    }

    /// Runs until shutdown or until the consumer side is dropped.
    pub async fn run(self) {
        log_event_with_fields(
            ReaderEvent::FetcherStarted,
            &[
                ("replset", self.replset()),
                ("reader_id", &self.reader_id.to_string()),
                ("position", &self.positions.current().to_string()),
            ],
        );

        let mut state = FetchState::Idle;
        while state != FetchState::Terminated {
            state = self.step(state).await;
        }

        self.connection.close().await;
        log_event_with_fields(
            ReaderEvent::FetcherTerminated,
            &[
                ("replset", self.replset()),
                ("reader_id", &self.reader_id.to_string()),
                ("position", &self.positions.current().to_string()),
            ],
        );
    }

    /// One transition of the state machine.
    pub async fn step(&self, state: FetchState) -> FetchState {
        if self.handoff.is_stopped() {
            return FetchState::Terminated;
        }
        match state {
            FetchState::Idle | FetchState::Reconnecting => FetchState::Connecting,
            FetchState::Connecting => self.connect().await,
            FetchState::Streaming => self.stream().await,
            FetchState::Terminated => FetchState::Terminated,
        }
    }

    async fn connect(&self) -> FetchState {
        self.metrics.increment_connect_attempts();
        let Some(result) = self
            .handoff
            .until_stopped(self.connection.ensure_connected())
            .await
        else {
            return FetchState::Terminated;
        };

        let err = match result {
            Ok(()) => return FetchState::Streaming,
            Err(err) => err,
        };

        self.metrics.increment_connect_failures();
        log_event_at(
            Severity::Warn,
            ReaderEvent::ConnectFailed,
            &[
                ("replset", self.replset()),
                ("position", &self.positions.current().to_string()),
                ("error", &err.to_string()),
            ],
        );

        if !self.handoff.deliver(Err(err)).await {
            return FetchState::Terminated;
        }
        if !self.handoff.pause(self.backoff).await {
            return FetchState::Terminated;
        }
        FetchState::Connecting
    }

    async fn stream(&self) -> FetchState {
        let Some(read) = self.handoff.until_stopped(self.connection.next_event()).await else {
            return FetchState::Terminated;
        };

        match read {
            Ok(StreamRead::Event(event)) => {
                self.metrics.increment_fetched();
                self.dispatch(event).await
            }
            Ok(StreamRead::Exhausted) => {
                self.metrics.increment_stream_exhaustions();
                self.connection.close().await;
                log_event_at(
                    Severity::Trace,
                    ReaderEvent::StreamExhausted,
                    &[
                        ("replset", self.replset()),
                        ("position", &self.positions.current().to_string()),
                    ],
                );
                if self.handoff.pause(self.backoff).await {
                    FetchState::Connecting
                } else {
                    FetchState::Terminated
                }
            }
            Ok(StreamRead::Disconnected) => {
                log_event_at(
                    Severity::Warn,
                    ReaderEvent::StreamDisconnected,
                    &[("replset", self.replset())],
                );
                FetchState::Connecting
            }
            Err(err) => {
                self.metrics.increment_stream_errors();
                log_event_at(
                    Severity::Error,
                    ReaderEvent::StreamFailed,
                    &[
                        ("replset", self.replset()),
                        ("position", &self.positions.current().to_string()),
                        ("error", &err.to_string()),
                    ],
                );
                self.connection.close().await;
                if self.handoff.deliver(Err(err)).await {
                    FetchState::Reconnecting
                } else {
                    FetchState::Terminated
                }
            }
        }
    }

    /// Routes one event. The stage is re-read on every attempt so a
    /// transition during a spill retry takes effect.
    ///
    /// An event at or before the last routed position is the inclusive
    /// replay of a reopened stream and is dropped in every stage.
    async fn dispatch(&self, event: Vec<u8>) -> FetchState {
        let position = match extract_position(&event) {
            Ok(position) => Some(position),
            Err(e) => {
                log_event_at(
                    Severity::Warn,
                    ReaderEvent::UndecodableEvent,
                    &[
                        ("replset", self.replset()),
                        ("bytes", &event.len().to_string()),
                        ("error", &e.to_string()),
                    ],
                );
                None
            }
        };

        if let Some(p) = position.filter(|p| self.positions.is_routed(*p)) {
            self.skip_duplicate(p, "last_routed", self.positions.last_routed());
            return FetchState::Streaming;
        }

        let mut reported = false;
        let mut held = false;
        loop {
            if !self.stage.current().is_disk_buffering() {
                if !self.handoff.deliver(Ok(event)).await {
                    return FetchState::Terminated;
                }
                self.metrics.increment_delivered();
                break;
            }

            if let Some(p) = position.filter(|p| self.positions.is_buffered(*p)) {
                self.skip_duplicate(p, "disk_queue_last", self.positions.disk_queue_last());
                break;
            }

            match self.overflow.append(&event) {
                Ok(true) => {
                    if let Some(p) = position {
                        self.positions.record_disk_queue_last(p);
                    }
                    self.metrics.increment_spilled();
                    self.spilled.notify_one();
                    break;
                }
                Ok(false) => {
                    // Disk stage set, queue not opened yet.
                    if !held {
                        held = true;
                        log_event_at(
                            Severity::Warn,
                            ReaderEvent::DiskQueuePending,
                            &[
                                ("replset", self.replset()),
                                ("stage", self.stage.current().as_str()),
                                ("position", &position.unwrap_or(Position::UNSET).to_string()),
                            ],
                        );
                    }
                    if !self.handoff.pause(self.backoff).await {
                        return FetchState::Terminated;
                    }
                }
                Err(err) if err.is_fatal() => halt_on_fatal(self.replset(), &err),
                Err(err) => {
                    log_event_at(
                        Severity::Error,
                        ReaderEvent::SpillFailed,
                        &[
                            ("replset", self.replset()),
                            ("code", err.code()),
                            ("error", &err.to_string()),
                        ],
                    );
                    if !reported {
                        reported = true;
                        if !self.handoff.deliver(Err(err)).await {
                            return FetchState::Terminated;
                        }
                    }
                    if !self.handoff.pause(self.backoff).await {
                        return FetchState::Terminated;
                    }
                }
            }
        }

        if let Some(p) = position {
            self.positions.advance(p);
        }
        FetchState::Streaming
    }

    fn skip_duplicate(&self, position: Position, mark: &str, covered_to: Position) {
        self.metrics.increment_duplicates_skipped();
        log_event_at(
            Severity::Trace,
            ReaderEvent::DuplicateSkipped,
            &[
                ("replset", self.replset()),
                ("position", &position.to_string()),
                (mark, &covered_to.to_string()),
            ],
        );
    }
}
