//! Drain worker
//!
//! Moves overflow queue records onto the handoff queue in append order
//! while the stage is `StoreDiskApply`. In `StoreDiskNoApply` it idles
//! without touching the queue; in `DirectApply` it exits. Until the
//! orchestrator opens the queue, `StoreDiskApply` idles the same way an
//! empty queue does.
//!
//! A batch is committed only after every record in it was accepted by the
//! handoff queue. A crash or shutdown in between re-delivers the batch.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Notify;
use uuid::Uuid;

use super::handoff::Handoff;
use super::halt_on_fatal;
use super::overflow::OverflowQueue;
use super::stage::{FetchStage, FetchStageController};
use crate::observability::{
    log_event_at, log_event_with_fields, ReaderEvent, ReaderMetrics, Severity,
};

/// Result of one drain pass
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DrainPass {
    /// This many records were delivered and committed
    Delivered(usize),
    /// The queue had nothing to read, or is not open yet
    Empty,
    /// Shutdown or consumer gone
    Stopped,
}

pub struct DrainWorker {
    pub(crate) reader_id: Uuid,
    pub(crate) replset: String,
    pub(crate) stage: Arc<FetchStageController>,
    pub(crate) overflow: Arc<OverflowQueue>,
    pub(crate) metrics: Arc<ReaderMetrics>,
    pub(crate) spilled: Arc<Notify>,
    pub(crate) handoff: Handoff,
    pub(crate) idle: Duration,
    pub(crate) backoff: Duration,
    /// Cleared on exit so the reader can start a new drain later
    pub(crate) active: Arc<AtomicBool>,
}

impl DrainWorker {
    pub async fn run(self) {
        log_event_with_fields(
            ReaderEvent::DrainStarted,
            &[
                ("replset", &self.replset),
                ("reader_id", &self.reader_id.to_string()),
                ("backlog", &self.overflow.backlog().to_string()),
            ],
        );

        let mut drained = 0usize;
        loop {
            drained += self.drain_while_buffering().await;
            self.active.store(false, Ordering::SeqCst);

            // A disk stage set while we were exiting found `active` still
            // held and did not spawn a replacement.
            if self.handoff.is_stopped() || !self.stage.current().is_disk_buffering() {
                break;
            }
            if self
                .active
                .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
                .is_err()
            {
                break;
            }
        }

        log_event_with_fields(
            ReaderEvent::DrainStopped,
            &[
                ("replset", &self.replset),
                ("reader_id", &self.reader_id.to_string()),
                ("drained", &drained.to_string()),
                ("stage", self.stage.current().as_str()),
            ],
        );
    }

    /// Loops until the stage leaves disk buffering or the reader stops.
    /// Returns the number of records delivered.
    async fn drain_while_buffering(&self) -> usize {
        let mut drained = 0usize;
        while !self.handoff.is_stopped() {
            match self.stage.current() {
                FetchStage::DirectApply => break,
                FetchStage::StoreDiskNoApply => {
                    let wait = self
                        .stage
                        .wait_for_change(FetchStage::StoreDiskNoApply, self.idle);
                    if self.handoff.until_stopped(wait).await.is_none() {
                        break;
                    }
                }
                FetchStage::StoreDiskApply => match self.drain_once().await {
                    DrainPass::Delivered(count) => drained += count,
                    DrainPass::Empty => {
                        if !self.wait_for_records().await {
                            break;
                        }
                    }
                    DrainPass::Stopped => break,
                },
            }
        }
        drained
    }

    /// Reads one batch, delivers it, then commits it.
    pub async fn drain_once(&self) -> DrainPass {
        let records = match self.overflow.read_batch() {
            Ok(Some(records)) => records,
            Ok(None) => return DrainPass::Empty,
            Err(err) if err.is_fatal() => halt_on_fatal(&self.replset, &err),
            Err(err) => {
                log_event_at(
                    Severity::Error,
                    ReaderEvent::SpillFailed,
                    &[
                        ("replset", &self.replset),
                        ("code", err.code()),
                        ("error", &err.to_string()),
                    ],
                );
                if !self.handoff.deliver(Err(err)).await || !self.handoff.pause(self.backoff).await {
                    return DrainPass::Stopped;
                }
                return DrainPass::Delivered(0);
            }
        };

        if records.is_empty() {
            return DrainPass::Empty;
        }

        let count = records.len();
        for record in records {
            if !self.handoff.deliver(Ok(record)).await {
                return DrainPass::Stopped;
            }
            self.metrics.increment_drained();
        }

        if let Err(err) = self.overflow.commit_read() {
            halt_on_fatal(&self.replset, &err);
        }
        DrainPass::Delivered(count)
    }

    /// Idles until a spill, a stage change or the idle interval.
    /// Returns false on shutdown.
    async fn wait_for_records(&self) -> bool {
        let wait = async {
            tokio::select! {
                _ = self.spilled.notified() => {}
                _ = self.stage.wait_for_change(FetchStage::StoreDiskApply, self.idle) => {}
            }
        };
        self.handoff.until_stopped(wait).await.is_some()
    }
}
