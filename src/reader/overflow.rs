//! Overflow queue adapter
//!
//! Thin façade over [`DiskQueue`] used only while the fetch stage requires
//! disk buffering. The handle is opened by the orchestrator through
//! `init`, which refuses to run in `DirectApply`.
//!
//! The stage has to be a disk stage before `init` may run, so workers can
//! observe a disk stage with no handle yet. `append` and `read_batch` report
//! that as "not open" rather than as an error; the orchestrator-facing
//! operations still treat a missing handle as an invariant violation.

use std::sync::{Mutex, MutexGuard, PoisonError};

use super::errors::{ReaderError, ReaderResult};
use super::stage::FetchStage;
use crate::disk_queue::{DiskQueue, DiskQueueOptions};
use crate::observability::{log_event_with_fields, ReaderEvent};
use crate::position::{extract_position, Position};

/// Handle slot for the reader's overflow queue
pub struct OverflowQueue {
    replset: String,
    options: DiskQueueOptions,
    queue: Mutex<Option<DiskQueue>>,
}

impl OverflowQueue {
    pub fn new(replset: impl Into<String>, options: DiskQueueOptions) -> Self {
        Self {
            replset: replset.into(),
            options,
            queue: Mutex::new(None),
        }
    }

    fn slot(&self) -> MutexGuard<'_, Option<DiskQueue>> {
        self.queue.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn with_queue<T>(
        &self,
        operation: &str,
        f: impl FnOnce(&mut DiskQueue) -> ReaderResult<T>,
    ) -> ReaderResult<T> {
        match self.slot().as_mut() {
            Some(queue) => f(queue),
            None => Err(ReaderError::invariant(format!(
                "replset {} requested {} on an uninitialized disk queue",
                self.replset, operation
            ))),
        }
    }

    /// Opens or creates the named queue. Replaces any previously open handle.
    ///
    /// # Errors
    ///
    /// - `InvariantViolation` if `stage` is not a disk-buffering stage
    /// - `DiskQueue` if the queue cannot be opened
    pub fn init(&self, name: &str, stage: FetchStage) -> ReaderResult<()> {
        if !stage.is_disk_buffering() {
            return Err(ReaderError::invariant(format!(
                "replset {} init disk queue in illegal fetch stage {}",
                self.replset, stage
            )));
        }

        let mut slot = self.slot();
        if let Some(previous) = slot.take() {
            previous.close()?;
        }

        let queue = DiskQueue::open(name, self.options.clone())?;
        log_event_with_fields(
            ReaderEvent::DiskQueueOpened,
            &[
                ("replset", &self.replset),
                ("name", name),
                ("directory", &self.options.directory.display().to_string()),
                ("depth", &queue.depth().to_string()),
            ],
        );

        *slot = Some(queue);
        Ok(())
    }

    pub fn is_initialized(&self) -> bool {
        self.slot().is_some()
    }

    /// Name of the open queue, for telling downstream readers where to look.
    pub fn name(&self) -> ReaderResult<String> {
        self.with_queue("name", |queue| Ok(queue.name().to_string()))
    }

    /// Operation timestamp of the most recently appended record.
    ///
    /// Returns `Position::ZERO` for an empty queue.
    ///
    /// # Errors
    ///
    /// `CorruptRecord` (FATAL) if the stored record has no decodable header.
    pub fn last_written_position(&self) -> ReaderResult<Position> {
        self.with_queue("last written position", |queue| {
            let Some(record) = queue.last_written() else {
                return Ok(Position::ZERO);
            };
            extract_position(record).map_err(|e| {
                ReaderError::CorruptRecord(format!(
                    "last record of disk queue {} ({} bytes) undecodable: {}",
                    queue.name(),
                    record.len(),
                    e
                ))
            })
        })
    }

    /// Appends one event. Returns `false` without writing if no queue has
    /// been opened yet.
    pub fn append(&self, event: &[u8]) -> ReaderResult<bool> {
        match self.slot().as_mut() {
            Some(queue) => {
                queue.append(event)?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Next records in append order; see [`DiskQueue::read_batch`].
    /// `None` if no queue has been opened yet.
    pub fn read_batch(&self) -> ReaderResult<Option<Vec<Vec<u8>>>> {
        match self.slot().as_mut() {
            Some(queue) => Ok(Some(queue.read_batch()?)),
            None => Ok(None),
        }
    }

    pub fn commit_read(&self) -> ReaderResult<()> {
        self.with_queue("commit", |queue| Ok(queue.commit_read()?))
    }

    /// Records appended but not yet drained. Zero when no queue is open.
    pub fn backlog(&self) -> u64 {
        self.slot().as_ref().map_or(0, |queue| queue.depth())
    }
}
