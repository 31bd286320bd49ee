//! Resumable-position bookkeeping

use std::sync::atomic::{AtomicI64, Ordering};

use crate::position::Position;

/// Tracks where the change stream (re)opens and how far the overflow queue got.
///
/// `query_position` only moves forward through `set_if_unset` and `advance`;
/// `force_set` is the explicit rewind used on controlled restarts.
///
/// The change stream reopens inclusively at `query_position`, so the event
/// at that position comes back after every reconnect. `last_routed` marks
/// what this reader already handed on and lets the fetcher drop the replay.
#[derive(Debug)]
pub struct PositionTracker {
    query_position: AtomicI64,
    last_routed: AtomicI64,
    disk_queue_last: AtomicI64,
}

impl Default for PositionTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl PositionTracker {
    pub fn new() -> Self {
        Self {
            query_position: AtomicI64::new(Position::UNSET.as_i64()),
            last_routed: AtomicI64::new(Position::UNSET.as_i64()),
            disk_queue_last: AtomicI64::new(Position::UNSET.as_i64()),
        }
    }

    /// Sets the query position only while it is still unset.
    ///
    /// Returns true if this call set it.
    pub fn set_if_unset(&self, position: Position) -> bool {
        self.query_position
            .compare_exchange(
                Position::UNSET.as_i64(),
                position.as_i64(),
                Ordering::SeqCst,
                Ordering::SeqCst,
            )
            .is_ok()
    }

    /// Unconditional overwrite. Events from `position` on are routed again.
    pub fn force_set(&self, position: Position) {
        self.last_routed
            .store(Position::UNSET.as_i64(), Ordering::SeqCst);
        self.query_position.store(position.as_i64(), Ordering::SeqCst);
    }

    /// Records `position` as routed and moves the query position forward to
    /// it, never backwards.
    pub fn advance(&self, position: Position) {
        self.last_routed
            .fetch_max(position.as_i64(), Ordering::SeqCst);
        self.query_position
            .fetch_max(position.as_i64(), Ordering::SeqCst);
    }

    pub fn last_routed(&self) -> Position {
        Position::new(self.last_routed.load(Ordering::SeqCst))
    }

    /// Whether an event at `position` was already delivered or spilled by
    /// this reader.
    pub fn is_routed(&self, position: Position) -> bool {
        let last = self.last_routed();
        !last.is_unset() && position <= last
    }

    /// Position used to open or re-open the change stream.
    pub fn current(&self) -> Position {
        Position::new(self.query_position.load(Ordering::SeqCst))
    }

    /// Records the position of the newest record known to be in the overflow queue.
    pub fn record_disk_queue_last(&self, position: Position) {
        self.disk_queue_last
            .fetch_max(position.as_i64(), Ordering::SeqCst);
    }

    pub fn disk_queue_last(&self) -> Position {
        Position::new(self.disk_queue_last.load(Ordering::SeqCst))
    }

    /// Whether `position` is already covered by the overflow queue.
    pub fn is_buffered(&self, position: Position) -> bool {
        let last = self.disk_queue_last();
        !last.is_unset() && position <= last
    }
}
