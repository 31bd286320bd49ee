//! Reader counters
//!
//! - Counters only, monotonic, reset on process start
//! - Relaxed ordering; values are eventually consistent across workers

use std::sync::atomic::{AtomicU64, Ordering};

/// Operational counters shared by the reader's workers
#[derive(Debug, Default)]
pub struct ReaderMetrics {
    events_fetched: AtomicU64,
    events_delivered: AtomicU64,
    events_spilled: AtomicU64,
    events_drained: AtomicU64,
    duplicates_skipped: AtomicU64,
    connect_attempts: AtomicU64,
    connect_failures: AtomicU64,
    stream_errors: AtomicU64,
    stream_exhaustions: AtomicU64,
    consumer_timeouts: AtomicU64,
}

impl ReaderMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn increment_fetched(&self) {
        self.events_fetched.fetch_add(1, Ordering::Relaxed);
    }

    /// Event handed to the consumer directly from the stream
    pub fn increment_delivered(&self) {
        self.events_delivered.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_spilled(&self) {
        self.events_spilled.fetch_add(1, Ordering::Relaxed);
    }

    /// Event handed to the consumer from the overflow queue
    pub fn increment_drained(&self) {
        self.events_drained.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_duplicates_skipped(&self) {
        self.duplicates_skipped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_connect_attempts(&self) {
        self.connect_attempts.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_connect_failures(&self) {
        self.connect_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_stream_errors(&self) {
        self.stream_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_stream_exhaustions(&self) {
        self.stream_exhaustions.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_consumer_timeouts(&self) {
        self.consumer_timeouts.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> ReaderMetricsSnapshot {
        ReaderMetricsSnapshot {
            events_fetched: self.events_fetched.load(Ordering::Relaxed),
            events_delivered: self.events_delivered.load(Ordering::Relaxed),
            events_spilled: self.events_spilled.load(Ordering::Relaxed),
            events_drained: self.events_drained.load(Ordering::Relaxed),
            duplicates_skipped: self.duplicates_skipped.load(Ordering::Relaxed),
            connect_attempts: self.connect_attempts.load(Ordering::Relaxed),
            connect_failures: self.connect_failures.load(Ordering::Relaxed),
            stream_errors: self.stream_errors.load(Ordering::Relaxed),
            stream_exhaustions: self.stream_exhaustions.load(Ordering::Relaxed),
            consumer_timeouts: self.consumer_timeouts.load(Ordering::Relaxed),
        }
    }
}

/// A point-in-time copy of all counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReaderMetricsSnapshot {
    pub events_fetched: u64,
    pub events_delivered: u64,
    pub events_spilled: u64,
    pub events_drained: u64,
    pub duplicates_skipped: u64,
    pub connect_attempts: u64,
    pub connect_failures: u64,
    pub stream_errors: u64,
    pub stream_exhaustions: u64,
    pub consumer_timeouts: u64,
}
