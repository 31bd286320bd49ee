//! Bounded handoff between the workers and `EventReader::next`
//!
//! Every worker suspension point goes through [`Handoff`] so a shutdown
//! request is observed while waiting on the network, on backpressure or on
//! a backoff sleep.

use std::future::Future;
use std::time::Duration;

use tokio::sync::{mpsc, watch};

use super::errors::ReaderResult;

/// Unit exchanged on the handoff queue: an encoded event or an error.
pub type FetchResult = ReaderResult<Vec<u8>>;

/// Receiving side of the shutdown signal
#[derive(Debug, Clone)]
pub struct ShutdownSignal {
    rx: watch::Receiver<bool>,
}

impl ShutdownSignal {
    pub fn new(rx: watch::Receiver<bool>) -> Self {
        Self { rx }
    }

    /// True once shutdown was requested or the reader was dropped.
    pub fn is_triggered(&self) -> bool {
        *self.rx.borrow() || self.rx.has_changed().is_err()
    }

    /// Resolves once shutdown is requested or the reader is dropped.
    pub async fn triggered(&self) {
        let mut rx = self.rx.clone();
        let _ = rx.wait_for(|stop| *stop).await;
    }
}

/// A worker's producer handle on the handoff queue
#[derive(Debug, Clone)]
pub struct Handoff {
    tx: mpsc::Sender<FetchResult>,
    shutdown: ShutdownSignal,
}

impl Handoff {
    pub fn new(tx: mpsc::Sender<FetchResult>, shutdown: ShutdownSignal) -> Self {
        Self { tx, shutdown }
    }

    /// Whether the worker should stop.
    pub fn is_stopped(&self) -> bool {
        self.shutdown.is_triggered() || self.tx.is_closed()
    }

    /// Runs `fut` unless shutdown wins first.
    pub async fn until_stopped<F: Future>(&self, fut: F) -> Option<F::Output> {
        tokio::select! {
            biased;
            _ = self.shutdown.triggered() => None,
            out = fut => Some(out),
        }
    }

    /// Pushes a result, waiting for capacity. Returns false if the reader
    /// is gone or shutting down.
    pub async fn deliver(&self, result: FetchResult) -> bool {
        matches!(self.until_stopped(self.tx.send(result)).await, Some(Ok(())))
    }

    /// Sleeps for `duration`. Returns false if interrupted by shutdown.
    pub async fn pause(&self, duration: Duration) -> bool {
        self.until_stopped(tokio::time::sleep(duration)).await.is_some()
    }
}
