//! Lifecycle of the change-stream connection
//!
//! The current client sits behind a lock so a caller of `ensure_connected`
//! never observes a half-replaced client. Staleness is detected lazily on
//! the next use; there is no background heartbeat.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;

use super::errors::{ReaderError, ReaderResult};
use super::position::PositionTracker;
use crate::feed::{ChangeStreamClient, ChangeStreamConnector, ReplicaSetSource};
use crate::observability::{log_event_with_fields, ReaderEvent};

/// Outcome of one read on the connection
#[derive(Debug, PartialEq, Eq)]
pub enum StreamRead {
    /// An encoded event
    Event(Vec<u8>),
    /// The stream has nothing more right now
    Exhausted,
    /// No live client; `ensure_connected` must run first
    Disconnected,
}

/// Owns the connection to the remote change feed
pub struct ConnectionManager<C: ChangeStreamConnector> {
    source: ReplicaSetSource,
    connector: C,
    positions: Arc<PositionTracker>,
    connect_timeout: Duration,
    client: Mutex<Option<C::Client>>,
}

impl<C: ChangeStreamConnector> ConnectionManager<C> {
    pub fn new(
        source: ReplicaSetSource,
        connector: C,
        positions: Arc<PositionTracker>,
        connect_timeout: Duration,
    ) -> Self {
        Self {
            source,
            connector,
            positions,
            connect_timeout,
            client: Mutex::new(None),
        }
    }

    pub fn source(&self) -> &ReplicaSetSource {
        &self.source
    }

    /// Returns at once if a live client exists; otherwise closes any stale
    /// client and opens a new one at `PositionTracker::current()`.
    ///
    /// # Errors
    ///
    /// Returns `ReaderError::Connect` if the open fails or exceeds the
    /// connect timeout. The caller backs off and retries.
    pub async fn ensure_connected(&self) -> ReaderResult<()> {
        let mut client = self.client.lock().await;
        if client.as_ref().is_some_and(|c| c.is_live()) {
            return Ok(());
        }

        if let Some(mut stale) = client.take() {
            stale.close();
        }

        let start = self.positions.current();
        let opened = tokio::time::timeout(self.connect_timeout, self.connector.open(&self.source, start))
            .await
            .map_err(|_| ReaderError::Connect {
                replset: self.source.replset().to_string(),
                message: format!("open timed out after {:?}", self.connect_timeout),
            })?
            .map_err(|e| ReaderError::Connect {
                replset: self.source.replset().to_string(),
                message: e.to_string(),
            })?;

        log_event_with_fields(
            ReaderEvent::ConnectOpened,
            &[
                ("replset", self.source.replset()),
                ("start_position", &start.to_string()),
            ],
        );
        *client = Some(opened);
        Ok(())
    }

    /// Whether a live client is currently held.
    pub async fn is_live(&self) -> bool {
        self.client.lock().await.as_ref().is_some_and(|c| c.is_live())
    }

    /// Reads the next event from the current client.
    ///
    /// # Errors
    ///
    /// Returns `ReaderError::Feed` on a hard read failure; the client is left
    /// in place for the caller to close.
    pub async fn next_event(&self) -> ReaderResult<StreamRead> {
        let mut guard = self.client.lock().await;
        let Some(client) = guard.as_mut().filter(|c| c.is_live()) else {
            return Ok(StreamRead::Disconnected);
        };

        match client.next_event().await {
            Ok(Some(event)) => Ok(StreamRead::Event(event)),
            Ok(None) => Ok(StreamRead::Exhausted),
            Err(source) => Err(ReaderError::Feed {
                replset: self.source.replset().to_string(),
                source,
            }),
        }
    }

    /// Releases the connection. Safe to call repeatedly.
    pub async fn close(&self) {
        if let Some(mut client) = self.client.lock().await.take() {
            client.close();
        }
    }
}
