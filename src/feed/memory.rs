//! Scripted in-process change feed
//!
//! Steps are consumed in order by whichever client is currently open. Every
//! event handed out is kept in a log, and a client opened at `start` first
//! replays the logged events at or after `start`, the way a change stream
//! resumed at an operation time does. With an empty script a client waits
//! `idle_wait` for new steps, then reports exhaustion.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::sync::Notify;

use super::{ChangeStreamClient, ChangeStreamConnector, FeedError, FeedResult, ReplicaSetSource};
use crate::position::{extract_position, Position};

/// One scripted stream step
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FeedStep {
    /// Deliver an encoded event
    Event(Vec<u8>),
    /// Fail the read
    Error(FeedError),
    /// Report "nothing more right now"
    Exhausted,
}

#[derive(Debug)]
struct ScriptState {
    steps: Mutex<VecDeque<FeedStep>>,
    open_failures: Mutex<VecDeque<FeedError>>,
    open_positions: Mutex<Vec<Position>>,
    /// Events already handed out, in feed order
    log: Mutex<Vec<Vec<u8>>>,
    appended: Notify,
    generation: AtomicU64,
    open_clients: AtomicUsize,
    max_open_clients: AtomicUsize,
    idle_wait: Duration,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Connector backed by a shared script. Clones share the script.
#[derive(Debug, Clone)]
pub struct ScriptedFeed {
    state: Arc<ScriptState>,
}

impl Default for ScriptedFeed {
    fn default() -> Self {
        Self::new(Duration::from_millis(50))
    }
}

impl ScriptedFeed {
    pub fn new(idle_wait: Duration) -> Self {
        Self {
            state: Arc::new(ScriptState {
                steps: Mutex::new(VecDeque::new()),
                open_failures: Mutex::new(VecDeque::new()),
                open_positions: Mutex::new(Vec::new()),
                log: Mutex::new(Vec::new()),
                appended: Notify::new(),
                generation: AtomicU64::new(0),
                open_clients: AtomicUsize::new(0),
                max_open_clients: AtomicUsize::new(0),
                idle_wait,
            }),
        }
    }

    /// Appends a step to the script.
    pub fn push(&self, step: FeedStep) {
        lock(&self.state.steps).push_back(step);
        self.state.appended.notify_waiters();
    }

    /// Appends an event whose header carries `position`.
    pub fn push_event_at(&self, position: Position) {
        self.push(FeedStep::Event(encode_event(position)));
    }

    /// Makes the next `open` calls fail with the given errors, in order.
    pub fn fail_opens(&self, errors: impl IntoIterator<Item = FeedError>) {
        lock(&self.state.open_failures).extend(errors);
    }

    /// Marks every open client as disconnected.
    pub fn drop_connections(&self) {
        self.state.generation.fetch_add(1, Ordering::SeqCst);
    }

    /// Start positions of every `open` call, successful or not.
    pub fn open_positions(&self) -> Vec<Position> {
        lock(&self.state.open_positions).clone()
    }

    pub fn open_count(&self) -> usize {
        lock(&self.state.open_positions).len()
    }

    /// Highest number of clients that were open at the same time.
    pub fn max_concurrent_clients(&self) -> usize {
        self.state.max_open_clients.load(Ordering::SeqCst)
    }

    pub fn remaining_steps(&self) -> usize {
        lock(&self.state.steps).len()
    }

    /// Events handed out so far, replays excluded.
    pub fn logged_events(&self) -> usize {
        lock(&self.state.log).len()
    }
}

/// Logged events a stream opened at `start` sees again. An unset start
/// means "from now on".
fn replay_from(log: &[Vec<u8>], start: Position) -> VecDeque<Vec<u8>> {
    if start.is_unset() {
        return VecDeque::new();
    }
    log.iter()
        .filter(|event| extract_position(event).is_ok_and(|p| p >= start))
        .cloned()
        .collect()
}

/// Encodes a minimal change event with a `clusterTime` header.
pub fn encode_event(position: Position) -> Vec<u8> {
    serde_json::json!({
        "operationType": "insert",
        "clusterTime": position,
    })
    .to_string()
    .into_bytes()
}

impl ChangeStreamConnector for ScriptedFeed {
    type Client = ScriptedClient;

    async fn open(&self, _source: &ReplicaSetSource, start: Position) -> FeedResult<ScriptedClient> {
        lock(&self.state.open_positions).push(start);
        if let Some(err) = lock(&self.state.open_failures).pop_front() {
            return Err(err);
        }

        let open = self.state.open_clients.fetch_add(1, Ordering::SeqCst) + 1;
        self.state.max_open_clients.fetch_max(open, Ordering::SeqCst);

        let replay = replay_from(&lock(&self.state.log), start);
        Ok(ScriptedClient {
            state: Arc::clone(&self.state),
            generation: self.state.generation.load(Ordering::SeqCst),
            replay,
            closed: false,
        })
    }
}

/// Client handed out by [`ScriptedFeed`]
#[derive(Debug)]
pub struct ScriptedClient {
    state: Arc<ScriptState>,
    generation: u64,
    replay: VecDeque<Vec<u8>>,
    closed: bool,
}

impl ScriptedClient {
    fn take_step(&self) -> Option<FeedStep> {
        let step = lock(&self.state.steps).pop_front();
        if let Some(FeedStep::Event(event)) = &step {
            lock(&self.state.log).push(event.clone());
        }
        step
    }
}

fn step_result(step: FeedStep) -> FeedResult<Option<Vec<u8>>> {
    match step {
        FeedStep::Event(bytes) => Ok(Some(bytes)),
        FeedStep::Error(err) => Err(err),
        FeedStep::Exhausted => Ok(None),
    }
}

impl ChangeStreamClient for ScriptedClient {
    async fn next_event(&mut self) -> FeedResult<Option<Vec<u8>>> {
        if !self.is_live() {
            return Err(FeedError::Closed);
        }
        if let Some(event) = self.replay.pop_front() {
            return Ok(Some(event));
        }

        let notified = self.state.appended.notified();
        tokio::pin!(notified);
        notified.as_mut().enable();

        if let Some(step) = self.take_step() {
            return step_result(step);
        }
        let _ = tokio::time::timeout(self.state.idle_wait, notified).await;
        match self.take_step() {
            Some(step) => step_result(step),
            None => Ok(None),
        }
    }

    fn is_live(&self) -> bool {
        !self.closed && self.generation == self.state.generation.load(Ordering::SeqCst)
    }

    fn close(&mut self) {
        if !self.closed {
            self.closed = true;
            self.state.open_clients.fetch_sub(1, Ordering::SeqCst);
        }
    }
}

impl Drop for ScriptedClient {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn source() -> ReplicaSetSource {
        ReplicaSetSource::new("mongodb://localhost:27017", "rs0")
    }

    #[tokio::test]
    async fn test_steps_consumed_in_order() {
        let feed = ScriptedFeed::new(Duration::from_millis(10));
        feed.push_event_at(Position::new(10));
        feed.push(FeedStep::Error(FeedError::Read("reset".into())));
        feed.push(FeedStep::Exhausted);

        let mut client = feed.open(&source(), Position::UNSET).await.unwrap();
        let event = client.next_event().await.unwrap().unwrap();
        assert_eq!(extract_position(&event).unwrap(), Position::new(10));
        assert_eq!(
            client.next_event().await,
            Err(FeedError::Read("reset".into()))
        );
        assert_eq!(client.next_event().await, Ok(None));
    }

    #[tokio::test]
    async fn test_reopen_replays_from_start_inclusive() {
        let feed = ScriptedFeed::new(Duration::from_millis(10));
        for ts in [10, 20, 30] {
            feed.push_event_at(Position::new(ts));
        }

        let mut first = feed.open(&source(), Position::UNSET).await.unwrap();
        for _ in 0..3 {
            first.next_event().await.unwrap().unwrap();
        }
        assert_eq!(first.next_event().await, Ok(None));
        first.close();

        feed.push_event_at(Position::new(40));
        let mut resumed = feed.open(&source(), Position::new(20)).await.unwrap();
        let mut seen = Vec::new();
        while let Some(event) = resumed.next_event().await.unwrap() {
            seen.push(extract_position(&event).unwrap().as_i64());
        }
        assert_eq!(seen, vec![20, 30, 40]);
        assert_eq!(feed.logged_events(), 4);
    }

    #[tokio::test]
    async fn test_empty_script_reports_exhaustion_after_idle() {
        let feed = ScriptedFeed::new(Duration::from_millis(10));
        let mut client = feed.open(&source(), Position::UNSET).await.unwrap();
        assert_eq!(client.next_event().await, Ok(None));
    }

    #[tokio::test]
    async fn test_open_failures_and_positions_recorded() {
        let feed = ScriptedFeed::default();
        feed.fail_opens([FeedError::Connect("refused".into())]);

        assert!(feed.open(&source(), Position::new(5)).await.is_err());
        assert!(feed.open(&source(), Position::new(6)).await.is_ok());
        assert_eq!(feed.open_positions(), vec![Position::new(5), Position::new(6)]);
    }

    #[tokio::test]
    async fn test_drop_connections_marks_clients_stale() {
        let feed = ScriptedFeed::default();
        let mut client = feed.open(&source(), Position::UNSET).await.unwrap();
        assert!(client.is_live());

        feed.drop_connections();
        assert!(!client.is_live());
        assert_eq!(client.next_event().await, Err(FeedError::Closed));
    }

    #[tokio::test]
    async fn test_concurrent_client_tracking() {
        let feed = ScriptedFeed::default();
        let mut first = feed.open(&source(), Position::UNSET).await.unwrap();
        first.close();
        first.close();
        let _second = feed.open(&source(), Position::UNSET).await.unwrap();
        assert_eq!(feed.max_concurrent_clients(), 1);
    }
}
