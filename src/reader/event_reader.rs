//! EventReader façade
//!
//! Entry point for the orchestrator. Owns the stage, the positions, the
//! overflow queue handle and the consumer end of the handoff queue; the
//! workers receive shared references at spawn time.
//!
//! Orchestrator errors (disk operations in the wrong stage, corrupt queue
//! records) halt the process instead of returning.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::runtime::Handle;
use tokio::sync::{mpsc, watch, Notify};
use uuid::Uuid;

use super::config::ReaderConfig;
use super::connection::ConnectionManager;
use super::drain::DrainWorker;
use super::errors::{ReaderError, ReaderResult};
use super::fetcher::FetchWorker;
use super::halt_on_fatal;
use super::handoff::{FetchResult, Handoff, ShutdownSignal};
use super::overflow::OverflowQueue;
use super::position::PositionTracker;
use super::stage::{FetchStage, FetchStageController};
use crate::feed::{ChangeStreamConnector, ReplicaSetSource};
use crate::observability::{
    log_event_with_fields, ReaderEvent, ReaderMetrics, ReaderMetricsSnapshot,
};
use crate::position::Position;

/// Reader for one replica set's change stream
pub struct EventReader<C: ChangeStreamConnector> {
    /// Distinguishes reader instances of the same replica set in logs
    id: Uuid,
    replset: String,
    config: ReaderConfig,
    stage: Arc<FetchStageController>,
    positions: Arc<PositionTracker>,
    overflow: Arc<OverflowQueue>,
    metrics: Arc<ReaderMetrics>,
    spilled: Arc<Notify>,
    handoff_tx: mpsc::Sender<FetchResult>,
    handoff_rx: tokio::sync::Mutex<mpsc::Receiver<FetchResult>>,
    /// Taken by the single fetch worker on `start`
    connection: Mutex<Option<ConnectionManager<C>>>,
    started: AtomicBool,
    /// Runtime captured by `start`; drains launched later run on it
    runtime: Mutex<Option<Handle>>,
    drain_active: Arc<AtomicBool>,
    shutdown_tx: watch::Sender<bool>,
}

impl<C: ChangeStreamConnector> EventReader<C> {
    /// Creates a reader in `DirectApply` with an unset query position.
    ///
    /// # Errors
    ///
    /// `Config` if the configuration does not validate.
    pub fn new(source: ReplicaSetSource, connector: C, config: ReaderConfig) -> ReaderResult<Self> {
        config.validate()?;

        let replset = source.replset().to_string();
        let positions = Arc::new(PositionTracker::new());
        let connection = ConnectionManager::new(
            source,
            connector,
            Arc::clone(&positions),
            config.connect_timeout(),
        );
        let (handoff_tx, handoff_rx) = mpsc::channel(config.handoff_capacity);
        let (shutdown_tx, _) = watch::channel(false);

        Ok(Self {
            id: Uuid::new_v4(),
            overflow: Arc::new(OverflowQueue::new(replset.clone(), config.disk_queue.clone())),
            replset,
            config,
            stage: Arc::new(FetchStageController::default()),
            positions,
            metrics: Arc::new(ReaderMetrics::new()),
            spilled: Arc::new(Notify::new()),
            handoff_tx,
            handoff_rx: tokio::sync::Mutex::new(handoff_rx),
            connection: Mutex::new(Some(connection)),
            started: AtomicBool::new(false),
            runtime: Mutex::new(None),
            drain_active: Arc::new(AtomicBool::new(false)),
            shutdown_tx,
        })
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn replset(&self) -> &str {
        &self.replset
    }

    pub fn config(&self) -> &ReaderConfig {
        &self.config
    }

    /// Switches the buffering strategy. Workers pick it up on their next
    /// iteration. Entering a disk stage after `start` launches the drain
    /// worker if none is running, on the runtime `start` ran in, so this may
    /// be called from any thread.
    pub fn set_stage(&self, stage: FetchStage) {
        let previous = self.stage.current();
        self.stage.set_stage(stage);
        log_event_with_fields(
            ReaderEvent::StageUpdated,
            &[
                ("replset", &self.replset),
                ("reader_id", &self.id.to_string()),
                ("from", previous.as_str()),
                ("to", stage.as_str()),
            ],
        );

        if !stage.is_disk_buffering() {
            return;
        }
        // Pairs with `start`: either this sees the handle or `start` sees
        // the disk stage after publishing it.
        let runtime = self.runtime_slot().clone();
        if let Some(runtime) = runtime {
            self.spawn_drain(&runtime);
        }
    }

    fn runtime_slot(&self) -> MutexGuard<'_, Option<Handle>> {
        self.runtime.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn current_stage(&self) -> FetchStage {
        self.stage.current()
    }

    /// Opens or creates the named overflow queue.
    ///
    /// Halts the process if the current stage is `DirectApply` or the queue
    /// on disk is corrupt.
    ///
    /// # Errors
    ///
    /// Non-fatal disk queue errors, such as an unwritable directory.
    pub fn init_disk_queue(&self, name: &str) -> ReaderResult<()> {
        match self.overflow.init(name, self.stage.current()) {
            Err(err) if err.is_fatal() => halt_on_fatal(&self.replset, &err),
            other => other,
        }
    }

    /// Name of the overflow queue. Halts if none was initialized.
    pub fn disk_queue_name(&self) -> String {
        match self.overflow.name() {
            Ok(name) => name,
            Err(err) => halt_on_fatal(&self.replset, &err),
        }
    }

    /// Position of the newest record in the overflow queue, `Position::ZERO`
    /// if it is empty. Events at or before it are not spilled again.
    ///
    /// Halts if no queue was initialized or the record is undecodable.
    pub fn query_position_from_disk_queue(&self) -> Position {
        match self.overflow.last_written_position() {
            Ok(position) => {
                self.positions.record_disk_queue_last(position);
                position
            }
            Err(err) => halt_on_fatal(&self.replset, &err),
        }
    }

    /// Sets the resume position unless one is already known.
    pub fn set_position_if_unset(&self, position: Position) -> bool {
        let applied = self.positions.set_if_unset(position);
        if applied {
            self.log_position("set_if_unset", position);
        }
        applied
    }

    /// Overwrites the resume position. Used on controlled restarts.
    pub fn set_position(&self, position: Position) {
        self.positions.force_set(position);
        self.log_position("set", position);
    }

    pub fn query_position(&self) -> Position {
        self.positions.current()
    }

    fn log_position(&self, how: &str, position: Position) {
        log_event_with_fields(
            ReaderEvent::PositionUpdated,
            &[
                ("replset", &self.replset),
                ("how", how),
                ("position", &position.to_string()),
            ],
        );
    }

    /// Launches the fetch worker, and the drain worker if the current stage
    /// buffers to disk. Later calls are no-ops.
    ///
    /// # Errors
    ///
    /// `Runtime` if called outside a tokio runtime.
    pub fn start(&self) -> ReaderResult<()> {
        let runtime = Handle::try_current().map_err(|e| ReaderError::Runtime(e.to_string()))?;

        if self
            .started
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Ok(());
        }

        let connection = self
            .connection
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
            .ok_or_else(|| ReaderError::invariant("fetch worker connection already taken"))?;

        let worker = FetchWorker {
            reader_id: self.id,
            connection,
            stage: Arc::clone(&self.stage),
            positions: Arc::clone(&self.positions),
            overflow: Arc::clone(&self.overflow),
            metrics: Arc::clone(&self.metrics),
            spilled: Arc::clone(&self.spilled),
            handoff: self.handoff(),
            backoff: self.config.reconnect_backoff(),
        };
        runtime.spawn(worker.run());
        *self.runtime_slot() = Some(runtime.clone());

        if self.stage.current().is_disk_buffering() {
            self.spawn_drain(&runtime);
        }
        Ok(())
    }

    fn handoff(&self) -> Handoff {
        Handoff::new(
            self.handoff_tx.clone(),
            ShutdownSignal::new(self.shutdown_tx.subscribe()),
        )
    }

    fn spawn_drain(&self, runtime: &Handle) {
        if self
            .drain_active
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return;
        }

        let worker = DrainWorker {
            reader_id: self.id,
            replset: self.replset.clone(),
            stage: Arc::clone(&self.stage),
            overflow: Arc::clone(&self.overflow),
            metrics: Arc::clone(&self.metrics),
            spilled: Arc::clone(&self.spilled),
            handoff: self.handoff(),
            idle: self.config.drain_idle(),
            backoff: self.config.reconnect_backoff(),
            active: Arc::clone(&self.drain_active),
        };
        runtime.spawn(worker.run());
    }

    /// Waits for the next event or error, up to the configured read timeout.
    ///
    /// # Errors
    ///
    /// - `Timeout` if nothing arrived in time; the caller may poll again
    /// - `Closed` after `shutdown`
    /// - transient `Connect` / `Feed` / `DiskQueue` errors pushed by workers
    pub async fn next(&self) -> ReaderResult<Vec<u8>> {
        if *self.shutdown_tx.borrow() {
            return Err(ReaderError::Closed);
        }

        let mut rx = self.handoff_rx.lock().await;
        let timeout = self.config.read_timeout();
        match tokio::time::timeout(timeout, rx.recv()).await {
            Ok(Some(result)) => result,
            Ok(None) => Err(ReaderError::Closed),
            Err(_) => {
                self.metrics.increment_consumer_timeouts();
                Err(ReaderError::Timeout(timeout))
            }
        }
    }

    /// Records spilled but not yet drained.
    pub fn disk_backlog(&self) -> u64 {
        self.overflow.backlog()
    }

    pub fn metrics(&self) -> ReaderMetricsSnapshot {
        self.metrics.snapshot()
    }

    /// Whether a drain worker is currently running.
    pub fn is_draining(&self) -> bool {
        self.drain_active.load(Ordering::SeqCst)
    }

    /// Signals both workers to stop at their next suspension point.
    /// `next` returns `Closed` afterwards. The overflow queue stays open
    /// until the last worker lets go of it and is synced on drop.
    pub fn shutdown(&self) {
        if self.shutdown_tx.send_replace(true) {
            return;
        }
        log_event_with_fields(
            ReaderEvent::ShutdownRequested,
            &[
                ("replset", &self.replset),
                ("reader_id", &self.id.to_string()),
                ("position", &self.positions.current().to_string()),
                ("backlog", &self.overflow.backlog().to_string()),
            ],
        );
    }
}

impl<C: ChangeStreamConnector> Drop for EventReader<C> {
    fn drop(&mut self) {
        self.shutdown_tx.send_replace(true);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::feed::memory::{encode_event, ScriptedFeed};
    use std::time::Duration;
    use tempfile::TempDir;

    fn config(dir: &TempDir) -> ReaderConfig {
        let mut config = ReaderConfig::default();
        config.read_timeout_ms = 100;
        config.reconnect_backoff_ms = 10;
        config.drain_idle_ms = 10;
        config.disk_queue.directory = dir.path().to_path_buf();
        config
    }

    fn reader(feed: &ScriptedFeed, dir: &TempDir) -> EventReader<ScriptedFeed> {
        EventReader::new(
            ReplicaSetSource::new("mongodb://localhost:27017", "rs0"),
            feed.clone(),
            config(dir),
        )
        .unwrap()
    }

    #[test]
    fn test_invalid_config_rejected() {
        let dir = TempDir::new().unwrap();
        let mut config = config(&dir);
        config.handoff_capacity = 0;
        let result = EventReader::new(
            ReplicaSetSource::new("mongodb://localhost:27017", "rs0"),
            ScriptedFeed::default(),
            config,
        );
        assert!(matches!(result, Err(ReaderError::Config(_))));
    }

    #[test]
    fn test_start_outside_runtime_fails() {
        let dir = TempDir::new().unwrap();
        let reader = reader(&ScriptedFeed::default(), &dir);
        assert_eq!(reader.start().unwrap_err().code(), "CDC_RUNTIME_MISSING");
    }

    #[test]
    fn test_position_mutators() {
        let dir = TempDir::new().unwrap();
        let reader = reader(&ScriptedFeed::default(), &dir);

        assert!(reader.query_position().is_unset());
        assert!(reader.set_position_if_unset(Position::new(10)));
        assert!(!reader.set_position_if_unset(Position::new(20)));
        assert_eq!(reader.query_position(), Position::new(10));

        reader.set_position(Position::new(5));
        assert_eq!(reader.query_position(), Position::new(5));
    }

    #[test]
    fn test_disk_queue_introspection() {
        let dir = TempDir::new().unwrap();
        let reader = reader(&ScriptedFeed::default(), &dir);
        reader.set_stage(FetchStage::StoreDiskNoApply);
        reader.init_disk_queue("rs0-sync").unwrap();

        assert_eq!(reader.disk_queue_name(), "rs0-sync");
        assert_eq!(reader.query_position_from_disk_queue(), Position::ZERO);
        assert_eq!(reader.disk_backlog(), 0);
    }

    #[tokio::test]
    async fn test_next_times_out_then_delivers() {
        let dir = TempDir::new().unwrap();
        let feed = ScriptedFeed::new(Duration::from_millis(10));
        let reader = reader(&feed, &dir);
        reader.start().unwrap();

        let err = reader.next().await.unwrap_err();
        assert!(err.is_timeout());

        feed.push_event_at(Position::new(1));
        assert_eq!(reader.next().await.unwrap(), encode_event(Position::new(1)));
        assert_eq!(reader.metrics().consumer_timeouts, 1);
    }

    #[tokio::test]
    async fn test_shutdown_closes_next() {
        let dir = TempDir::new().unwrap();
        let reader = reader(&ScriptedFeed::default(), &dir);
        reader.start().unwrap();
        reader.shutdown();
        reader.shutdown();

        assert!(matches!(reader.next().await, Err(ReaderError::Closed)));
    }

    #[tokio::test]
    async fn test_drain_started_by_stage_change() {
        let dir = TempDir::new().unwrap();
        let reader = reader(&ScriptedFeed::default(), &dir);
        reader.start().unwrap();
        assert!(!reader.is_draining());

        reader.set_stage(FetchStage::StoreDiskNoApply);
        reader.init_disk_queue("rs0").unwrap();
        assert!(reader.is_draining());

        reader.set_stage(FetchStage::StoreDiskApply);
        assert!(reader.is_draining());

        reader.set_stage(FetchStage::DirectApply);
        tokio::time::timeout(Duration::from_secs(2), async {
            while reader.is_draining() {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_stage_change_from_plain_thread_starts_drain() {
        let dir = TempDir::new().unwrap();
        let feed = ScriptedFeed::new(Duration::from_secs(10));
        let reader = Arc::new(reader(&feed, &dir));
        reader.start().unwrap();

        let orchestrator = Arc::clone(&reader);
        std::thread::spawn(move || {
            orchestrator.set_stage(FetchStage::StoreDiskApply);
            orchestrator.init_disk_queue("rs0").unwrap();
        })
        .join()
        .unwrap();
        assert!(reader.is_draining());

        feed.push_event_at(Position::new(7));
        let event = tokio::time::timeout(Duration::from_secs(2), async {
            loop {
                match reader.next().await {
                    Err(err) if err.is_timeout() => continue,
                    other => return other,
                }
            }
        })
        .await
        .unwrap()
        .unwrap();

        assert_eq!(event, encode_event(Position::new(7)));
        assert_eq!(reader.metrics().events_drained, 1);
    }
}
