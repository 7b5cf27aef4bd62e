//! Collaborators for running the coordinator on its own.
//!
//! The supervisor here keeps the published worker table and the accounts
//! book up to date but schedules no scanning work. Worker processes attach
//! through the shared state server and do the actual polling.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;

use crate::collab::store::ArtifactStore;
use crate::collab::{DatabaseWriter, LaunchOptions, RunningFlag, Sessions, SpawnIndex, Supervisor};
use crate::error::BoxError;
use crate::queue::BoundedQueue;
use crate::server::{SharedQueue, SharedTable};

/// Status written into the worker table once the drain starts.
pub const EXITING_STATUS: &str = "exiting";

/// Supervisor that maintains shared bookkeeping and waits for cancellation.
pub struct StandaloneSupervisor {
    running: RunningFlag,
    extra_queue: Arc<SharedQueue>,
    captcha_queue: Arc<SharedQueue>,
    workers: Option<Arc<SharedTable>>,
    accounts: Mutex<BTreeMap<String, Value>>,
    stat_refresh: Duration,
    status_bar: AtomicBool,
}

impl StandaloneSupervisor {
    pub fn new(
        running: RunningFlag,
        captcha_queue: Arc<SharedQueue>,
        extra_queue: Arc<SharedQueue>,
        workers: Option<Arc<SharedTable>>,
        stat_refresh: Duration,
    ) -> Self {
        Self {
            running,
            extra_queue,
            captcha_queue,
            workers,
            accounts: Mutex::new(BTreeMap::new()),
            stat_refresh,
            status_bar: AtomicBool::new(false),
        }
    }

    /// Snapshot of the accounts book, persisted as the `accounts` artifact.
    pub fn accounts(&self) -> BTreeMap<String, Value> {
        self.accounts.lock().clone()
    }

    /// Seed the accounts book, e.g. from a previous snapshot.
    pub fn load_accounts(&self, accounts: BTreeMap<String, Value>) {
        let mut book = self.accounts.lock();
        for (username, account) in accounts {
            book.entry(username).or_insert(account);
        }
    }

    fn report_status(&self) {
        let workers = self.workers.as_ref().map(|table| table.len());
        tracing::info!(
            captcha_queue = self.captcha_queue.len(),
            extra_queue = self.extra_queue.len(),
            workers = ?workers,
            accounts = self.accounts.lock().len(),
            "Coordinator status"
        );
    }
}

#[async_trait]
impl Supervisor for StandaloneSupervisor {
    fn start(&self, status_bar: bool) {
        self.status_bar.store(status_bar, Ordering::Relaxed);
        tracing::info!(status_bar, "Supervisor started");
    }

    async fn launch(
        &self,
        options: LaunchOptions,
        cancel: CancellationToken,
    ) -> Result<(), BoxError> {
        tracing::info!(
            bootstrap = options.bootstrap,
            use_pickle = options.use_pickle,
            "Supervisor launched"
        );

        let mut ticker = tokio::time::interval(self.stat_refresh);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    if !self.running.is_running() {
                        break;
                    }
                    self.report_status();
                }
            }
        }

        tracing::debug!("Supervisor launch loop ended");
        Ok(())
    }

    async fn exit_progress(&self) -> Result<(), BoxError> {
        let Some(workers) = &self.workers else {
            return Ok(());
        };
        for mut entry in workers.iter_mut() {
            match entry.value_mut() {
                Value::Object(status) => {
                    status.insert("status".to_string(), json!(EXITING_STATUS));
                }
                other => *other = json!({ "status": EXITING_STATUS }),
            }
        }
        tracing::info!(workers = workers.len(), "Workers marked as exiting");
        Ok(())
    }

    async fn refresh_accounting(&self) -> Result<(), BoxError> {
        let mut book = self.accounts.lock();
        let mut moved = 0usize;
        while let Some(account) = self.extra_queue.try_dequeue() {
            let username = account
                .get("username")
                .and_then(Value::as_str)
                .map(str::to_string)
                .unwrap_or_else(|| format!("unnamed-{}", book.len()));
            book.insert(username, account);
            moved += 1;
        }
        tracing::debug!(moved, accounts = book.len(), "Accounting refreshed");
        Ok(())
    }
}

/// In-memory database write queue.
///
/// Jobs are taken off by whatever consumes them through [`MemoryWriteQueue::take`].
pub struct MemoryWriteQueue {
    jobs: BoundedQueue<Value>,
    accepting: AtomicBool,
}

impl MemoryWriteQueue {
    pub fn new() -> Self {
        Self {
            jobs: BoundedQueue::new("db_queue"),
            accepting: AtomicBool::new(true),
        }
    }

    /// Queue a write job. Returns `false` once the writer has been stopped.
    pub fn submit(&self, job: Value) -> bool {
        if !self.accepting.load(Ordering::SeqCst) {
            return false;
        }
        self.jobs.enqueue(job);
        true
    }

    /// Remove the next job, if any.
    pub fn take(&self) -> Option<Value> {
        self.jobs.try_dequeue()
    }

    pub fn is_accepting(&self) -> bool {
        self.accepting.load(Ordering::SeqCst)
    }
}

impl Default for MemoryWriteQueue {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl DatabaseWriter for MemoryWriteQueue {
    async fn stop(&self) -> Result<(), BoxError> {
        self.accepting.store(false, Ordering::SeqCst);
        tracing::debug!(pending = self.jobs.len(), "Database writer stopped");
        Ok(())
    }

    fn pending(&self) -> usize {
        self.jobs.len()
    }
}

/// Spawn-point index held in memory and flushed as the `spawns` snapshot.
///
/// An index that was neither seeded nor given points leaves the snapshot on
/// disk alone.
pub struct StaticSpawnIndex {
    store: ArtifactStore,
    points: Mutex<Vec<Value>>,
    dirty: AtomicBool,
}

impl StaticSpawnIndex {
    pub const SNAPSHOT_NAME: &'static str = "spawns";

    pub fn new(store: ArtifactStore) -> Self {
        Self {
            store,
            points: Mutex::new(Vec::new()),
            dirty: AtomicBool::new(false),
        }
    }

    /// Start from a previously persisted snapshot.
    pub fn seeded(store: ArtifactStore, points: Vec<Value>) -> Self {
        Self {
            store,
            points: Mutex::new(points),
            dirty: AtomicBool::new(true),
        }
    }

    pub fn insert(&self, point: Value) {
        self.points.lock().push(point);
        self.dirty.store(true, Ordering::SeqCst);
    }

    pub fn len(&self) -> usize {
        self.points.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.lock().is_empty()
    }
}

#[async_trait]
impl SpawnIndex for StaticSpawnIndex {
    async fn flush(&self) -> Result<(), BoxError> {
        if !self.dirty.load(Ordering::SeqCst) {
            tracing::debug!("Spawn index untouched, keeping snapshot");
            return Ok(());
        }
        let points = self.points.lock().clone();
        self.store.dump(Self::SNAPSHOT_NAME, &points).await?;
        Ok(())
    }
}

/// Session pool with nothing to hold open.
#[derive(Debug, Default)]
pub struct IdleSessions {
    hashing: AtomicBool,
    closed: AtomicBool,
}

impl IdleSessions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Sessions for IdleSessions {
    async fn activate_hash_service(&self, key: Option<&str>) -> Result<(), BoxError> {
        let enabled = key.is_some_and(|key| !key.is_empty());
        self.hashing.store(enabled, Ordering::SeqCst);
        tracing::info!(enabled, "Hash service configured");
        Ok(())
    }

    async fn close_all(&self) -> Result<(), BoxError> {
        if !self.closed.swap(true, Ordering::SeqCst) {
            tracing::debug!("Sessions closed");
        }
        Ok(())
    }
}
