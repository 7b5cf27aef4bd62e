//! Collaborators the coordinator drives but does not implement.
//!
//! # Data Flow
//! ```text
//! main ──start/launch──▶ Supervisor ──▶ workers (out of scope)
//! drain ──exit_progress / refresh_accounting──▶ Supervisor
//! drain ──persist──▶ Artifact (store.rs)
//! drain ──stop / pending──▶ DatabaseWriter
//! drain ──flush──▶ SpawnIndex
//! drain ──close_all──▶ Sessions
//! ```
//!
//! `standalone.rs` provides the implementations used when the coordinator
//! runs without a scanning backend attached.

pub mod standalone;
pub mod store;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::error::BoxError;

pub use standalone::{IdleSessions, MemoryWriteQueue, StandaloneSupervisor, StaticSpawnIndex};
pub use store::{ArtifactStore, JsonArtifact, PersistError};

/// "Still accepting new scheduling" flag shared with the supervisor.
///
/// The drain clears it first; the supervisor checks it before launching work.
#[derive(Debug, Clone)]
pub struct RunningFlag(Arc<AtomicBool>);

impl RunningFlag {
    pub fn new() -> Self {
        Self(Arc::new(AtomicBool::new(true)))
    }

    pub fn is_running(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    /// Clear the flag. Returns whether it was still set.
    pub fn stop(&self) -> bool {
        self.0.swap(false, Ordering::SeqCst)
    }
}

impl Default for RunningFlag {
    fn default() -> Self {
        Self::new()
    }
}

/// Options for the supervisor's main task.
#[derive(Debug, Clone, Copy, Default)]
pub struct LaunchOptions {
    /// Bootstrap even if spawn points are already known.
    pub bootstrap: bool,
    /// Load spawn points from the persisted snapshot.
    pub use_pickle: bool,
}

/// Oversees the worker pool.
#[async_trait]
pub trait Supervisor: Send + Sync {
    /// Prepare status reporting. Called once before `launch`.
    fn start(&self, status_bar: bool);

    /// Main long-running task. Returns when done or when `cancel` fires.
    async fn launch(&self, options: LaunchOptions, cancel: CancellationToken)
        -> Result<(), BoxError>;

    /// Reports progress while the drain waits for workers.
    async fn exit_progress(&self) -> Result<(), BoxError>;

    /// Bring process-wide accounting up to date before it is persisted.
    async fn refresh_accounting(&self) -> Result<(), BoxError>;
}

/// A named snapshot written during the drain.
#[async_trait]
pub trait Artifact: Send + Sync {
    fn name(&self) -> &str;

    async fn persist(&self) -> Result<(), BoxError>;
}

/// Consumer of the database write queue.
#[async_trait]
pub trait DatabaseWriter: Send + Sync {
    /// Stop accepting new write jobs. Jobs already queued keep draining.
    async fn stop(&self) -> Result<(), BoxError>;

    /// Jobs still queued.
    fn pending(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.pending() == 0
    }
}

/// Spawn-point index kept by the workers.
#[async_trait]
pub trait SpawnIndex: Send + Sync {
    /// Write the index out before the database writer drains.
    async fn flush(&self) -> Result<(), BoxError>;
}

/// Outward network sessions and connection pools.
#[async_trait]
pub trait Sessions: Send + Sync {
    /// Enable the hashing service. Startup only.
    async fn activate_hash_service(&self, key: Option<&str>) -> Result<(), BoxError>;

    async fn close_all(&self) -> Result<(), BoxError>;
}

/// Everything the drain talks to besides the server and the scheduler.
#[derive(Clone)]
pub struct Collaborators {
    pub supervisor: Arc<dyn Supervisor>,
    pub db: Arc<dyn DatabaseWriter>,
    pub spawns: Arc<dyn SpawnIndex>,
    pub sessions: Arc<dyn Sessions>,
    pub artifacts: Vec<Arc<dyn Artifact>>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn running_flag_clears_once() {
        let flag = RunningFlag::new();
        let shared = flag.clone();
        assert!(shared.is_running());

        assert!(flag.stop());
        assert!(!flag.stop());
        assert!(!shared.is_running());
    }
}
