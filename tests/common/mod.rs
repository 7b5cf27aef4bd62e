//! Shared utilities for the integration tests.

#![allow(dead_code)]

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;

use scan_coordinator::collab::Artifact;
use scan_coordinator::config::CoordinatorConfig;
use scan_coordinator::error::BoxError;

pub const AUTHKEY: &str = "test-authkey";

/// Config bound to an ephemeral TCP port with its data directory in `dir`.
pub fn test_config(dir: &Path, map_workers: bool) -> CoordinatorConfig {
    let mut config = CoordinatorConfig::default();
    config.manager.address = Some("127.0.0.1:0".to_string());
    config.manager.authkey = AUTHKEY.to_string();
    config.manager.map_workers = map_workers;
    config.persistence.directory = Some(dir.to_path_buf());
    config.shutdown.deadline_secs = 5.0;
    config.shutdown.poll_interval_ms = 20;
    config
}

/// Config bound to a unix socket inside `dir`.
#[cfg(unix)]
pub fn unix_config(dir: &Path) -> CoordinatorConfig {
    let mut config = test_config(dir, true);
    config.manager.address = Some(dir.join("coordinator.sock").display().to_string());
    config
}

/// Names of persisted artifacts, in the order they were attempted.
pub type PersistLog = Arc<Mutex<Vec<String>>>;

pub enum Behaviour {
    Succeed,
    Fail,
    Panic,
}

/// Artifact that records each persist attempt.
pub struct RecordingArtifact {
    name: String,
    log: PersistLog,
    behaviour: Behaviour,
}

impl RecordingArtifact {
    pub fn new(name: &str, log: &PersistLog, behaviour: Behaviour) -> Arc<dyn Artifact> {
        Arc::new(Self {
            name: name.to_string(),
            log: Arc::clone(log),
            behaviour,
        })
    }
}

#[async_trait]
impl Artifact for RecordingArtifact {
    fn name(&self) -> &str {
        &self.name
    }

    async fn persist(&self) -> Result<(), BoxError> {
        self.log.lock().push(self.name.clone());
        match self.behaviour {
            Behaviour::Succeed => Ok(()),
            Behaviour::Fail => Err(Box::new(std::io::Error::other("no space left on device"))),
            Behaviour::Panic => panic!("snapshot encoder crashed"),
        }
    }
}
