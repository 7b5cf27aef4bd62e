//! Startup orchestration.
//!
//! # Responsibilities
//! - Own the shared queues and the worker table (no global state)
//! - Claim the shared endpoint and publish the resources
//! - Hand out the pieces the drain orchestrator needs
//!
//! # Design Decisions
//! - Fail fast: a taken endpoint is fatal and carries the operator hint
//! - The worker table is only published when `manager.map_workers` is set
//! - Connections are started with `ignore_interrupts` unless a hook is supplied

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;

use crate::collab::{
    Artifact, ArtifactStore, Collaborators, IdleSessions, JsonArtifact, MemoryWriteQueue,
    RunningFlag, StandaloneSupervisor, StaticSpawnIndex,
};
use crate::config::CoordinatorConfig;
use crate::error::CoordinatorResult;
use crate::lifecycle::scheduler::Scheduler;
use crate::lifecycle::shutdown::{DrainOrchestrator, DrainSettings};
use crate::server::{
    ignore_interrupts, ChildInit, Endpoint, ProxyKind, SharedObject, SharedQueue,
    SharedStateClient, SharedStateServer, SharedTable,
};

pub const CAPTCHA_QUEUE: &str = "captcha_queue";
pub const EXTRA_QUEUE: &str = "extra_queue";
pub const WORKER_DICT: &str = "worker_dict";

/// The running coordinator: shared resources, their server, and the scheduler.
pub struct Coordinator {
    config: CoordinatorConfig,
    captcha_queue: Arc<SharedQueue>,
    extra_queue: Arc<SharedQueue>,
    worker_dict: Option<Arc<SharedTable>>,
    server: Arc<SharedStateServer>,
    scheduler: Arc<Scheduler>,
    running: RunningFlag,
}

impl Coordinator {
    /// Bind the endpoint, publish resources and start serving.
    pub async fn start(config: CoordinatorConfig) -> CoordinatorResult<Self> {
        Self::start_with_hook(config, Arc::new(ignore_interrupts)).await
    }

    /// Like [`Coordinator::start`] with a custom per-connection hook.
    pub async fn start_with_hook(
        config: CoordinatorConfig,
        on_child_init: ChildInit,
    ) -> CoordinatorResult<Self> {
        let directory = config.directory();
        let endpoint = Endpoint::resolve(config.manager.address.as_deref(), &directory);
        if let Endpoint::Unix(path) = &endpoint {
            if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                tokio::fs::create_dir_all(parent).await?;
            }
        }

        let server = SharedStateServer::bind(
            &endpoint,
            config.manager.authkey.clone(),
            config.manager.max_connections,
        )
        .await?;

        let captcha_queue = Arc::new(SharedQueue::new(CAPTCHA_QUEUE));
        let extra_queue = Arc::new(SharedQueue::new(EXTRA_QUEUE));
        let worker_dict = config
            .manager
            .map_workers
            .then(|| Arc::new(SharedTable::new()));

        let queue = Arc::clone(&captcha_queue);
        server.register_resource(
            CAPTCHA_QUEUE,
            ProxyKind::Queue,
            Arc::new(move || SharedObject::Queue(Arc::clone(&queue))),
        );
        let queue = Arc::clone(&extra_queue);
        server.register_resource(
            EXTRA_QUEUE,
            ProxyKind::Queue,
            Arc::new(move || SharedObject::Queue(Arc::clone(&queue))),
        );
        if let Some(table) = &worker_dict {
            let table = Arc::clone(table);
            server.register_resource(
                WORKER_DICT,
                ProxyKind::Table,
                Arc::new(move || SharedObject::Table(Arc::clone(&table))),
            );
        }

        server.start(on_child_init)?;

        tracing::info!(
            endpoint = %server.endpoint(),
            map_workers = worker_dict.is_some(),
            directory = %directory.display(),
            "Coordinator started"
        );

        Ok(Self {
            config,
            captcha_queue,
            extra_queue,
            worker_dict,
            server: Arc::new(server),
            scheduler: Arc::new(Scheduler::new()),
            running: RunningFlag::new(),
        })
    }

    pub fn config(&self) -> &CoordinatorConfig {
        &self.config
    }

    pub fn endpoint(&self) -> &Endpoint {
        self.server.endpoint()
    }

    pub fn server(&self) -> &Arc<SharedStateServer> {
        &self.server
    }

    pub fn scheduler(&self) -> &Arc<Scheduler> {
        &self.scheduler
    }

    pub fn running(&self) -> &RunningFlag {
        &self.running
    }

    pub fn captcha_queue(&self) -> &Arc<SharedQueue> {
        &self.captcha_queue
    }

    pub fn extra_queue(&self) -> &Arc<SharedQueue> {
        &self.extra_queue
    }

    pub fn worker_dict(&self) -> Option<&Arc<SharedTable>> {
        self.worker_dict.as_ref()
    }

    /// Client for this coordinator's own endpoint.
    pub fn client(&self) -> SharedStateClient {
        SharedStateClient::new(self.endpoint().clone(), self.config.manager.authkey.clone())
    }

    /// Drain orchestrator wired to this coordinator.
    pub fn orchestrator(&self, collaborators: Collaborators) -> DrainOrchestrator {
        DrainOrchestrator::new(
            self.running.clone(),
            Arc::clone(&self.scheduler),
            Arc::clone(&self.server),
            collaborators,
            DrainSettings::from(&self.config.shutdown),
        )
    }

    /// Collaborators for coordinator-only mode.
    ///
    /// Previous snapshots are loaded when `use_pickle` is set and written back
    /// during the drain: `accounts`, `forts`, `spawns`, and `cells` when cell
    /// caching is on.
    pub async fn standalone(&self, use_pickle: bool) -> (Arc<StandaloneSupervisor>, Collaborators) {
        let store = ArtifactStore::new(&self.config.directory());

        let supervisor = Arc::new(StandaloneSupervisor::new(
            self.running.clone(),
            Arc::clone(&self.captcha_queue),
            Arc::clone(&self.extra_queue),
            self.worker_dict.clone(),
            Duration::from_secs(self.config.scan.stat_refresh.max(1)),
        ));
        if use_pickle {
            if let Some(accounts) = load_snapshot::<BTreeMap<String, Value>>(&store, "accounts").await
            {
                supervisor.load_accounts(accounts);
            }
        }

        let accounts = Arc::clone(&supervisor);
        let mut artifacts: Vec<Arc<dyn Artifact>> = Vec::new();
        artifacts.push(Arc::new(JsonArtifact::new(
            "accounts",
            store.clone(),
            move || accounts.accounts(),
        )));

        let mut carried = vec!["forts"];
        if self.config.persistence.cache_cells {
            carried.push("cells");
        }
        for name in carried {
            let previous = if use_pickle {
                load_snapshot::<Value>(&store, name).await
            } else {
                None
            };
            let snapshot = previous.unwrap_or_else(|| Value::Array(Vec::new()));
            artifacts.push(Arc::new(JsonArtifact::new(name, store.clone(), move || {
                snapshot.clone()
            })));
        }

        let previous_spawns = if use_pickle {
            load_snapshot::<Vec<Value>>(&store, StaticSpawnIndex::SNAPSHOT_NAME).await
        } else {
            None
        };
        let spawns = match previous_spawns {
            Some(points) => StaticSpawnIndex::seeded(store, points),
            None => StaticSpawnIndex::new(store),
        };

        let collaborators = Collaborators {
            supervisor: supervisor.clone(),
            db: Arc::new(MemoryWriteQueue::new()),
            spawns: Arc::new(spawns),
            sessions: Arc::new(IdleSessions::new()),
            artifacts,
        };
        (supervisor, collaborators)
    }
}

async fn load_snapshot<T: serde::de::DeserializeOwned>(
    store: &ArtifactStore,
    name: &str,
) -> Option<T> {
    match store.load(name).await {
        Ok(snapshot) => snapshot,
        Err(e) => {
            tracing::warn!(artifact = name, error = %e, "Ignoring unreadable snapshot");
            None
        }
    }
}
