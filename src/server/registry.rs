//! Published resource registry.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::error::{CoordinatorError, CoordinatorResult};
use crate::queue::BoundedQueue;

/// Queue published to worker processes.
pub type SharedQueue = BoundedQueue<serde_json::Value>;

/// Table published to worker processes (worker id → status).
pub type SharedTable = DashMap<String, serde_json::Value>;

/// How remote processes may use a resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProxyKind {
    /// FIFO operations only.
    Queue,
    /// Key lookup, update, delete and iteration.
    Table,
}

/// A live shared object.
#[derive(Clone)]
pub enum SharedObject {
    Queue(Arc<SharedQueue>),
    Table(Arc<SharedTable>),
}

impl SharedObject {
    pub fn kind(&self) -> ProxyKind {
        match self {
            SharedObject::Queue(_) => ProxyKind::Queue,
            SharedObject::Table(_) => ProxyKind::Table,
        }
    }
}

/// Produces the object behind a registered name.
pub type Factory = Arc<dyn Fn() -> SharedObject + Send + Sync>;

struct Registration {
    kind: ProxyKind,
    factory: Factory,
}

/// Name → resource map consulted by every lookup.
#[derive(Default)]
pub struct Registry {
    entries: RwLock<HashMap<String, Registration>>,
    closed: AtomicBool,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Declare a resource available for lookup. Re-registering a name replaces it.
    pub fn register(&self, name: impl Into<String>, kind: ProxyKind, factory: Factory) {
        let name = name.into();
        let replaced = self
            .entries
            .write()
            .insert(name.clone(), Registration { kind, factory })
            .is_some();

        tracing::debug!(resource = %name, ?kind, replaced, "Resource registered");
    }

    /// Resolve a name to its live object.
    pub fn lookup(&self, name: &str) -> CoordinatorResult<SharedObject> {
        if self.is_closed() {
            return Err(CoordinatorError::ServerClosed);
        }
        let entries = self.entries.read();
        let registration = entries
            .get(name)
            .ok_or_else(|| CoordinatorError::NotRegistered(name.to_string()))?;

        let object = (registration.factory)();
        if object.kind() != registration.kind {
            return Err(CoordinatorError::WrongKind(name.to_string()));
        }
        Ok(object)
    }

    /// Declared proxy kind of a resource.
    pub fn describe(&self, name: &str) -> CoordinatorResult<ProxyKind> {
        if self.is_closed() {
            return Err(CoordinatorError::ServerClosed);
        }
        self.entries
            .read()
            .get(name)
            .map(|registration| registration.kind)
            .ok_or_else(|| CoordinatorError::NotRegistered(name.to_string()))
    }

    pub fn lookup_queue(&self, name: &str) -> CoordinatorResult<Arc<SharedQueue>> {
        match self.lookup(name)? {
            SharedObject::Queue(queue) => Ok(queue),
            SharedObject::Table(_) => Err(CoordinatorError::WrongKind(name.to_string())),
        }
    }

    pub fn lookup_table(&self, name: &str) -> CoordinatorResult<Arc<SharedTable>> {
        match self.lookup(name)? {
            SharedObject::Table(table) => Ok(table),
            SharedObject::Queue(_) => Err(CoordinatorError::WrongKind(name.to_string())),
        }
    }

    /// Registered names with their kinds, sorted by name.
    pub fn resources(&self) -> CoordinatorResult<Vec<(String, ProxyKind)>> {
        if self.is_closed() {
            return Err(CoordinatorError::ServerClosed);
        }
        let mut resources: Vec<_> = self
            .entries
            .read()
            .iter()
            .map(|(name, registration)| (name.clone(), registration.kind))
            .collect();
        resources.sort_by(|a, b| a.0.cmp(&b.0));
        Ok(resources)
    }

    /// Make every later lookup fail with `ServerClosed`.
    pub fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn queue_factory(queue: &Arc<SharedQueue>) -> Factory {
        let queue = Arc::clone(queue);
        Arc::new(move || SharedObject::Queue(Arc::clone(&queue)))
    }

    #[test]
    fn lookup_returns_the_same_object() {
        let registry = Registry::new();
        let queue = Arc::new(SharedQueue::new("captcha_queue"));
        registry.register("captcha_queue", ProxyKind::Queue, queue_factory(&queue));

        let found = registry.lookup_queue("captcha_queue").unwrap();
        found.enqueue(serde_json::json!("token"));
        assert_eq!(queue.len(), 1);
    }

    #[test]
    fn unknown_name_is_not_registered() {
        let registry = Registry::new();
        let err = registry.lookup("worker_dict").err().unwrap();
        assert!(matches!(err, CoordinatorError::NotRegistered(name) if name == "worker_dict"));
    }

    #[test]
    fn kind_mismatch_is_reported() {
        let registry = Registry::new();
        let queue = Arc::new(SharedQueue::new("extra_queue"));
        registry.register("extra_queue", ProxyKind::Queue, queue_factory(&queue));
        registry.register("mislabelled", ProxyKind::Table, queue_factory(&queue));

        assert!(matches!(
            registry.lookup_table("extra_queue").err().unwrap(),
            CoordinatorError::WrongKind(_)
        ));
        assert!(matches!(
            registry.lookup("mislabelled").err().unwrap(),
            CoordinatorError::WrongKind(_)
        ));
    }

    #[test]
    fn closed_registry_rejects_lookups() {
        let registry = Registry::new();
        let table = Arc::new(SharedTable::new());
        registry.register(
            "worker_dict",
            ProxyKind::Table,
            Arc::new(move || SharedObject::Table(Arc::clone(&table))),
        );

        registry.close();
        assert!(matches!(
            registry.lookup("worker_dict").err().unwrap(),
            CoordinatorError::ServerClosed
        ));
        assert!(registry.resources().is_err());
    }
}
