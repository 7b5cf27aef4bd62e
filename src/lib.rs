//! Scan coordinator library.
//!
//! Shared work queues and the worker table are published to worker
//! processes by the shared state server; the drain orchestrator takes the
//! whole process down in order when a termination signal arrives.

pub mod collab;
pub mod config;
pub mod error;
pub mod lifecycle;
pub mod observability;
pub mod queue;
pub mod server;

pub use config::CoordinatorConfig;
pub use error::{CoordinatorError, CoordinatorResult};
pub use lifecycle::{Coordinator, DrainOrchestrator, DrainReport, DrainState, Scheduler};
pub use queue::BoundedQueue;
pub use server::{SharedStateClient, SharedStateServer};
