//! Lifecycle management subsystem.
//!
//! # Data Flow
//! ```text
//! Startup (startup.rs):
//!     Config → Bind endpoint → Publish queues/table → Serve connections
//!
//! Run (scheduler.rs):
//!     Supervisor launch + other units, each holding a child of the root token
//!
//! Signals (signals.rs):
//!     SIGTERM/SIGINT → cancel root token (once)
//!
//! Drain (shutdown.rs):
//!     Cancel → Await tasks → Persist → Drain writes → Close resources → Done
//! ```
//!
//! # Design Decisions
//! - Ordered startup: config first, then the endpoint, then connections
//! - Ordered shutdown with per-step fault containment (step.rs)
//! - Awaiting tasks has a deadline; what is left is abandoned, not retried

pub mod scheduler;
pub mod shutdown;
pub mod signals;
pub mod startup;
pub mod state;
pub mod step;

pub use scheduler::{AwaitReport, Scheduler};
pub use shutdown::{ArtifactOutcome, DrainOrchestrator, DrainReport, DrainSettings};
pub use startup::Coordinator;
pub use state::DrainState;
