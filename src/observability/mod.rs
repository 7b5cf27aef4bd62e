//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! All subsystems produce:
//!     → logging.rs (structured log events via `tracing`)
//!     → metrics.rs (queue depth, wait latency, drain step outcomes)
//!
//! Consumers:
//!     → scan.log in the data directory, or stdout with --no-status-bar
//!     → Prometheus scrape endpoint (optional)
//! ```
//!
//! # Design Decisions
//! - Log level from CLI, overridable with RUST_LOG
//! - Metrics are cheap (atomic updates), recorded unconditionally; without an
//!   installed recorder they are no-ops

pub mod logging;
pub mod metrics;
