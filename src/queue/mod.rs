//! Queue primitives shared across process boundaries.
//!
//! # Data Flow
//! ```text
//! producer ──enqueue──▶ BoundedQueue ──dequeue──▶ consumer
//!     │                      │
//!     └─ wait_until_below ◀──┘  (not_full signalled on every dequeue)
//! ```
//!
//! # Design Decisions
//! - Capacity is advisory: `enqueue` never blocks, only the wait operation checks it
//! - Monitor based (mutex + condition variables), no polling loops
//! - Safe under true parallelism, so the shared state server can hand it to blocking threads

pub mod bounded;

pub use bounded::BoundedQueue;
