//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! config file (TOML)
//!     → loader.rs (parse & deserialize)
//!     → validation.rs (semantic checks, derived defaults)
//!     → CoordinatorConfig (validated, immutable)
//!     → shared by reference with startup and the drain orchestrator
//! ```
//!
//! # Design Decisions
//! - Config is immutable once loaded; there is no hot reload
//! - Only the map section is mandatory, everything else has defaults
//! - Validation separates syntactic (serde) from semantic checks

pub mod loader;
pub mod schema;
pub mod validation;

pub use loader::{load_config, ConfigError};
pub use schema::CoordinatorConfig;
pub use schema::ManagerConfig;
pub use schema::ShutdownConfig;
