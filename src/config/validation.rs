//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Validate value ranges (scan delay, login concurrency, deadlines)
//! - Resolve derived defaults once validation passed
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: CoordinatorConfig → Result<(), Vec<ValidationError>>
//! - Runs before config is accepted into the system

use std::collections::HashSet;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use thiserror::Error;

use crate::config::schema::CoordinatorConfig;

/// A single semantic problem with the configuration.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ValidationError {
    #[error("The latitudes and longitudes of map.start and map.end must differ")]
    DegenerateMap,

    #[error("map.grid dimensions must be at least 1")]
    EmptyGrid,

    #[error("scan.scan_delay must be at least 10 (got {0})")]
    ScanDelayTooShort(u64),

    #[error("scan.simultaneous_logins must be at least 1")]
    NoLogins,

    #[error("scan.simultaneous_simulation must be at least 1")]
    NoSimulation,

    #[error("manager.authkey must not be empty")]
    EmptyAuthkey,

    #[error("manager.max_connections must be at least 1")]
    NoConnections,

    #[error("shutdown.{field} must be a non-negative number of seconds that fits a duration (got {value})")]
    InvalidDuration { field: &'static str, value: f64 },

    #[error("shutdown.poll_interval_ms must be greater than 0")]
    ZeroPollInterval,

    #[error("observability.metrics_address `{0}` is not a socket address")]
    MetricsAddress(String),
}

/// Check the configuration, collecting every violated rule.
pub fn validate_config(config: &CoordinatorConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    let map = &config.map;
    if map.start.0 == map.end.0 || map.start.1 == map.end.1 {
        errors.push(ValidationError::DegenerateMap);
    }
    if map.grid.0 == 0 || map.grid.1 == 0 {
        errors.push(ValidationError::EmptyGrid);
    }

    let scan = &config.scan;
    if scan.scan_delay < 10 {
        errors.push(ValidationError::ScanDelayTooShort(scan.scan_delay));
    }
    if scan.simultaneous_logins < 1 {
        errors.push(ValidationError::NoLogins);
    }
    if scan.simultaneous_simulation == Some(0) {
        errors.push(ValidationError::NoSimulation);
    }

    if config.manager.authkey.is_empty() {
        errors.push(ValidationError::EmptyAuthkey);
    }
    if config.manager.max_connections == 0 {
        errors.push(ValidationError::NoConnections);
    }

    let shutdown = &config.shutdown;
    check_seconds("deadline_secs", Some(shutdown.deadline_secs), &mut errors);
    check_seconds(
        "drain_writes_timeout_secs",
        shutdown.drain_writes_timeout_secs,
        &mut errors,
    );
    if shutdown.poll_interval_ms == 0 {
        errors.push(ValidationError::ZeroPollInterval);
    }

    let observability = &config.observability;
    if observability.metrics_enabled
        && observability.metrics_address.parse::<SocketAddr>().is_err()
    {
        errors.push(ValidationError::MetricsAddress(
            observability.metrics_address.clone(),
        ));
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

fn check_seconds(field: &'static str, value: Option<f64>, errors: &mut Vec<ValidationError>) {
    if let Some(value) = value {
        // Rejects negatives, NaN, infinities and values past `Duration::MAX`.
        if Duration::try_from_secs_f64(value).is_err() {
            errors.push(ValidationError::InvalidDuration { field, value });
        }
    }
}

/// Fill in derived defaults. Call only on a validated config.
///
/// `base` is the directory the data-directory probe starts from.
pub fn normalize(mut config: CoordinatorConfig, base: &Path) -> CoordinatorConfig {
    let scan = &mut config.scan;
    if scan.simultaneous_simulation.is_none() {
        scan.simultaneous_simulation = Some(scan.simultaneous_logins);
    }
    if scan.coroutines_limit.is_none() {
        scan.coroutines_limit = Some(config.map.grid.0.saturating_mul(config.map.grid.1));
    }
    if !scan.spin_pokestops {
        scan.item_limits = None;
    }

    let mut seen = HashSet::new();
    scan.proxies.retain(|proxy| seen.insert(proxy.clone()));

    if config.persistence.directory.is_none() {
        let parent = base.join("..");
        config.persistence.directory = Some(if parent.join("pickles").exists() {
            parent
        } else {
            base.to_path_buf()
        });
    }

    config
}

/// Resolve the data directory probe base for the current process.
pub fn default_base() -> PathBuf {
    PathBuf::from(".")
}
