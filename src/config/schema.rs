//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the
//! coordinator. All types derive Serde traits for deserialization from
//! config files. Only `[map]` is mandatory; every other section has defaults.

use std::collections::HashMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Root configuration for the scan coordinator.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
pub struct CoordinatorConfig {
    /// Scan area (required).
    pub map: MapConfig,

    /// Shared state server settings.
    #[serde(default)]
    pub manager: ManagerConfig,

    /// Worker pacing and limits, read by the scanning collaborators.
    #[serde(default)]
    pub scan: ScanConfig,

    /// On-disk state location and optional caches.
    #[serde(default)]
    pub persistence: PersistenceConfig,

    /// Drain timings.
    #[serde(default)]
    pub shutdown: ShutdownConfig,

    /// Observability settings.
    #[serde(default)]
    pub observability: ObservabilityConfig,
}

/// Geographic bounds of the scanned area.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct MapConfig {
    /// Grid dimensions (rows, columns).
    pub grid: (u32, u32),

    /// First corner (latitude, longitude).
    pub start: (f64, f64),

    /// Opposite corner (latitude, longitude).
    pub end: (f64, f64),
}

impl Default for MapConfig {
    fn default() -> Self {
        Self {
            grid: (4, 4),
            start: (40.7128, -74.0060),
            end: (40.7614, -73.9776),
        }
    }
}

/// Shared state server configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ManagerConfig {
    /// `host:port` or a Unix socket path. Defaults to a socket in the data directory.
    pub address: Option<String>,

    /// Secret presented by connecting worker processes.
    pub authkey: String,

    /// Publish the worker status table to other processes.
    pub map_workers: bool,

    /// Maximum concurrent connections (backpressure on the accept loop).
    pub max_connections: usize,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            address: None,
            authkey: "m3wtw0".to_string(),
            map_workers: true,
            max_connections: 256,
        }
    }
}

/// Encounter policy for the scanning workers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum EncounterPolicy {
    #[default]
    None,
    Notifying,
    All,
}

/// Worker pacing settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ScanConfig {
    /// Seconds between visits of the same point (minimum 10).
    pub scan_delay: u64,

    pub simultaneous_logins: u32,

    /// Defaults to `simultaneous_logins`.
    pub simultaneous_simulation: Option<u32>,

    /// Defaults to the number of grid cells.
    pub coroutines_limit: Option<u32>,

    /// Captcha queue depth producers wait on; 0 disables the wait.
    pub max_captchas: i64,

    pub encounter: EncounterPolicy,

    pub spin_pokestops: bool,

    /// Per-item bag limits; ignored unless `spin_pokestops` is enabled.
    pub item_limits: Option<HashMap<String, u32>>,

    /// Outgoing proxies, de-duplicated on load.
    pub proxies: Vec<String>,

    /// Key handed to the hashing service at startup.
    pub hash_key: Option<String>,

    /// Seconds between status refreshes.
    pub stat_refresh: u64,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            scan_delay: 10,
            simultaneous_logins: 4,
            simultaneous_simulation: None,
            coroutines_limit: None,
            max_captchas: 0,
            encounter: EncounterPolicy::None,
            spin_pokestops: false,
            item_limits: None,
            proxies: Vec::new(),
            hash_key: None,
            stat_refresh: 5,
        }
    }
}

/// Persistence configuration.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct PersistenceConfig {
    /// Data directory. Defaults to `..` when `../pickles` exists, else the working directory.
    pub directory: Option<PathBuf>,

    /// Persist the cell-id cache on shutdown.
    pub cache_cells: bool,
}

/// Drain timing configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ShutdownConfig {
    /// Global deadline for in-flight work, in seconds.
    pub deadline_secs: f64,

    /// Interval between pending-write progress reports, in milliseconds.
    pub poll_interval_ms: u64,

    /// Upper bound for draining database writes, in seconds. Unbounded when unset.
    pub drain_writes_timeout_secs: Option<f64>,
}

impl Default for ShutdownConfig {
    fn default() -> Self {
        Self {
            deadline_secs: 40.0,
            poll_interval_ms: 500,
            drain_writes_timeout_secs: None,
        }
    }
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Enable metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "warn".to_string(),
            metrics_enabled: false,
            metrics_address: "127.0.0.1:9090".to_string(),
        }
    }
}

impl CoordinatorConfig {
    /// Resolved data directory.
    pub fn directory(&self) -> PathBuf {
        self.persistence
            .directory
            .clone()
            .unwrap_or_else(|| PathBuf::from("."))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn map_section_is_required() {
        let err = toml::from_str::<CoordinatorConfig>("[manager]\nmap_workers = false\n");
        assert!(err.is_err());
    }

    #[test]
    fn minimal_config_uses_defaults() {
        let config: CoordinatorConfig = toml::from_str(
            r#"
            [map]
            grid = [2, 3]
            start = [1.0, 2.0]
            end = [1.5, 2.5]
            "#,
        )
        .unwrap();

        assert_eq!(config.map.grid, (2, 3));
        assert_eq!(config.manager.authkey, "m3wtw0");
        assert!(config.manager.map_workers);
        assert_eq!(config.shutdown.deadline_secs, 40.0);
        assert_eq!(config.shutdown.poll_interval_ms, 500);
        assert_eq!(config.scan.encounter, EncounterPolicy::None);
    }

    #[test]
    fn encounter_policy_parses_snake_case() {
        let config: CoordinatorConfig = toml::from_str(
            r#"
            [map]
            grid = [1, 1]
            start = [0.0, 0.0]
            end = [1.0, 1.0]

            [scan]
            encounter = "notifying"
            "#,
        )
        .unwrap();
        assert_eq!(config.scan.encounter, EncounterPolicy::Notifying);
    }
}
