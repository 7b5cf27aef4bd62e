//! Shared endpoint addressing.

use std::fmt;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};

/// Socket file created in the data directory when no address is configured.
pub const DEFAULT_SOCKET_NAME: &str = "coordinator.sock";

/// Fallback TCP address on platforms without Unix sockets.
pub const DEFAULT_TCP_ADDRESS: &str = "127.0.0.1:5001";

/// Where the shared state server listens.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Endpoint {
    /// Network address (`host:port`).
    Tcp(String),
    /// Local socket path.
    Unix(PathBuf),
}

impl Endpoint {
    /// Interpret a configured address.
    ///
    /// Anything that looks like `host:port` is a network address; everything
    /// else is taken as a socket path.
    pub fn parse(address: &str) -> Self {
        if address.parse::<SocketAddr>().is_ok() || looks_like_host_port(address) {
            Endpoint::Tcp(address.to_string())
        } else {
            Endpoint::Unix(PathBuf::from(address))
        }
    }

    /// Resolve the configured address, or the platform default.
    pub fn resolve(address: Option<&str>, directory: &Path) -> Self {
        match address {
            Some(address) => Self::parse(address),
            None if cfg!(unix) => Endpoint::Unix(directory.join(DEFAULT_SOCKET_NAME)),
            None => Endpoint::Tcp(DEFAULT_TCP_ADDRESS.to_string()),
        }
    }

    pub fn is_unix(&self) -> bool {
        matches!(self, Endpoint::Unix(_))
    }

    /// Operator-facing remediation when the endpoint is already taken.
    pub fn in_use_hint(&self) -> String {
        match self {
            Endpoint::Tcp(address) => format!(
                "Another instance is running with the same manager address ({}). \
                 Stop that process or change manager.address",
                address
            ),
            Endpoint::Unix(path) => format!(
                "Another instance is running with the same socket. Stop that process or, \
                 if you are sure no other instance is running: rm {}",
                path.display()
            ),
        }
    }
}

fn looks_like_host_port(address: &str) -> bool {
    if address.contains('/') {
        return false;
    }
    match address.rsplit_once(':') {
        Some((host, port)) => !host.is_empty() && port.parse::<u16>().is_ok(),
        None => false,
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Endpoint::Tcp(address) => write!(f, "tcp://{}", address),
            Endpoint::Unix(path) => write!(f, "unix://{}", path.display()),
        }
    }
}
