//! Endpoint listener with connection backpressure.
//!
//! # Responsibilities
//! - Claim the configured endpoint (TCP port or Unix socket path)
//! - Report an already-claimed endpoint as `AddressInUse`
//! - Enforce max_connections limit via semaphore

use std::sync::Arc;

use tokio::net::{TcpListener, TcpStream};
#[cfg(unix)]
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::Semaphore;

use crate::error::{CoordinatorError, CoordinatorResult};
use crate::server::endpoint::Endpoint;

enum Inner {
    Tcp(TcpListener),
    #[cfg(unix)]
    Unix(UnixListener),
}

/// An accepted stream, tagged by transport.
pub enum Accepted {
    Tcp(TcpStream),
    #[cfg(unix)]
    Unix(UnixStream),
}

/// A bound endpoint that limits concurrent connections.
///
/// Uses a semaphore to enforce `max_connections`. When the limit is reached,
/// new connections will wait until a slot becomes available.
pub struct Listener {
    inner: Inner,
    /// Endpoint as actually bound (ephemeral ports resolved).
    local: Endpoint,
    connection_limit: Arc<Semaphore>,
}

impl Listener {
    /// Claim the endpoint.
    ///
    /// An endpoint held by another process fails with `AddressInUse`. A stale
    /// socket file is reported the same way: only the operator can tell
    /// whether its owner is still alive.
    pub async fn bind(endpoint: &Endpoint, max_connections: usize) -> CoordinatorResult<Self> {
        let in_use = |source: std::io::Error| {
            if source.kind() == std::io::ErrorKind::AddrInUse {
                CoordinatorError::AddressInUse {
                    endpoint: endpoint.clone(),
                    source,
                }
            } else {
                CoordinatorError::Io(source)
            }
        };

        let (inner, local) = match endpoint {
            Endpoint::Tcp(address) => {
                let listener = TcpListener::bind(address.as_str()).await.map_err(in_use)?;
                let local = Endpoint::Tcp(listener.local_addr()?.to_string());
                (Inner::Tcp(listener), local)
            }
            #[cfg(unix)]
            Endpoint::Unix(path) => {
                let listener = UnixListener::bind(path).map_err(in_use)?;
                (Inner::Unix(listener), endpoint.clone())
            }
            #[cfg(not(unix))]
            Endpoint::Unix(path) => {
                return Err(CoordinatorError::Io(std::io::Error::new(
                    std::io::ErrorKind::Unsupported,
                    format!("unix sockets are not available here: {}", path.display()),
                )));
            }
        };

        tracing::info!(
            endpoint = %local,
            max_connections,
            "Shared endpoint bound"
        );

        Ok(Self {
            inner,
            local,
            connection_limit: Arc::new(Semaphore::new(max_connections)),
        })
    }

    /// Accept a new connection, respecting the connection limit.
    ///
    /// Returns the stream, a peer description and a permit that must be held
    /// for the connection's lifetime.
    pub async fn accept(&self) -> CoordinatorResult<(Accepted, String, ConnectionPermit)> {
        // Acquire permit first (backpressure)
        let permit = self
            .connection_limit
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| CoordinatorError::ServerClosed)?;

        let (stream, peer) = match &self.inner {
            Inner::Tcp(listener) => {
                let (stream, addr) = listener.accept().await?;
                (Accepted::Tcp(stream), addr.to_string())
            }
            #[cfg(unix)]
            Inner::Unix(listener) => {
                let (stream, _) = listener.accept().await?;
                (Accepted::Unix(stream), "unix".to_string())
            }
        };

        tracing::debug!(
            peer = %peer,
            available_permits = self.connection_limit.available_permits(),
            "Connection accepted"
        );

        Ok((stream, peer, ConnectionPermit { _permit: permit }))
    }

    /// The endpoint this listener is bound to.
    pub fn local_endpoint(&self) -> &Endpoint {
        &self.local
    }

    /// Get current available connection slots.
    pub fn available_permits(&self) -> usize {
        self.connection_limit.available_permits()
    }
}

/// A permit representing a connection slot.
///
/// When dropped, the connection slot is released back to the pool.
#[derive(Debug)]
pub struct ConnectionPermit {
    _permit: tokio::sync::OwnedSemaphorePermit,
}
