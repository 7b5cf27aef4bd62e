//! Shared state server.
//!
//! # Data Flow
//! ```text
//! worker process ──(TCP / unix socket, Bearer authkey)──▶ listener.rs
//!     → connection.rs (on_child_init hook, stop token, tracking)
//!     → routes.rs (axum router: queues / tables)
//!     → registry.rs (name → SharedObject)
//! ```
//!
//! # Design Decisions
//! - Binding is the single-instance check: the OS refuses a second bind
//! - Connection tasks only observe the server's stop token, never the root
//!   cancellation token of the coordinator
//! - Shutdown is idempotent and always releases the endpoint (socket file included)

pub mod auth;
pub mod client;
pub mod connection;
pub mod endpoint;
pub mod listener;
pub mod protocol;
pub mod registry;
pub mod routes;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use hyper_util::rt::TokioIo;
use hyper_util::service::TowerToHyperService;
use parking_lot::Mutex;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::task::{JoinHandle, JoinSet};
use tokio_util::sync::CancellationToken;

use crate::error::{CoordinatorError, CoordinatorResult};
use crate::observability::metrics;

pub use client::{RemoteQueue, RemoteTable, SharedStateClient};
pub use connection::{ignore_interrupts, ChildInit, ConnectionContext};
pub use endpoint::Endpoint;
pub use registry::{Factory, ProxyKind, SharedObject, SharedQueue, SharedTable};

use auth::AuthKey;
use connection::{ConnectionId, ConnectionTracker};
use listener::{Accepted, ConnectionPermit, Listener};
use registry::Registry;

/// How long in-flight requests may finish after a stop before they are aborted.
const CONNECTION_GRACE: Duration = Duration::from_secs(1);

/// Publishes named queues and tables to other processes.
pub struct SharedStateServer {
    endpoint: Endpoint,
    authkey: AuthKey,
    registry: Arc<Registry>,
    /// Bound listener, handed to the accept loop by `start`.
    listener: Mutex<Option<Listener>>,
    stop: CancellationToken,
    accept_task: Mutex<Option<JoinHandle<()>>>,
    tracker: ConnectionTracker,
    closed: AtomicBool,
}

impl SharedStateServer {
    /// Claim the endpoint. Fails with `AddressInUse` if another process holds it.
    pub async fn bind(
        endpoint: &Endpoint,
        authkey: impl Into<String>,
        max_connections: usize,
    ) -> CoordinatorResult<Self> {
        let listener = Listener::bind(endpoint, max_connections).await?;
        Ok(Self {
            endpoint: listener.local_endpoint().clone(),
            authkey: AuthKey::new(authkey),
            registry: Arc::new(Registry::new()),
            listener: Mutex::new(Some(listener)),
            stop: CancellationToken::new(),
            accept_task: Mutex::new(None),
            tracker: ConnectionTracker::new(),
            closed: AtomicBool::new(false),
        })
    }

    /// The endpoint as bound (ephemeral TCP ports resolved).
    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    /// Declare a resource available for remote lookup.
    pub fn register_resource(&self, name: impl Into<String>, kind: ProxyKind, factory: Factory) {
        self.registry.register(name, kind, factory);
    }

    /// In-process lookup, with the same errors remote callers see.
    pub fn lookup(&self, name: &str) -> CoordinatorResult<SharedObject> {
        self.registry.lookup(name)
    }

    /// Launch the accept loop in a background task.
    ///
    /// `on_child_init` runs once per accepted connection, before the
    /// connection is served.
    pub fn start(&self, on_child_init: ChildInit) -> CoordinatorResult<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(CoordinatorError::ServerClosed);
        }
        let listener = self.listener.lock().take().ok_or_else(|| {
            CoordinatorError::InvalidArgument("shared state server already started".to_string())
        })?;

        let router = routes::build_router(Arc::clone(&self.registry), self.authkey.clone());
        let accept = AcceptLoop {
            listener,
            router,
            on_child_init,
            stop: self.stop.clone(),
            tracker: self.tracker.clone(),
        };
        *self.accept_task.lock() = Some(tokio::spawn(accept.run()));

        tracing::info!(endpoint = %self.endpoint, "Shared state server started");
        Ok(())
    }

    /// Connections currently being served.
    pub fn active_connections(&self) -> u64 {
        self.tracker.active_count()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Stop accepting, release the endpoint and fail later lookups with
    /// `ServerClosed`. A second call is a no-op.
    pub async fn shutdown(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }

        self.registry.close();
        self.stop.cancel();

        let accept_task = self.accept_task.lock().take();
        if let Some(mut task) = accept_task {
            if tokio::time::timeout(CONNECTION_GRACE * 2, &mut task).await.is_err() {
                tracing::warn!("Accept loop did not stop in time, aborting");
                task.abort();
                let _ = task.await;
            }
        }
        // Never started: drop the bound listener here.
        drop(self.listener.lock().take());

        if let Endpoint::Unix(path) = &self.endpoint {
            if let Err(e) = std::fs::remove_file(path) {
                if e.kind() != std::io::ErrorKind::NotFound {
                    tracing::warn!(path = %path.display(), error = %e, "Failed to remove socket file");
                }
            }
        }

        tracing::info!(endpoint = %self.endpoint, "Shared state server stopped");
    }
}

struct AcceptLoop {
    listener: Listener,
    router: Router,
    on_child_init: ChildInit,
    stop: CancellationToken,
    tracker: ConnectionTracker,
}

impl AcceptLoop {
    async fn run(self) {
        let mut connections = JoinSet::new();

        loop {
            tokio::select! {
                _ = self.stop.cancelled() => break,
                accepted = self.listener.accept() => match accepted {
                    Ok((stream, peer, permit)) => self.dispatch(&mut connections, stream, peer, permit),
                    Err(e) => {
                        tracing::warn!(error = %e, "Accept failed");
                        tokio::time::sleep(Duration::from_millis(50)).await;
                    }
                },
                // Reap finished connection tasks as we go.
                Some(_) = connections.join_next(), if !connections.is_empty() => {}
            }
        }

        // The listener drops with `self`; give in-flight requests a moment.
        let drained = tokio::time::timeout(CONNECTION_GRACE, async {
            while connections.join_next().await.is_some() {}
        })
        .await;
        if drained.is_err() {
            tracing::debug!(remaining = connections.len(), "Aborting lingering connections");
            connections.shutdown().await;
        }
    }

    fn dispatch(
        &self,
        connections: &mut JoinSet<()>,
        stream: Accepted,
        peer: String,
        permit: ConnectionPermit,
    ) {
        let ctx = ConnectionContext {
            id: ConnectionId::new(),
            peer,
            stop: self.stop.child_token(),
        };
        (self.on_child_init)(&ctx);
        metrics::record_connection_accepted();

        let guard = self.tracker.track(ctx.id);
        let router = self.router.clone();
        connections.spawn(async move {
            let _permit = permit;
            let _guard = guard;
            match stream {
                Accepted::Tcp(stream) => serve_connection(stream, router, &ctx).await,
                #[cfg(unix)]
                Accepted::Unix(stream) => serve_connection(stream, router, &ctx).await,
            }
        });
    }
}

async fn serve_connection<I>(io: I, router: Router, ctx: &ConnectionContext)
where
    I: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let service = TowerToHyperService::new(router);
    let connection =
        hyper::server::conn::http1::Builder::new().serve_connection(TokioIo::new(io), service);
    tokio::pin!(connection);

    let result = tokio::select! {
        result = connection.as_mut() => result,
        _ = ctx.stop.cancelled() => {
            connection.as_mut().graceful_shutdown();
            connection.as_mut().await
        }
    };

    if let Err(e) = result {
        tracing::debug!(connection_id = %ctx.id, error = %e, "Connection error");
    }
}
