//! Remote proxies for published resources.
//!
//! Worker processes connect with the endpoint and authkey, then obtain
//! queue or table proxies by name. Acquiring a proxy performs a lookup, so a
//! resource that was never published fails right there with `NotRegistered`.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use axum::body::Body;
use axum::http::{header, Method, Request, Response};
use hyper::body::Incoming;
use hyper_util::rt::TokioIo;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
#[cfg(unix)]
use tokio::net::UnixStream;

use crate::error::{CoordinatorError, CoordinatorResult, ErrorBody};
use crate::server::endpoint::Endpoint;
use crate::server::protocol::{
    KeyRequest, PopRequest, QueueLen, ResourceInfo, SetRequest, WaitRequest, WaitResponse,
    AUTH_HEADER, MAX_REMOTE_WAIT_MS,
};
use crate::server::registry::ProxyKind;

/// Upper bound on response bodies read from the server.
const MAX_RESPONSE_BYTES: usize = 16 * 1024 * 1024;

/// Connection parameters for a shared state server.
#[derive(Debug, Clone)]
pub struct SharedStateClient {
    endpoint: Endpoint,
    authkey: String,
}

impl SharedStateClient {
    pub fn new(endpoint: Endpoint, authkey: impl Into<String>) -> Self {
        Self {
            endpoint,
            authkey: authkey.into(),
        }
    }

    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    /// All published resources.
    pub async fn resources(&self) -> CoordinatorResult<Vec<ResourceInfo>> {
        self.call::<(), _>(Method::GET, "/resources", None).await
    }

    /// Look a resource up without binding a proxy to it.
    pub async fn describe(&self, name: &str) -> CoordinatorResult<ResourceInfo> {
        self.call::<(), _>(Method::GET, &format!("/resources/{}", name), None)
            .await
    }

    /// Obtain a queue proxy.
    pub async fn queue(&self, name: &str) -> CoordinatorResult<RemoteQueue> {
        self.expect_kind(name, ProxyKind::Queue).await?;
        Ok(RemoteQueue {
            client: self.clone(),
            name: name.to_string(),
        })
    }

    /// Obtain a table proxy.
    pub async fn table(&self, name: &str) -> CoordinatorResult<RemoteTable> {
        self.expect_kind(name, ProxyKind::Table).await?;
        Ok(RemoteTable {
            client: self.clone(),
            name: name.to_string(),
        })
    }

    async fn expect_kind(&self, name: &str, kind: ProxyKind) -> CoordinatorResult<()> {
        let info = self.describe(name).await?;
        if info.kind != kind {
            return Err(CoordinatorError::WrongKind(name.to_string()));
        }
        Ok(())
    }

    async fn call<B, T>(&self, method: Method, path: &str, body: Option<&B>) -> CoordinatorResult<T>
    where
        B: Serialize,
        T: DeserializeOwned,
    {
        let body = match body {
            Some(body) => Body::from(
                serde_json::to_vec(body).map_err(|e| CoordinatorError::Protocol(e.to_string()))?,
            ),
            None => Body::empty(),
        };
        let request = Request::builder()
            .method(method)
            .uri(path)
            .header(header::HOST, "coordinator")
            .header(header::CONTENT_TYPE, "application/json")
            .header(AUTH_HEADER, format!("Bearer {}", self.authkey))
            .body(body)
            .map_err(|e| CoordinatorError::Protocol(e.to_string()))?;

        let response = match &self.endpoint {
            Endpoint::Tcp(address) => {
                let stream = TcpStream::connect(address.as_str())
                    .await
                    .map_err(connect_error)?;
                exchange(stream, request).await?
            }
            #[cfg(unix)]
            Endpoint::Unix(path) => {
                let stream = UnixStream::connect(path).await.map_err(connect_error)?;
                exchange(stream, request).await?
            }
            #[cfg(not(unix))]
            Endpoint::Unix(_) => return Err(CoordinatorError::ServerClosed),
        };

        let status = response.status();
        let bytes = axum::body::to_bytes(Body::new(response.into_body()), MAX_RESPONSE_BYTES)
            .await
            .map_err(|e| CoordinatorError::Protocol(e.to_string()))?;

        if status.is_success() {
            serde_json::from_slice(&bytes).map_err(|e| CoordinatorError::Protocol(e.to_string()))
        } else {
            match serde_json::from_slice::<ErrorBody>(&bytes) {
                Ok(body) => Err(CoordinatorError::from_body(body)),
                Err(_) => Err(CoordinatorError::Protocol(format!(
                    "unexpected status {}: {}",
                    status,
                    String::from_utf8_lossy(&bytes)
                ))),
            }
        }
    }
}

fn connect_error(e: std::io::Error) -> CoordinatorError {
    match e.kind() {
        std::io::ErrorKind::ConnectionRefused | std::io::ErrorKind::NotFound => {
            CoordinatorError::ServerClosed
        }
        _ => CoordinatorError::Io(e),
    }
}

async fn exchange<I>(io: I, request: Request<Body>) -> CoordinatorResult<Response<Incoming>>
where
    I: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let (mut sender, connection) = hyper::client::conn::http1::handshake(TokioIo::new(io))
        .await
        .map_err(|e| CoordinatorError::Protocol(e.to_string()))?;

    tokio::spawn(async move {
        if let Err(e) = connection.await {
            tracing::debug!(error = %e, "Shared state connection ended with error");
        }
    });

    sender.send_request(request).await.map_err(|e| {
        if e.is_closed() || e.is_incomplete_message() {
            CoordinatorError::ServerClosed
        } else {
            CoordinatorError::Protocol(e.to_string())
        }
    })
}

/// Proxy to a published queue.
#[derive(Debug, Clone)]
pub struct RemoteQueue {
    client: SharedStateClient,
    name: String,
}

impl RemoteQueue {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Enqueue an item; returns the occupancy after insertion.
    pub async fn put<T: Serialize>(&self, item: &T) -> CoordinatorResult<usize> {
        let reply: QueueLen = self
            .client
            .call(Method::POST, &self.path("put"), Some(item))
            .await?;
        Ok(reply.len)
    }

    /// Dequeue an item.
    ///
    /// `None` waits until an item arrives; otherwise fails with `Empty` once
    /// `timeout` has elapsed.
    pub async fn get<T: DeserializeOwned>(&self, timeout: Option<Duration>) -> CoordinatorResult<T> {
        let deadline = timeout.map(|timeout| Instant::now() + timeout);
        loop {
            let slice = match deadline {
                Some(deadline) => {
                    let left = deadline.saturating_duration_since(Instant::now());
                    (left.as_millis() as u64).min(MAX_REMOTE_WAIT_MS)
                }
                None => MAX_REMOTE_WAIT_MS,
            };
            let request = PopRequest {
                timeout_ms: Some(slice),
            };
            match self
                .client
                .call(Method::POST, &self.path("get"), Some(&request))
                .await
            {
                Err(CoordinatorError::Empty) if !expired(deadline) => continue,
                other => return other,
            }
        }
    }

    /// Current occupancy.
    pub async fn len(&self) -> CoordinatorResult<usize> {
        let reply: QueueLen = self
            .client
            .call::<(), _>(Method::GET, &self.path("len"), None)
            .await?;
        Ok(reply.len)
    }

    /// Remote counterpart of [`crate::queue::BoundedQueue::wait_until_below`].
    pub async fn wait_until_below(
        &self,
        threshold: i64,
        timeout: Option<f64>,
    ) -> CoordinatorResult<Duration> {
        let started = Instant::now();
        let deadline = timeout
            .and_then(|secs| Duration::try_from_secs_f64(secs).ok())
            .and_then(|budget| started.checked_add(budget));

        loop {
            let timeout_secs = match (timeout, deadline) {
                (_, Some(deadline)) => {
                    Some(deadline.saturating_duration_since(Instant::now()).as_secs_f64())
                }
                (Some(secs), None) => Some(secs),
                (None, None) => None,
            };
            let request = WaitRequest {
                threshold,
                timeout_secs,
            };
            let reply: CoordinatorResult<WaitResponse> = self
                .client
                .call(Method::POST, &self.path("wait"), Some(&request))
                .await;
            match reply {
                Ok(_) => return Ok(started.elapsed()),
                Err(CoordinatorError::Full) if timeout.is_none() || !expired(deadline) => continue,
                Err(e) => return Err(e),
            }
        }
    }

    fn path(&self, op: &str) -> String {
        format!("/queues/{}/{}", self.name, op)
    }
}

fn expired(deadline: Option<Instant>) -> bool {
    matches!(deadline, Some(deadline) if Instant::now() >= deadline)
}

/// Proxy to a published table.
#[derive(Debug, Clone)]
pub struct RemoteTable {
    client: SharedStateClient,
    name: String,
}

impl RemoteTable {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub async fn get<T: DeserializeOwned>(&self, key: &str) -> CoordinatorResult<Option<T>> {
        let request = KeyRequest {
            key: key.to_string(),
        };
        self.client
            .call(Method::POST, &self.path("/get"), Some(&request))
            .await
    }

    /// Insert or replace an entry; returns the previous value.
    pub async fn set<T: Serialize>(
        &self,
        key: &str,
        value: &T,
    ) -> CoordinatorResult<Option<serde_json::Value>> {
        let request = SetRequest {
            key: key.to_string(),
            value: serde_json::to_value(value)
                .map_err(|e| CoordinatorError::Protocol(e.to_string()))?,
        };
        self.client
            .call(Method::POST, &self.path("/set"), Some(&request))
            .await
    }

    pub async fn remove(&self, key: &str) -> CoordinatorResult<Option<serde_json::Value>> {
        let request = KeyRequest {
            key: key.to_string(),
        };
        self.client
            .call(Method::POST, &self.path("/remove"), Some(&request))
            .await
    }

    /// Snapshot of every entry.
    pub async fn items(&self) -> CoordinatorResult<HashMap<String, serde_json::Value>> {
        self.client
            .call::<(), _>(Method::GET, &self.path(""), None)
            .await
    }

    pub async fn len(&self) -> CoordinatorResult<usize> {
        let reply: QueueLen = self
            .client
            .call::<(), _>(Method::GET, &self.path("/len"), None)
            .await?;
        Ok(reply.len)
    }

    fn path(&self, suffix: &str) -> String {
        format!("/tables/{}{}", self.name, suffix)
    }
}
