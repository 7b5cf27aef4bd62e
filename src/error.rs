//! Error taxonomy shared by the queue, the shared state server and the
//! drain orchestrator.
//!
//! # Propagation
//! - Startup errors (`AddressInUse`, `Config`) unwind to `main` and end the process
//! - Queue errors (`Full`, `Empty`, `InvalidArgument`) go back to the immediate caller
//! - Teardown errors are wrapped in `TeardownStepFailed`, logged, and never escalated

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::config::loader::ConfigError;
use crate::server::endpoint::Endpoint;

/// Boxed error returned by collaborator hooks.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Errors raised by the coordinator core.
#[derive(Debug, Error)]
pub enum CoordinatorError {
    /// The shared endpoint is already held by another live process.
    #[error("{}", .endpoint.in_use_hint())]
    AddressInUse {
        endpoint: Endpoint,
        #[source]
        source: std::io::Error,
    },

    /// Malformed call parameters, e.g. a negative wait timeout.
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// Capacity wait deadline elapsed while the queue was still at or above the threshold.
    #[error("Queue still full after waiting")]
    Full,

    /// A timed pop found nothing to dequeue.
    #[error("Queue is empty")]
    Empty,

    /// The shared state server has been shut down (or was never reachable).
    #[error("Shared state server is closed")]
    ServerClosed,

    /// The requested resource was never published.
    #[error("Resource `{0}` is not registered")]
    NotRegistered(String),

    /// The resource exists but was requested through the wrong proxy kind.
    #[error("Resource `{0}` does not support this proxy kind")]
    WrongKind(String),

    /// Connecting process presented a wrong or missing authkey.
    #[error("Authentication failed")]
    Unauthorized,

    /// The task scheduler no longer accepts work.
    #[error("Scheduler is closed")]
    EngineClosed,

    /// A best-effort drain step failed. Always contained by the orchestrator.
    #[error("Teardown step `{step}` failed ({kind}): {message}")]
    TeardownStepFailed {
        step: String,
        kind: String,
        message: String,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Malformed exchange with a remote peer.
    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error(transparent)]
    Config(#[from] ConfigError),
}

/// Result type for coordinator operations.
pub type CoordinatorResult<T> = Result<T, CoordinatorError>;

/// Stable, serializable discriminant of [`CoordinatorError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    AddressInUse,
    InvalidArgument,
    Full,
    Empty,
    ServerClosed,
    NotRegistered,
    WrongKind,
    Unauthorized,
    EngineClosed,
    TeardownStepFailed,
    Io,
    Protocol,
    Config,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::AddressInUse => "address_in_use",
            ErrorKind::InvalidArgument => "invalid_argument",
            ErrorKind::Full => "full",
            ErrorKind::Empty => "empty",
            ErrorKind::ServerClosed => "server_closed",
            ErrorKind::NotRegistered => "not_registered",
            ErrorKind::WrongKind => "wrong_kind",
            ErrorKind::Unauthorized => "unauthorized",
            ErrorKind::EngineClosed => "engine_closed",
            ErrorKind::TeardownStepFailed => "teardown_step_failed",
            ErrorKind::Io => "io",
            ErrorKind::Protocol => "protocol",
            ErrorKind::Config => "config",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error payload sent over the shared endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorBody {
    pub kind: ErrorKind,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource: Option<String>,
}

impl CoordinatorError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            CoordinatorError::AddressInUse { .. } => ErrorKind::AddressInUse,
            CoordinatorError::InvalidArgument(_) => ErrorKind::InvalidArgument,
            CoordinatorError::Full => ErrorKind::Full,
            CoordinatorError::Empty => ErrorKind::Empty,
            CoordinatorError::ServerClosed => ErrorKind::ServerClosed,
            CoordinatorError::NotRegistered(_) => ErrorKind::NotRegistered,
            CoordinatorError::WrongKind(_) => ErrorKind::WrongKind,
            CoordinatorError::Unauthorized => ErrorKind::Unauthorized,
            CoordinatorError::EngineClosed => ErrorKind::EngineClosed,
            CoordinatorError::TeardownStepFailed { .. } => ErrorKind::TeardownStepFailed,
            CoordinatorError::Io(_) => ErrorKind::Io,
            CoordinatorError::Protocol(_) => ErrorKind::Protocol,
            CoordinatorError::Config(_) => ErrorKind::Config,
        }
    }

    /// Build the wire representation of this error.
    pub fn to_body(&self) -> ErrorBody {
        let resource = match self {
            CoordinatorError::NotRegistered(name) | CoordinatorError::WrongKind(name) => {
                Some(name.clone())
            }
            _ => None,
        };
        ErrorBody {
            kind: self.kind(),
            message: self.to_string(),
            resource,
        }
    }

    /// Rebuild an error received from a remote shared state server.
    pub fn from_body(body: ErrorBody) -> Self {
        let resource = body.resource.unwrap_or_default();
        match body.kind {
            ErrorKind::InvalidArgument => CoordinatorError::InvalidArgument(body.message),
            ErrorKind::Full => CoordinatorError::Full,
            ErrorKind::Empty => CoordinatorError::Empty,
            ErrorKind::ServerClosed => CoordinatorError::ServerClosed,
            ErrorKind::NotRegistered => CoordinatorError::NotRegistered(resource),
            ErrorKind::WrongKind => CoordinatorError::WrongKind(resource),
            ErrorKind::Unauthorized => CoordinatorError::Unauthorized,
            ErrorKind::EngineClosed => CoordinatorError::EngineClosed,
            _ => CoordinatorError::Protocol(body.message),
        }
    }

    fn status(&self) -> StatusCode {
        match self {
            CoordinatorError::InvalidArgument(_) => StatusCode::BAD_REQUEST,
            CoordinatorError::Unauthorized => StatusCode::UNAUTHORIZED,
            CoordinatorError::NotRegistered(_) => StatusCode::NOT_FOUND,
            CoordinatorError::WrongKind(_) => StatusCode::CONFLICT,
            CoordinatorError::Empty => StatusCode::REQUEST_TIMEOUT,
            CoordinatorError::Full => StatusCode::TOO_MANY_REQUESTS,
            CoordinatorError::ServerClosed | CoordinatorError::EngineClosed => {
                StatusCode::SERVICE_UNAVAILABLE
            }
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for CoordinatorError {
    fn into_response(self) -> Response {
        (self.status(), Json(self.to_body())).into_response()
    }
}

/// Name the originating condition of a collaborator error for teardown logs.
pub fn describe_kind(error: &(dyn std::error::Error + 'static)) -> String {
    if let Some(e) = error.downcast_ref::<CoordinatorError>() {
        return e.kind().to_string();
    }
    if let Some(e) = error.downcast_ref::<std::io::Error>() {
        return format!("io::{:?}", e.kind());
    }
    if error.downcast_ref::<serde_json::Error>().is_some() {
        return "serialization".to_string();
    }
    "error".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn address_in_use_hint_differs_by_endpoint() {
        let tcp = CoordinatorError::AddressInUse {
            endpoint: Endpoint::Tcp("127.0.0.1:5001".into()),
            source: std::io::Error::from(std::io::ErrorKind::AddrInUse),
        };
        let unix = CoordinatorError::AddressInUse {
            endpoint: Endpoint::Unix(PathBuf::from("/tmp/coordinator.sock")),
            source: std::io::Error::from(std::io::ErrorKind::AddrInUse),
        };

        assert!(tcp.to_string().contains("manager.address"));
        assert!(unix.to_string().contains("rm /tmp/coordinator.sock"));
        assert_ne!(tcp.to_string(), unix.to_string());
    }

    #[test]
    fn body_round_trip_keeps_resource_name() {
        let err = CoordinatorError::NotRegistered("worker_dict".into());
        let rebuilt = CoordinatorError::from_body(err.to_body());
        assert!(matches!(rebuilt, CoordinatorError::NotRegistered(name) if name == "worker_dict"));
    }

    #[test]
    fn describe_kind_downcasts_known_errors() {
        let io: BoxError = Box::new(std::io::Error::from(std::io::ErrorKind::PermissionDenied));
        assert_eq!(describe_kind(&*io), "io::PermissionDenied");

        let core: BoxError = Box::new(CoordinatorError::Full);
        assert_eq!(describe_kind(&*core), "full");
    }
}
