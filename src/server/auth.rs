//! Authkey check for every request on the shared endpoint.

use axum::{
    body::Body,
    extract::State,
    http::Request,
    middleware::Next,
    response::Response,
};

use crate::error::CoordinatorError;
use crate::server::protocol::AUTH_HEADER;

/// Shared secret expected from connecting processes.
#[derive(Clone)]
pub struct AuthKey(String);

impl AuthKey {
    pub fn new(secret: impl Into<String>) -> Self {
        Self(secret.into())
    }

    /// Header value a client must send.
    pub fn bearer(&self) -> String {
        format!("Bearer {}", self.0)
    }

    fn matches(&self, header: &str) -> bool {
        match header.strip_prefix("Bearer ") {
            Some(presented) => constant_time_eq(presented.as_bytes(), self.0.as_bytes()),
            None => false,
        }
    }
}

impl std::fmt::Debug for AuthKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("AuthKey(..)")
    }
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

pub async fn authkey_middleware(
    State(key): State<AuthKey>,
    request: Request<Body>,
    next: Next,
) -> Result<Response, CoordinatorError> {
    let header = request
        .headers()
        .get(AUTH_HEADER)
        .and_then(|h| h.to_str().ok());

    if let Some(value) = header {
        if key.matches(value) {
            return Ok(next.run(request).await);
        }
    }

    tracing::warn!(path = %request.uri().path(), "Rejected request with bad authkey");
    Err(CoordinatorError::Unauthorized)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bearer_round_trip() {
        let key = AuthKey::new("m3wtw0");
        assert!(key.matches(&key.bearer()));
        assert!(!key.matches("Bearer m3wtw1"));
        assert!(!key.matches("m3wtw0"));
        assert!(!key.matches("Bearer "));
    }
}
