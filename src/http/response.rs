//! Forwarding failures and their client-facing responses.
//!
//! # Status Mapping
//! - No backend selectable, pool exhausted or closed → 503
//! - Dial failure → 500
//! - Handshake, relay or oversize response → 502
//! - Backend exchange exceeded the request timeout → 504

use std::time::Duration;

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use thiserror::Error;

use crate::pool::PoolError;

#[derive(Debug, Error)]
pub enum ForwardError {
    #[error("no backend available")]
    NoBackend,

    #[error(transparent)]
    Pool(#[from] PoolError),

    #[error("invalid upstream target for {0}")]
    InvalidTarget(String),

    #[error("backend handshake failed: {0}")]
    Handshake(#[source] hyper::Error),

    #[error("backend relay failed: {0}")]
    Relay(#[source] hyper::Error),

    #[error("failed to read backend response body: {0}")]
    ResponseBody(#[source] Box<dyn std::error::Error + Send + Sync>),

    #[error("backend response exceeds {0} bytes")]
    ResponseTooLarge(usize),

    #[error("backend did not respond within {0:?}")]
    Timeout(Duration),
}

impl ForwardError {
    pub fn status(&self) -> StatusCode {
        match self {
            ForwardError::NoBackend => StatusCode::SERVICE_UNAVAILABLE,
            ForwardError::Pool(PoolError::Exhausted(_)) | ForwardError::Pool(PoolError::Closed) => {
                StatusCode::SERVICE_UNAVAILABLE
            }
            ForwardError::Pool(PoolError::Dial { .. }) => StatusCode::INTERNAL_SERVER_ERROR,
            ForwardError::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
            ForwardError::InvalidTarget(_)
            | ForwardError::Handshake(_)
            | ForwardError::Relay(_)
            | ForwardError::ResponseBody(_)
            | ForwardError::ResponseTooLarge(_) => StatusCode::BAD_GATEWAY,
        }
    }

    fn client_message(&self) -> &'static str {
        match self {
            ForwardError::NoBackend => "No backend available",
            ForwardError::Pool(PoolError::Exhausted(_)) => "Backend connection pool exhausted",
            ForwardError::Pool(PoolError::Closed) => "Proxy is shutting down",
            ForwardError::Pool(PoolError::Dial { .. }) => "Failed to connect to backend",
            ForwardError::Timeout(_) => "Backend timed out",
            _ => "Upstream request failed",
        }
    }
}

impl IntoResponse for ForwardError {
    fn into_response(self) -> Response {
        (self.status(), self.client_message()).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;

    #[test]
    fn test_status_mapping() {
        assert_eq!(ForwardError::NoBackend.status(), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(
            ForwardError::from(PoolError::Exhausted("a:1".into())).status(),
            StatusCode::SERVICE_UNAVAILABLE
        );
        let dial = PoolError::Dial {
            address: "a:1".into(),
            source: io::Error::from(io::ErrorKind::ConnectionRefused),
        };
        assert_eq!(ForwardError::from(dial).status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(
            ForwardError::Timeout(Duration::from_secs(1)).status(),
            StatusCode::GATEWAY_TIMEOUT
        );
        assert_eq!(ForwardError::ResponseTooLarge(10).status(), StatusCode::BAD_GATEWAY);
    }
}
