//! Reverse-proxy forwarding.
//!
//! # Responsibilities
//! - Pick a backend, lease a pooled connection, relay one exchange
//! - Drive the backend connection and the request future together
//! - Return the connection to the pool only after a clean keep-alive exchange
//!
//! # Design Decisions
//! - The backend response is buffered in full (bounded) before replying,
//!   so a truncated response is never passed to the client
//! - Failures are never retried

use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::body::{Body, Bytes};
use axum::extract::State;
use axum::http::{header, HeaderMap, Request, Version};
use axum::response::{IntoResponse, Response};
use http_body_util::{BodyExt, LengthLimitError, Limited};
use hyper::client::conn::http1;
use hyper_util::rt::TokioIo;
use tokio::net::TcpStream;

use crate::http::request::{prepare_upstream, request_id};
use crate::http::response::ForwardError;
use crate::load_balancer::Balancer;
use crate::observability::metrics;
use crate::pool::{ConnectionPool, PooledConnection};
use crate::registry::Backend;
use crate::security::headers::strip_hop_by_hop;

/// Shared handles used by the proxy handler.
#[derive(Clone)]
pub struct ForwardState {
    pub balancer: Arc<Balancer>,
    pub pool: Arc<ConnectionPool>,
    pub request_timeout: Duration,
    pub max_body_size: usize,
    pub forwarded_headers: bool,
}

/// Fallback handler: every request not claimed by an auxiliary route.
pub async fn proxy_handler(State(state): State<ForwardState>, request: Request<Body>) -> Response {
    let start = Instant::now();
    let method = request.method().to_string();
    let request_id = request_id(&request).to_string();

    let Some(backend) = state.balancer.next_backend() else {
        tracing::warn!(request_id = %request_id, "No backend available");
        metrics::record_request(&method, 503, "none", start);
        return ForwardError::NoBackend.into_response();
    };

    tracing::debug!(
        request_id = %request_id,
        method = %method,
        path = %request.uri().path(),
        backend = %backend,
        "Forwarding request"
    );

    match forward(&state, &backend, request).await {
        Ok(response) => {
            metrics::record_request(&method, response.status().as_u16(), backend.address(), start);
            response
        }
        Err(e) => {
            let status = e.status();
            match &e {
                ForwardError::Pool(crate::pool::PoolError::Dial { .. }) => {
                    tracing::error!(request_id = %request_id, backend = %backend, error = %e, "Backend dial failed");
                }
                _ => {
                    tracing::warn!(request_id = %request_id, backend = %backend, error = %e, "Forwarding failed");
                }
            }
            metrics::record_request(&method, status.as_u16(), backend.address(), start);
            e.into_response()
        }
    }
}

async fn forward(
    state: &ForwardState,
    backend: &Backend,
    request: Request<Body>,
) -> Result<Response, ForwardError> {
    let conn = state.pool.get(backend.address()).await?;
    let upstream = prepare_upstream(request, backend, state.forwarded_headers)
        .ok_or_else(|| ForwardError::InvalidTarget(backend.address().to_string()))?;

    // Dropping the exchange on timeout drops the lease and closes the connection.
    match tokio::time::timeout(state.request_timeout, relay(conn, upstream, state.max_body_size)).await {
        Ok(result) => result,
        Err(_) => Err(ForwardError::Timeout(state.request_timeout)),
    }
}

/// Run one HTTP/1.1 exchange over a pooled connection.
///
/// The connection driver and the request future are polled together, so
/// the request body upload and response download progress concurrently.
/// Every exit path either releases the connection or closes it.
pub async fn relay(
    pooled: PooledConnection<TcpStream>,
    request: Request<Body>,
    max_body_size: usize,
) -> Result<Response, ForwardError> {
    let (stream, lease) = pooled.into_parts();
    let (sender, connection) = http1::handshake::<_, Body>(TokioIo::new(stream))
        .await
        .map_err(ForwardError::Handshake)?;

    let driver = connection.without_shutdown();
    let exchange = exchange(sender, request, max_body_size);
    tokio::pin!(driver);
    tokio::pin!(exchange);

    // The driver finishing first means the backend ended the connection.
    let (outcome, parts) = tokio::select! {
        outcome = &mut exchange => {
            let parts = match outcome {
                Ok(_) => driver.await.ok(),
                Err(_) => None,
            };
            (outcome, parts)
        }
        _ = &mut driver => ((&mut exchange).await, None),
    };

    let (head, body) = outcome?;
    let reusable = is_keep_alive(head.version, &head.headers)
        && parts.as_ref().is_some_and(|p| p.read_buf.is_empty());

    match parts {
        Some(parts) if reusable => lease.release(parts.io.into_inner()),
        _ => drop(lease),
    }

    let mut head = head;
    strip_hop_by_hop(&mut head.headers);
    Ok(Response::from_parts(head, Body::from(body)))
}

async fn exchange(
    mut sender: http1::SendRequest<Body>,
    request: Request<Body>,
    max_body_size: usize,
) -> Result<(axum::http::response::Parts, Bytes), ForwardError> {
    let response = sender.send_request(request).await.map_err(ForwardError::Relay)?;
    let (head, body) = response.into_parts();

    let collected = Limited::new(body, max_body_size).collect().await.map_err(|e| {
        if e.downcast_ref::<LengthLimitError>().is_some() {
            ForwardError::ResponseTooLarge(max_body_size)
        } else {
            ForwardError::ResponseBody(e)
        }
    })?;

    // Releasing the sender lets the driver hand the connection back.
    drop(sender);
    Ok((head, collected.to_bytes()))
}

fn is_keep_alive(version: Version, headers: &HeaderMap) -> bool {
    if version != Version::HTTP_11 {
        return false;
    }
    !headers
        .get_all(header::CONNECTION)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .any(|token| token.trim().eq_ignore_ascii_case("close"))
}
