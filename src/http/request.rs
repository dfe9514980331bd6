//! Request identification and upstream request preparation.
//!
//! # Responsibilities
//! - Generate a UUID v4 request ID when the client sent none
//! - Rewrite the request for the chosen backend (origin-form target, Host)
//! - Apply proxy headers
//!
//! # Design Decisions
//! - Request ID added as early as possible for tracing
//! - Original Host preserved in X-Forwarded-Host before being rewritten

use axum::body::Body;
use axum::http::header::{self, HeaderName, HeaderValue};
use axum::http::{Request, Uri, Version};
use tower_http::request_id::{MakeRequestId, RequestId};
use uuid::Uuid;

use crate::net::ClientConnection;
use crate::registry::Backend;
use crate::security::headers::{add_forwarded_headers, strip_hop_by_hop};

pub const X_REQUEST_ID: HeaderName = HeaderName::from_static("x-request-id");

/// Request ID generator backed by UUID v4.
#[derive(Debug, Clone, Copy, Default)]
pub struct MakeRequestUuidV4;

impl MakeRequestId for MakeRequestUuidV4 {
    fn make_request_id<B>(&mut self, _request: &Request<B>) -> Option<RequestId> {
        HeaderValue::from_str(&Uuid::new_v4().to_string())
            .ok()
            .map(RequestId::new)
    }
}

/// Read the request ID assigned to this request.
pub fn request_id<B>(request: &Request<B>) -> &str {
    request
        .headers()
        .get(X_REQUEST_ID)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("unknown")
}

/// Turn a client request into one addressed to `backend`.
///
/// Returns `None` if the backend address is not a valid Host value.
pub fn prepare_upstream(
    mut request: Request<Body>,
    backend: &Backend,
    forwarded_headers: bool,
) -> Option<Request<Body>> {
    let original_host = request.headers().get(header::HOST).cloned().or_else(|| {
        request
            .uri()
            .authority()
            .and_then(|authority| HeaderValue::from_str(authority.as_str()).ok())
    });
    let client = request.extensions().get::<ClientConnection>().copied();

    let target = request
        .uri()
        .path_and_query()
        .map_or("/", |pq| pq.as_str())
        .parse::<Uri>()
        .ok()?;
    *request.uri_mut() = target;
    *request.version_mut() = Version::HTTP_11;

    let host = HeaderValue::from_str(backend.address()).ok()?;
    let headers = request.headers_mut();
    strip_hop_by_hop(headers);
    headers.insert(header::HOST, host);

    if forwarded_headers {
        if let Some(client) = client {
            add_forwarded_headers(headers, client.peer_addr.ip(), client.scheme(), original_host);
        }
    }

    Some(request)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::net::ConnectionId;
    use crate::security::headers::{X_FORWARDED_FOR, X_FORWARDED_HOST, X_FORWARDED_PROTO};

    fn client_request(uri: &str) -> Request<Body> {
        let mut request = Request::builder()
            .uri(uri)
            .header(header::HOST, "shop.example.com")
            .header(header::CONNECTION, "close")
            .header("x-trace", "abc")
            .body(Body::empty())
            .unwrap();
        request.extensions_mut().insert(ClientConnection {
            id: ConnectionId::new(),
            peer_addr: "192.0.2.10:5555".parse().unwrap(),
            tls: false,
        });
        request
    }

    #[test]
    fn test_request_id_is_uuid() {
        let request = Request::new(());
        let id = MakeRequestUuidV4.make_request_id(&request).unwrap();
        let text = id.header_value().to_str().unwrap();
        assert!(Uuid::parse_str(text).is_ok());
    }

    #[test]
    fn test_prepare_upstream_rewrites_target() {
        let backend = Backend::new("127.0.0.1:9001");
        let upstream = prepare_upstream(client_request("/api/items?page=2"), &backend, true).unwrap();

        assert_eq!(upstream.uri(), "/api/items?page=2");
        assert_eq!(upstream.version(), Version::HTTP_11);

        let headers = upstream.headers();
        assert_eq!(headers[header::HOST], "127.0.0.1:9001");
        assert_eq!(headers[&X_FORWARDED_FOR], "192.0.2.10");
        assert_eq!(headers[&X_FORWARDED_PROTO], "http");
        assert_eq!(headers[&X_FORWARDED_HOST], "shop.example.com");
        assert_eq!(headers["x-trace"], "abc");
        assert!(!headers.contains_key(header::CONNECTION));
    }

    #[test]
    fn test_forwarded_headers_disabled() {
        let backend = Backend::new("127.0.0.1:9001");
        let upstream = prepare_upstream(client_request("/"), &backend, false).unwrap();
        assert!(!upstream.headers().contains_key(&X_FORWARDED_FOR));
        assert_eq!(upstream.headers()[header::HOST], "127.0.0.1:9001");
    }
}
