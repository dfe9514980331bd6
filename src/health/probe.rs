//! Single-backend health probe.
//!
//! A probe is two steps, each bounded by the configured timeout:
//! a bare TCP connect, then `GET <path>` over a fresh connection.

use std::time::{Duration, Instant};

use axum::body::Body;
use axum::http::{header, Request, StatusCode};
use hyper_util::client::legacy::{connect::HttpConnector, Client};
use hyper_util::rt::TokioExecutor;
use thiserror::Error;
use tokio::net::TcpStream;
use tokio::time;

#[derive(Debug, Error)]
pub enum ProbeError {
    #[error("TCP connection failed: {0}")]
    Connect(#[source] std::io::Error),

    #[error("TCP connection timed out after {0:?}")]
    ConnectTimeout(Duration),

    #[error("failed to build health request: {0}")]
    Request(#[from] axum::http::Error),

    #[error("HTTP health check failed: {0}")]
    Http(#[from] hyper_util::client::legacy::Error),

    #[error("HTTP health check timed out after {0:?}")]
    HttpTimeout(Duration),

    #[error("HTTP health check returned status {0}")]
    Status(StatusCode),
}

/// Outcome of probing one backend.
#[derive(Debug)]
pub struct HealthCheckResult {
    pub healthy: bool,
    pub latency: Duration,
    pub error: Option<ProbeError>,
}

impl HealthCheckResult {
    fn healthy(latency: Duration) -> Self {
        Self {
            healthy: true,
            latency,
            error: None,
        }
    }

    fn unhealthy(latency: Duration, error: ProbeError) -> Self {
        Self {
            healthy: false,
            latency,
            error: Some(error),
        }
    }
}

/// Runs probes against backends.
#[derive(Clone)]
pub struct Prober {
    client: Client<HttpConnector, Body>,
    timeout: Duration,
    path: String,
}

impl Prober {
    pub fn new(timeout: Duration, path: impl Into<String>) -> Self {
        let mut connector = HttpConnector::new();
        connector.set_connect_timeout(Some(timeout));

        // No idle connections: every probe exercises a fresh connect.
        let client = Client::builder(TokioExecutor::new())
            .pool_max_idle_per_host(0)
            .build(connector);

        Self {
            client,
            timeout,
            path: path.into(),
        }
    }

    pub async fn probe(&self, address: &str) -> HealthCheckResult {
        let start = Instant::now();
        match self.run(address).await {
            Ok(()) => HealthCheckResult::healthy(start.elapsed()),
            Err(e) => HealthCheckResult::unhealthy(start.elapsed(), e),
        }
    }

    async fn run(&self, address: &str) -> Result<(), ProbeError> {
        match time::timeout(self.timeout, TcpStream::connect(address)).await {
            Ok(Ok(stream)) => drop(stream),
            Ok(Err(e)) => return Err(ProbeError::Connect(e)),
            Err(_) => return Err(ProbeError::ConnectTimeout(self.timeout)),
        }

        let request = Request::builder()
            .method("GET")
            .uri(format!("http://{}{}", address, self.path))
            .header(header::USER_AGENT, "lb-proxy-health-check")
            .body(Body::empty())?;

        let response = time::timeout(self.timeout, self.client.request(request))
            .await
            .map_err(|_| ProbeError::HttpTimeout(self.timeout))??;

        if response.status().is_success() {
            Ok(())
        } else {
            Err(ProbeError::Status(response.status()))
        }
    }
}
