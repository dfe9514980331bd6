//! Shared utilities for integration tests.

#![allow(dead_code)]

use std::collections::HashSet;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::extract::{ConnectInfo, State};
use axum::http::HeaderMap;
use axum::routing::get;
use axum::{Json, Router};
use serde_json::{json, Value};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::sync::mpsc;

use lb_proxy::config::{BackendConfig, ProxyConfig};
use lb_proxy::lifecycle::Shutdown;
use lb_proxy::net::Listener;
use lb_proxy::registry::Registry;
use lb_proxy::HttpServer;

/// What a mock backend has seen.
#[derive(Default)]
pub struct BackendStats {
    pub requests: AtomicUsize,
    pub peers: Mutex<HashSet<SocketAddr>>,
}

impl BackendStats {
    pub fn requests(&self) -> usize {
        self.requests.load(Ordering::SeqCst)
    }

    /// Distinct client sockets, i.e. connections opened by the proxy.
    pub fn connections(&self) -> usize {
        self.peers.lock().unwrap().len()
    }
}

#[derive(Clone)]
struct MockState {
    name: &'static str,
    stats: Arc<BackendStats>,
}

async fn echo(
    State(state): State<MockState>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    uri: axum::http::Uri,
    headers: HeaderMap,
) -> Json<Value> {
    state.stats.requests.fetch_add(1, Ordering::SeqCst);
    state.stats.peers.lock().unwrap().insert(peer);

    let header = |name: &str| headers.get(name).and_then(|v| v.to_str().ok()).map(str::to_string);
    Json(json!({
        "backend": state.name,
        "path": uri.path(),
        "host": header("host"),
        "x_forwarded_for": header("x-forwarded-for"),
        "x_forwarded_proto": header("x-forwarded-proto"),
        "x_forwarded_host": header("x-forwarded-host"),
        "x_request_id": header("x-request-id"),
    }))
}

async fn slow_echo(
    state: State<MockState>,
    peer: ConnectInfo<SocketAddr>,
    uri: axum::http::Uri,
    headers: HeaderMap,
) -> Json<Value> {
    tokio::time::sleep(Duration::from_millis(500)).await;
    echo(state, peer, uri, headers).await
}

/// Start an HTTP backend with `/health` and an echo fallback on an ephemeral port.
///
/// `/slow` echoes after a 500ms delay.
pub async fn start_mock_backend(name: &'static str) -> (SocketAddr, Arc<BackendStats>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let stats = Arc::new(BackendStats::default());

    let router = Router::new()
        .route("/health", get(|| async { "OK" }))
        .route("/slow", get(slow_echo))
        .fallback(echo)
        .with_state(MockState {
            name,
            stats: stats.clone(),
        });

    tokio::spawn(async move {
        axum::serve(listener, router.into_make_service_with_connect_info::<SocketAddr>())
            .await
            .unwrap();
    });

    (addr, stats)
}

/// A backend that promises a 100-byte body, sends 5 bytes and hangs up.
///
/// Returns its address and the number of connections it accepted.
pub async fn start_truncating_backend() -> (SocketAddr, Arc<AtomicUsize>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let accepted = Arc::new(AtomicUsize::new(0));

    let counter = accepted.clone();
    tokio::spawn(async move {
        loop {
            let Ok((mut stream, _)) = listener.accept().await else {
                return;
            };
            counter.fetch_add(1, Ordering::SeqCst);
            tokio::spawn(async move {
                let mut head = Vec::new();
                let mut buf = [0u8; 1024];
                while !head.windows(4).any(|w| w == b"\r\n\r\n") {
                    match stream.read(&mut buf).await {
                        Ok(0) | Err(_) => return,
                        Ok(n) => head.extend_from_slice(&buf[..n]),
                    }
                }
                let _ = stream
                    .write_all(b"HTTP/1.1 200 OK\r\nContent-Length: 100\r\n\r\nhello")
                    .await;
                let _ = stream.shutdown().await;
            });
        }
    });

    (addr, accepted)
}

/// An address on which nothing is listening.
pub async fn refusing_address() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    listener.local_addr().unwrap()
}

/// Baseline proxy configuration for tests: ephemeral port, no health checks.
pub fn proxy_config(backends: &[SocketAddr]) -> ProxyConfig {
    let mut config = ProxyConfig::default();
    config.listener.bind_address = "127.0.0.1:0".to_string();
    config.health_check.enabled = false;
    config.timeouts.request_secs = 5;
    config.timeouts.shutdown_grace_secs = 1;
    config.backends = backends.iter().map(|a| BackendConfig::new(a.to_string())).collect();
    config
}

pub struct RunningProxy {
    pub addr: SocketAddr,
    pub registry: Arc<Registry>,
    pub shutdown: Shutdown,
    pub config_tx: mpsc::UnboundedSender<ProxyConfig>,
    pub handle: tokio::task::JoinHandle<()>,
}

impl RunningProxy {
    pub fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }
}

/// Build and run a proxy, returning once it is accepting connections.
pub async fn start_proxy(config: ProxyConfig) -> RunningProxy {
    start_proxy_with(HttpServer::new(config.clone()).unwrap(), config).await
}

pub async fn start_proxy_with(server: HttpServer, config: ProxyConfig) -> RunningProxy {
    let listener = Listener::bind(&config.listener).await.unwrap();
    let addr = listener.local_addr().unwrap();
    let registry = server.registry();

    let shutdown = Shutdown::new();
    let (config_tx, config_updates) = mpsc::unbounded_channel();
    let server_shutdown = shutdown.subscribe();

    let handle = tokio::spawn(async move {
        server.run(listener, config_updates, server_shutdown).await.unwrap();
    });

    RunningProxy {
        addr,
        registry,
        shutdown,
        config_tx,
        handle,
    }
}

pub fn client() -> reqwest::Client {
    reqwest::Client::builder()
        .no_proxy()
        .timeout(Duration::from_secs(10))
        .build()
        .unwrap()
}
