//! HTTP server setup and the accept loop.
//!
//! # Responsibilities
//! - Own the registry, balancer and pool, and inject them into handlers
//! - Mount caller-supplied auxiliary routes ahead of the proxy fallback
//! - Wire up middleware (request ID, tracing, body limit)
//! - Accept connections and serve each with its own HTTP/1.1 connection task
//! - Start and stop background tasks (health, pool cleanup, load feed, admin)
//! - Register configured backends at startup and on config reload

use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::{extract::ConnectInfo, http::Request, Router};
use hyper::body::Incoming;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper_util::rt::TokioIo;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio_rustls::TlsAcceptor;
use tower::ServiceExt;
use tower_http::{
    limit::RequestBodyLimitLayer,
    request_id::{PropagateRequestIdLayer, SetRequestIdLayer},
    trace::TraceLayer,
};

use crate::admin::{self, AdminState};
use crate::config::{Algorithm, BackendConfig, ProxyConfig};
use crate::health::HealthChecker;
use crate::http::forward::{proxy_handler, ForwardState};
use crate::http::request::{MakeRequestUuidV4, X_REQUEST_ID};
use crate::lifecycle::Shutdown;
use crate::load_balancer::telemetry::{run_load_reporter, LoadSimulator};
use crate::load_balancer::Balancer;
use crate::net::{
    ClientConnection, ConnectionGuard, ConnectionPermit, ConnectionTracker, IdleTimeoutStream,
    Listener, ListenerError,
};
use crate::pool::ConnectionPool;
use crate::registry::{Backend, Registry, RegistryError};

#[derive(Debug, Error)]
pub enum ServerError {
    #[error("registry: {0}")]
    Registry(#[from] RegistryError),

    #[error("listener: {0}")]
    Listener(#[from] ListenerError),

    #[error("admin API bind failed: {0}")]
    Admin(#[source] std::io::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// The load balancer's data plane.
pub struct HttpServer {
    config: ProxyConfig,
    registry: Arc<Registry>,
    balancer: Arc<Balancer>,
    pool: Arc<ConnectionPool>,
    auxiliary: Router,
    started_at: Instant,
}

impl HttpServer {
    /// Build the server and register the configured backends.
    ///
    /// Fails if the registry snapshot exists but cannot be parsed.
    pub fn new(config: ProxyConfig) -> Result<Self, ServerError> {
        let registry = Arc::new(Registry::from_path(config.registry.path.as_deref())?);
        let balancer = Arc::new(Balancer::new(registry.clone(), config.balancer.algorithm));
        let pool = Arc::new(ConnectionPool::from_config(&config.pool));

        let server = Self {
            config,
            registry,
            balancer,
            pool,
            auxiliary: Router::new(),
            started_at: Instant::now(),
        };
        server.register_backends(&server.config.backends);
        Ok(server)
    }

    /// Mount routes that are served directly and never forwarded.
    ///
    /// Handlers can extract `ConnectInfo<SocketAddr>` for the client's
    /// address. The router must not define its own fallback.
    pub fn with_auxiliary_routes(mut self, routes: Router) -> Self {
        self.auxiliary = self.auxiliary.merge(routes);
        self
    }

    /// Register backends that are not already present.
    ///
    /// Returns how many were added. Snapshot write failures are logged; the
    /// in-memory registration stands.
    pub fn register_backends(&self, backends: &[BackendConfig]) -> usize {
        let mut added = 0;
        for backend in backends {
            match self.registry.add_if_absent(Backend::new(backend.address.clone())) {
                Ok(true) => added += 1,
                Ok(false) => {
                    tracing::debug!(address = %backend.address, "Backend already registered");
                }
                Err(e) => {
                    added += 1;
                    tracing::warn!(address = %backend.address, error = %e, "Backend registered but not persisted");
                }
            }
        }
        added
    }

    pub fn registry(&self) -> Arc<Registry> {
        self.registry.clone()
    }

    pub fn balancer(&self) -> Arc<Balancer> {
        self.balancer.clone()
    }

    pub fn pool(&self) -> Arc<ConnectionPool> {
        self.pool.clone()
    }

    pub fn config(&self) -> &ProxyConfig {
        &self.config
    }

    /// Auxiliary routes first, then everything else goes to the proxy.
    pub fn router(&self) -> Router {
        let state = ForwardState {
            balancer: self.balancer.clone(),
            pool: self.pool.clone(),
            request_timeout: Duration::from_secs(self.config.timeouts.request_secs),
            max_body_size: self.config.security.max_body_size,
            forwarded_headers: self.config.security.forwarded_headers,
        };

        self.auxiliary
            .clone()
            .merge(Router::new().fallback(proxy_handler).with_state(state))
            .layer(RequestBodyLimitLayer::new(self.config.security.max_body_size))
            .layer(PropagateRequestIdLayer::new(X_REQUEST_ID))
            .layer(TraceLayer::new_for_http())
            .layer(SetRequestIdLayer::new(X_REQUEST_ID, MakeRequestUuidV4))
    }

    /// Serve until `shutdown` fires, then drain.
    ///
    /// `config_updates` feeds reloaded configurations; only their backend
    /// lists are applied.
    pub async fn run(
        self,
        listener: Listener,
        mut config_updates: mpsc::UnboundedReceiver<ProxyConfig>,
        mut shutdown: broadcast::Receiver<()>,
    ) -> Result<(), ServerError> {
        let local_addr = listener.local_addr()?;
        tracing::info!(
            address = %local_addr,
            tls = listener.is_tls(),
            algorithm = %self.balancer.algorithm(),
            backends = self.registry.len(),
            "HTTP server starting"
        );

        let internal = Shutdown::new();
        let tasks = self.spawn_background_tasks(&internal).await?;

        let router = self.router();
        let tracker = ConnectionTracker::new();
        let tls = listener.tls_acceptor();
        let idle_timeout = self.config.listener.idle_timeout();

        loop {
            tokio::select! {
                accepted = listener.accept() => match accepted {
                    Ok((stream, peer_addr, permit)) => {
                        let guard = tracker.track();
                        let client = ClientTask {
                            router: router.clone(),
                            tls: tls.clone(),
                            idle_timeout,
                            info: ClientConnection {
                                id: guard.id(),
                                peer_addr,
                                tls: tls.is_some(),
                            },
                            _guard: guard,
                            _permit: permit,
                            shutdown: internal.subscribe(),
                        };
                        tokio::spawn(client.serve(stream));
                    }
                    Err(e) => {
                        tracing::warn!(error = %e, "Accept failed");
                        tokio::time::sleep(Duration::from_millis(50)).await;
                    }
                },
                Some(update) = config_updates.recv() => {
                    let added = self.register_backends(&update.backends);
                    tracing::info!(added, "Configuration reload applied");
                }
                _ = shutdown.recv() => {
                    tracing::info!("HTTP server received shutdown signal");
                    break;
                }
            }
        }

        drop(listener);
        internal.trigger();
        self.pool.close();

        let grace = Duration::from_secs(self.config.timeouts.shutdown_grace_secs);
        if !tracker.wait_for_drain(grace).await {
            tracing::warn!(
                remaining = tracker.active_count(),
                "Grace period elapsed with client connections still open"
            );
        }
        for mut task in tasks {
            if tokio::time::timeout(grace, &mut task).await.is_err() {
                task.abort();
            }
        }

        tracing::info!("HTTP server stopped");
        Ok(())
    }

    async fn spawn_background_tasks(&self, shutdown: &Shutdown) -> Result<Vec<JoinHandle<()>>, ServerError> {
        let mut tasks = Vec::new();

        let checker = HealthChecker::new(self.registry.clone(), self.config.health_check.clone());
        tasks.push(tokio::spawn(checker.run(shutdown.subscribe())));

        tasks.push(tokio::spawn(self.pool.clone().run_cleanup(shutdown.subscribe())));

        let balancer_config = &self.config.balancer;
        if balancer_config.algorithm == Algorithm::LeastLoad && balancer_config.simulate_load {
            let simulator = LoadSimulator::new(
                self.registry.clone(),
                self.balancer.clone(),
                Duration::from_secs(balancer_config.load_update_interval_secs),
            );
            tasks.push(tokio::spawn(simulator.run(shutdown.subscribe())));
        }

        tasks.push(tokio::spawn(run_load_reporter(
            self.balancer.clone(),
            Duration::from_secs(balancer_config.load_report_interval_secs),
            shutdown.subscribe(),
        )));

        if self.config.admin.enabled {
            let listener = TcpListener::bind(&self.config.admin.bind_address)
                .await
                .map_err(ServerError::Admin)?;
            let state = AdminState {
                registry: self.registry.clone(),
                balancer: self.balancer.clone(),
                pool: self.pool.clone(),
                api_key: Arc::from(self.config.admin.api_key.as_str()),
                started_at: self.started_at,
            };
            let rx = shutdown.subscribe();
            tasks.push(tokio::spawn(async move {
                if let Err(e) = admin::serve(listener, state, rx).await {
                    tracing::error!(error = %e, "Admin API stopped with error");
                }
            }));
        }

        Ok(tasks)
    }
}

/// One accepted client connection.
struct ClientTask {
    router: Router,
    tls: Option<TlsAcceptor>,
    idle_timeout: Duration,
    info: ClientConnection,
    _guard: ConnectionGuard,
    _permit: ConnectionPermit,
    shutdown: broadcast::Receiver<()>,
}

impl ClientTask {
    async fn serve(self, stream: TcpStream) {
        let Some(acceptor) = self.tls.clone() else {
            return self.serve_http(stream).await;
        };

        // A failed handshake only costs this connection.
        match tokio::time::timeout(self.idle_timeout, acceptor.accept(stream)).await {
            Ok(Ok(tls_stream)) => self.serve_http(tls_stream).await,
            Ok(Err(e)) => {
                tracing::debug!(connection_id = %self.info.id, peer_addr = %self.info.peer_addr, error = %e, "TLS handshake failed");
            }
            Err(_) => {
                tracing::debug!(connection_id = %self.info.id, peer_addr = %self.info.peer_addr, "TLS handshake timed out");
            }
        }
    }

    async fn serve_http<S>(mut self, stream: S)
    where
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        let info = self.info;
        let router = self.router.clone();
        let io = TokioIo::new(IdleTimeoutStream::new(stream, self.idle_timeout));

        let service = service_fn(move |mut request: Request<Incoming>| {
            request.extensions_mut().insert(info);
            request.extensions_mut().insert(ConnectInfo(info.peer_addr));
            router.clone().oneshot(request)
        });

        let connection = http1::Builder::new().serve_connection(io, service);
        tokio::pin!(connection);

        let result = tokio::select! {
            result = connection.as_mut() => result,
            _ = self.shutdown.recv() => {
                connection.as_mut().graceful_shutdown();
                connection.as_mut().await
            }
        };

        if let Err(e) = result {
            tracing::debug!(connection_id = %info.id, peer_addr = %info.peer_addr, error = %e, "Client connection ended with error");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::StatusCode;
    use axum::routing::get;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn config() -> ProxyConfig {
        let mut config = ProxyConfig::default();
        config.health_check.enabled = false;
        config
    }

    #[test]
    fn test_new_registers_configured_backends_once() {
        let mut config = config();
        config.backends = vec![BackendConfig::new("a:1"), BackendConfig::new("a:1"), BackendConfig::new("b:1")];

        let server = HttpServer::new(config).unwrap();
        assert_eq!(server.registry().len(), 2);
        assert_eq!(server.register_backends(&[BackendConfig::new("b:1"), BackendConfig::new("c:1")]), 1);
    }

    #[test]
    fn test_malformed_registry_fails_new() {
        let mut file = NamedTempFile::new().unwrap();
        write!(file, "{{ not json").unwrap();

        let mut config = config();
        config.registry.path = Some(file.path().display().to_string());
        assert!(matches!(HttpServer::new(config), Err(ServerError::Registry(_))));
    }

    #[tokio::test]
    async fn test_empty_registry_is_503_with_request_id() {
        let server = HttpServer::new(config()).unwrap();
        let response = server
            .router()
            .oneshot(Request::get("/anything").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
        assert!(response.headers().contains_key(X_REQUEST_ID));
    }

    #[tokio::test]
    async fn test_auxiliary_routes_take_precedence() {
        let server = HttpServer::new(config())
            .unwrap()
            .with_auxiliary_routes(Router::new().route("/users", get(|| async { "users" })));
        let response = server
            .router()
            .oneshot(Request::get("/users").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }
}
