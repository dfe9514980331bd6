//! lb-proxy: reverse-proxying load balancer.
//!
//! # Architecture Overview
//!
//! ```text
//!     Client ──▶ net::Listener ──▶ http::server (per-connection task)
//!                   (TLS?)              │
//!                                       ├─▶ auxiliary routes (served locally)
//!                                       │
//!                                       └─▶ http::forward
//!                                              │
//!                          load_balancer::Balancer ◀── registry::Registry ◀── health::HealthChecker
//!                                              │                 ▲
//!                                              ▼                 └── admin API / config reload
//!                                     pool::ConnectionPool ──▶ Backend
//! ```

use std::path::PathBuf;

use clap::Parser;
use tokio::sync::mpsc;

use lb_proxy::config::{load_config, watcher::ConfigWatcher, ProxyConfig};
use lb_proxy::lifecycle::{signals::spawn_signal_handler, Shutdown};
use lb_proxy::net::Listener;
use lb_proxy::observability::{logging::init_logging, metrics::init_metrics};
use lb_proxy::HttpServer;

#[derive(Parser)]
#[command(name = "lb-proxy", version, about = "Reverse-proxying load balancer")]
struct Args {
    /// Path to the TOML configuration file. Defaults are used when omitted.
    #[arg(short, long)]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let config = match &args.config {
        Some(path) => load_config(path)?,
        None => ProxyConfig::default(),
    };

    init_logging(&config.observability)?;
    tracing::info!(version = env!("CARGO_PKG_VERSION"), "lb-proxy starting");
    tracing::info!(
        bind_address = %config.listener.bind_address,
        algorithm = %config.balancer.algorithm,
        backends = config.backends.len(),
        health_checks = config.health_check.enabled,
        "Configuration loaded"
    );

    if config.observability.metrics_enabled {
        match config.observability.metrics_address.parse() {
            Ok(addr) => init_metrics(addr),
            Err(_) => tracing::error!(
                metrics_address = %config.observability.metrics_address,
                "Failed to parse metrics address"
            ),
        }
    }

    // The watcher handle must outlive the server.
    let (config_updates, _watcher) = match &args.config {
        Some(path) => {
            let (watcher, updates) = ConfigWatcher::new(path);
            match watcher.run() {
                Ok(handle) => (updates, Some(handle)),
                Err(e) => {
                    tracing::warn!(error = %e, "Config watcher unavailable, hot reload disabled");
                    (mpsc::unbounded_channel().1, None)
                }
            }
        }
        None => (mpsc::unbounded_channel().1, None),
    };

    let listener = Listener::bind(&config.listener).await?;
    let server = HttpServer::new(config)?;

    let shutdown = Shutdown::new();
    let server_shutdown = shutdown.subscribe();
    spawn_signal_handler(shutdown.clone());

    server.run(listener, config_updates, server_shutdown).await?;

    tracing::info!("Shutdown complete");
    Ok(())
}
