//! Active health checking.
//!
//! # Responsibilities
//! - Periodically probe every registered backend
//! - Remove backends whose probe fails

use std::sync::Arc;
use std::time::Duration;

use futures_util::future::join_all;
use tokio::sync::broadcast;
use tokio::time;

use crate::config::HealthCheckConfig;
use crate::health::probe::Prober;
use crate::observability::metrics;
use crate::registry::Registry;

pub struct HealthChecker {
    registry: Arc<Registry>,
    config: HealthCheckConfig,
    prober: Prober,
}

impl HealthChecker {
    pub fn new(registry: Arc<Registry>, config: HealthCheckConfig) -> Self {
        let prober = Prober::new(Duration::from_secs(config.timeout_secs), config.path.clone());
        Self {
            registry,
            config,
            prober,
        }
    }

    pub async fn run(self, mut shutdown: broadcast::Receiver<()>) {
        if !self.config.enabled {
            tracing::info!("Active health checks disabled");
            return;
        }

        tracing::info!(
            interval = self.config.interval_secs,
            path = %self.config.path,
            "Health checker starting"
        );

        // First round fires one interval after start.
        let interval = Duration::from_secs(self.config.interval_secs);
        let mut ticker = time::interval_at(time::Instant::now() + interval, interval);
        ticker.set_missed_tick_behavior(time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.check_all().await;
                }
                _ = shutdown.recv() => {
                    tracing::info!("Health checker received shutdown signal, exiting loop");
                    break;
                }
            }
        }
    }

    /// Probe every backend in the current snapshot concurrently.
    ///
    /// Returns the addresses removed in this round.
    pub async fn check_all(&self) -> Vec<String> {
        let backends = self.registry.get_all();
        let probes = backends.iter().map(|backend| async move {
            let result = self.prober.probe(backend.address()).await;
            (backend.address(), result)
        });

        let mut removed = Vec::new();
        for (address, result) in join_all(probes).await {
            if result.healthy {
                metrics::record_probe_latency(address, result.latency);
                tracing::debug!(backend = %address, latency = ?result.latency, "Backend is healthy");
                continue;
            }

            let reason = result
                .error
                .as_ref()
                .map(ToString::to_string)
                .unwrap_or_default();

            match self.registry.remove(address) {
                Ok(true) => {
                    tracing::warn!(backend = %address, error = %reason, "Backend is unhealthy, removed");
                }
                Ok(false) => {
                    tracing::debug!(backend = %address, error = %reason, "Unhealthy backend already gone");
                    continue;
                }
                // The persistence failure is logged by the registry; the
                // in-memory removal has already happened.
                Err(e) => {
                    tracing::warn!(backend = %address, error = %reason, persist_error = %e, "Backend is unhealthy, removed");
                }
            }
            metrics::record_backend_removed(address);
            removed.push(address.to_string());
        }
        removed
    }
}
