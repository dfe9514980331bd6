//! Background load sampling.
//!
//! # Responsibilities
//! - Feed placeholder load samples until real reports arrive
//! - Periodically log the current load snapshot

use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use tokio::sync::broadcast;
use tokio::time;

use crate::load_balancer::Balancer;
use crate::registry::Registry;

/// Generates a pseudo-random load in `[50, 100)` for every registered backend.
///
/// It only talks to the balancer through `update_server_load`, so replacing
/// it with a real metrics feed needs no change to selection.
pub struct LoadSimulator {
    registry: Arc<Registry>,
    balancer: Arc<Balancer>,
    interval: Duration,
}

impl LoadSimulator {
    pub fn new(registry: Arc<Registry>, balancer: Arc<Balancer>, interval: Duration) -> Self {
        Self {
            registry,
            balancer,
            interval,
        }
    }

    /// Produce one round of samples.
    pub fn sample(&self) {
        let mut rng = rand::thread_rng();
        for backend in self.registry.get_all() {
            let load = 50.0 + rng.gen_range(0.0..50.0);
            self.balancer.update_server_load(backend.address(), load);
        }
    }

    pub async fn run(self, mut shutdown: broadcast::Receiver<()>) {
        tracing::info!(interval = ?self.interval, "Load simulator starting");
        let mut ticker = time::interval(self.interval);

        loop {
            tokio::select! {
                _ = ticker.tick() => self.sample(),
                _ = shutdown.recv() => {
                    tracing::debug!("Load simulator stopping");
                    break;
                }
            }
        }
    }
}

/// Log the balancer's load samples every `interval` until shutdown.
pub async fn run_load_reporter(
    balancer: Arc<Balancer>,
    interval: Duration,
    mut shutdown: broadcast::Receiver<()>,
) {
    let mut ticker = time::interval_at(time::Instant::now() + interval, interval);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let loads = balancer.server_loads();
                tracing::info!(
                    algorithm = %balancer.algorithm(),
                    backends = loads.len(),
                    loads = ?loads,
                    "Server load snapshot"
                );
            }
            _ = shutdown.recv() => break,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Algorithm;
    use crate::registry::Backend;

    #[test]
    fn test_sample_range() {
        let registry = Arc::new(Registry::in_memory());
        registry.add(Backend::new("a:1")).unwrap();
        registry.add(Backend::new("b:1")).unwrap();
        let balancer = Arc::new(Balancer::new(registry.clone(), Algorithm::LeastLoad));

        let simulator = LoadSimulator::new(registry, balancer.clone(), Duration::from_secs(10));
        simulator.sample();

        let loads = balancer.server_loads();
        assert_eq!(loads.len(), 2);
        assert!(loads.values().all(|&l| (50.0..100.0).contains(&l)));
    }

    #[tokio::test]
    async fn test_stops_on_shutdown() {
        let registry = Arc::new(Registry::in_memory());
        let balancer = Arc::new(Balancer::new(registry.clone(), Algorithm::LeastLoad));
        let (tx, rx) = broadcast::channel(1);

        let handle = tokio::spawn(LoadSimulator::new(registry, balancer, Duration::from_millis(10)).run(rx));
        tx.send(()).unwrap();
        tokio::time::timeout(Duration::from_secs(1), handle).await.unwrap().unwrap();
    }
}
