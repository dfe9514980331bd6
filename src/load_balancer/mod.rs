//! Load balancing subsystem.
//!
//! # Data Flow
//! ```text
//! Request needs a backend
//!     → Balancer::next_backend (fresh registry snapshot)
//!     → Apply selection policy:
//!         - round_robin.rs (rotate through backends)
//!         - least_load.rs (pick backend with the lowest reported load)
//!     → Some(backend) or None (caller answers 503)
//!
//! Load reports (simulator, admin API)
//!     → Balancer::update_server_load → policy's sample store
//! ```
//!
//! # Design Decisions
//! - Policies are stateless with respect to membership; the registry owns it
//! - Load samples are isolated behind `update_server_load`
//! - Policy chosen once from configuration

pub mod least_load;
pub mod round_robin;
pub mod telemetry;

use std::collections::HashMap;
use std::sync::Arc;

use crate::config::Algorithm;
use crate::registry::{Backend, Registry};
use least_load::LeastLoad;
use round_robin::RoundRobin;

/// Trait for load balancing algorithms.
pub trait LoadBalancer: Send + Sync + std::fmt::Debug {
    /// Select the next backend from the list, or `None` if it is empty.
    fn next_server(&self, backends: &[Backend]) -> Option<Backend>;

    /// Record a load sample. Policies that ignore load keep the default.
    fn update_load(&self, _address: &str, _load: f64) {}

    /// Current load samples.
    fn loads(&self) -> HashMap<String, f64> {
        HashMap::new()
    }
}

/// Selection over the live registry.
#[derive(Debug)]
pub struct Balancer {
    registry: Arc<Registry>,
    policy: Box<dyn LoadBalancer>,
    algorithm: Algorithm,
}

impl Balancer {
    pub fn new(registry: Arc<Registry>, algorithm: Algorithm) -> Self {
        let policy: Box<dyn LoadBalancer> = match algorithm {
            Algorithm::RoundRobin => Box::new(RoundRobin::new()),
            Algorithm::LeastLoad => Box::new(LeastLoad::new()),
        };
        Self {
            registry,
            policy,
            algorithm,
        }
    }

    pub fn algorithm(&self) -> Algorithm {
        self.algorithm
    }

    /// Choose a backend from the current registry contents.
    pub fn next_backend(&self) -> Option<Backend> {
        let snapshot = self.registry.get_all();
        let selected = self.policy.next_server(&snapshot);
        if selected.is_none() {
            tracing::debug!(algorithm = %self.algorithm, "No backend available for selection");
        }
        selected
    }

    pub fn update_server_load(&self, address: &str, load: f64) {
        self.policy.update_load(address, load);
    }

    pub fn server_loads(&self) -> HashMap<String, f64> {
        self.policy.loads()
    }
}
