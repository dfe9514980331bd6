//! Least-load balancing strategy.

use std::collections::HashMap;
use std::sync::RwLock;
use std::time::Instant;

use crate::load_balancer::LoadBalancer;
use crate::registry::Backend;

/// Load assumed for a backend that has not reported yet.
pub const DEFAULT_LOAD: f64 = 50.0;

#[derive(Debug, Default)]
struct LoadSamples {
    loads: HashMap<String, f64>,
    last_update: Option<Instant>,
}

/// Least-load selector.
/// Selects the backend with the lowest reported load; ties go to the
/// earliest backend in registry order.
#[derive(Debug, Default)]
pub struct LeastLoad {
    samples: RwLock<LoadSamples>,
}

impl LeastLoad {
    pub fn new() -> Self {
        Self::default()
    }

    /// When the most recent sample arrived, if any.
    pub fn last_update(&self) -> Option<Instant> {
        self.samples.read().expect("load samples lock poisoned").last_update
    }
}

impl LoadBalancer for LeastLoad {
    fn next_server(&self, backends: &[Backend]) -> Option<Backend> {
        let samples = self.samples.read().expect("load samples lock poisoned");

        let mut best: Option<&Backend> = None;
        let mut min_load = f64::INFINITY;
        for backend in backends {
            let load = samples.loads.get(backend.address()).copied().unwrap_or(DEFAULT_LOAD);
            if load < min_load {
                min_load = load;
                best = Some(backend);
            }
        }
        best.cloned()
    }

    fn update_load(&self, address: &str, load: f64) {
        if !load.is_finite() {
            tracing::warn!(backend = %address, load, "Ignoring non-finite load report");
            return;
        }
        let mut samples = self.samples.write().expect("load samples lock poisoned");
        samples.loads.insert(address.to_string(), load);
        samples.last_update = Some(Instant::now());
    }

    fn loads(&self) -> HashMap<String, f64> {
        self.samples.read().expect("load samples lock poisoned").loads.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn backends(addresses: &[&str]) -> Vec<Backend> {
        addresses.iter().map(|a| Backend::new(*a)).collect()
    }

    #[test]
    fn test_least_load() {
        let lb = LeastLoad::new();
        lb.update_load("A:1", 10.0);
        lb.update_load("B:1", 90.0);

        // C has no sample and counts as 50.
        let chosen = lb.next_server(&backends(&["A:1", "B:1", "C:1"])).unwrap();
        assert_eq!(chosen.address(), "A:1");

        lb.update_load("A:1", 70.0);
        let chosen = lb.next_server(&backends(&["A:1", "B:1", "C:1"])).unwrap();
        assert_eq!(chosen.address(), "C:1");
    }

    #[test]
    fn test_ties_go_to_first() {
        let lb = LeastLoad::new();
        let chosen = lb.next_server(&backends(&["x:1", "y:1", "z:1"])).unwrap();
        assert_eq!(chosen.address(), "x:1");

        lb.update_load("y:1", 20.0);
        lb.update_load("z:1", 20.0);
        let chosen = lb.next_server(&backends(&["x:1", "y:1", "z:1"])).unwrap();
        assert_eq!(chosen.address(), "y:1");
    }

    #[test]
    fn test_rejects_non_finite() {
        let lb = LeastLoad::new();
        lb.update_load("a:1", f64::NAN);
        lb.update_load("a:1", f64::INFINITY);
        assert!(lb.loads().is_empty());
        assert!(lb.last_update().is_none());

        lb.update_load("a:1", 5.0);
        assert_eq!(lb.loads().get("a:1"), Some(&5.0));
        assert!(lb.last_update().is_some());
    }

    #[test]
    fn test_empty() {
        assert!(LeastLoad::new().next_server(&[]).is_none());
    }
}
