//! Round-robin load balancing strategy.

use std::sync::atomic::{AtomicUsize, Ordering};

use crate::load_balancer::LoadBalancer;
use crate::registry::Backend;

/// Round-robin selector.
/// Stores an internal counter to rotate through backends.
#[derive(Debug, Default)]
pub struct RoundRobin {
    counter: AtomicUsize,
}

impl RoundRobin {
    pub fn new() -> Self {
        Self::default()
    }
}

impl LoadBalancer for RoundRobin {
    fn next_server(&self, backends: &[Backend]) -> Option<Backend> {
        if backends.is_empty() {
            return None;
        }
        // Index and modulo come from the same snapshot, so a concurrent
        // removal can never push the index out of range.
        let count = self.counter.fetch_add(1, Ordering::Relaxed);
        backends.get(count % backends.len()).cloned()
    }
}
