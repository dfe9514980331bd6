//! Health checking subsystem.
//!
//! # Data Flow
//! ```text
//! Periodic timer (active.rs)
//!     → Snapshot registry
//!     → Probe each backend concurrently (probe.rs):
//!         1. TCP connect within timeout
//!         2. GET <path> within timeout, expect 2xx
//!     → Unhealthy → registry.remove(address)
//!     → Healthy → debug log only
//! ```
//!
//! # Design Decisions
//! - A single failed probe evicts; there is no flapping threshold
//! - The checker never re-adds a backend; re-registration is an operator action

pub mod active;
pub mod probe;

pub use active::HealthChecker;
pub use probe::{HealthCheckResult, ProbeError, Prober};
