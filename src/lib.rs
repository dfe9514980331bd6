//! Reverse-proxying load balancer.
//!
//! Maintains a dynamic set of backends, health-probes them, picks one per
//! request under a configurable policy and relays traffic over pooled
//! backend connections.

pub mod admin;
pub mod config;
pub mod health;
pub mod http;
pub mod lifecycle;
pub mod load_balancer;
pub mod net;
pub mod observability;
pub mod pool;
pub mod registry;
pub mod security;

pub use config::schema::ProxyConfig;
pub use http::HttpServer;
pub use lifecycle::Shutdown;
