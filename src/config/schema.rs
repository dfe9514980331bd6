//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the load balancer.
//! All types derive Serde traits for deserialization from config files.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Root configuration for the load balancer.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct ProxyConfig {
    /// Listener configuration (bind address, TLS, idle deadline).
    pub listener: ListenerConfig,

    /// Outbound connection pool limits.
    pub pool: PoolConfig,

    /// Active health check settings.
    pub health_check: HealthCheckConfig,

    /// Backend selection policy.
    pub balancer: BalancerConfig,

    /// Registry persistence.
    pub registry: RegistryConfig,

    /// Backends registered at startup.
    pub backends: Vec<BackendConfig>,

    /// Timeout configuration.
    pub timeouts: TimeoutConfig,

    /// Body limits and forwarding headers.
    pub security: SecurityConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,

    /// Operator API.
    pub admin: AdminConfig,
}

/// Listener configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ListenerConfig {
    /// Bind address (e.g., "0.0.0.0:8080").
    pub bind_address: String,

    /// Optional TLS configuration.
    pub tls: Option<TlsConfig>,

    /// Maximum concurrent client connections (backpressure).
    pub max_connections: usize,

    /// Close a client connection after this long without any progress.
    pub idle_timeout_secs: u64,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:8080".to_string(),
            tls: None,
            max_connections: 10_000,
            idle_timeout_secs: 60,
        }
    }
}

impl ListenerConfig {
    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_timeout_secs)
    }
}

/// TLS configuration for the listener.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TlsConfig {
    /// Path to certificate file (PEM).
    pub cert_path: String,

    /// Path to private key file (PEM).
    pub key_path: String,
}

/// Per-backend connection pool configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct PoolConfig {
    /// Maximum connections tracked per backend address (idle + checked out).
    pub max_connections: usize,

    /// Idle connections unused for longer than this are evicted.
    pub idle_timeout_secs: u64,

    /// Idle connections older than this are evicted.
    pub max_lifetime_secs: u64,

    /// How often the cleanup task sweeps idle connections.
    pub cleanup_interval_secs: u64,

    /// Upper bound on establishing a new backend connection.
    pub connect_timeout_secs: u64,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_connections: 100,
            idle_timeout_secs: 90,
            max_lifetime_secs: 600,
            cleanup_interval_secs: 30,
            connect_timeout_secs: 10,
        }
    }
}

/// Health check configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct HealthCheckConfig {
    /// Enable active health checks.
    pub enabled: bool,

    /// Health check interval in seconds.
    pub interval_secs: u64,

    /// Health check timeout in seconds, applied to each probe step.
    pub timeout_secs: u64,

    /// Path to probe for HTTP health checks.
    pub path: String,
}

impl Default for HealthCheckConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_secs: 10,
            timeout_secs: 5,
            path: "/health".to_string(),
        }
    }
}

/// Selection algorithm.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Algorithm {
    #[default]
    RoundRobin,
    /// Pick the backend with the lowest reported load.
    LeastLoad,
}

impl std::fmt::Display for Algorithm {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Algorithm::RoundRobin => f.write_str("round_robin"),
            Algorithm::LeastLoad => f.write_str("least_load"),
        }
    }
}

/// Balancer configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct BalancerConfig {
    /// Selection algorithm.
    pub algorithm: Algorithm,

    /// Run the placeholder load generator (least_load only).
    pub simulate_load: bool,

    /// Load generator period in seconds.
    pub load_update_interval_secs: u64,

    /// How often the current load snapshot is logged.
    pub load_report_interval_secs: u64,
}

impl Default for BalancerConfig {
    fn default() -> Self {
        Self {
            algorithm: Algorithm::RoundRobin,
            simulate_load: true,
            load_update_interval_secs: 10,
            load_report_interval_secs: 60,
        }
    }
}

/// Registry persistence configuration.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct RegistryConfig {
    /// JSON snapshot path; `None` keeps the registry in memory only.
    pub path: Option<String>,
}

/// Backend server configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct BackendConfig {
    /// Backend address (e.g., "127.0.0.1:3000").
    pub address: String,
}

impl BackendConfig {
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
        }
    }
}

/// Timeout configuration for various operations.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TimeoutConfig {
    /// Upper bound on one backend exchange (handshake, request, full response).
    pub request_secs: u64,

    /// How long shutdown waits for in-flight client connections.
    pub shutdown_grace_secs: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            request_secs: 30,
            shutdown_grace_secs: 10,
        }
    }
}

/// Request limits and forwarding header behaviour.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct SecurityConfig {
    /// Maximum request and response body size in bytes.
    pub max_body_size: usize,

    /// Add X-Forwarded-For / -Proto / -Host to upstream requests.
    pub forwarded_headers: bool,
}

impl Default for SecurityConfig {
    fn default() -> Self {
        Self {
            max_body_size: 16 * 1024 * 1024, // 16MB
            forwarded_headers: true,
        }
    }
}

/// Log output format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Log output format.
    pub log_format: LogFormat,

    /// Enable metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_format: LogFormat::Pretty,
            metrics_enabled: false,
            metrics_address: "0.0.0.0:9090".to_string(),
        }
    }
}

/// Admin API configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct AdminConfig {
    /// Enable the admin API.
    pub enabled: bool,

    /// API key for authentication (Bearer token).
    pub api_key: String,

    /// Admin API bind address.
    pub bind_address: String,
}

impl Default for AdminConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            // WARNING: This is a placeholder! Change this in production.
            api_key: "CHANGE_ME_IN_PRODUCTION".to_string(),
            bind_address: "127.0.0.1:8081".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_minimal_toml_uses_defaults() {
        let config: ProxyConfig = toml::from_str(
            r#"
            [[backends]]
            address = "127.0.0.1:9001"
            "#,
        )
        .unwrap();

        assert_eq!(config.backends.len(), 1);
        assert_eq!(config.listener.bind_address, "0.0.0.0:8080");
        assert_eq!(config.balancer.algorithm, Algorithm::RoundRobin);
        assert_eq!(config.health_check.path, "/health");
        assert!(config.registry.path.is_none());
    }

    #[test]
    fn test_algorithm_names() {
        let config: BalancerConfig = toml::from_str(r#"algorithm = "least_load""#).unwrap();
        assert_eq!(config.algorithm, Algorithm::LeastLoad);
        assert_eq!(Algorithm::RoundRobin.to_string(), "round_robin");
    }
}
