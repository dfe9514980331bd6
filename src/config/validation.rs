//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Validate value ranges (timeouts > 0, limits > 0)
//! - Validate addresses (bind addresses parse, backends look like host:port)
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: ProxyConfig → Result<(), Vec<ValidationError>>
//! - Runs before config is accepted into the system

use std::fmt;
use std::net::SocketAddr;

use crate::config::schema::ProxyConfig;

/// A single semantic problem in a configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    /// Dotted path of the offending field.
    pub field: String,
    pub message: String,
}

impl ValidationError {
    fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

/// Check a configuration, collecting every problem found.
pub fn validate_config(config: &ProxyConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if config.listener.bind_address.parse::<SocketAddr>().is_err() {
        errors.push(ValidationError::new(
            "listener.bind_address",
            format!("not a socket address: {}", config.listener.bind_address),
        ));
    }
    if config.listener.max_connections == 0 {
        errors.push(ValidationError::new("listener.max_connections", "must be > 0"));
    }
    if config.listener.idle_timeout_secs == 0 {
        errors.push(ValidationError::new("listener.idle_timeout_secs", "must be > 0"));
    }
    if let Some(tls) = &config.listener.tls {
        if tls.cert_path.trim().is_empty() || tls.key_path.trim().is_empty() {
            errors.push(ValidationError::new(
                "listener.tls",
                "cert_path and key_path must both be set",
            ));
        }
    }

    let pool = &config.pool;
    for (field, value) in [
        ("pool.idle_timeout_secs", pool.idle_timeout_secs),
        ("pool.max_lifetime_secs", pool.max_lifetime_secs),
        ("pool.cleanup_interval_secs", pool.cleanup_interval_secs),
        ("pool.connect_timeout_secs", pool.connect_timeout_secs),
        ("timeouts.request_secs", config.timeouts.request_secs),
    ] {
        if value == 0 {
            errors.push(ValidationError::new(field, "must be > 0"));
        }
    }
    if pool.max_connections == 0 {
        errors.push(ValidationError::new("pool.max_connections", "must be > 0"));
    }
    // A client waiting on a slow backend sends and receives nothing, so the
    // idle deadline would cut it off before the request timeout can answer.
    if config.listener.idle_timeout_secs != 0
        && config.listener.idle_timeout_secs < config.timeouts.request_secs
    {
        errors.push(ValidationError::new(
            "listener.idle_timeout_secs",
            format!(
                "must be >= timeouts.request_secs ({})",
                config.timeouts.request_secs
            ),
        ));
    }

    let health = &config.health_check;
    if health.enabled {
        if health.interval_secs == 0 {
            errors.push(ValidationError::new("health_check.interval_secs", "must be > 0"));
        }
        if health.timeout_secs == 0 {
            errors.push(ValidationError::new("health_check.timeout_secs", "must be > 0"));
        }
        if !health.path.starts_with('/') {
            errors.push(ValidationError::new("health_check.path", "must start with '/'"));
        }
    }

    let balancer = &config.balancer;
    if balancer.load_update_interval_secs == 0 {
        errors.push(ValidationError::new("balancer.load_update_interval_secs", "must be > 0"));
    }
    if balancer.load_report_interval_secs == 0 {
        errors.push(ValidationError::new("balancer.load_report_interval_secs", "must be > 0"));
    }

    for (i, backend) in config.backends.iter().enumerate() {
        if !is_host_port(&backend.address) {
            errors.push(ValidationError::new(
                format!("backends[{}].address", i),
                format!("expected host:port, got {:?}", backend.address),
            ));
        }
    }

    if config.observability.metrics_enabled
        && config.observability.metrics_address.parse::<SocketAddr>().is_err()
    {
        errors.push(ValidationError::new(
            "observability.metrics_address",
            "not a socket address",
        ));
    }

    if config.admin.enabled {
        if config.admin.bind_address.parse::<SocketAddr>().is_err() {
            errors.push(ValidationError::new("admin.bind_address", "not a socket address"));
        }
        if config.admin.api_key.is_empty() {
            errors.push(ValidationError::new("admin.api_key", "must not be empty"));
        }
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

/// Loose `host:port` check; resolution happens at dial time.
pub fn is_host_port(address: &str) -> bool {
    match address.rsplit_once(':') {
        Some((host, port)) => !host.is_empty() && !host.contains('/') && port.parse::<u16>().is_ok(),
        None => false,
    }
}
