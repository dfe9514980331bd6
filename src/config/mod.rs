//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! config file (TOML)
//!     → loader.rs (parse & deserialize)
//!     → validation.rs (semantic checks)
//!     → ProxyConfig (validated, immutable)
//!     → handed to HttpServer::new
//!
//! On file change:
//!     watcher.rs detects change
//!     → loader.rs loads new config
//!     → validation.rs validates
//!     → server registers configured backends missing from the registry
//! ```
//!
//! # Design Decisions
//! - Config is immutable once loaded; a reload only feeds backend registration
//! - All fields have defaults to allow minimal configs
//! - Validation separates syntactic (serde) from semantic checks

pub mod loader;
pub mod schema;
pub mod validation;
pub mod watcher;

pub use loader::{load_config, ConfigError};
pub use schema::{
    AdminConfig, Algorithm, BackendConfig, BalancerConfig, HealthCheckConfig, ListenerConfig,
    LogFormat, ObservabilityConfig, PoolConfig, ProxyConfig, RegistryConfig, SecurityConfig,
    TimeoutConfig, TlsConfig,
};
