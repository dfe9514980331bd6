//! Backend registry subsystem.
//!
//! # Data Flow
//! ```text
//! Startup:
//!     snapshot file (JSON) → store.rs (load) → initial backend list
//!     configured backends → Registry::add
//!
//! Runtime:
//!     admin API / config reload → add
//!     health checker            → remove
//!     balancer                  → get_all (fresh snapshot per request)
//! ```
//!
//! # Design Decisions
//! - One reader/writer lock over the whole list
//! - Snapshot written wholesale on every mutation
//! - Duplicate registration is the caller's concern

pub mod backend;
pub mod store;

pub use backend::Backend;
pub use store::{Registry, RegistryError};
