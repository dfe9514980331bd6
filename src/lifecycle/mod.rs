//! Lifecycle management subsystem.
//!
//! # Data Flow
//! ```text
//! Signals (signals.rs):
//!     SIGTERM/SIGINT → Shutdown::trigger
//!
//! Shutdown (shutdown.rs):
//!     trigger → server stops accepting
//!     → background tasks (health, pool cleanup, load feed, admin) exit
//!     → in-flight connections finish gracefully
//!     → pool closed → wait for drain (bounded) → exit
//! ```
//!
//! # Design Decisions
//! - One broadcast signal; every task owns a receiver
//! - Shutdown has a deadline: connections still open after it are abandoned

pub mod shutdown;
pub mod signals;

pub use shutdown::Shutdown;
