//! Network layer subsystem.
//!
//! # Data Flow
//! ```text
//! Incoming TCP connection
//!     → listener.rs (accept loop, connection limits)
//!     → tls.rs (handshake, only if the listener was bound with TLS)
//!     → idle.rs (idle deadline over the byte stream)
//!     → connection.rs (identity, lifecycle tracking)
//!     → Hand off to HTTP layer
//! ```
//!
//! # Design Decisions
//! - Bounded accept queue prevents resource exhaustion
//! - Each connection tracked for graceful shutdown
//! - TLS capability is decided once, when the listener is bound

pub mod connection;
pub mod idle;
pub mod listener;
pub mod tls;

pub use connection::{ClientConnection, ConnectionGuard, ConnectionId, ConnectionTracker};
pub use idle::IdleTimeoutStream;
pub use listener::{ConnectionPermit, Listener, ListenerError};
