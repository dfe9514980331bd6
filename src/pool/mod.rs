//! Outbound connection pooling.
//!
//! # Data Flow
//! ```text
//! Forwarder picks backend address
//!     → manager.rs (reuse a valid idle connection, or dial under the cap)
//!     → dialer.rs (TCP connect with timeout)
//!     → connection.rs (lease tracks the checked-out connection)
//!     → exchange completes cleanly → release back to idle list
//!     → otherwise → drop closes the connection and frees the slot
//! ```
//!
//! # Design Decisions
//! - A single lock guards the map; dials happen outside it
//! - Cap counts idle and checked-out connections together
//! - Idle timeout and lifetime are checked on every get and by a periodic sweep

pub mod connection;
pub mod dialer;
pub mod manager;

pub use connection::{Lease, PooledConnection};
pub use dialer::{Dialer, TcpDialer};
pub use manager::{ConnectionPool, PoolError, PoolSettings, PoolStats};
