//! HTTP protocol handling subsystem.
//!
//! # Data Flow
//! ```text
//! TCP/TLS connection
//!     → server.rs (one HTTP/1.1 connection task per client)
//!     → request ID, tracing and body-limit middleware
//!     → auxiliary route? → served directly
//!     → otherwise forward.rs:
//!         balancer → pool → request.rs (rewrite for backend) → relay
//!     → response.rs (failures mapped to 5xx)
//!     → Send to client
//! ```

pub mod forward;
pub mod request;
pub mod response;
pub mod server;

pub use forward::ForwardState;
pub use request::{MakeRequestUuidV4, X_REQUEST_ID};
pub use response::ForwardError;
pub use server::{HttpServer, ServerError};
