//! Request hygiene applied at the proxy boundary.
//!
//! # Data Flow
//! ```text
//! Client request
//!     → body size limit (tower-http, configured from security.max_body_size)
//!     → headers.rs (strip hop-by-hop, add X-Forwarded-*)
//!     → Forward to backend
//!
//! Backend response
//!     → headers.rs (strip hop-by-hop)
//!     → Client
//! ```

pub mod headers;
