//! Pooled connection wrappers.
//!
//! # Responsibilities
//! - Timestamp idle connections for eviction
//! - Track checked-out connections through a lease guard
//! - Free the lease slot on every exit path (release or drop)

use std::ops::{Deref, DerefMut};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::pool::manager::Shared;

/// An idle connection owned by the pool.
#[derive(Debug)]
pub(crate) struct IdleConnection<C> {
    pub(crate) conn: C,
    pub(crate) created_at: Instant,
    pub(crate) last_used_at: Instant,
}

impl<C> IdleConnection<C> {
    pub(crate) fn new(conn: C, now: Instant) -> Self {
        Self {
            conn,
            created_at: now,
            last_used_at: now,
        }
    }

    /// Valid iff neither the idle timeout nor the lifetime has elapsed.
    pub(crate) fn is_valid(&self, now: Instant, idle_timeout: Duration, max_lifetime: Duration) -> bool {
        now.saturating_duration_since(self.last_used_at) <= idle_timeout
            && now.saturating_duration_since(self.created_at) <= max_lifetime
    }
}

/// Accounting handle for one checked-out connection.
///
/// Dropping a lease without [`Lease::release`] frees its slot; the
/// connection it stood for is expected to be closed by its owner.
pub struct Lease<C: Send + 'static> {
    address: String,
    shared: Arc<Shared<C>>,
    released: bool,
}

impl<C: Send + 'static> Lease<C> {
    pub(crate) fn new(address: String, shared: Arc<Shared<C>>) -> Self {
        Self {
            address,
            shared,
            released: false,
        }
    }

    /// The backend address this lease belongs to.
    pub fn address(&self) -> &str {
        &self.address
    }

    /// Return `conn` to the pool, freeing the slot.
    pub fn release(mut self, conn: C) {
        self.released = true;
        self.shared.check_in(&self.address, conn);
    }

    /// Give back a reservation whose dial failed.
    pub(crate) fn cancel(mut self) {
        self.released = true;
        self.shared.unreserve(&self.address);
    }
}

impl<C: Send + 'static> Drop for Lease<C> {
    fn drop(&mut self) {
        if !self.released {
            self.shared.forget(&self.address);
        }
    }
}

impl<C: Send + 'static> std::fmt::Debug for Lease<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Lease")
            .field("address", &self.address)
            .field("released", &self.released)
            .finish()
    }
}

/// A connection handed out by the pool.
///
/// Call [`PooledConnection::release`] after a clean exchange. Dropping it
/// closes the connection and frees its slot.
#[derive(Debug)]
pub struct PooledConnection<C: Send + 'static> {
    conn: C,
    lease: Lease<C>,
    reused: bool,
}

impl<C: Send + 'static> PooledConnection<C> {
    pub(crate) fn new(conn: C, lease: Lease<C>, reused: bool) -> Self {
        Self { conn, lease, reused }
    }

    /// True if this connection came from the idle list rather than a fresh dial.
    pub fn is_reused(&self) -> bool {
        self.reused
    }

    pub fn address(&self) -> &str {
        self.lease.address()
    }

    /// Return the connection to the pool.
    pub fn release(self) {
        self.lease.release(self.conn);
    }

    /// Split into the raw connection and its lease, for callers that need
    /// to move the connection into a protocol driver and recover it later.
    pub fn into_parts(self) -> (C, Lease<C>) {
        (self.conn, self.lease)
    }
}

impl<C: Send + 'static> Deref for PooledConnection<C> {
    type Target = C;
    fn deref(&self) -> &C {
        &self.conn
    }
}

impl<C: Send + 'static> DerefMut for PooledConnection<C> {
    fn deref_mut(&mut self) -> &mut C {
        &mut self.conn
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validity_window() {
        let start = Instant::now();
        let idle = IdleConnection::new((), start);
        let idle_timeout = Duration::from_millis(100);
        let lifetime = Duration::from_millis(250);

        assert!(idle.is_valid(start + Duration::from_millis(100), idle_timeout, lifetime));
        assert!(!idle.is_valid(start + Duration::from_millis(101), idle_timeout, lifetime));

        let mut recent = IdleConnection::new((), start);
        recent.last_used_at = start + Duration::from_millis(200);
        assert!(recent.is_valid(start + Duration::from_millis(250), idle_timeout, lifetime));
        assert!(!recent.is_valid(start + Duration::from_millis(260), idle_timeout, lifetime));
    }
}
