//! Per-backend connection pool.
//!
//! # Responsibilities
//! - Hand out idle connections, dialing when none are usable
//! - Enforce the per-address cap over idle and checked-out connections
//! - Evict idle connections past their idle timeout or lifetime
//! - Close everything on shutdown

use std::collections::HashMap;
use std::io;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use thiserror::Error;
use tokio::sync::broadcast;
use tokio::time;

use crate::config::PoolConfig;
use crate::observability::metrics::{record_pool_event, PoolEvent};
use crate::pool::connection::{IdleConnection, Lease, PooledConnection};
use crate::pool::dialer::{Dialer, TcpDialer};

#[derive(Debug, Error)]
pub enum PoolError {
    #[error("connection pool exhausted for {0}")]
    Exhausted(String),

    #[error("failed to connect to {address}: {source}")]
    Dial {
        address: String,
        #[source]
        source: io::Error,
    },

    #[error("connection pool is closed")]
    Closed,
}

/// Pool limits resolved from configuration.
#[derive(Debug, Clone)]
pub struct PoolSettings {
    pub max_conns: usize,
    pub idle_timeout: Duration,
    pub max_lifetime: Duration,
    pub cleanup_interval: Duration,
    pub connect_timeout: Duration,
}

impl From<&PoolConfig> for PoolSettings {
    fn from(config: &PoolConfig) -> Self {
        Self {
            max_conns: config.max_connections,
            idle_timeout: Duration::from_secs(config.idle_timeout_secs),
            max_lifetime: Duration::from_secs(config.max_lifetime_secs),
            cleanup_interval: Duration::from_secs(config.cleanup_interval_secs),
            connect_timeout: Duration::from_secs(config.connect_timeout_secs),
        }
    }
}

/// Running totals of pool events, mirrored into `lb_pool_events_total`.
#[derive(Debug, Default)]
pub struct PoolStats {
    pub reused: AtomicU64,
    pub dialed: AtomicU64,
    pub exhausted: AtomicU64,
    pub evicted: AtomicU64,
    pub discarded: AtomicU64,
}

impl PoolStats {
    fn counter(&self, event: PoolEvent) -> &AtomicU64 {
        match event {
            PoolEvent::Reuse => &self.reused,
            PoolEvent::Dial => &self.dialed,
            PoolEvent::Exhausted => &self.exhausted,
            PoolEvent::Evicted => &self.evicted,
            PoolEvent::Discarded => &self.discarded,
        }
    }

    pub fn get(&self, event: PoolEvent) -> u64 {
        self.counter(event).load(Ordering::Relaxed)
    }
}

struct Slot<C> {
    idle: Vec<IdleConnection<C>>,
    checked_out: usize,
}

impl<C> Default for Slot<C> {
    fn default() -> Self {
        Self {
            idle: Vec::new(),
            checked_out: 0,
        }
    }
}

/// State shared between the pool and its outstanding leases.
pub(crate) struct Shared<C> {
    settings: PoolSettings,
    slots: Mutex<HashMap<String, Slot<C>>>,
    closed: AtomicBool,
    stats: PoolStats,
}

impl<C: Send + 'static> Shared<C> {
    // Leases touch the map from Drop, so poisoning must not cascade.
    fn lock(&self) -> MutexGuard<'_, HashMap<String, Slot<C>>> {
        self.slots.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn record(&self, event: PoolEvent, count: u64) {
        if count > 0 {
            self.stats.counter(event).fetch_add(count, Ordering::Relaxed);
            record_pool_event(event, count);
        }
    }

    /// Return a leased connection to the idle list.
    pub(crate) fn check_in(&self, address: &str, conn: C) {
        let rejected = {
            let mut slots = self.lock();
            let slot = slots.entry(address.to_string()).or_default();
            slot.checked_out = slot.checked_out.saturating_sub(1);
            if self.closed.load(Ordering::Acquire) || slot.idle.len() >= self.settings.max_conns {
                Some(conn)
            } else {
                slot.idle.push(IdleConnection::new(conn, Instant::now()));
                None
            }
        };
        if rejected.is_some() {
            self.record(PoolEvent::Discarded, 1);
        }
    }

    /// Free the slot of a leased connection that will not come back.
    pub(crate) fn forget(&self, address: &str) {
        self.unreserve(address);
        self.record(PoolEvent::Discarded, 1);
    }

    /// Free a reserved slot that never held a connection.
    pub(crate) fn unreserve(&self, address: &str) {
        let mut slots = self.lock();
        if let Some(slot) = slots.get_mut(address) {
            slot.checked_out = slot.checked_out.saturating_sub(1);
        }
    }
}

/// Connection pool keyed by backend address.
///
/// One mutex guards the whole map and is never held across a dial.
pub struct ConnectionPool<D: Dialer = TcpDialer> {
    shared: Arc<Shared<D::Conn>>,
    dialer: D,
}

impl ConnectionPool<TcpDialer> {
    /// TCP pool built from configuration.
    pub fn from_config(config: &PoolConfig) -> Self {
        let settings = PoolSettings::from(config);
        let dialer = TcpDialer::new(settings.connect_timeout);
        Self::new(settings, dialer)
    }
}

impl<D: Dialer> ConnectionPool<D> {
    pub fn new(settings: PoolSettings, dialer: D) -> Self {
        Self {
            shared: Arc::new(Shared {
                settings,
                slots: Mutex::new(HashMap::new()),
                closed: AtomicBool::new(false),
                stats: PoolStats::default(),
            }),
            dialer,
        }
    }

    pub fn settings(&self) -> &PoolSettings {
        &self.shared.settings
    }

    pub fn stats(&self) -> &PoolStats {
        &self.shared.stats
    }

    /// Obtain a connection to `address`.
    ///
    /// Invalid idle connections met along the way are closed. A fresh dial
    /// only happens while fewer than `max_conns` connections exist for the
    /// address, counting both idle and checked-out ones.
    pub async fn get(&self, address: &str) -> Result<PooledConnection<D::Conn>, PoolError> {
        if self.shared.closed.load(Ordering::Acquire) {
            return Err(PoolError::Closed);
        }

        let lease = {
            let settings = &self.shared.settings;
            let now = Instant::now();
            let mut slots = self.shared.lock();
            let slot = slots.entry(address.to_string()).or_default();

            let before = slot.idle.len();
            slot.idle.retain(|idle| {
                idle.is_valid(now, settings.idle_timeout, settings.max_lifetime)
                    && self.dialer.is_reusable(&idle.conn)
            });
            self.shared.record(PoolEvent::Evicted, (before - slot.idle.len()) as u64);

            if !slot.idle.is_empty() {
                let mut idle = slot.idle.remove(0);
                idle.last_used_at = now;
                slot.checked_out += 1;
                drop(slots);

                self.shared.record(PoolEvent::Reuse, 1);
                let lease = Lease::new(address.to_string(), self.shared.clone());
                return Ok(PooledConnection::new(idle.conn, lease, true));
            }

            if slot.idle.len() + slot.checked_out >= settings.max_conns {
                drop(slots);
                self.shared.record(PoolEvent::Exhausted, 1);
                tracing::warn!(backend = %address, max = settings.max_conns, "Connection pool exhausted");
                return Err(PoolError::Exhausted(address.to_string()));
            }

            // Reserve the slot before dialing so concurrent callers see it.
            slot.checked_out += 1;
            Lease::new(address.to_string(), self.shared.clone())
        };

        match self.dialer.dial(address).await {
            Ok(conn) => {
                self.shared.record(PoolEvent::Dial, 1);
                tracing::debug!(backend = %address, "Dialed new backend connection");
                Ok(PooledConnection::new(conn, lease, false))
            }
            Err(source) => {
                lease.cancel();
                tracing::debug!(backend = %address, error = %source, "Backend dial failed");
                Err(PoolError::Dial {
                    address: address.to_string(),
                    source,
                })
            }
        }
    }

    /// Hand an unleased connection to the pool.
    ///
    /// The connection is stamped as brand new. It is closed instead when the
    /// address already holds `max_conns` idle connections.
    pub fn put(&self, address: &str, conn: D::Conn) {
        let rejected = {
            let mut slots = self.shared.lock();
            let slot = slots.entry(address.to_string()).or_default();
            if self.shared.closed.load(Ordering::Acquire)
                || slot.idle.len() >= self.shared.settings.max_conns
            {
                Some(conn)
            } else {
                slot.idle.push(IdleConnection::new(conn, Instant::now()));
                None
            }
        };
        if rejected.is_some() {
            self.shared.record(PoolEvent::Discarded, 1);
        }
    }

    /// Evict every idle connection that is no longer valid.
    ///
    /// Returns the number of connections closed.
    pub fn cleanup(&self) -> usize {
        let settings = &self.shared.settings;
        let now = Instant::now();
        let mut slots = self.shared.lock();

        let mut evicted = 0;
        for slot in slots.values_mut() {
            let before = slot.idle.len();
            slot.idle.retain(|idle| {
                idle.is_valid(now, settings.idle_timeout, settings.max_lifetime)
                    && self.dialer.is_reusable(&idle.conn)
            });
            evicted += before - slot.idle.len();
        }
        slots.retain(|_, slot| !slot.idle.is_empty() || slot.checked_out > 0);
        drop(slots);

        self.shared.record(PoolEvent::Evicted, evicted as u64);
        evicted
    }

    /// Close every idle connection and refuse further use.
    ///
    /// Connections currently leased are closed when their holders finish.
    pub fn close(&self) {
        self.shared.closed.store(true, Ordering::Release);
        let drained: Vec<_> = {
            let mut slots = self.shared.lock();
            slots.values_mut().flat_map(|slot| slot.idle.drain(..)).collect()
        };
        tracing::info!(closed = drained.len(), "Connection pool closed");
    }

    pub fn is_closed(&self) -> bool {
        self.shared.closed.load(Ordering::Acquire)
    }

    /// Number of idle connections held for `address`.
    pub fn idle_count(&self, address: &str) -> usize {
        self.shared.lock().get(address).map_or(0, |slot| slot.idle.len())
    }

    /// Number of connections to `address` currently leased out.
    pub fn checked_out(&self, address: &str) -> usize {
        self.shared.lock().get(address).map_or(0, |slot| slot.checked_out)
    }

    /// Periodically sweep expired connections until shutdown.
    pub async fn run_cleanup(self: Arc<Self>, mut shutdown: broadcast::Receiver<()>) {
        let period = self.shared.settings.cleanup_interval;
        let mut ticker = time::interval_at(time::Instant::now() + period, period);
        ticker.set_missed_tick_behavior(time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let evicted = self.cleanup();
                    if evicted > 0 {
                        tracing::debug!(evicted, "Pool cleanup evicted idle connections");
                    }
                }
                _ = shutdown.recv() => {
                    tracing::debug!("Pool cleanup stopping");
                    break;
                }
            }
        }
    }
}

impl<D: Dialer> std::fmt::Debug for ConnectionPool<D> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionPool")
            .field("settings", &self.shared.settings)
            .field("closed", &self.is_closed())
            .finish()
    }
}
