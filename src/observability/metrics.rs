//! Metrics collection and exposition.
//!
//! # Metrics
//! - `lb_requests_total` (counter): forwarded requests by method, status, backend
//! - `lb_request_duration_seconds` (histogram): end-to-end latency
//! - `lb_active_connections` (gauge): open client connections
//! - `lb_registry_backends` (gauge): registered backends
//! - `lb_backend_removals_total` (counter): health-driven evictions
//! - `lb_pool_events_total` (counter): reuse / dial / exhausted / evicted / discarded
//! - `lb_backend_health_latency_seconds` (histogram): successful probe latency
//!
//! Recording is a no-op until a recorder is installed, so library users and
//! tests pay nothing.

use std::net::SocketAddr;
use std::time::{Duration, Instant};

use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;

/// Install the Prometheus recorder and its HTTP scrape listener.
pub fn init_metrics(addr: SocketAddr) {
    match PrometheusBuilder::new().with_http_listener(addr).install() {
        Ok(()) => tracing::info!(address = %addr, "Metrics exporter listening"),
        Err(e) => tracing::error!(error = %e, "Failed to install metrics exporter"),
    }
}

pub fn record_request(method: &str, status: u16, backend: &str, start: Instant) {
    let labels = [
        ("method", method.to_string()),
        ("status", status.to_string()),
        ("backend", backend.to_string()),
    ];
    counter!("lb_requests_total", &labels).increment(1);
    histogram!("lb_request_duration_seconds", &labels).record(start.elapsed().as_secs_f64());
}

pub fn connection_opened() {
    gauge!("lb_active_connections").increment(1.0);
}

pub fn connection_closed() {
    gauge!("lb_active_connections").decrement(1.0);
}

pub fn set_registry_size(len: usize) {
    gauge!("lb_registry_backends").set(len as f64);
}

pub fn record_backend_removed(address: &str) {
    counter!("lb_backend_removals_total", "backend" => address.to_string()).increment(1);
}

pub fn record_probe_latency(address: &str, latency: Duration) {
    histogram!("lb_backend_health_latency_seconds", "backend" => address.to_string())
        .record(latency.as_secs_f64());
}

/// Pool lifecycle events.
#[derive(Debug, Clone, Copy)]
pub enum PoolEvent {
    Reuse,
    Dial,
    Exhausted,
    Evicted,
    Discarded,
}

impl PoolEvent {
    fn as_str(self) -> &'static str {
        match self {
            PoolEvent::Reuse => "reuse",
            PoolEvent::Dial => "dial",
            PoolEvent::Exhausted => "exhausted",
            PoolEvent::Evicted => "evicted",
            PoolEvent::Discarded => "discarded",
        }
    }
}

pub fn record_pool_event(event: PoolEvent, count: u64) {
    if count > 0 {
        counter!("lb_pool_events_total", "event" => event.as_str()).increment(count);
    }
}
