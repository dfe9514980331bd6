use std::collections::HashMap;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};

use crate::admin::AdminState;
use crate::config::validation::is_host_port;
use crate::observability::metrics::PoolEvent;
use crate::pool::PoolStats;
use crate::registry::Backend;

#[derive(Debug, Serialize, Deserialize)]
pub struct SystemStatus {
    pub version: String,
    pub status: String,
    pub algorithm: String,
    pub backends: usize,
    pub uptime_secs: u64,
    pub pool: PoolCounters,
}

/// Pool event totals since startup.
#[derive(Debug, Serialize, Deserialize)]
pub struct PoolCounters {
    pub reused: u64,
    pub dialed: u64,
    pub exhausted: u64,
    pub evicted: u64,
    pub discarded: u64,
}

impl From<&PoolStats> for PoolCounters {
    fn from(stats: &PoolStats) -> Self {
        Self {
            reused: stats.get(PoolEvent::Reuse),
            dialed: stats.get(PoolEvent::Dial),
            exhausted: stats.get(PoolEvent::Exhausted),
            evicted: stats.get(PoolEvent::Evicted),
            discarded: stats.get(PoolEvent::Discarded),
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct BackendStatus {
    pub address: String,
    pub load: Option<f64>,
    pub idle_connections: usize,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct AddBackendRequest {
    pub address: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct LoadReport {
    pub address: String,
    pub load: f64,
}

pub async fn get_status(State(state): State<AdminState>) -> Json<SystemStatus> {
    Json(SystemStatus {
        version: env!("CARGO_PKG_VERSION").to_string(),
        status: "operational".to_string(),
        algorithm: state.balancer.algorithm().to_string(),
        backends: state.registry.len(),
        uptime_secs: state.started_at.elapsed().as_secs(),
        pool: PoolCounters::from(state.pool.stats()),
    })
}

pub async fn get_backends(State(state): State<AdminState>) -> Json<Vec<BackendStatus>> {
    let loads = state.balancer.server_loads();
    let statuses = state
        .registry
        .get_all()
        .into_iter()
        .map(|b| BackendStatus {
            load: loads.get(b.address()).copied(),
            idle_connections: state.pool.idle_count(b.address()),
            address: b.address,
        })
        .collect();
    Json(statuses)
}

pub async fn add_backend(
    State(state): State<AdminState>,
    Json(body): Json<AddBackendRequest>,
) -> Response {
    if !is_host_port(&body.address) {
        return (StatusCode::BAD_REQUEST, "address must be host:port").into_response();
    }

    match state.registry.add_if_absent(Backend::new(body.address.clone())) {
        Ok(true) => (StatusCode::CREATED, Json(body)).into_response(),
        Ok(false) => (StatusCode::CONFLICT, "backend already registered").into_response(),
        Err(e) => {
            tracing::error!(address = %body.address, error = %e, "Backend added but snapshot write failed");
            (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response()
        }
    }
}

pub async fn remove_backend(
    State(state): State<AdminState>,
    Path(address): Path<String>,
) -> Response {
    match state.registry.remove(&address) {
        Ok(true) => StatusCode::NO_CONTENT.into_response(),
        Ok(false) => (StatusCode::NOT_FOUND, "backend not registered").into_response(),
        Err(e) => {
            tracing::error!(address = %address, error = %e, "Backend removed but snapshot write failed");
            (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response()
        }
    }
}

pub async fn get_loads(State(state): State<AdminState>) -> Json<HashMap<String, f64>> {
    Json(state.balancer.server_loads())
}

pub async fn report_load(
    State(state): State<AdminState>,
    Json(report): Json<LoadReport>,
) -> StatusCode {
    if !report.load.is_finite() {
        return StatusCode::BAD_REQUEST;
    }
    state.balancer.update_server_load(&report.address, report.load);
    StatusCode::NO_CONTENT
}
