//! Operator API.
//!
//! Served on its own bind address and guarded by a bearer token. Lets an
//! operator inspect and change registry membership and feed load reports.

pub mod auth;
pub mod handlers;

use std::sync::Arc;
use std::time::Instant;

use axum::{
    middleware,
    routing::{delete, get},
    Router,
};
use tokio::net::TcpListener;
use tokio::sync::broadcast;

use crate::load_balancer::Balancer;
use crate::pool::ConnectionPool;
use crate::registry::Registry;
use self::auth::admin_auth_middleware;
use self::handlers::*;

/// Handles shared with the admin handlers.
#[derive(Clone)]
pub struct AdminState {
    pub registry: Arc<Registry>,
    pub balancer: Arc<Balancer>,
    pub pool: Arc<ConnectionPool>,
    pub api_key: Arc<str>,
    pub started_at: Instant,
}

pub fn setup_admin_router(state: AdminState) -> Router {
    Router::new()
        .route("/admin/status", get(get_status))
        .route("/admin/backends", get(get_backends).post(add_backend))
        .route("/admin/backends/{address}", delete(remove_backend))
        .route("/admin/loads", get(get_loads).post(report_load))
        .layer(middleware::from_fn_with_state(state.clone(), admin_auth_middleware))
        .with_state(state)
}

/// Serve the admin API on `listener` until shutdown.
pub async fn serve(
    listener: TcpListener,
    state: AdminState,
    mut shutdown: broadcast::Receiver<()>,
) -> std::io::Result<()> {
    tracing::info!(address = ?listener.local_addr().ok(), "Admin API listening");
    axum::serve(listener, setup_admin_router(state))
        .with_graceful_shutdown(async move {
            let _ = shutdown.recv().await;
        })
        .await
}
