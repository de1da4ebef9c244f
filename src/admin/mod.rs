pub mod auth;
pub mod handlers;

use std::sync::Arc;

use axum::{
    middleware,
    routing::{get, put},
    Router,
};
use tokio::net::TcpListener;
use tokio::sync::{broadcast, watch};

use self::auth::admin_auth_middleware;
use self::handlers::*;
use crate::health::ReadinessReader;
use crate::queue::{Breaker, Stat};

/// Shared state for admin handlers.
#[derive(Clone)]
pub struct AdminState {
    pub api_key: Arc<str>,
    pub breaker: Option<Arc<Breaker>>,
    pub readiness: ReadinessReader,
    pub stats: watch::Receiver<Stat>,
}

pub fn setup_admin_router(state: AdminState) -> Router {
    Router::new()
        .route("/admin/status", get(get_status))
        .route("/admin/concurrency", put(put_concurrency))
        .route("/admin/stats", get(get_stats))
        .layer(middleware::from_fn_with_state(state.clone(), admin_auth_middleware))
        .with_state(state)
}

/// Serve the admin API until shutdown fires.
pub async fn serve(
    listener: TcpListener,
    state: AdminState,
    mut shutdown: broadcast::Receiver<()>,
) -> std::io::Result<()> {
    tracing::info!(address = %listener.local_addr()?, "Admin API listening");
    axum::serve(listener, setup_admin_router(state))
        .with_graceful_shutdown(async move {
            let _ = shutdown.recv().await;
        })
        .await
}
