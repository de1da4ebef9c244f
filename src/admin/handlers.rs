use axum::{extract::State, http::StatusCode, Json};
use serde::{Deserialize, Serialize};

use crate::admin::AdminState;
use crate::queue::Stat;

#[derive(Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct SidecarStatus {
    pub version: String,
    pub ready: bool,
    /// `None` when admission control is disabled.
    pub capacity: Option<usize>,
    pub max_concurrency: Option<usize>,
    pub pending: usize,
    pub in_flight: usize,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ConcurrencyUpdate {
    pub concurrency: usize,
}

#[derive(Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct ConcurrencyResponse {
    pub requested: usize,
    pub capacity: usize,
}

pub async fn get_status(State(state): State<AdminState>) -> Json<SidecarStatus> {
    let breaker = state.breaker.as_deref();
    Json(SidecarStatus {
        version: env!("CARGO_PKG_VERSION").to_string(),
        ready: state.readiness.is_ready(),
        capacity: breaker.map(|b| b.capacity()),
        max_concurrency: breaker.map(|b| b.max_concurrency()),
        pending: breaker.map_or(0, |b| b.pending()),
        in_flight: breaker.map_or(0, |b| b.in_flight()),
    })
}

pub async fn put_concurrency(
    State(state): State<AdminState>,
    Json(update): Json<ConcurrencyUpdate>,
) -> Result<Json<ConcurrencyResponse>, (StatusCode, &'static str)> {
    let breaker = state
        .breaker
        .as_deref()
        .ok_or((StatusCode::CONFLICT, "admission control is disabled"))?;

    breaker.update_concurrency(update.concurrency);
    Ok(Json(ConcurrencyResponse {
        requested: update.concurrency,
        capacity: breaker.capacity(),
    }))
}

pub async fn get_stats(State(state): State<AdminState>) -> Json<Stat> {
    Json(*state.stats.borrow())
}
