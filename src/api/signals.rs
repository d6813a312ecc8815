//! Signal ingest and read endpoints.
//!
//! Producers create pending signals and resolve them here; reads are
//! served from the live feed view rather than hitting the store.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;
use uuid::Uuid;

use crate::error::{AppError, Result};
use crate::types::{NewSignal, Signal};
use crate::AppState;

#[derive(Debug, Deserialize)]
pub struct ResolveRequest {
    pub close_price: f64,
}

/// Create the signals router.
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", post(create_signal))
        .route("/latest", get(latest_signal))
        .route("/recent", get(recent_signals))
        .route("/:id/resolve", post(resolve_signal))
}

/// Ingest a new pending signal from the producer.
async fn create_signal(
    State(state): State<AppState>,
    Json(new): Json<NewSignal>,
) -> Result<(StatusCode, Json<Signal>)> {
    let signal = state.store.insert(new)?;
    Ok((StatusCode::CREATED, Json(signal)))
}

/// Resolve a pending signal with its realized close price.
async fn resolve_signal(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(req): Json<ResolveRequest>,
) -> Result<Json<Signal>> {
    let signal = state.store.resolve(id, req.close_price)?;
    Ok(Json(signal))
}

/// The most recent signal in the feed view.
async fn latest_signal(State(state): State<AppState>) -> Result<Json<Signal>> {
    state
        .feed
        .view()
        .latest_signal
        .map(Json)
        .ok_or_else(|| AppError::NotFound("no signals observed yet".to_string()))
}

/// The bounded newest-first recent list from the feed view.
async fn recent_signals(State(state): State<AppState>) -> Json<Vec<Signal>> {
    Json(state.feed.view().recent_signals)
}
