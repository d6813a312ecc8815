//! Win-rate statistics endpoint.

use axum::{extract::State, routing::get, Json, Router};

use crate::error::Result;
use crate::services::feed::{self, StatsView};
use crate::AppState;

/// Create the stats router.
pub fn router() -> Router<AppState> {
    Router::new().route("/", get(get_stats))
}

/// Overall and per-bucket win rates, computed on demand from the
/// current resolved-signal snapshot.
async fn get_stats(State(state): State<AppState>) -> Result<Json<StatsView>> {
    let view = feed::stats_snapshot(&state.store)?;
    Ok(Json(view))
}
