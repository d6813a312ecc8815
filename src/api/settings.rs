//! Client settings endpoints.

use axum::{extract::State, routing::get, Json, Router};

use crate::error::Result;
use crate::services::settings::Settings;
use crate::AppState;

/// Create the settings router.
pub fn router() -> Router<AppState> {
    Router::new().route("/", get(get_settings).put(put_settings))
}

async fn get_settings(State(state): State<AppState>) -> Json<Settings> {
    Json(state.settings.get())
}

/// Persist new settings. This is the only write path; values are
/// clamped into their allowed ranges before being stored.
async fn put_settings(
    State(state): State<AppState>,
    Json(settings): Json<Settings>,
) -> Result<Json<Settings>> {
    let saved = state.settings.save(settings)?;
    Ok(Json(saved))
}
