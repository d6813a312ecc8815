pub mod health;
pub mod settings;
pub mod signals;
pub mod stats;

use crate::AppState;
use axum::Router;

/// Create the API router.
pub fn router() -> Router<AppState> {
    Router::new()
        .merge(health::router())
        .nest("/api/signals", signals::router())
        .nest("/api/stats", stats::router())
        .nest("/api/settings", settings::router())
}
