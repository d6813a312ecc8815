mod api;
mod config;
mod error;
mod services;
mod types;
mod websocket;

use axum::{routing::get, Router};
use config::Config;
use services::{FeedConfig, FeedHandle, SettingsStore, SignalFeed, SignalStore, SubscriptionHub};
use std::sync::Arc;
use std::time::Duration;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Application state shared across handlers.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub store: Arc<SignalStore>,
    pub hub: Arc<SubscriptionHub>,
    pub feed: Arc<FeedHandle>,
    pub settings: Arc<SettingsStore>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables
    dotenvy::dotenv().ok();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "augury=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    let config = Arc::new(Config::from_env());
    info!("Starting Augury server on {}:{}", config.host, config.port);

    let store = SignalStore::new(&config.database_path)?;
    let settings = SettingsStore::load(config.settings_path.clone());
    let hub = SubscriptionHub::new();

    // Drive hub fan-out from the store's event stream.
    tokio::spawn(hub.clone().run(store.subscribe()));

    // The feed filters at the saved threshold; changing it takes effect
    // on restart, live clients pick their own threshold per connection.
    let threshold = settings.get().min_confidence_threshold;
    let feed = Arc::new(SignalFeed::spawn(
        store.clone(),
        FeedConfig {
            min_confidence: threshold,
            poll_interval: Duration::from_secs(config.poll_interval_secs),
            recent_limit: services::RECENT_CAPACITY as u32,
        },
    ));

    let state = AppState {
        config: config.clone(),
        store,
        hub,
        feed,
        settings,
    };

    // Build CORS layer
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    // Build the router
    let app = Router::new()
        .merge(api::router())
        .route("/ws", get(websocket::ws_handler))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state);

    // Start the server
    let addr = format!("{}:{}", config.host, config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!("Augury server listening on {}", addr);

    axum::serve(listener, app).await?;

    Ok(())
}
