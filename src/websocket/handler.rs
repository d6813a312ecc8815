//! WebSocket endpoint for live signal delivery.
//!
//! A connection carries at most one subscription context at a time.
//! `subscribe` opens one at a confidence threshold; `set_threshold`
//! tears the current context down and opens a fresh one, replaying a
//! new snapshot. The open context is never refiltered in place.

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::Response,
};
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tracing::{debug, error, info};
use uuid::Uuid;

use crate::services::hub::RECENT_CAPACITY;
use crate::services::store::SignalFilter;
use crate::types::{ClientMessage, ServerMessage};
use crate::AppState;

/// WebSocket upgrade handler.
pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: AppState) {
    let (mut sender, mut receiver) = socket.split();

    // Channel carrying hub fan-out and direct replies to this client.
    let (tx, mut rx) = mpsc::unbounded_channel::<ServerMessage>();

    info!("WebSocket client connected");

    let send_task = tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            let Ok(json) = serde_json::to_string(&msg) else {
                continue;
            };
            if sender.send(Message::Text(json)).await.is_err() {
                break;
            }
        }
    });

    // The current subscription context, if any.
    let mut subscription: Option<Uuid> = None;

    while let Some(result) = receiver.next().await {
        match result {
            Ok(Message::Text(text)) => {
                debug!("Received client message: {}", text);
                handle_message(&state, &tx, &mut subscription, &text);
            }
            Ok(Message::Close(_)) => {
                debug!("WebSocket client disconnecting");
                break;
            }
            Ok(Message::Ping(_)) => {
                // Pong is handled automatically by axum
            }
            Err(e) => {
                error!("WebSocket error: {}", e);
                break;
            }
            _ => {}
        }
    }

    // Clean up
    if let Some(id) = subscription {
        state.hub.unregister(id);
    }
    send_task.abort();
    info!("WebSocket client disconnected");
}

fn handle_message(
    state: &AppState,
    tx: &mpsc::UnboundedSender<ServerMessage>,
    subscription: &mut Option<Uuid>,
    text: &str,
) {
    let msg: ClientMessage = match serde_json::from_str(text) {
        Ok(m) => m,
        Err(e) => {
            send_error(tx, &format!("Invalid message: {}", e));
            return;
        }
    };

    let min_confidence = match msg {
        ClientMessage::Subscribe { min_confidence }
        | ClientMessage::SetThreshold { min_confidence } => min_confidence,
    };
    resubscribe(state, tx, subscription, min_confidence);
}

/// Tear down any existing context and open a fresh one with a new
/// snapshot at the requested threshold.
fn resubscribe(
    state: &AppState,
    tx: &mpsc::UnboundedSender<ServerMessage>,
    subscription: &mut Option<Uuid>,
    min_confidence: f64,
) {
    if !min_confidence.is_finite() || !(0.0..=100.0).contains(&min_confidence) {
        send_error(
            tx,
            &format!("min_confidence {} outside [0, 100]", min_confidence),
        );
        return;
    }

    if let Some(old) = subscription.take() {
        state.hub.unregister(old);
    }

    let snapshot = match state
        .store
        .query(&SignalFilter::recent(min_confidence, RECENT_CAPACITY as u32))
    {
        Ok(signals) => signals,
        Err(e) => {
            error!("Snapshot query failed: {}", e);
            send_error(tx, "snapshot unavailable");
            return;
        }
    };

    let id = state.hub.register(min_confidence, snapshot, tx.clone());
    *subscription = Some(id);
    debug!(
        "Client subscribed as {} at threshold {:.1}",
        id, min_confidence
    );
}

fn send_error(tx: &mpsc::UnboundedSender<ServerMessage>, error: &str) {
    let _ = tx.send(ServerMessage::Error {
        error: error.to_string(),
    });
}
