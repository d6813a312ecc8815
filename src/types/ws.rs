use super::Signal;
use serde::{Deserialize, Serialize};

/// Incoming WebSocket message from client.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Open a signal subscription filtered by minimum confidence.
    Subscribe {
        min_confidence: f64,
    },
    /// Change the confidence threshold. This tears down the current
    /// subscription context and opens a fresh one with a new snapshot;
    /// the live stream is never refiltered in place.
    SetThreshold {
        min_confidence: f64,
    },
}

/// Outgoing WebSocket message to client.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    Subscribed {
        min_confidence: f64,
    },
    /// Initial bounded history for a freshly opened subscription,
    /// newest first.
    Snapshot {
        data: Vec<Signal>,
    },
    /// A newly created signal that passed the subscriber's threshold.
    SignalCreated {
        data: Signal,
    },
    /// Resolution of a signal the subscriber already holds.
    SignalResolved {
        data: Signal,
    },
    Error {
        error: String,
    },
}
