//! Shared domain types.

mod signal;
mod stats;
mod ws;

pub use signal::{NewSignal, Prediction, Signal, SignalDefect, SignalEvent, SignalResult};
pub use stats::{BucketStats, ConfidenceBucket, Stats, CONFIDENCE_BUCKETS};
pub use ws::{ClientMessage, ServerMessage};
