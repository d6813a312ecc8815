//! Signal domain types: predictions, outcomes and realtime store events.

use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

/// Predicted direction of the next one-minute candle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Prediction {
    /// Next candle expected to close above its open.
    Call,
    /// Next candle expected to close below its open.
    Put,
}

impl Prediction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Prediction::Call => "CALL",
            Prediction::Put => "PUT",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "CALL" => Some(Prediction::Call),
            "PUT" => Some(Prediction::Put),
            _ => None,
        }
    }

    /// Grade a prediction against the realized candle.
    ///
    /// A call wins when the close exceeds the open, a put wins when the
    /// close falls below it. A flat candle counts as a loss either way.
    pub fn outcome(&self, open_price: f64, close_price: f64) -> SignalResult {
        let won = match self {
            Prediction::Call => close_price > open_price,
            Prediction::Put => close_price < open_price,
        };
        if won {
            SignalResult::Win
        } else {
            SignalResult::Loss
        }
    }
}

/// Outcome state of a signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum SignalResult {
    /// Created, evaluation horizon not yet reached.
    Pending,
    Win,
    Loss,
}

impl SignalResult {
    pub fn as_str(&self) -> &'static str {
        match self {
            SignalResult::Pending => "PENDING",
            SignalResult::Win => "WIN",
            SignalResult::Loss => "LOSS",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "PENDING" => Some(SignalResult::Pending),
            "WIN" => Some(SignalResult::Win),
            "LOSS" => Some(SignalResult::Loss),
            _ => None,
        }
    }

    /// True for WIN and LOSS, false for PENDING.
    pub fn is_final(&self) -> bool {
        matches!(self, SignalResult::Win | SignalResult::Loss)
    }
}

/// One directional prediction event with confidence and eventual outcome.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Signal {
    pub id: Uuid,
    /// Row creation time (epoch millis).
    pub created_at: i64,
    /// Event time of the prediction (epoch millis).
    pub timestamp: i64,
    pub symbol: String,
    pub timeframe: String,
    pub prediction: Prediction,
    /// Model confidence in [0, 100].
    pub confidence_score: f64,
    pub open_price: f64,
    pub close_price: Option<f64>,
    pub result: Option<SignalResult>,
}

impl Signal {
    /// A signal is resolved once its result is WIN or LOSS. Resolved
    /// signals are immutable.
    pub fn is_resolved(&self) -> bool {
        self.result.map(|r| r.is_final()).unwrap_or(false)
    }

    /// Check the row against the invariants every committed signal must
    /// hold. Used to drop malformed event payloads at the fan-out
    /// boundary instead of trusting the producer's shape.
    pub fn validate(&self) -> Result<(), SignalDefect> {
        if !self.confidence_score.is_finite()
            || !(0.0..=100.0).contains(&self.confidence_score)
        {
            return Err(SignalDefect::ConfidenceOutOfRange(self.confidence_score));
        }
        if !self.open_price.is_finite() || self.open_price <= 0.0 {
            return Err(SignalDefect::InvalidPrice(self.open_price));
        }
        if let Some(close) = self.close_price {
            if !close.is_finite() || close <= 0.0 {
                return Err(SignalDefect::InvalidPrice(close));
            }
        }
        if self.is_resolved() && self.close_price.is_none() {
            return Err(SignalDefect::ResolvedWithoutClose);
        }
        Ok(())
    }
}

/// Why a signal payload was rejected at a trust boundary.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum SignalDefect {
    #[error("confidence_score {0} outside [0, 100]")]
    ConfidenceOutOfRange(f64),

    #[error("price {0} is not a positive finite number")]
    InvalidPrice(f64),

    #[error("resolved signal is missing close_price")]
    ResolvedWithoutClose,
}

/// Producer payload for creating a new pending signal.
#[derive(Debug, Clone, Deserialize)]
pub struct NewSignal {
    /// Event time of the prediction (epoch millis). Defaults to now.
    pub timestamp: Option<i64>,
    pub symbol: String,
    pub timeframe: String,
    pub prediction: Prediction,
    pub confidence_score: f64,
    pub open_price: f64,
}

/// Store-side mutation event carrying the full post-mutation row.
///
/// One tagged variant per event kind rather than a loosely shaped JSON
/// payload; receivers validate fields before acting on a row.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", rename_all = "UPPERCASE")]
pub enum SignalEvent {
    Insert(Signal),
    Update(Signal),
}

impl SignalEvent {
    pub fn signal(&self) -> &Signal {
        match self {
            SignalEvent::Insert(s) | SignalEvent::Update(s) => s,
        }
    }
}
