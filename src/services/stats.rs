//! Win-rate aggregation over resolved signals.
//!
//! Pure folds over a snapshot: no clock, no randomness, no filtering on
//! `result`. Callers restrict the input to resolved signals (WIN/LOSS)
//! before calling in; the engine does not validate.

use crate::types::{BucketStats, ConfidenceBucket, Signal, SignalResult, Stats, CONFIDENCE_BUCKETS};

/// Compute overall win-rate stats for a resolved-signal snapshot.
pub fn compute_overall(signals: &[Signal]) -> Stats {
    let wins = signals
        .iter()
        .filter(|s| s.result == Some(SignalResult::Win))
        .count() as u32;
    let losses = signals
        .iter()
        .filter(|s| s.result == Some(SignalResult::Loss))
        .count() as u32;

    Stats::from_counts(wins, losses)
}

/// Compute win-rate stats per confidence bucket.
///
/// Buckets with no signals are omitted; the fixed high-to-low bucket
/// order is preserved among the remaining entries.
pub fn compute_by_bucket(signals: &[Signal]) -> Vec<BucketStats> {
    CONFIDENCE_BUCKETS
        .iter()
        .filter_map(|bucket| {
            let in_bucket: Vec<&Signal> = signals
                .iter()
                .filter(|s| bucket.contains(s.confidence_score))
                .collect();

            if in_bucket.is_empty() {
                return None;
            }

            let wins = in_bucket
                .iter()
                .filter(|s| s.result == Some(SignalResult::Win))
                .count() as u32;
            let losses = in_bucket
                .iter()
                .filter(|s| s.result == Some(SignalResult::Loss))
                .count() as u32;

            Some(BucketStats {
                range: bucket.label,
                stats: Stats::from_counts(wins, losses),
            })
        })
        .collect()
}

/// The bucket a confidence score falls into. Scores in [0, 100] always
/// match exactly one bucket; boundary scores go to the higher range.
pub fn bucket_for(confidence: f64) -> Option<&'static ConfidenceBucket> {
    CONFIDENCE_BUCKETS.iter().find(|b| b.contains(confidence))
}
