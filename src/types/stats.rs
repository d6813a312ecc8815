//! Win-rate statistics types and the fixed confidence-bucket table.

use serde::Serialize;

/// A fixed confidence-score interval used to stratify win-rate stats.
///
/// Intervals are half-open `[min, max)` except the top bucket, which is
/// closed at 100 so a perfect-confidence signal is still counted.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ConfidenceBucket {
    pub label: &'static str,
    pub min: f64,
    pub max: f64,
    /// Whether `max` itself belongs to the bucket (top bucket only).
    pub closed_max: bool,
}

impl ConfidenceBucket {
    pub fn contains(&self, confidence: f64) -> bool {
        if confidence < self.min {
            return false;
        }
        if self.closed_max {
            confidence <= self.max
        } else {
            confidence < self.max
        }
    }
}

/// The fixed partition of [0, 100], highest range first. Boundary scores
/// (70, 75, 80, 85, 90) belong to the higher bucket.
pub const CONFIDENCE_BUCKETS: [ConfidenceBucket; 6] = [
    ConfidenceBucket { label: "90-100%", min: 90.0, max: 100.0, closed_max: true },
    ConfidenceBucket { label: "85-90%", min: 85.0, max: 90.0, closed_max: false },
    ConfidenceBucket { label: "80-85%", min: 80.0, max: 85.0, closed_max: false },
    ConfidenceBucket { label: "75-80%", min: 75.0, max: 80.0, closed_max: false },
    ConfidenceBucket { label: "70-75%", min: 70.0, max: 75.0, closed_max: false },
    ConfidenceBucket { label: "< 70%", min: 0.0, max: 70.0, closed_max: false },
];

/// Aggregate win/loss counters with a derived win-rate percentage.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize)]
pub struct Stats {
    pub total: u32,
    pub wins: u32,
    pub losses: u32,
    /// Percentage in [0, 100]; 0.0 when `total` is 0.
    pub winrate: f64,
}

impl Stats {
    pub fn from_counts(wins: u32, losses: u32) -> Self {
        let total = wins + losses;
        let winrate = if total > 0 {
            wins as f64 / total as f64 * 100.0
        } else {
            0.0
        };
        Self { total, wins, losses, winrate }
    }
}

/// Stats for a single confidence bucket.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BucketStats {
    /// Bucket label, e.g. "80-85%".
    pub range: &'static str,
    #[serde(flatten)]
    pub stats: Stats,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bucket_contains_half_open() {
        let bucket = &CONFIDENCE_BUCKETS[2]; // 80-85%
        assert!(bucket.contains(80.0));
        assert!(bucket.contains(84.999));
        assert!(!bucket.contains(85.0));
        assert!(!bucket.contains(79.999));
    }

    #[test]
    fn test_top_bucket_closed_at_100() {
        let top = &CONFIDENCE_BUCKETS[0];
        assert!(top.contains(90.0));
        assert!(top.contains(100.0));
        assert!(!top.contains(89.999));
    }

    #[test]
    fn test_stats_from_counts() {
        let stats = Stats::from_counts(3, 1);
        assert_eq!(stats.total, 4);
        assert_eq!(stats.winrate, 75.0);
    }

    #[test]
    fn test_empty_stats_winrate_is_zero() {
        let stats = Stats::from_counts(0, 0);
        assert_eq!(stats.total, 0);
        assert_eq!(stats.winrate, 0.0);
    }

    #[test]
    fn test_bucket_stats_serialization_flattens() {
        let bucket_stats = BucketStats {
            range: "90-100%",
            stats: Stats::from_counts(1, 0),
        };
        let json = serde_json::to_string(&bucket_stats).unwrap();
        assert!(json.contains("\"range\":\"90-100%\""));
        assert!(json.contains("\"winrate\":100.0"));
    }
}
