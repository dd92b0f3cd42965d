use crate::model::Timestamp;

/// Age at which recency bottoms out: 30 days.
pub const MAX_AGE_MS: i64 = 30 * 24 * 60 * 60 * 1000;
pub const RELEVANCE_WEIGHT: f64 = 0.7;
pub const RECENCY_WEIGHT: f64 = 0.3;

const SCORE_DECIMALS: f64 = 1e10;

/// Linear decay from 1 (now or future) to 0 (`MAX_AGE_MS` old or older).
#[allow(clippy::cast_precision_loss)]
pub fn recency(now: Timestamp, timestamp: Timestamp) -> f64 {
    let age = now.saturating_sub(timestamp).max(0) as f64;
    (1.0 - age / MAX_AGE_MS as f64).max(0.0)
}

/// Min-max normalize raw relevance into [0, 1]. A set where every rank ties
/// maps to 0.5.
pub fn normalize(ranks: &[f64]) -> Vec<f64> {
    let (min, max) = ranks
        .iter()
        .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), &r| (lo.min(r), hi.max(r)));
    let span = max - min;
    ranks
        .iter()
        .map(|&r| {
            if span.abs() <= f64::EPSILON || !span.is_finite() {
                0.5
            } else {
                (r - min) / span
            }
        })
        .collect()
}

/// `clamp(0.7 * relevance + 0.3 * recency)`, rounded to ten decimals so
/// equal inputs compare equal.
pub fn combine(relevance: f64, recency: f64) -> f64 {
    let raw = (RELEVANCE_WEIGHT * relevance + RECENCY_WEIGHT * recency).clamp(0.0, 1.0);
    (raw * SCORE_DECIMALS).round() / SCORE_DECIMALS
}
