//! Score aggregation and override rules.
//!
//! The overall score is the weighted sum of the four signals, renormalized
//! over the signals that had evidence. Overrides run after the sum and only
//! ever move the outcome down.

use std::collections::BTreeSet;

use tracing::debug;

use crate::config::MatchConfig;
use crate::domain::result::{
    clamp_unit, Bucket, MatchResult, OverrideTag, SignalCategory, SignalScore,
};

// ---------------------------------------------------------------------------
// Weighted sum
// ---------------------------------------------------------------------------

/// Weighted mean of the non-neutral signals; 0 when none carried evidence.
pub fn weighted_score(signals: &[SignalScore], config: &MatchConfig) -> f64 {
    let (sum, weight) = signals
        .iter()
        .filter(|s| !s.neutral)
        .fold((0.0, 0.0), |(sum, weight), s| {
            let w = config.weights.of(s.category);
            (sum + w * s.value, weight + w)
        });
    if weight <= 0.0 {
        0.0
    } else {
        clamp_unit(sum / weight)
    }
}

// ---------------------------------------------------------------------------
// Overrides
// ---------------------------------------------------------------------------

/// Effect of one override on `(score, bucket)`.
fn apply_override(tag: OverrideTag, score: f64, bucket: Bucket, config: &MatchConfig) -> (f64, Bucket) {
    match tag {
        OverrideTag::PlatformMismatch => (score, Bucket::Poor),
        OverrideTag::BaseFamilyMismatch => (score, bucket.min(config.overrides.base_family_mismatch_cap)),
        OverrideTag::EmptyAlignment => {
            let penalized = clamp_unit(score * config.overrides.empty_alignment_penalty);
            (penalized, bucket.min(Bucket::from_score(penalized, &config.thresholds)))
        }
    }
}

/// Combine signals into a [`MatchResult`], applying every triggered override.
///
/// Signals are reported in [`SignalCategory::ALL`] order; a missing category
/// is filled in as neutral.
pub fn aggregate(
    signals: Vec<SignalScore>,
    triggered: &BTreeSet<OverrideTag>,
    config: &MatchConfig,
) -> MatchResult {
    let mut ordered: Vec<SignalScore> = SignalCategory::ALL
        .iter()
        .map(|category| {
            signals
                .iter()
                .find(|s| s.category == *category)
                .cloned()
                .unwrap_or_else(|| SignalScore::neutral(*category, vec!["not evaluated".to_string()]))
        })
        .collect();
    for signal in &mut ordered {
        signal.value = clamp_unit(signal.value);
    }

    let mut score = weighted_score(&ordered, config);
    let mut bucket = Bucket::from_score(score, &config.thresholds);

    // Score penalty first, then bucket caps.
    let mut applied = BTreeSet::new();
    for tag in [
        OverrideTag::EmptyAlignment,
        OverrideTag::PlatformMismatch,
        OverrideTag::BaseFamilyMismatch,
    ] {
        if triggered.contains(&tag) {
            (score, bucket) = apply_override(tag, score, bucket, config);
            applied.insert(tag);
        }
    }

    debug!(score, bucket = %bucket, overrides = applied.len(), "signals aggregated");
    MatchResult {
        overall_score: score,
        bucket,
        signals: ordered,
        overrides_applied: applied,
    }
}
