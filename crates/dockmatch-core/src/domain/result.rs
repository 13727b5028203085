//! Signal scores and the terminal match result.

use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::config::Thresholds;
use crate::domain::digest::canonical_digest;

/// One of the four independent scoring categories.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SignalCategory {
    Sequence,
    BaseImage,
    Metadata,
    BuildContext,
}

impl SignalCategory {
    pub const ALL: [SignalCategory; 4] = [
        Self::Sequence,
        Self::BaseImage,
        Self::Metadata,
        Self::BuildContext,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Sequence => "sequence",
            Self::BaseImage => "base_image",
            Self::Metadata => "metadata",
            Self::BuildContext => "build_context",
        }
    }
}

impl fmt::Display for SignalCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Score of one category with its explanation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SignalScore {
    pub category: SignalCategory,
    /// Always within [0, 1].
    pub value: f64,
    pub evidence: Vec<String>,
    /// No usable evidence; the aggregator leaves this signal out of the sum.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub neutral: bool,
}

impl SignalScore {
    pub fn new(category: SignalCategory, value: f64, evidence: Vec<String>) -> Self {
        Self {
            category,
            value: clamp_unit(value),
            evidence,
            neutral: false,
        }
    }

    /// A signal that had nothing to judge. Its value is reported as 0.
    pub fn neutral(category: SignalCategory, evidence: Vec<String>) -> Self {
        Self {
            category,
            value: 0.0,
            evidence,
            neutral: true,
        }
    }
}

/// Clamp into [0, 1], mapping NaN to 0.
pub fn clamp_unit(value: f64) -> f64 {
    if value.is_nan() {
        0.0
    } else {
        value.clamp(0.0, 1.0)
    }
}

/// Qualitative confidence bucket, ordered worst to best.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Bucket {
    Poor,
    Fair,
    Good,
    Excellent,
}

impl Bucket {
    pub fn from_score(score: f64, thresholds: &Thresholds) -> Self {
        if score >= thresholds.excellent_threshold {
            Self::Excellent
        } else if score >= thresholds.good_threshold {
            Self::Good
        } else if score >= thresholds.fair_threshold {
            Self::Fair
        } else {
            Self::Poor
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Poor => "poor",
            Self::Fair => "fair",
            Self::Good => "good",
            Self::Excellent => "excellent",
        }
    }
}

impl fmt::Display for Bucket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Post-aggregation rule that fired.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OverrideTag {
    /// Declared and observed platform differ; bucket forced to poor.
    PlatformMismatch,
    /// Base image belongs to a different repository family.
    BaseFamilyMismatch,
    /// No layer-producing instructions, but the image has layers of its own.
    EmptyAlignment,
}

impl OverrideTag {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::PlatformMismatch => "platform_mismatch",
            Self::BaseFamilyMismatch => "base_family_mismatch",
            Self::EmptyAlignment => "empty_alignment",
        }
    }
}

impl fmt::Display for OverrideTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Terminal output of one match computation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchResult {
    pub overall_score: f64,
    pub bucket: Bucket,
    /// One entry per category, in [`SignalCategory::ALL`] order.
    pub signals: Vec<SignalScore>,
    pub overrides_applied: BTreeSet<OverrideTag>,
}

impl MatchResult {
    pub fn signal(&self, category: SignalCategory) -> Option<&SignalScore> {
        self.signals.iter().find(|s| s.category == category)
    }

    /// Value of a category, `None` when absent or neutral.
    pub fn signal_value(&self, category: SignalCategory) -> Option<f64> {
        self.signal(category).filter(|s| !s.neutral).map(|s| s.value)
    }

    /// Whether the image is likely a build of the build spec.
    pub fn is_likely_match(&self, thresholds: &Thresholds) -> bool {
        self.overall_score >= thresholds.good_threshold && self.overrides_applied.is_empty()
    }

    /// Short reasons for every signal below its comfort level.
    pub fn mismatch_reasons(&self) -> Vec<String> {
        let limits = [
            (SignalCategory::BaseImage, 0.8, "base image mismatch"),
            (SignalCategory::Sequence, 0.7, "layer command mismatches"),
            (SignalCategory::Metadata, 0.7, "metadata differences"),
            (SignalCategory::BuildContext, 0.7, "build context differences"),
        ];

        let mut reasons: Vec<String> = limits
            .iter()
            .filter(|(cat, limit, _)| self.signal_value(*cat).is_some_and(|v| v < *limit))
            .map(|(_, _, reason)| reason.to_string())
            .collect();
        reasons.extend(self.overrides_applied.iter().map(|o| o.to_string()));
        reasons
    }

    /// SHA-256 of the canonical JSON form; equal for bit-identical results.
    pub fn digest(&self) -> serde_json::Result<String> {
        canonical_digest(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn result_with(values: [f64; 4]) -> MatchResult {
        MatchResult {
            overall_score: 0.5,
            bucket: Bucket::Poor,
            signals: SignalCategory::ALL
                .iter()
                .zip(values)
                .map(|(c, v)| SignalScore::new(*c, v, vec![]))
                .collect(),
            overrides_applied: BTreeSet::new(),
        }
    }

    #[test]
    fn test_bucket_thresholds() {
        let t = Thresholds::default();
        assert_eq!(Bucket::from_score(0.95, &t), Bucket::Excellent);
        assert_eq!(Bucket::from_score(0.9, &t), Bucket::Excellent);
        assert_eq!(Bucket::from_score(0.85, &t), Bucket::Good);
        assert_eq!(Bucket::from_score(0.6, &t), Bucket::Fair);
        assert_eq!(Bucket::from_score(0.59, &t), Bucket::Poor);
    }

    #[test]
    fn test_bucket_ordering_worst_first() {
        assert!(Bucket::Poor < Bucket::Fair);
        assert!(Bucket::Good < Bucket::Excellent);
        assert_eq!(Bucket::Excellent.min(Bucket::Poor), Bucket::Poor);
    }

    #[test]
    fn test_signal_score_is_clamped() {
        let s = SignalScore::new(SignalCategory::Sequence, 1.3, vec![]);
        assert_eq!(s.value, 1.0);
        let s = SignalScore::new(SignalCategory::Sequence, f64::NAN, vec![]);
        assert_eq!(s.value, 0.0);
    }

    #[test]
    fn test_mismatch_reasons() {
        let result = result_with([0.5, 1.0, 0.9, 0.2]);
        let reasons = result.mismatch_reasons();
        assert_eq!(
            reasons,
            vec!["layer command mismatches", "build context differences"]
        );
    }

    #[test]
    fn test_json_layout() {
        let mut result = result_with([1.0, 1.0, 1.0, 1.0]);
        result.overrides_applied.insert(OverrideTag::PlatformMismatch);
        let value = serde_json::to_value(&result).expect("serialize");
        assert_eq!(value["bucket"], "poor");
        assert_eq!(value["signals"][1]["category"], "base_image");
        assert!(value["signals"][0].get("neutral").is_none());
        assert_eq!(value["overrides_applied"][0], "platform_mismatch");
    }

    #[test]
    fn test_digest_is_stable() {
        let a = result_with([0.1, 0.2, 0.3, 0.4]);
        let b = a.clone();
        assert_eq!(a.digest().expect("digest"), b.digest().expect("digest"));
    }
}
