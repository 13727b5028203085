//! Structured observability hooks for match lifecycle events.
//!
//! - `MatchSpan`: RAII guard entering a request-scoped span
//! - `emit_*`: one `info!` event per lifecycle step, keyed by `event`
//!
//! Set `RUST_LOG=dockmatch_core=debug` to also see component internals.

use tracing::{info, warn};

use crate::domain::error::IncompleteEvidence;
use crate::domain::result::{Bucket, OverrideTag, SignalScore};

/// RAII guard that enters a match-scoped tracing span.
///
/// ```ignore
/// let _span = MatchSpan::enter("2b1c...");
/// // every event below carries request_id = "2b1c..."
/// ```
pub struct MatchSpan {
    _span: tracing::span::EnteredSpan,
}

impl MatchSpan {
    pub fn enter(request_id: &str) -> Self {
        let span = tracing::info_span!("dockmatch.match", request_id = %request_id);
        Self {
            _span: span.entered(),
        }
    }
}

/// Emit event: a match started for the given image.
pub fn emit_match_started(image_fingerprint: &str, instructions: usize, layers: usize) {
    info!(
        event = "match.started",
        image = %short(image_fingerprint),
        instructions = instructions,
        layers = layers,
    );
}

/// Emit event: one signal scored.
pub fn emit_signal_scored(signal: &SignalScore) {
    info!(
        event = "match.signal_scored",
        category = %signal.category,
        value = signal.value,
        neutral = signal.neutral,
        evidence = signal.evidence.len(),
    );
}

/// Emit event: an override rule fired.
pub fn emit_override_applied(tag: OverrideTag) {
    info!(event = "match.override_applied", rule = %tag);
}

/// Emit event: match finished with score, bucket and duration.
pub fn emit_match_finished(overall_score: f64, bucket: Bucket, duration_ms: u64) {
    info!(
        event = "match.finished",
        overall_score = overall_score,
        bucket = %bucket,
        duration_ms = duration_ms,
    );
}

/// Emit event: non-fatal evidence gap found while parsing (warning level).
pub fn emit_parse_warning(warning: &IncompleteEvidence) {
    warn!(event = "parse.warning", warning = %warning);
}

fn short(fingerprint: &str) -> &str {
    fingerprint.get(..12).unwrap_or(fingerprint)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::result::SignalCategory;

    #[test]
    fn test_match_span_create() {
        let _span = MatchSpan::enter("test-request");
        emit_signal_scored(&SignalScore::new(SignalCategory::Sequence, 1.0, vec![]));
        emit_override_applied(OverrideTag::PlatformMismatch);
    }

    #[test]
    fn test_short_fingerprint() {
        assert_eq!(short("0123456789abcdef"), "0123456789ab");
        assert_eq!(short("abc"), "abc");
    }
}
