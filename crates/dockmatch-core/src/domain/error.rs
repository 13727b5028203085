//! Error taxonomy for the matching engine.
//!
//! Only [`ParseError`] and [`ConfigError`] are fatal. Missing-but-optional
//! evidence is reported through [`IncompleteEvidence`], which is rendered into
//! signal evidence and never returned as an `Err`.

/// A build spec that cannot be turned into an instruction sequence.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("parse error at line {line}: {reason}")]
pub struct ParseError {
    /// 1-based line the offending instruction starts on (0 for whole-file errors).
    pub line: usize,
    pub reason: String,
}

impl ParseError {
    pub fn new(line: usize, reason: impl Into<String>) -> Self {
        Self {
            line,
            reason: reason.into(),
        }
    }
}

/// Invalid engine configuration. Raised at load time, never per request.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("{group} weights must sum to 1.0, got {sum:.6}")]
    WeightsDoNotSumToOne { group: &'static str, sum: f64 },

    #[error("{name} must be within [0, 1], got {value}")]
    OutOfRange { name: &'static str, value: f64 },

    #[error("threshold {name} must be within (0, 1], got {value}")]
    ThresholdOutOfRange { name: &'static str, value: f64 },

    #[error("thresholds must be strictly descending: excellent {excellent} > good {good} > fair {fair}")]
    ThresholdsNotDescending { excellent: f64, good: f64, fair: f64 },

    #[error("image alias table entry '{0}' must not be empty")]
    EmptyAlias(String),

    #[error("invalid config file: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("failed to read config {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

/// Non-fatal evidence gaps. Each one contributes neutrally to its signal.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum IncompleteEvidence {
    #[error("layer {order_index} ({digest}) has no recorded build command")]
    MissingLayerCommand { order_index: usize, digest: String },

    #[error("image metadata was not supplied")]
    MissingImageMetadata,

    #[error("no file listing was supplied for the image")]
    MissingFileListing,

    #[error("base image of the image is unknown (no reference, no base layer digests)")]
    UnknownObservedBase,

    #[error("image platform is unknown; platform check skipped")]
    UnknownPlatform,

    #[error("line {line}: COPY --from={stage} does not name an earlier stage{}", external_image_hint(.stage))]
    UnresolvedStage { line: usize, stage: String },

    #[error("line {line}: EXPOSE {range} spans more than {limit} ports; range skipped")]
    PortRangeTooWide { line: usize, range: String, limit: u32 },

    #[error("line {line}: unknown instruction {keyword}")]
    UnknownInstruction { line: usize, keyword: String },
}

/// A bare `--from` name may be an image pulled without a tag or registry.
fn external_image_hint(stage: &str) -> &'static str {
    if stage.parse::<usize>().is_ok() {
        ""
    } else {
        " (or an external image)"
    }
}

/// Umbrella error for engine entry points.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error(transparent)]
    Parse(#[from] ParseError),

    #[error("configuration error: {0}")]
    Configuration(#[from] ConfigError),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for engine operations.
pub type Result<T> = std::result::Result<T, EngineError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_error_display_carries_line() {
        let err = ParseError::new(7, "COPY requires a source and a destination");
        let msg = err.to_string();
        assert!(msg.contains("line 7"));
        assert!(msg.contains("COPY requires"));
    }

    #[test]
    fn test_engine_error_wraps_parse_error_transparently() {
        let err: EngineError = ParseError::new(1, "no FROM instruction").into();
        assert_eq!(err.to_string(), "parse error at line 1: no FROM instruction");
    }

    #[test]
    fn test_config_error_display() {
        let err = ConfigError::WeightsDoNotSumToOne {
            group: "signal",
            sum: 0.9,
        };
        assert!(err.to_string().contains("signal weights must sum to 1.0"));

        let err = ConfigError::ThresholdsNotDescending {
            excellent: 0.8,
            good: 0.8,
            fair: 0.6,
        };
        assert!(err.to_string().contains("strictly descending"));
    }

    #[test]
    fn test_incomplete_evidence_display() {
        let w = IncompleteEvidence::UnresolvedStage {
            line: 12,
            stage: "builder".to_string(),
        };
        assert_eq!(
            w.to_string(),
            "line 12: COPY --from=builder does not name an earlier stage (or an external image)"
        );

        let w = IncompleteEvidence::UnresolvedStage {
            line: 3,
            stage: "4".to_string(),
        };
        assert_eq!(w.to_string(), "line 3: COPY --from=4 does not name an earlier stage");
    }
}
