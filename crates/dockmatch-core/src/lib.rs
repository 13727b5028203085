//! dockmatch core library
//!
//! Scores how likely it is that a container image was built from a given
//! Dockerfile. The engine is pure: callers supply the Dockerfile text and an
//! [`ImageDescriptor`] gathered by external introspection tooling.
//!
//! ```ignore
//! let engine = MatchEngine::new(MatchConfig::load(None)?)?;
//! let result = engine.evaluate(&dockerfile, &image, &BTreeMap::new())?;
//! println!("{} ({})", result.overall_score, result.bucket);
//! ```

pub mod aggregate;
pub mod align;
pub mod base_image;
pub mod config;
pub mod context;
pub mod domain;
pub mod engine;
pub mod metadata;
pub mod normalize;
pub mod obs;
pub mod parser;
pub mod telemetry;

pub use aggregate::aggregate;
pub use align::{align, alignable_layers, AlignedPair, Aligner, Alignment, PairKind};
pub use base_image::{verify, BaseVerification};
pub use config::{
    AlignmentConfig, BaseImageConfig, BuildContextScores, MatchConfig, MetadataWeights,
    OverrideRules, ParserConfig, Thresholds, Weights, CONFIG_ENV,
};
pub use context::{analyze, layer_hints};
pub use domain::digest::{build_spec_fingerprint, canonical_digest, image_fingerprint};
pub use domain::{
    Bucket, BuildContextEntry, BuildSpec, ConfigError, ContextSource, DeclaredBase, EngineError,
    FileEvidence, ImageDescriptor, ImageMetadata, IncompleteEvidence, Instruction,
    InstructionKind, Layer, MatchResult, OverrideTag, ParseError, Platform, Port, Protocol,
    Result, SignalCategory, SignalScore, Stage, StageBase,
};
pub use engine::MatchEngine;
pub use metadata::correlate;
pub use normalize::{
    command_similarity, extract_packages, normalize_command, normalize_image_ref,
    normalize_path, ImageRef, NormalizedCommand, NormalizedPath, PackageRef,
};
pub use parser::{parse, parse_instructions, parse_with, ParseOptions};
pub use telemetry::init_tracing;

/// Crate version, stamped into persisted reports.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
