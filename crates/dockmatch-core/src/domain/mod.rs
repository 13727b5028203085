//! Domain models for dockmatch.
//!
//! - `BuildSpec` / `Instruction`: the parsed Dockerfile
//! - `ImageDescriptor` / `Layer`: observed image evidence
//! - `SignalScore` / `MatchResult`: engine output

pub mod digest;
pub mod error;
pub mod image;
pub mod instruction;
pub mod result;

pub use error::{ConfigError, EngineError, IncompleteEvidence, ParseError, Result};
pub use image::{FileEvidence, ImageDescriptor, ImageMetadata, Layer, Platform, Port, Protocol};
pub use instruction::{
    BuildContextEntry, BuildSpec, ContextSource, DeclaredBase, Instruction, InstructionKind,
    Stage, StageBase,
};
pub use result::{Bucket, MatchResult, OverrideTag, SignalCategory, SignalScore};
