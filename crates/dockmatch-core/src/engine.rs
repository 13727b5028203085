//! Match engine: one build spec against one image.
//!
//! A [`MatchEngine`] owns a validated [`MatchConfig`] and is cheap to share
//! behind an `Arc`. Every evaluation is a pure function of its inputs; the
//! four signals are computed independently and then aggregated.

use std::collections::{BTreeMap, BTreeSet};
use std::time::Instant;

use tracing::debug;

use crate::aggregate::aggregate;
use crate::align::align;
use crate::base_image::verify;
use crate::config::MatchConfig;
use crate::context::{analyze, layer_hints};
use crate::domain::error::{ConfigError, ParseError, Result};
use crate::domain::image::ImageDescriptor;
use crate::domain::instruction::BuildSpec;
use crate::domain::result::{MatchResult, OverrideTag};
use crate::metadata::correlate;
use crate::obs;
use crate::parser::{parse_with, ParseOptions};

#[derive(Debug, Clone, Default)]
pub struct MatchEngine {
    config: MatchConfig,
}

impl MatchEngine {
    /// Build an engine, rejecting invalid configuration up front.
    pub fn new(config: MatchConfig) -> std::result::Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self { config })
    }

    pub fn config(&self) -> &MatchConfig {
        &self.config
    }

    /// Parse a build spec with the engine's parser settings.
    pub fn parse(
        &self,
        text: &str,
        build_args: &BTreeMap<String, String>,
    ) -> std::result::Result<BuildSpec, ParseError> {
        let options = ParseOptions::from_config(&self.config.parser).with_build_args(build_args.clone());
        parse_with(text, &options)
    }

    /// Parse `text` and match it against `image`.
    ///
    /// Fails only when the build spec does not parse.
    pub fn evaluate(
        &self,
        text: &str,
        image: &ImageDescriptor,
        build_args: &BTreeMap<String, String>,
    ) -> Result<MatchResult> {
        let spec = self.parse(text, build_args)?;
        Ok(self.evaluate_parsed(&spec, image))
    }

    /// Match an already parsed build spec against `image`.
    pub fn evaluate_parsed(&self, spec: &BuildSpec, image: &ImageDescriptor) -> MatchResult {
        let started = Instant::now();
        let config = &self.config;
        obs::emit_match_started(
            &image.fingerprint().unwrap_or_default(),
            spec.layer_instructions().len(),
            image.layers.len(),
        );

        let mut alignment = align(spec, image, &config.alignment);
        let base = verify(&spec.declared_base, spec.declared_platform.as_ref(), image, config);
        let metadata = correlate(&spec.declared_metadata, image.metadata.as_ref(), &config.metadata);
        let hints = layer_hints(spec, image);
        let context = analyze(&spec.context_entries, image.files.as_deref(), &hints, &config.build_context);

        alignment
            .signal
            .evidence
            .extend(spec.warnings.iter().map(|w| format!("parse warning: {w}")));

        let mut triggered = BTreeSet::new();
        if base.platform_mismatch {
            triggered.insert(OverrideTag::PlatformMismatch);
        }
        if base.family_mismatch {
            triggered.insert(OverrideTag::BaseFamilyMismatch);
        }
        if alignment.empty_alignment {
            triggered.insert(OverrideTag::EmptyAlignment);
        }

        debug!(pairs = alignment.pairs.len(), "alignment pairs");
        let signals = vec![alignment.signal, base.signal, metadata, context];
        for signal in &signals {
            obs::emit_signal_scored(signal);
        }

        let result = aggregate(signals, &triggered, config);
        for tag in &result.overrides_applied {
            obs::emit_override_applied(*tag);
        }

        let duration_ms = started.elapsed().as_millis() as u64;
        obs::emit_match_finished(result.overall_score, result.bucket, duration_ms);
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::image::{ImageMetadata, Layer, Platform};
    use crate::domain::result::{Bucket, SignalCategory};

    const SPEC: &str = "FROM node:18\nWORKDIR /app\nRUN npm install\nCOPY . /app\n";

    fn layer(order_index: usize, digest: &str, cmd: &str) -> Layer {
        Layer {
            digest: digest.to_string(),
            size_bytes: 1024,
            created_by: Some(cmd.to_string()),
            order_index,
        }
    }

    fn matching_image() -> ImageDescriptor {
        ImageDescriptor {
            base_ref: Some("node:18".into()),
            base_layer_digests: vec!["sha256:base".into()],
            layers: vec![
                layer(0, "sha256:base", "/bin/sh -c #(nop) ADD file:aa in / "),
                layer(1, "<missing>", "WORKDIR /app"),
                layer(2, "sha256:npm", "RUN /bin/sh -c npm install # buildkit"),
                layer(3, "sha256:app", "COPY . /app # buildkit"),
            ],
            metadata: Some(ImageMetadata {
                workdir: Some("/app".into()),
                ..ImageMetadata::default()
            }),
            ..ImageDescriptor::default()
        }
    }

    #[test]
    fn test_invalid_config_rejected() {
        let mut config = MatchConfig::default();
        config.weights.sequence_weight = 0.9;
        assert!(MatchEngine::new(config).is_err());
    }

    #[test]
    fn test_matching_image_is_excellent() {
        let engine = MatchEngine::default();
        let result = engine
            .evaluate(SPEC, &matching_image(), &BTreeMap::new())
            .expect("evaluate");
        assert_eq!(result.signal_value(SignalCategory::Sequence), Some(1.0));
        assert_eq!(result.signal_value(SignalCategory::BaseImage), Some(1.0));
        assert_eq!(result.bucket, Bucket::Excellent);
        assert!(result.overrides_applied.is_empty());
    }

    #[test]
    fn test_parse_error_is_fatal() {
        let engine = MatchEngine::default();
        let err = engine
            .evaluate("RUN echo no base\n", &matching_image(), &BTreeMap::new())
            .unwrap_err();
        assert!(err.to_string().contains("parse error"));
    }

    #[test]
    fn test_platform_mismatch_override() {
        let engine = MatchEngine::default();
        let mut image = matching_image();
        image.platform = Some(Platform::new("linux", "arm64"));
        let text = "FROM --platform=linux/amd64 node:18\nWORKDIR /app\nRUN npm install\nCOPY . /app\n";
        let result = engine.evaluate(text, &image, &BTreeMap::new()).expect("evaluate");
        assert_eq!(result.bucket, Bucket::Poor);
        assert!(result.overrides_applied.contains(&OverrideTag::PlatformMismatch));
    }

    #[test]
    fn test_evaluation_is_deterministic() {
        let engine = MatchEngine::default();
        let image = matching_image();
        let a = engine.evaluate(SPEC, &image, &BTreeMap::new()).expect("evaluate");
        let b = engine.evaluate(SPEC, &image, &BTreeMap::new()).expect("evaluate");
        assert_eq!(a, b);
        assert_eq!(a.digest().expect("digest"), b.digest().expect("digest"));
    }
}
