//! Engine configuration.
//!
//! A [`MatchConfig`] is loaded and validated once per process, then shared
//! read-only (typically behind an `Arc`). Every tunable weight, threshold and
//! partial-credit score lives here.

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::domain::digest::canonical_digest;
use crate::domain::error::ConfigError;
use crate::domain::image::Platform;
use crate::domain::result::{Bucket, SignalCategory};

/// Environment variable naming a TOML config file.
pub const CONFIG_ENV: &str = "DOCKMATCH_CONFIG";

const SUM_TOLERANCE: f64 = 1e-6;

/// Top-level signal weights.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Weights {
    pub sequence_weight: f64,
    pub base_image_weight: f64,
    pub metadata_weight: f64,
    pub build_context_weight: f64,
}

impl Default for Weights {
    fn default() -> Self {
        Self {
            sequence_weight: 0.4,
            base_image_weight: 0.2,
            metadata_weight: 0.2,
            build_context_weight: 0.2,
        }
    }
}

impl Weights {
    pub fn of(&self, category: SignalCategory) -> f64 {
        match category {
            SignalCategory::Sequence => self.sequence_weight,
            SignalCategory::BaseImage => self.base_image_weight,
            SignalCategory::Metadata => self.metadata_weight,
            SignalCategory::BuildContext => self.build_context_weight,
        }
    }
}

/// Bucket boundaries, strictly descending.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Thresholds {
    pub excellent_threshold: f64,
    pub good_threshold: f64,
    pub fair_threshold: f64,
}

impl Default for Thresholds {
    fn default() -> Self {
        Self {
            excellent_threshold: 0.9,
            good_threshold: 0.8,
            fair_threshold: 0.6,
        }
    }
}

/// Metadata sub-weights.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct MetadataWeights {
    pub label_weight: f64,
    pub env_weight: f64,
    pub port_volume_weight: f64,
    pub workdir_weight: f64,
    /// Floor credit for a key present on both sides with a differing value.
    pub key_match_credit: f64,
}

impl Default for MetadataWeights {
    fn default() -> Self {
        Self {
            label_weight: 0.4,
            env_weight: 0.3,
            port_volume_weight: 0.2,
            workdir_weight: 0.1,
            key_match_credit: 0.5,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct AlignmentConfig {
    /// Share of token-set overlap in command similarity.
    pub token_weight: f64,
    /// Share of token edit similarity in command similarity.
    pub edit_weight: f64,
    /// Pairs scoring below this never match.
    pub min_similarity: f64,
    /// Penalty per unit of relative-position distance.
    pub position_penalty: f64,
    /// Credit multiplier for out-of-order matches.
    pub reorder_factor: f64,
    /// Credit multiplier for instructions found inside a squashed layer.
    pub merge_factor: f64,
}

impl Default for AlignmentConfig {
    fn default() -> Self {
        Self {
            token_weight: 0.85,
            edit_weight: 0.15,
            min_similarity: 0.5,
            position_penalty: 0.1,
            reorder_factor: 0.85,
            merge_factor: 0.9,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct BaseImageConfig {
    /// Same repository, different tag.
    pub tag_mismatch_score: f64,
    /// Repository related through the alias table.
    pub alias_score: f64,
    /// Same repository path on a different registry.
    pub registry_mirror_score: f64,
    pub alias_case_sensitive: bool,
    /// Treat an image whose manifest list contains the declared platform as matching.
    pub accept_manifest_list_members: bool,
    /// Platform expected when the build spec declares none.
    pub expected_platform: Option<Platform>,
    /// Canonical repository name to accepted aliases.
    pub image_alias_table: BTreeMap<String, BTreeSet<String>>,
}

impl Default for BaseImageConfig {
    fn default() -> Self {
        let table = [
            ("node", "nodejs"),
            ("golang", "go"),
            ("postgres", "postgresql"),
            ("mongo", "mongodb"),
        ]
        .into_iter()
        .map(|(name, alias)| (name.to_string(), BTreeSet::from([alias.to_string()])))
        .collect();

        Self {
            tag_mismatch_score: 0.8,
            alias_score: 0.9,
            registry_mirror_score: 0.9,
            alias_case_sensitive: false,
            accept_manifest_list_members: true,
            expected_platform: None,
            image_alias_table: table,
        }
    }
}

/// Partial credit for file evidence found near a COPY/ADD destination.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct BuildContextScores {
    pub exact_path_score: f64,
    pub parent_path_score: f64,
    pub filename_only_score: f64,
    pub extension_match_score: f64,
}

impl Default for BuildContextScores {
    fn default() -> Self {
        Self {
            exact_path_score: 1.0,
            parent_path_score: 0.8,
            filename_only_score: 0.6,
            extension_match_score: 0.3,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct OverrideRules {
    /// Multiplier applied to the overall score on an empty alignment.
    pub empty_alignment_penalty: f64,
    /// Best bucket reachable when the base image family differs.
    pub base_family_mismatch_cap: Bucket,
}

impl Default for OverrideRules {
    fn default() -> Self {
        Self {
            empty_alignment_penalty: 0.5,
            base_family_mismatch_cap: Bucket::Poor,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ParserConfig {
    /// Report unknown instruction keywords as warnings.
    pub strict: bool,
}

/// Validated engine configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct MatchConfig {
    pub weights: Weights,
    pub thresholds: Thresholds,
    pub metadata: MetadataWeights,
    pub alignment: AlignmentConfig,
    pub base_image: BaseImageConfig,
    pub build_context: BuildContextScores,
    pub overrides: OverrideRules,
    pub parser: ParserConfig,
}

fn check_unit(name: &'static str, value: f64) -> Result<(), ConfigError> {
    if (0.0..=1.0).contains(&value) {
        Ok(())
    } else {
        Err(ConfigError::OutOfRange { name, value })
    }
}

fn check_group(group: &'static str, weights: &[(&'static str, f64)]) -> Result<(), ConfigError> {
    for &(name, value) in weights {
        check_unit(name, value)?;
    }
    let sum: f64 = weights.iter().map(|(_, w)| w).sum();
    if (sum - 1.0).abs() > SUM_TOLERANCE {
        return Err(ConfigError::WeightsDoNotSumToOne { group, sum });
    }
    Ok(())
}

impl MatchConfig {
    /// Reject anything the scoring code could not interpret.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let w = &self.weights;
        check_group(
            "signal",
            &[
                ("sequence_weight", w.sequence_weight),
                ("base_image_weight", w.base_image_weight),
                ("metadata_weight", w.metadata_weight),
                ("build_context_weight", w.build_context_weight),
            ],
        )?;

        let m = &self.metadata;
        check_group(
            "metadata",
            &[
                ("label_weight", m.label_weight),
                ("env_weight", m.env_weight),
                ("port_volume_weight", m.port_volume_weight),
                ("workdir_weight", m.workdir_weight),
            ],
        )?;
        check_unit("key_match_credit", m.key_match_credit)?;

        let a = &self.alignment;
        check_group(
            "alignment similarity",
            &[("token_weight", a.token_weight), ("edit_weight", a.edit_weight)],
        )?;
        check_unit("min_similarity", a.min_similarity)?;
        check_unit("position_penalty", a.position_penalty)?;
        check_unit("reorder_factor", a.reorder_factor)?;
        check_unit("merge_factor", a.merge_factor)?;

        let b = &self.base_image;
        check_unit("tag_mismatch_score", b.tag_mismatch_score)?;
        check_unit("alias_score", b.alias_score)?;
        check_unit("registry_mirror_score", b.registry_mirror_score)?;
        for (name, aliases) in &b.image_alias_table {
            if name.trim().is_empty() || aliases.iter().any(|a| a.trim().is_empty()) {
                return Err(ConfigError::EmptyAlias(name.clone()));
            }
        }

        let c = &self.build_context;
        check_unit("exact_path_score", c.exact_path_score)?;
        check_unit("parent_path_score", c.parent_path_score)?;
        check_unit("filename_only_score", c.filename_only_score)?;
        check_unit("extension_match_score", c.extension_match_score)?;

        check_unit("empty_alignment_penalty", self.overrides.empty_alignment_penalty)?;

        self.validate_thresholds()
    }

    fn validate_thresholds(&self) -> Result<(), ConfigError> {
        let t = &self.thresholds;
        for (name, value) in [
            ("excellent_threshold", t.excellent_threshold),
            ("good_threshold", t.good_threshold),
            ("fair_threshold", t.fair_threshold),
        ] {
            if !(value > 0.0 && value <= 1.0) {
                return Err(ConfigError::ThresholdOutOfRange { name, value });
            }
        }
        if !(t.excellent_threshold > t.good_threshold && t.good_threshold > t.fair_threshold) {
            return Err(ConfigError::ThresholdsNotDescending {
                excellent: t.excellent_threshold,
                good: t.good_threshold,
                fair: t.fair_threshold,
            });
        }
        Ok(())
    }

    /// Parse and validate a TOML document. Missing sections take defaults.
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        let config: MatchConfig = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Load from `path`, else from `$DOCKMATCH_CONFIG`, else defaults.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let resolved: Option<PathBuf> = path
            .map(Path::to_path_buf)
            .or_else(|| std::env::var_os(CONFIG_ENV).map(PathBuf::from));

        match resolved {
            Some(path) => {
                debug!(path = %path.display(), "loading match config");
                let text = std::fs::read_to_string(&path).map_err(|source| ConfigError::Read {
                    path: path.display().to_string(),
                    source,
                })?;
                Self::from_toml_str(&text)
            }
            None => {
                let config = Self::default();
                config.validate()?;
                Ok(config)
            }
        }
    }

    /// SHA-256 of the canonical JSON form; part of result cache keys.
    pub fn fingerprint(&self) -> serde_json::Result<String> {
        canonical_digest(self)
    }

    /// Aliases of `name` (in either direction) under the configured case policy.
    pub fn aliases_of(&self, name: &str) -> BTreeSet<String> {
        let fold = |s: &str| {
            if self.base_image.alias_case_sensitive {
                s.to_string()
            } else {
                s.to_ascii_lowercase()
            }
        };
        let name = fold(name);
        let mut out = BTreeSet::new();
        for (canonical, aliases) in &self.base_image.image_alias_table {
            let canonical = fold(canonical.as_str());
            let aliases: BTreeSet<String> = aliases.iter().map(|a| fold(a.as_str())).collect();
            if canonical == name || aliases.contains(&name) {
                out.insert(canonical);
                out.extend(aliases);
            }
        }
        out.remove(&name);
        out
    }
}
