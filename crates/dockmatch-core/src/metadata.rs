//! Metadata correlation.
//!
//! Only fields the build spec declares are scored; an observed value the build spec
//! never mentions is not held against it. Field scores are combined with the
//! configured sub-weights, renormalized over the fields that took part.

use std::collections::{BTreeMap, BTreeSet};

use tracing::debug;

use crate::config::MetadataWeights;
use crate::domain::error::IncompleteEvidence;
use crate::domain::image::ImageMetadata;
use crate::domain::result::{clamp_unit, SignalCategory, SignalScore};
use crate::normalize::path::normalize_path;

/// Relative importance of a label key when averaging label credit.
pub fn label_importance(key: &str) -> f64 {
    let key = key.to_ascii_lowercase();
    let leaf = key.rsplit('.').next().unwrap_or(&key);
    match leaf {
        "maintainer" | "authors" | "author" => 0.4,
        k if k.contains("version") => 0.3,
        k if k.contains("description") => 0.2,
        _ => 0.1,
    }
}

fn numeric_parts(version: &str) -> Vec<&str> {
    version
        .split(|c: char| !c.is_ascii_digit())
        .filter(|s| !s.is_empty())
        .collect()
}

/// Share of leading numeric components two versions agree on.
///
/// `1.2.3` vs `1.2.4` is 2/3; a version without digits scores 0.
pub fn compare_versions(a: &str, b: &str) -> f64 {
    let left = numeric_parts(a);
    let right = numeric_parts(b);
    if left.is_empty() || right.is_empty() {
        return 0.0;
    }
    let agreeing = left.iter().zip(&right).take_while(|(x, y)| x == y).count();
    agreeing as f64 / left.len().max(right.len()) as f64
}

fn value_tokens(value: &str) -> BTreeSet<String> {
    value
        .split(|c: char| c.is_whitespace() || c == ':' || c == ',')
        .filter(|s| !s.is_empty())
        .map(str::to_ascii_lowercase)
        .collect()
}

fn value_similarity(key: &str, declared: &str, observed: &str) -> f64 {
    if key.to_ascii_lowercase().contains("version") {
        return compare_versions(declared, observed);
    }
    let left = value_tokens(declared);
    let right = value_tokens(observed);
    let union = left.union(&right).count();
    if union == 0 {
        return 0.0;
    }
    left.intersection(&right).count() as f64 / union as f64
}

/// Credit for one declared key: 1 for an equal value, `key_match_credit` plus
/// a share of the value similarity when only the key agrees, 0 when absent.
fn key_credit(
    key: &str,
    declared: &str,
    observed: &BTreeMap<String, String>,
    key_match_credit: f64,
    notes: &mut Vec<String>,
    field: &str,
) -> f64 {
    match observed.get(key) {
        None => {
            notes.push(format!("{field} {key} not present in image"));
            0.0
        }
        Some(value) if value.eq_ignore_ascii_case(declared) => 1.0,
        Some(value) => {
            notes.push(format!("{field} {key}: declared '{declared}', observed '{value}'"));
            key_match_credit + (1.0 - key_match_credit) * value_similarity(key, declared, value)
        }
    }
}

fn jaccard<T: Ord>(left: &BTreeSet<T>, right: &BTreeSet<T>) -> f64 {
    let union = left.union(right).count();
    if union == 0 {
        return 1.0;
    }
    left.intersection(right).count() as f64 / union as f64
}

fn render<T: ToString>(set: &BTreeSet<T>) -> String {
    set.iter().map(T::to_string).collect::<Vec<_>>().join(", ")
}

/// Correlate declared metadata with the image's metadata.
pub fn correlate(
    declared: &ImageMetadata,
    observed: Option<&ImageMetadata>,
    weights: &MetadataWeights,
) -> SignalScore {
    let Some(observed) = observed else {
        return SignalScore::neutral(
            SignalCategory::Metadata,
            vec![IncompleteEvidence::MissingImageMetadata.to_string()],
        );
    };

    let mut fields: Vec<(f64, f64)> = Vec::new();
    let mut evidence = Vec::new();
    let mut notes = Vec::new();

    if !declared.labels.is_empty() {
        let mut total = 0.0;
        let mut weight_sum = 0.0;
        for (key, value) in &declared.labels {
            let importance = label_importance(key);
            let credit = key_credit(
                key,
                value,
                &observed.labels,
                weights.key_match_credit,
                &mut notes,
                "label",
            );
            total += importance * credit;
            weight_sum += importance;
        }
        let score = total / weight_sum;
        evidence.push(format!("labels {score:.2} over {} declared key(s)", declared.labels.len()));
        fields.push((weights.label_weight, score));
    }

    if !declared.env.is_empty() {
        let total: f64 = declared
            .env
            .iter()
            .map(|(key, value)| {
                key_credit(key, value, &observed.env, weights.key_match_credit, &mut notes, "env")
            })
            .sum();
        let score = total / declared.env.len() as f64;
        evidence.push(format!("env {score:.2} over {} declared variable(s)", declared.env.len()));
        fields.push((weights.env_weight, score));
    }

    let mut set_scores = Vec::new();
    if !declared.ports.is_empty() {
        let score = jaccard(&declared.ports, &observed.ports);
        if score < 1.0 {
            notes.push(format!(
                "ports declared [{}], observed [{}]",
                render(&declared.ports),
                render(&observed.ports)
            ));
        }
        set_scores.push(score);
    }
    if !declared.volumes.is_empty() {
        let canon = |set: &BTreeSet<String>| -> BTreeSet<String> {
            set.iter().map(|v| normalize_path(v).into_string()).collect()
        };
        let (want, have) = (canon(&declared.volumes), canon(&observed.volumes));
        let score = jaccard(&want, &have);
        if score < 1.0 {
            notes.push(format!("volumes declared [{}], observed [{}]", render(&want), render(&have)));
        }
        set_scores.push(score);
    }
    if !set_scores.is_empty() {
        let score = set_scores.iter().sum::<f64>() / set_scores.len() as f64;
        evidence.push(format!("ports/volumes {score:.2}"));
        fields.push((weights.port_volume_weight, score));
    }

    if let Some(workdir) = &declared.workdir {
        let want = normalize_path(workdir).into_string();
        let have = observed.workdir.as_deref().map(|w| normalize_path(w).into_string());
        let score = if have.as_deref() == Some(want.as_str()) { 1.0 } else { 0.0 };
        if score == 0.0 {
            notes.push(format!(
                "workdir declared {want}, observed {}",
                have.as_deref().unwrap_or("(none)")
            ));
        }
        evidence.push(format!("workdir {score:.2}"));
        fields.push((weights.workdir_weight, score));
    }

    let weight_sum: f64 = fields.iter().map(|(w, _)| w).sum();
    if fields.is_empty() || weight_sum <= 0.0 {
        evidence.push("build spec declares no comparable metadata".to_string());
        return SignalScore::neutral(SignalCategory::Metadata, evidence);
    }

    let value = clamp_unit(fields.iter().map(|(w, s)| w * s).sum::<f64>() / weight_sum);
    debug!(fields = fields.len(), score = value, "metadata correlated");
    evidence.extend(notes);
    SignalScore::new(SignalCategory::Metadata, value, evidence)
}
