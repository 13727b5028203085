//! Base image verification.
//!
//! Compares the declared base of the final stage chain with what the image
//! records about its base: a reference, resolved base layer digests, and the
//! platform. Platform disagreement is a hard zero and is surfaced to the
//! aggregator as an override.

use tracing::debug;

use crate::config::MatchConfig;
use crate::domain::error::IncompleteEvidence;
use crate::domain::image::{ImageDescriptor, Platform};
use crate::domain::instruction::DeclaredBase;
use crate::domain::result::{SignalCategory, SignalScore};
use crate::normalize::image_ref::{normalize_image_ref, ImageRef};

/// Outcome of base verification.
#[derive(Debug, Clone, PartialEq)]
pub struct BaseVerification {
    pub signal: SignalScore,
    pub platform_mismatch: bool,
    /// The observed base belongs to a different image family.
    pub family_mismatch: bool,
}

impl BaseVerification {
    fn scored(value: f64, evidence: Vec<String>) -> Self {
        Self {
            signal: SignalScore::new(SignalCategory::BaseImage, value, evidence),
            platform_mismatch: false,
            family_mismatch: false,
        }
    }
}

enum PlatformCheck {
    Match(String),
    Mismatch(String),
    Unknown,
    NotDeclared,
}

fn check_platform(
    expected: Option<&Platform>,
    image: &ImageDescriptor,
    accept_manifest_list: bool,
) -> PlatformCheck {
    let Some(expected) = expected else {
        return PlatformCheck::NotDeclared;
    };
    let in_manifest_list = accept_manifest_list
        && image.manifest_platforms.iter().any(|p| p.matches(expected));

    match &image.platform {
        Some(observed) if observed.matches(expected) => {
            PlatformCheck::Match(format!("platform {observed} matches"))
        }
        Some(observed) if in_manifest_list => PlatformCheck::Match(format!(
            "platform {expected} is a member of the manifest list (pulled {observed})"
        )),
        Some(observed) => PlatformCheck::Mismatch(format!(
            "platform mismatch: declared {expected}, image is {observed}"
        )),
        None if in_manifest_list => {
            PlatformCheck::Match(format!("platform {expected} is a member of the manifest list"))
        }
        None => PlatformCheck::Unknown,
    }
}

/// Whether the image's earliest content layers are exactly `base_layer_digests`.
fn base_layers_are_prefix(image: &ImageDescriptor) -> bool {
    let content: Vec<&str> = image
        .ordered_layers()
        .into_iter()
        .filter(|l| l.has_content_digest())
        .map(|l| l.digest.as_str())
        .collect();
    let base = &image.base_layer_digests;
    !base.is_empty()
        && content.len() >= base.len()
        && content.iter().zip(base).all(|(a, b)| *a == b.as_str())
}

/// Verify the declared base against the image.
pub fn verify(
    declared: &DeclaredBase,
    declared_platform: Option<&Platform>,
    image: &ImageDescriptor,
    config: &MatchConfig,
) -> BaseVerification {
    let settings = &config.base_image;
    let mut evidence = Vec::new();

    let expected = declared_platform.or(settings.expected_platform.as_ref());
    match check_platform(expected, image, settings.accept_manifest_list_members) {
        PlatformCheck::Mismatch(reason) => {
            debug!(%reason, "base image platform mismatch");
            return BaseVerification {
                signal: SignalScore::new(SignalCategory::BaseImage, 0.0, vec![reason]),
                platform_mismatch: true,
                family_mismatch: false,
            };
        }
        PlatformCheck::Match(note) => evidence.push(note),
        PlatformCheck::Unknown => evidence.push(IncompleteEvidence::UnknownPlatform.to_string()),
        PlatformCheck::NotDeclared => {}
    }

    let observed = match image.observed_base_ref() {
        Some(raw) => match normalize_image_ref(raw) {
            Ok(r) => Some(r),
            Err(err) => {
                evidence.push(format!("observed base ignored: {err}"));
                None
            }
        },
        None => None,
    };

    let verdict = match declared {
        DeclaredBase::Scratch => verify_scratch(observed.as_ref(), image, evidence),
        DeclaredBase::Image(declared) => {
            verify_image(declared, observed.as_ref(), image, config, evidence)
        }
    };
    debug!(
        score = verdict.signal.value,
        neutral = verdict.signal.neutral,
        family_mismatch = verdict.family_mismatch,
        "base image verified"
    );
    verdict
}

fn verify_scratch(
    observed: Option<&ImageRef>,
    image: &ImageDescriptor,
    mut evidence: Vec<String>,
) -> BaseVerification {
    match observed {
        Some(r) if !r.is_scratch() => {
            evidence.push(format!("declared scratch, image records base {r}"));
            BaseVerification {
                family_mismatch: true,
                ..BaseVerification::scored(0.0, evidence)
            }
        }
        _ if !image.base_layer_digests.is_empty() => {
            evidence.push(format!(
                "declared scratch, image carries {} base layer(s)",
                image.base_layer_digests.len()
            ));
            BaseVerification {
                family_mismatch: true,
                ..BaseVerification::scored(0.0, evidence)
            }
        }
        _ => {
            evidence.push("scratch base; image records no parent image".to_string());
            BaseVerification::scored(1.0, evidence)
        }
    }
}

fn fold(name: &str, case_sensitive: bool) -> String {
    if case_sensitive {
        name.to_string()
    } else {
        name.to_ascii_lowercase()
    }
}

fn verify_image(
    declared: &ImageRef,
    observed: Option<&ImageRef>,
    image: &ImageDescriptor,
    config: &MatchConfig,
    mut evidence: Vec<String>,
) -> BaseVerification {
    let settings = &config.base_image;

    if base_layers_are_prefix(image) {
        evidence.push(format!(
            "earliest {} layer(s) are the resolved layers of {declared}",
            image.base_layer_digests.len()
        ));
        if observed.map_or(true, |o| o.same_repository(declared) && o.same_version(declared)) {
            return BaseVerification::scored(1.0, evidence);
        }
    } else if !image.base_layer_digests.is_empty() {
        evidence.push("resolved base layers are not a prefix of the image's layers".to_string());
    }

    let Some(observed) = observed else {
        if image.base_layer_digests.is_empty() {
            evidence.push(IncompleteEvidence::UnknownObservedBase.to_string());
            return BaseVerification {
                signal: SignalScore::neutral(SignalCategory::BaseImage, evidence),
                platform_mismatch: false,
                family_mismatch: false,
            };
        }
        return BaseVerification::scored(0.0, evidence);
    };

    let tag_factor = if observed.same_version(declared) {
        1.0
    } else {
        settings.tag_mismatch_score
    };
    let tag_note = if tag_factor < 1.0 {
        format!(" (tag {} vs {})", declared.tag, observed.tag)
    } else {
        String::new()
    };

    if observed.same_repository(declared) {
        if tag_factor == 1.0 {
            evidence.push(format!("base {declared} matches exactly"));
        } else {
            evidence.push(format!("same repository {}{tag_note}", declared.display_repository()));
        }
        return BaseVerification::scored(tag_factor, evidence);
    }

    if observed.repository == declared.repository {
        evidence.push(format!(
            "{} served from mirror {} instead of {}{tag_note}",
            declared.display_repository(),
            observed.registry,
            declared.registry
        ));
        return BaseVerification::scored(settings.registry_mirror_score * tag_factor, evidence);
    }

    let case_sensitive = settings.alias_case_sensitive;
    let declared_name = fold(declared.short_name(), case_sensitive);
    let observed_name = fold(observed.short_name(), case_sensitive);
    if config.aliases_of(&declared_name).contains(&observed_name) {
        evidence.push(format!(
            "{} is a known alias of {}{tag_note}",
            observed.display_repository(),
            declared.display_repository()
        ));
        return BaseVerification::scored(settings.alias_score * tag_factor, evidence);
    }

    evidence.push(format!(
        "base family mismatch: declared {}, image built on {}",
        declared.display_repository(),
        observed.display_repository()
    ));
    BaseVerification {
        family_mismatch: true,
        ..BaseVerification::scored(0.0, evidence)
    }
}
