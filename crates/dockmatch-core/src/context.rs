//! Build context analysis.
//!
//! Checks that what COPY/ADD put into the final image is visible in the
//! image's file listing. Each entry earns the best graded score over the
//! candidate files:
//!
//! | evidence                                   | score                   |
//! |--------------------------------------------|-------------------------|
//! | file at the expected path, or under it     | `exact_path_score`      |
//! | file in the expected parent directory      | `parent_path_score`     |
//! | file with the expected name elsewhere      | `filename_only_score`   |
//! | file with the expected extension elsewhere | `extension_match_score` |

use std::collections::{BTreeMap, BTreeSet};

use globset::{GlobBuilder, GlobMatcher};
use tracing::{debug, trace};

use crate::config::BuildContextScores;
use crate::domain::error::IncompleteEvidence;
use crate::domain::image::{FileEvidence, ImageDescriptor};
use crate::domain::instruction::{BuildContextEntry, BuildSpec, ContextSource, InstructionKind};
use crate::domain::result::{clamp_unit, SignalCategory, SignalScore};
use crate::normalize::command::normalize_command;
use crate::normalize::path::{extension, file_name, is_glob, normalize_path, parent};

/// Where an entry's files are expected to land.
enum Target {
    /// A single file at this path.
    File(String),
    /// A directory's contents, or a file whose kind the source pattern leaves open.
    Tree { root: String, name: String },
    /// Files matching a glob under the destination.
    Glob {
        full: GlobMatcher,
        name: GlobMatcher,
        dest: String,
        extension: Option<String>,
    },
}

fn compile(pattern: &str) -> Result<GlobMatcher, globset::Error> {
    Ok(GlobBuilder::new(pattern)
        .literal_separator(true)
        .build()?
        .compile_matcher())
}

fn source_name(entry: &BuildContextEntry) -> String {
    match entry.source {
        ContextSource::Remote => {
            let trimmed = entry.source_pattern.split(['?', '#']).next().unwrap_or_default();
            file_name(trimmed).to_string()
        }
        _ => file_name(&entry.source_pattern).to_string(),
    }
}

fn target_for(entry: &BuildContextEntry) -> Result<Target, globset::Error> {
    let dest = entry.dest_path.clone();
    let name = source_name(entry);

    if entry.source != ContextSource::Remote && is_glob(&name) {
        let full_pattern = format!("{}/{}", dest.trim_end_matches('/'), name);
        let literal_ext = extension(&name).filter(|e| !is_glob(e)).map(str::to_string);
        return Ok(Target::Glob {
            full: compile(&full_pattern)?,
            name: compile(&name)?,
            dest,
            extension: literal_ext,
        });
    }

    let dir_like = name == "." || name == ".." || name.is_empty() || !name.contains('.');
    if dir_like && entry.source != ContextSource::Remote {
        return Ok(Target::Tree { root: dest, name });
    }
    if entry.dest_is_dir {
        let full = format!("{}/{}", dest.trim_end_matches('/'), name);
        Ok(Target::File(normalize_path(&full).into_string()))
    } else {
        Ok(Target::File(dest))
    }
}

fn under(path: &str, root: &str) -> bool {
    path == root
        || root == "/"
        || path
            .strip_prefix(root)
            .is_some_and(|rest| rest.starts_with('/'))
}

fn extension_hint(file: &FileEvidence, ext: &str) -> bool {
    let ext = ext.to_ascii_lowercase();
    extension(&file.path).is_some_and(|e| e.eq_ignore_ascii_case(&ext))
        || file
            .content_type
            .as_deref()
            .and_then(|ct| ct.rsplit('/').next())
            .is_some_and(|sub| sub.eq_ignore_ascii_case(&ext))
}

fn score_file(target: &Target, path: &str, file: &FileEvidence, scores: &BuildContextScores) -> f64 {
    match target {
        Target::File(expected) => {
            if path == expected {
                scores.exact_path_score
            } else if parent(path) == parent(expected) {
                scores.parent_path_score
            } else if file_name(path) == file_name(expected) {
                scores.filename_only_score
            } else if extension(expected).is_some_and(|e| extension_hint(file, e)) {
                scores.extension_match_score
            } else {
                0.0
            }
        }
        Target::Tree { root, name } => {
            if under(path, root) {
                scores.exact_path_score
            } else if parent(path) == parent(root) {
                scores.parent_path_score
            } else if !name.is_empty()
                && name != "."
                && path.split('/').any(|segment| segment == name.as_str())
            {
                scores.filename_only_score
            } else {
                0.0
            }
        }
        Target::Glob {
            full,
            name,
            dest,
            extension: ext,
        } => {
            if full.is_match(path) {
                scores.exact_path_score
            } else if parent(path) == dest.trim_end_matches('/') || (dest == "/" && parent(path) == "/") {
                scores.parent_path_score
            } else if name.is_match(file_name(path)) {
                scores.filename_only_score
            } else if ext.as_deref().is_some_and(|e| extension_hint(file, e)) {
                scores.extension_match_score
            } else {
                0.0
            }
        }
    }
}

fn best_score(target: &Target, files: &[&FileEvidence], scores: &BuildContextScores) -> f64 {
    files
        .iter()
        .map(|file| {
            let path = normalize_path(&file.path).into_string();
            score_file(target, &path, file, scores)
        })
        .fold(0.0, f64::max)
}

/// Pair each final-chain COPY/ADD line with the layer that recorded it.
///
/// A layer qualifies when its command is the same COPY/ADD, or a COPY/ADD to
/// the same destination. Each layer is claimed once, in build order.
pub fn layer_hints(spec: &BuildSpec, image: &ImageDescriptor) -> BTreeMap<usize, String> {
    let copy_layers: Vec<_> = image
        .ordered_layers()
        .into_iter()
        .filter(|l| l.has_content_digest())
        .filter_map(|l| l.command().map(|c| (l.digest.as_str(), normalize_command(c))))
        .filter(|(_, cmd)| cmd.is_copy_like())
        .collect();

    let mut claimed = BTreeSet::new();
    let mut hints = BTreeMap::new();
    for instruction in spec.layer_instructions() {
        if !matches!(instruction.kind, InstructionKind::Copy | InstructionKind::Add) {
            continue;
        }
        let wanted = instruction.normalized_command();
        let Some((_, wanted_dest)) = wanted.copy_parts() else {
            continue;
        };
        for (idx, (digest, cmd)) in copy_layers.iter().enumerate() {
            if claimed.contains(&idx) {
                continue;
            }
            let same_dest = cmd.copy_parts().is_some_and(|(_, dest)| dest == wanted_dest);
            if *cmd == wanted || same_dest {
                claimed.insert(idx);
                hints.insert(instruction.source_line, digest.to_string());
                break;
            }
        }
    }
    hints
}

/// Analyze COPY/ADD entries against the observed file listing.
///
/// `layer_hints` maps an instruction's source line to the digest of the layer
/// that recorded it (see [`layer_hints`]); when files carry that digest only
/// they are considered for the entry.
pub fn analyze(
    entries: &[BuildContextEntry],
    files: Option<&[FileEvidence]>,
    layer_hints: &BTreeMap<usize, String>,
    scores: &BuildContextScores,
) -> SignalScore {
    let Some(files) = files else {
        return SignalScore::neutral(
            SignalCategory::BuildContext,
            vec![IncompleteEvidence::MissingFileListing.to_string()],
        );
    };

    let mut evidence = Vec::new();
    let mut notes = Vec::new();
    let mut total = 0.0;
    let mut counted = 0usize;
    let mut excluded = 0usize;

    for entry in entries.iter().filter(|e| e.in_final_image) {
        if entry.source == ContextSource::UnresolvedStage {
            excluded += 1;
            notes.push(format!(
                "line {}: source stage '{}' unresolved; entry excluded",
                entry.line,
                entry.stage.as_deref().unwrap_or_default()
            ));
            continue;
        }

        let target = match target_for(entry) {
            Ok(t) => t,
            Err(err) => {
                excluded += 1;
                notes.push(format!("line {}: pattern '{}' unusable: {err}", entry.line, entry.source_pattern));
                continue;
            }
        };

        let hinted: Vec<&FileEvidence> = layer_hints
            .get(&entry.line)
            .map(|digest| {
                files
                    .iter()
                    .filter(|f| f.layer_digest.as_deref() == Some(digest.as_str()))
                    .collect()
            })
            .unwrap_or_default();
        let candidates: Vec<&FileEvidence> = if hinted.is_empty() {
            files.iter().collect()
        } else {
            hinted
        };

        let score = best_score(&target, &candidates, scores);
        trace!(line = entry.line, source = %entry.source_pattern, score, "context entry scored");
        if score < 1.0 {
            notes.push(format!(
                "line {}: {} -> {} scored {score:.2}",
                entry.line, entry.source_pattern, entry.dest_path
            ));
        }
        total += score;
        counted += 1;
    }

    if counted == 0 {
        evidence.push(if excluded > 0 {
            format!("all {excluded} COPY/ADD entr(ies) excluded")
        } else {
            "no COPY/ADD entries reach the final image".to_string()
        });
        evidence.extend(notes);
        return SignalScore::neutral(SignalCategory::BuildContext, evidence);
    }

    let value = clamp_unit(total / counted as f64);
    evidence.push(format!(
        "{counted} COPY/ADD entr(ies) checked against {} file(s), {excluded} excluded",
        files.len()
    ));
    evidence.extend(notes);
    debug!(counted, excluded, score = value, "build context analyzed");
    SignalScore::new(SignalCategory::BuildContext, value, evidence)
}
