//! Sequential layer aligner.
//!
//! Aligns the layer-producing instructions of the final stage chain against
//! the image's content layers in three phases:
//!
//! 1. weighted longest common subsequence over a per-pair weight table
//!    (command similarity x kind compatibility, minus a positional penalty),
//! 2. out-of-order matches among what phase 1 left over, at `reorder_factor`,
//! 3. instructions squashed into a single layer, at `merge_factor`.
//!
//! The sequence score is the sum of matched pair weights over the number of
//! layer-producing instructions.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

use crate::config::AlignmentConfig;
use crate::domain::error::IncompleteEvidence;
use crate::domain::image::{ImageDescriptor, Layer};
use crate::domain::instruction::{BuildSpec, DeclaredBase, Instruction, InstructionKind};
use crate::domain::result::{clamp_unit, SignalCategory, SignalScore};
use crate::normalize::command::{command_similarity, normalize_command, NormalizedCommand};
use crate::normalize::package::extract_packages;

const EPS: f64 = 1e-9;
const EVIDENCE_TEXT_LIMIT: usize = 72;

/// A layer that takes part in alignment.
#[derive(Debug, Clone, PartialEq)]
pub struct LayerEvidence {
    pub order_index: usize,
    pub digest: String,
    pub command: NormalizedCommand,
}

/// Layers left after removing base, metadata-only, command-less and no-op layers.
#[derive(Debug, Clone, Default)]
pub struct LayerSelection {
    pub layers: Vec<LayerEvidence>,
    pub notes: Vec<String>,
    pub warnings: Vec<IncompleteEvidence>,
    /// Non-base layers whose command is unknown but which carry content.
    pub opaque_layers: usize,
    /// Whether the image supplied any layer at all.
    pub any_layers: bool,
}

/// Number of leading layers that belong to the base image.
fn base_prefix_len(ordered: &[&Layer], base_digests: &[String]) -> usize {
    if base_digests.is_empty() {
        return 0;
    }
    let base: BTreeSet<&str> = base_digests.iter().map(String::as_str).collect();
    let mut prefix = 0;
    for (idx, layer) in ordered.iter().enumerate() {
        if base.contains(layer.digest.as_str()) {
            prefix = idx + 1;
        } else if layer.has_content_digest() {
            break;
        }
    }
    prefix
}

/// Pick the layers that instructions can align to.
///
/// `scratch_base` keeps an `ADD file:<hash> in /` root filesystem layer, which
/// otherwise marks the start of the base image.
pub fn alignable_layers(image: &ImageDescriptor, scratch_base: bool) -> LayerSelection {
    let ordered = image.ordered_layers();
    let mut selection = LayerSelection {
        any_layers: !ordered.is_empty(),
        ..LayerSelection::default()
    };

    let prefix = base_prefix_len(&ordered, &image.base_layer_digests);
    if prefix > 0 {
        selection
            .notes
            .push(format!("{prefix} leading layer(s) belong to the base image"));
    }

    let mut seen_digests: BTreeSet<&str> = BTreeSet::new();
    for layer in &ordered[prefix..] {
        let Some(raw) = layer.command() else {
            if layer.size_bytes > 0 {
                selection.opaque_layers += 1;
            }
            let warning = IncompleteEvidence::MissingLayerCommand {
                order_index: layer.order_index,
                digest: layer.digest.clone(),
            };
            selection.notes.push(warning.to_string());
            selection.warnings.push(warning);
            continue;
        };

        let command = normalize_command(raw);
        if command.is_metadata_only() {
            trace!(order_index = layer.order_index, "metadata-only layer skipped");
            continue;
        }
        if command.is_rootfs_add() && !scratch_base {
            selection.notes.push(format!(
                "layer {} unpacks a base root filesystem",
                layer.order_index
            ));
            continue;
        }
        if layer.has_content_digest() && !seen_digests.insert(layer.digest.as_str()) {
            selection.notes.push(format!(
                "layer {} repeats digest {} (no-op)",
                layer.order_index,
                short(&layer.digest)
            ));
            continue;
        }

        selection.layers.push(LayerEvidence {
            order_index: layer.order_index,
            digest: layer.digest.clone(),
            command,
        });
    }
    selection
}

/// How a pair was matched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PairKind {
    InOrder,
    Reordered,
    Merged,
}

/// One instruction credited against one layer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlignedPair {
    /// Index into the instruction slice that was aligned.
    pub instruction: usize,
    /// `order_index` of the layer.
    pub layer: usize,
    /// Command similarity x kind compatibility.
    pub similarity: f64,
    /// Credit contributed to the sequence score.
    pub weight: f64,
    pub kind: PairKind,
}

/// Full alignment outcome.
#[derive(Debug, Clone, PartialEq)]
pub struct Alignment {
    pub pairs: Vec<AlignedPair>,
    pub unmatched_instructions: Vec<usize>,
    /// `order_index` of every alignable layer no instruction claimed.
    pub unmatched_layers: Vec<usize>,
    /// No layer-producing instructions, yet the image has layers of its own.
    pub empty_alignment: bool,
    pub signal: SignalScore,
}

/// Compatibility of an instruction kind with a layer's recorded kind.
pub fn kind_compatibility(instruction: InstructionKind, layer: Option<InstructionKind>) -> f64 {
    use InstructionKind as K;
    match (instruction, layer) {
        (a, Some(b)) if a == b => 1.0,
        (K::Run, None) => 1.0,
        (K::Copy | K::Add, None) => 0.8,
        (K::Copy, Some(K::Add)) | (K::Add, Some(K::Copy)) => 0.7,
        _ => 0.0,
    }
}

#[derive(Debug, Clone, Copy)]
struct PairScore {
    similarity: f64,
    penalized: f64,
    distance: f64,
}

#[derive(Debug, Clone, Copy, Default)]
struct Cell {
    score: f64,
    distance: f64,
}

impl Cell {
    /// Higher score wins; within epsilon, smaller total positional distance.
    fn better_than(&self, other: &Cell) -> bool {
        if (self.score - other.score).abs() > EPS {
            return self.score > other.score;
        }
        other.distance - self.distance > EPS
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Move {
    Start,
    SkipInstruction,
    SkipLayer,
    Match,
}

fn relative_position(index: usize, len: usize) -> f64 {
    (index as f64 + 0.5) / len as f64
}

fn short(text: &str) -> String {
    if text.chars().count() <= EVIDENCE_TEXT_LIMIT {
        text.to_string()
    } else {
        let cut: String = text.chars().take(EVIDENCE_TEXT_LIMIT).collect();
        format!("{cut}...")
    }
}

/// Aligns instruction sequences against layer sequences.
pub struct Aligner<'c> {
    config: &'c AlignmentConfig,
}

impl<'c> Aligner<'c> {
    pub fn new(config: &'c AlignmentConfig) -> Self {
        Self { config }
    }

    fn pair_similarity(&self, instruction: &Instruction, layer: &LayerEvidence) -> f64 {
        let compat = kind_compatibility(instruction.kind, layer.command.kind);
        if compat == 0.0 {
            return 0.0;
        }
        let similarity = command_similarity(
            &instruction.normalized_command(),
            &layer.command,
            self.config.token_weight,
            self.config.edit_weight,
        );
        clamp_unit(similarity * compat)
    }

    fn weight_table(
        &self,
        instructions: &[&Instruction],
        layers: &[LayerEvidence],
    ) -> Vec<Vec<Option<PairScore>>> {
        let (n, m) = (instructions.len(), layers.len());
        instructions
            .iter()
            .enumerate()
            .map(|(i, instruction)| {
                layers
                    .iter()
                    .enumerate()
                    .map(|(j, layer)| {
                        let similarity = self.pair_similarity(instruction, layer);
                        if similarity < self.config.min_similarity || similarity <= EPS {
                            return None;
                        }
                        let distance =
                            (relative_position(i, n) - relative_position(j, m)).abs();
                        let penalized = similarity - self.config.position_penalty * distance;
                        (penalized > EPS).then_some(PairScore {
                            similarity,
                            penalized,
                            distance,
                        })
                    })
                    .collect()
            })
            .collect()
    }

    /// Phase 1: order-preserving weighted LCS.
    ///
    /// On equal score and distance the backtrack prefers skipping the later
    /// instruction, then the later layer, so earlier instructions and layers
    /// win ties.
    fn in_order(&self, table: &[Vec<Option<PairScore>>], n: usize, m: usize) -> Vec<(usize, usize)> {
        let mut dp = vec![vec![Cell::default(); m + 1]; n + 1];
        let mut moves = vec![vec![Move::Start; m + 1]; n + 1];

        for i in 0..=n {
            for j in 0..=m {
                if i == 0 && j == 0 {
                    continue;
                }
                let mut best: Option<(Cell, Move)> = None;
                let mut consider = |cell: Cell, mv: Move| {
                    if best.map_or(true, |(b, _)| cell.better_than(&b)) {
                        best = Some((cell, mv));
                    }
                };
                if i > 0 {
                    consider(dp[i - 1][j], Move::SkipInstruction);
                }
                if j > 0 {
                    consider(dp[i][j - 1], Move::SkipLayer);
                }
                if i > 0 && j > 0 {
                    if let Some(pair) = table[i - 1][j - 1] {
                        let prev = dp[i - 1][j - 1];
                        consider(
                            Cell {
                                score: prev.score + pair.penalized,
                                distance: prev.distance + pair.distance,
                            },
                            Move::Match,
                        );
                    }
                }
                if let Some((cell, mv)) = best {
                    dp[i][j] = cell;
                    moves[i][j] = mv;
                }
            }
        }

        let mut matched = Vec::new();
        let (mut i, mut j) = (n, m);
        while i > 0 || j > 0 {
            match moves[i][j] {
                Move::SkipInstruction => i -= 1,
                Move::SkipLayer => j -= 1,
                Move::Match => {
                    matched.push((i - 1, j - 1));
                    i -= 1;
                    j -= 1;
                }
                Move::Start => break,
            }
        }
        matched.reverse();
        matched
    }

    /// Align `instructions` (layer-producing, in source order) against `layers`.
    pub fn align(&self, instructions: &[&Instruction], selection: &LayerSelection) -> Alignment {
        let layers = &selection.layers;
        let (n, m) = (instructions.len(), layers.len());
        let mut evidence: Vec<String> = Vec::new();

        if n == 0 {
            let producing = m + selection.opaque_layers;
            let empty_alignment = producing > 0;
            let value = if empty_alignment { 0.0 } else { 1.0 };
            evidence.push(if empty_alignment {
                format!("no layer-producing instructions, but the image has {producing} layer(s) of its own")
            } else {
                "no layer-producing instructions and no layers to explain".to_string()
            });
            evidence.extend(selection.notes.iter().cloned());
            return Alignment {
                pairs: Vec::new(),
                unmatched_instructions: Vec::new(),
                unmatched_layers: layers.iter().map(|l| l.order_index).collect(),
                empty_alignment,
                signal: SignalScore::new(SignalCategory::Sequence, value, evidence),
            };
        }

        if m == 0 && (!selection.any_layers || selection.opaque_layers > 0) {
            evidence.push(if selection.any_layers {
                "no layer records a build command; sequence not assessed".to_string()
            } else {
                "image supplied no layers; sequence not assessed".to_string()
            });
            evidence.extend(selection.notes.iter().cloned());
            return Alignment {
                pairs: Vec::new(),
                unmatched_instructions: (0..n).collect(),
                unmatched_layers: Vec::new(),
                empty_alignment: false,
                signal: SignalScore::neutral(SignalCategory::Sequence, evidence),
            };
        }

        let table = self.weight_table(instructions, layers);
        let mut pairs: Vec<AlignedPair> = Vec::new();
        let mut used_instr = vec![false; n];
        let mut used_layer = vec![false; m];

        for (i, j) in self.in_order(&table, n, m) {
            if let Some(pair) = table[i][j] {
                used_instr[i] = true;
                used_layer[j] = true;
                pairs.push(AlignedPair {
                    instruction: i,
                    layer: layers[j].order_index,
                    similarity: pair.similarity,
                    weight: pair.similarity,
                    kind: PairKind::InOrder,
                });
            }
        }

        // Phase 2: best remaining pairs regardless of order.
        let mut candidates: Vec<(usize, usize, PairScore)> = Vec::new();
        for (i, row) in table.iter().enumerate() {
            for (j, cell) in row.iter().enumerate() {
                if let Some(pair) = cell {
                    if !used_instr[i] && !used_layer[j] {
                        candidates.push((i, j, *pair));
                    }
                }
            }
        }
        candidates.sort_by(|a, b| {
            b.2.similarity
                .total_cmp(&a.2.similarity)
                .then(a.2.distance.total_cmp(&b.2.distance))
                .then(a.0.cmp(&b.0))
                .then(a.1.cmp(&b.1))
        });
        for (i, j, pair) in candidates {
            if used_instr[i] || used_layer[j] {
                continue;
            }
            used_instr[i] = true;
            used_layer[j] = true;
            pairs.push(AlignedPair {
                instruction: i,
                layer: layers[j].order_index,
                similarity: pair.similarity,
                weight: pair.similarity * self.config.reorder_factor,
                kind: PairKind::Reordered,
            });
        }

        // Phase 3: RUN instructions whose tokens all appear in one layer.
        for i in 0..n {
            if used_instr[i] {
                continue;
            }
            if let Some((j, containment)) = self.merged_host(instructions[i], i, n, layers) {
                used_instr[i] = true;
                used_layer[j] = true;
                pairs.push(AlignedPair {
                    instruction: i,
                    layer: layers[j].order_index,
                    similarity: containment,
                    weight: containment * self.config.merge_factor,
                    kind: PairKind::Merged,
                });
            }
        }

        pairs.sort_by_key(|p| p.instruction);
        let total: f64 = pairs.iter().map(|p| p.weight).sum();
        let value = clamp_unit(total / n as f64);

        let unmatched_instructions: Vec<usize> = (0..n).filter(|i| !used_instr[*i]).collect();
        let unmatched_layers: Vec<usize> = (0..m)
            .filter(|j| !used_layer[*j])
            .map(|j| layers[j].order_index)
            .collect();

        evidence.push(format!(
            "{} of {} layer-producing instruction(s) matched against {} layer(s)",
            pairs.len(),
            n,
            m
        ));
        for pair in &pairs {
            let instruction = instructions[pair.instruction];
            let verb = match pair.kind {
                PairKind::InOrder => "matched",
                PairKind::Reordered => "reordered",
                PairKind::Merged => "merged",
            };
            evidence.push(format!(
                "{verb} line {} `{}` to layer {} ({:.2})",
                instruction.source_line,
                short(&instruction.display_text()),
                pair.layer,
                pair.weight
            ));
        }
        for &i in &unmatched_instructions {
            let instruction = instructions[i];
            evidence.push(format!(
                "unmatched instruction line {} `{}`",
                instruction.source_line,
                short(&instruction.display_text())
            ));
        }
        for &order_index in &unmatched_layers {
            if let Some(layer) = layers.iter().find(|l| l.order_index == order_index) {
                evidence.push(format!(
                    "unmatched layer {} `{}`",
                    order_index,
                    short(&layer.command.to_string())
                ));
            }
        }
        evidence.extend(package_deltas(instructions, layers, &pairs));
        evidence.extend(selection.notes.iter().cloned());

        debug!(
            instructions = n,
            layers = m,
            matched = pairs.len(),
            score = value,
            "sequence aligned"
        );

        Alignment {
            pairs,
            unmatched_instructions,
            unmatched_layers,
            empty_alignment: false,
            signal: SignalScore::new(SignalCategory::Sequence, value, evidence),
        }
    }

    /// Best layer containing every token of a RUN instruction.
    fn merged_host(
        &self,
        instruction: &Instruction,
        i: usize,
        n: usize,
        layers: &[LayerEvidence],
    ) -> Option<(usize, f64)> {
        if instruction.kind != InstructionKind::Run || instruction.normalized_args.is_empty() {
            return None;
        }
        let wanted: BTreeSet<&str> = instruction.normalized_args.iter().map(String::as_str).collect();
        let mut best: Option<(usize, f64, f64)> = None;
        for (j, layer) in layers.iter().enumerate() {
            if kind_compatibility(instruction.kind, layer.command.kind) == 0.0 {
                continue;
            }
            // A squashed layer carries strictly more than this one instruction.
            if layer.command.tokens.len() <= instruction.normalized_args.len() {
                continue;
            }
            let have: BTreeSet<&str> = layer.command.tokens.iter().map(String::as_str).collect();
            let containment = wanted.intersection(&have).count() as f64 / wanted.len() as f64;
            if containment < 1.0 - EPS {
                continue;
            }
            let distance = (relative_position(i, n) - relative_position(j, layers.len())).abs();
            let better = match best {
                None => true,
                Some((_, c, d)) => containment > c + EPS || ((containment - c).abs() <= EPS && distance < d - EPS),
            };
            if better {
                best = Some((j, containment, distance));
            }
        }
        best.map(|(j, c, _)| (j, c))
    }
}

/// Package version differences between matched RUN pairs.
fn package_deltas(
    instructions: &[&Instruction],
    layers: &[LayerEvidence],
    pairs: &[AlignedPair],
) -> Vec<String> {
    let mut notes = Vec::new();
    for pair in pairs.iter().filter(|p| p.kind != PairKind::Merged) {
        let instruction = instructions[pair.instruction];
        if instruction.kind != InstructionKind::Run {
            continue;
        }
        let Some(layer) = layers.iter().find(|l| l.order_index == pair.layer) else {
            continue;
        };
        let declared = extract_packages(&instruction.normalized_args);
        let observed: BTreeMap<String, Option<String>> = extract_packages(&layer.command.tokens)
            .into_iter()
            .map(|p| (p.name, p.version))
            .collect();
        if declared.is_empty() || observed.is_empty() {
            continue;
        }
        for package in declared {
            match observed.get(&package.name) {
                None => notes.push(format!(
                    "line {}: package {} not installed by layer {}",
                    instruction.source_line, package.name, pair.layer
                )),
                Some(seen) => {
                    if let (Some(want), Some(got)) = (&package.version, seen) {
                        if want != got {
                            notes.push(format!(
                                "line {}: package {} declared {want}, observed {got}",
                                instruction.source_line, package.name
                            ));
                        }
                    }
                }
            }
        }
    }
    notes
}

/// Align a parsed spec against an image with the given settings.
pub fn align(spec: &BuildSpec, image: &ImageDescriptor, config: &AlignmentConfig) -> Alignment {
    let scratch = matches!(spec.declared_base, DeclaredBase::Scratch);
    let selection = alignable_layers(image, scratch);
    let instructions = spec.layer_instructions();
    Aligner::new(config).align(&instructions, &selection)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse;

    fn layer(order_index: usize, digest: &str, cmd: Option<&str>) -> Layer {
        Layer {
            digest: digest.to_string(),
            size_bytes: 100,
            created_by: cmd.map(str::to_string),
            order_index,
        }
    }

    fn image(layers: Vec<Layer>) -> ImageDescriptor {
        ImageDescriptor {
            layers,
            ..ImageDescriptor::default()
        }
    }

    fn image_of(cmds: &[&str]) -> ImageDescriptor {
        image(
            cmds.iter()
                .enumerate()
                .map(|(i, c)| layer(i, &format!("sha256:{i:04}"), Some(c)))
                .collect(),
        )
    }

    fn run(spec_text: &str, img: &ImageDescriptor) -> Alignment {
        let spec = parse(spec_text).expect("parse");
        align(&spec, img, &AlignmentConfig::default())
    }

    #[test]
    fn test_self_match_scores_one() {
        let text = "FROM node:18\nRUN npm ci\nCOPY . /app\nRUN npm run build\n";
        let img = image_of(&["RUN npm ci # buildkit", "COPY . /app # buildkit", "RUN npm run build # buildkit"]);
        let result = run(text, &img);
        assert_eq!(result.signal.value, 1.0);
        assert!(result.unmatched_instructions.is_empty());
        assert!(result.unmatched_layers.is_empty());
        assert!(result.pairs.iter().all(|p| p.kind == PairKind::InOrder));
    }

    #[test]
    fn test_classic_history_with_base_layers() {
        let text = "FROM node:18\nRUN npm install\nCOPY . /app\n";
        let mut img = image(vec![
            layer(0, "sha256:base", Some("/bin/sh -c #(nop) ADD file:0a1b in / ")),
            layer(1, "<missing>", Some("/bin/sh -c #(nop)  CMD [\"node\"]")),
            layer(2, "sha256:npm", Some("/bin/sh -c npm install")),
            layer(3, "sha256:app", Some("/bin/sh -c #(nop) COPY dir:9f8e in /app ")),
        ]);
        img.base_layer_digests = vec!["sha256:base".into()];
        let result = run(text, &img);
        assert_eq!(result.signal.value, 1.0);
        assert!(result
            .signal
            .evidence
            .iter()
            .any(|e| e.contains("belong to the base image")));
    }

    #[test]
    fn test_unrelated_commands_score_zero() {
        let text = "FROM node:18\nRUN npm install\nCOPY . /app\n";
        let img = image_of(&["/bin/sh -c pip install flask", "/bin/sh -c python setup.py build"]);
        let result = run(text, &img);
        assert_eq!(result.signal.value, 0.0);
        assert_eq!(result.unmatched_instructions, vec![0, 1]);
        assert_eq!(result.unmatched_layers, vec![0, 1]);
    }

    #[test]
    fn test_reordered_instructions_get_partial_credit() {
        let text = "FROM alpine\nRUN apk add git\nRUN make install\nRUN adduser -D app\n";
        let img = image_of(&[
            "/bin/sh -c adduser -D app",
            "/bin/sh -c apk add git",
            "/bin/sh -c make install",
        ]);
        let result = run(text, &img);
        let reordered: Vec<&AlignedPair> =
            result.pairs.iter().filter(|p| p.kind == PairKind::Reordered).collect();
        assert_eq!(reordered.len(), 1);
        assert_eq!(reordered[0].instruction, 2);
        let expected = (1.0 + 1.0 + 0.85) / 3.0;
        assert!((result.signal.value - expected).abs() < 1e-9);
    }

    #[test]
    fn test_squashed_layer_credits_merged_instructions() {
        let text = "FROM debian\nRUN apt-get update\nRUN apt-get install -y curl\n";
        let img = image_of(&["/bin/sh -c apt-get update && apt-get install -y curl"]);
        let result = run(text, &img);
        assert_eq!(result.pairs.len(), 2);
        assert!(result.pairs.iter().any(|p| p.kind == PairKind::Merged));
        assert!(result.signal.value > 0.6);
    }

    #[test]
    fn test_repeated_digest_is_a_no_op() {
        let text = "FROM alpine\nRUN echo hi\n";
        let img = image(vec![
            layer(0, "sha256:same", Some("/bin/sh -c echo hi")),
            layer(1, "sha256:same", Some("/bin/sh -c echo hi")),
        ]);
        let result = run(text, &img);
        assert_eq!(result.signal.value, 1.0);
        assert!(result.unmatched_layers.is_empty());
        assert!(result.signal.evidence.iter().any(|e| e.contains("no-op")));
    }

    #[test]
    fn test_ties_prefer_earliest_instruction_and_layer() {
        let text = "FROM alpine\nRUN echo hi\nRUN echo hi\n";
        let img = image_of(&["/bin/sh -c echo hi"]);
        let result = run(text, &img);
        assert_eq!(result.pairs.len(), 1);
        assert_eq!(result.pairs[0].instruction, 0);
        assert_eq!(result.unmatched_instructions, vec![1]);

        let text = "FROM alpine\nRUN echo hi\n";
        let img = image(vec![
            layer(0, "sha256:a", Some("/bin/sh -c echo hi")),
            layer(1, "sha256:b", Some("/bin/sh -c echo hi")),
        ]);
        let result = run(text, &img);
        assert_eq!(result.pairs[0].layer, 0);
    }

    #[test]
    fn test_prefers_nearer_of_equal_matches() {
        let text = "FROM alpine\nRUN make\n";
        let img = image_of(&[
            "/bin/sh -c make",
            "/bin/sh -c ls",
            "/bin/sh -c make",
            "/bin/sh -c pwd",
            "/bin/sh -c id",
        ]);
        let result = run(text, &img);
        assert_eq!(result.pairs[0].layer, 2);
    }

    #[test]
    fn test_adding_matching_pair_never_lowers_score() {
        let partial = run(
            "FROM alpine\nRUN echo a\nRUN echo b\nRUN echo c\n",
            &image_of(&["/bin/sh -c echo a", "/bin/sh -c echo b", "/bin/sh -c curl zzz"]),
        );
        let extended = run(
            "FROM alpine\nRUN echo a\nRUN echo b\nRUN echo c\nRUN make dist\n",
            &image_of(&[
                "/bin/sh -c echo a",
                "/bin/sh -c echo b",
                "/bin/sh -c curl zzz",
                "/bin/sh -c make dist",
            ]),
        );
        assert!((partial.signal.value - 2.0 / 3.0).abs() < 1e-9);
        assert!(extended.signal.value >= partial.signal.value);
        assert!((extended.signal.value - 0.75).abs() < 1e-9);
    }

    #[test]
    fn test_out_of_order_addition_earns_reorder_credit() {
        let alone = run("FROM alpine\nRUN npm ci\n", &image_of(&["/bin/sh -c npm ci"]));
        assert_eq!(alone.signal.value, 1.0);

        let swapped = run(
            "FROM alpine\nRUN npm ci\nRUN make dist\n",
            &image_of(&["/bin/sh -c make dist", "/bin/sh -c npm ci"]),
        );
        assert_eq!(swapped.pairs.len(), 2);
        assert_eq!(
            swapped.pairs.iter().filter(|p| p.kind == PairKind::Reordered).count(),
            1
        );
        assert!((swapped.signal.value - 0.925).abs() < 1e-9);
    }

    #[test]
    fn test_no_instructions_edge_cases() {
        let text = "FROM alpine\nENV A=1\n";
        let empty = run(text, &image_of(&["/bin/sh -c #(nop)  ENV A=1"]));
        assert_eq!(empty.signal.value, 1.0);
        assert!(!empty.empty_alignment);

        let extra = run(text, &image_of(&["/bin/sh -c apk add curl"]));
        assert_eq!(extra.signal.value, 0.0);
        assert!(extra.empty_alignment);
    }

    #[test]
    fn test_missing_commands_are_neutral() {
        let text = "FROM alpine\nRUN make\n";
        let img = image(vec![layer(0, "sha256:x", None), layer(1, "sha256:y", None)]);
        let result = run(text, &img);
        assert!(result.signal.neutral);

        let result = run(text, &image(vec![]));
        assert!(result.signal.neutral);
    }

    #[test]
    fn test_package_version_delta_reported() {
        let text = "FROM debian\nRUN apt-get install -y curl=7.88 git\n";
        let img = image_of(&["/bin/sh -c apt-get install -y curl=7.74 git"]);
        let result = run(text, &img);
        assert!(result
            .signal
            .evidence
            .iter()
            .any(|e| e.contains("package curl declared 7.88, observed 7.74")));
    }

    #[test]
    fn test_kind_compatibility_table() {
        use InstructionKind as K;
        assert_eq!(kind_compatibility(K::Run, Some(K::Run)), 1.0);
        assert_eq!(kind_compatibility(K::Run, None), 1.0);
        assert_eq!(kind_compatibility(K::Copy, Some(K::Add)), 0.7);
        assert_eq!(kind_compatibility(K::Run, Some(K::Copy)), 0.0);
        assert_eq!(kind_compatibility(K::Copy, None), 0.8);
    }
}
