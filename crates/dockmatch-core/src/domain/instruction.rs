//! Parsed build spec: typed instructions, stages and build-context entries.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::domain::error::IncompleteEvidence;
use crate::domain::image::{ImageMetadata, Platform};
use crate::normalize::{ImageRef, NormalizedCommand};

/// Dockerfile instruction keyword.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum InstructionKind {
    From,
    Run,
    Copy,
    Add,
    Env,
    Label,
    Expose,
    Volume,
    Workdir,
    Arg,
    Cmd,
    Entrypoint,
    User,
    Healthcheck,
    Shell,
    Stopsignal,
    Onbuild,
    Maintainer,
    Other,
}

impl InstructionKind {
    pub const KNOWN: [InstructionKind; 18] = [
        Self::From,
        Self::Run,
        Self::Copy,
        Self::Add,
        Self::Env,
        Self::Label,
        Self::Expose,
        Self::Volume,
        Self::Workdir,
        Self::Arg,
        Self::Cmd,
        Self::Entrypoint,
        Self::User,
        Self::Healthcheck,
        Self::Shell,
        Self::Stopsignal,
        Self::Onbuild,
        Self::Maintainer,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::From => "FROM",
            Self::Run => "RUN",
            Self::Copy => "COPY",
            Self::Add => "ADD",
            Self::Env => "ENV",
            Self::Label => "LABEL",
            Self::Expose => "EXPOSE",
            Self::Volume => "VOLUME",
            Self::Workdir => "WORKDIR",
            Self::Arg => "ARG",
            Self::Cmd => "CMD",
            Self::Entrypoint => "ENTRYPOINT",
            Self::User => "USER",
            Self::Healthcheck => "HEALTHCHECK",
            Self::Shell => "SHELL",
            Self::Stopsignal => "STOPSIGNAL",
            Self::Onbuild => "ONBUILD",
            Self::Maintainer => "MAINTAINER",
            Self::Other => "OTHER",
        }
    }

    /// Case-insensitive keyword lookup; `None` for unknown keywords.
    pub fn from_keyword(keyword: &str) -> Option<Self> {
        Self::KNOWN
            .iter()
            .copied()
            .find(|k| k.as_str().eq_ignore_ascii_case(keyword))
    }

    /// Exact uppercase lookup, as keywords appear in image histories.
    pub fn from_history_keyword(keyword: &str) -> Option<Self> {
        Self::KNOWN.iter().copied().find(|k| k.as_str() == keyword)
    }

    /// Whether this instruction writes a filesystem layer.
    pub fn produces_layer(self) -> bool {
        matches!(self, Self::Run | Self::Copy | Self::Add)
    }
}

impl fmt::Display for InstructionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One parsed instruction. Immutable once parsed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Instruction {
    pub kind: InstructionKind,
    /// Keyword as written (uppercased); differs from `kind` only for `OTHER`.
    pub keyword: String,
    /// Arguments after variable expansion, flags included.
    pub raw_args: Vec<String>,
    /// Canonical tokens used for comparison against layer commands.
    pub normalized_args: Vec<String>,
    /// 1-based line the instruction starts on.
    pub source_line: usize,
    /// Index of the stage this instruction belongs to.
    pub stage: usize,
}

impl Instruction {
    pub fn normalized_command(&self) -> NormalizedCommand {
        NormalizedCommand {
            kind: Some(self.kind),
            tokens: self.normalized_args.clone(),
        }
    }

    /// `KEYWORD arg arg` as the instruction reads after expansion.
    pub fn display_text(&self) -> String {
        if self.raw_args.is_empty() {
            self.keyword.clone()
        } else {
            format!("{} {}", self.keyword, self.raw_args.join(" "))
        }
    }
}

/// What a stage is built on.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum StageBase {
    Scratch,
    Image(ImageRef),
    /// Index of an earlier stage.
    Stage(usize),
}

/// One `FROM ...` segment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Stage {
    pub index: usize,
    pub name: Option<String>,
    pub base: StageBase,
    pub platform: Option<Platform>,
    /// Instruction index of the stage's FROM.
    pub start: usize,
    /// One past the stage's last instruction.
    pub end: usize,
    pub line: usize,
}

/// Where a COPY/ADD reads its sources from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum ContextSource {
    BuildContext,
    Stage(usize),
    /// `--from` names no earlier stage; carries partial evidence only.
    UnresolvedStage,
    Image(ImageRef),
    /// ADD from a URL or git remote.
    Remote,
}

/// One source of a COPY/ADD instruction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildContextEntry {
    pub source_pattern: String,
    /// Absolute destination after WORKDIR resolution.
    pub dest_path: String,
    /// Raw `--from` value, if any.
    pub stage: Option<String>,
    pub source: ContextSource,
    /// Whether the destination is a directory (trailing slash, several sources).
    pub dest_is_dir: bool,
    pub instruction: usize,
    pub line: usize,
    /// Whether the owning stage ends up in the final image.
    pub in_final_image: bool,
}

/// The declared base of the final image.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum DeclaredBase {
    Scratch,
    Image(ImageRef),
}

/// Fully parsed build spec.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildSpec {
    pub instructions: Vec<Instruction>,
    pub stages: Vec<Stage>,
    pub context_entries: Vec<BuildContextEntry>,
    /// Metadata the final image should carry (final stage plus inherited stages).
    pub declared_metadata: ImageMetadata,
    pub declared_base: DeclaredBase,
    pub declared_platform: Option<Platform>,
    /// Stage indices contributing to the final image, root first.
    pub final_chain: Vec<usize>,
    #[serde(skip)]
    pub warnings: Vec<IncompleteEvidence>,
}

impl BuildSpec {
    pub fn final_stage(&self) -> Option<&Stage> {
        self.stages.last()
    }

    pub fn in_final_chain(&self, instruction: &Instruction) -> bool {
        self.final_chain.contains(&instruction.stage)
    }

    /// Layer-producing instructions that end up in the final image, in order.
    pub fn layer_instructions(&self) -> Vec<&Instruction> {
        self.instructions
            .iter()
            .filter(|i| i.kind.produces_layer() && self.in_final_chain(i))
            .collect()
    }

    pub fn stage_by_name(&self, name: &str) -> Option<&Stage> {
        self.stages
            .iter()
            .find(|s| s.name.as_deref().is_some_and(|n| n.eq_ignore_ascii_case(name)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_keyword_lookup_is_case_insensitive() {
        assert_eq!(InstructionKind::from_keyword("run"), Some(InstructionKind::Run));
        assert_eq!(
            InstructionKind::from_keyword("HealthCheck"),
            Some(InstructionKind::Healthcheck)
        );
        assert_eq!(InstructionKind::from_keyword("FROBNICATE"), None);
        assert_eq!(InstructionKind::from_keyword("OTHER"), None);
    }

    #[test]
    fn test_history_keyword_requires_uppercase() {
        assert_eq!(
            InstructionKind::from_history_keyword("COPY"),
            Some(InstructionKind::Copy)
        );
        assert_eq!(InstructionKind::from_history_keyword("env"), None);
    }

    #[test]
    fn test_layer_producing_kinds() {
        for kind in InstructionKind::KNOWN {
            let expected = matches!(
                kind,
                InstructionKind::Run | InstructionKind::Copy | InstructionKind::Add
            );
            assert_eq!(kind.produces_layer(), expected, "{kind}");
        }
        assert!(!InstructionKind::Other.produces_layer());
    }

    #[test]
    fn test_kind_serializes_uppercase() {
        let json = serde_json::to_string(&InstructionKind::Workdir).expect("serialize");
        assert_eq!(json, r#""WORKDIR""#);
    }
}
