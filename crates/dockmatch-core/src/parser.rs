//! Dockerfile parser.
//!
//! Turns build-spec text into a [`BuildSpec`]: typed instructions in file
//! order, stages, COPY/ADD build-context entries and the metadata the final
//! image is expected to carry.

use std::collections::BTreeMap;
use std::sync::LazyLock;

use regex::Regex;
use tracing::debug;

use crate::config::ParserConfig;
use crate::domain::error::{IncompleteEvidence, ParseError};
use crate::domain::image::{ImageMetadata, Platform, Port};
use crate::domain::instruction::{
    BuildContextEntry, BuildSpec, ContextSource, DeclaredBase, Instruction, InstructionKind, Stage,
    StageBase,
};
use crate::normalize::path::{normalize_path, resolve_against};
use crate::normalize::shell::split_words;
use crate::normalize::{normalize_args, normalize_image_ref};
use crate::obs;

static DIRECTIVE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^#\s*([A-Za-z][A-Za-z0-9_-]*)\s*=\s*(\S+)\s*$").expect("directive regex is valid")
});

static HEREDOC: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"<<(-?)\s*["']?([A-Za-z_][A-Za-z0-9_]*)["']?"#).expect("heredoc regex is valid")
});

/// Upper bound on ports produced by one `EXPOSE a-b` range.
const MAX_PORT_RANGE: u32 = 1024;

/// Parser behaviour and externally supplied build arguments.
#[derive(Debug, Clone, Default)]
pub struct ParseOptions {
    pub strict: bool,
    pub build_args: BTreeMap<String, String>,
}

impl ParseOptions {
    pub fn from_config(config: &ParserConfig) -> Self {
        Self {
            strict: config.strict,
            build_args: BTreeMap::new(),
        }
    }

    pub fn with_build_args(mut self, args: BTreeMap<String, String>) -> Self {
        self.build_args = args;
        self
    }
}

/// Parse with default options.
pub fn parse(text: &str) -> Result<BuildSpec, ParseError> {
    parse_with(text, &ParseOptions::default())
}

/// Ordered instruction sequence only.
pub fn parse_instructions(text: &str) -> Result<Vec<Instruction>, ParseError> {
    parse(text).map(|spec| spec.instructions)
}

pub fn parse_with(text: &str, options: &ParseOptions) -> Result<BuildSpec, ParseError> {
    let lines = logical_lines(text);
    if lines.is_empty() {
        return Err(ParseError::new(0, "empty build spec"));
    }

    let mut parser = Parser::new(options);
    for line in &lines {
        parser.line(line)?;
    }
    let spec = parser.finish()?;

    debug!(
        instructions = spec.instructions.len(),
        stages = spec.stages.len(),
        context_entries = spec.context_entries.len(),
        warnings = spec.warnings.len(),
        "parsed build spec"
    );
    for warning in &spec.warnings {
        obs::emit_parse_warning(warning);
    }
    Ok(spec)
}

// ── Logical lines ───────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
struct LogicalLine {
    /// 1-based line the instruction starts on.
    line: usize,
    text: String,
}

fn logical_lines(text: &str) -> Vec<LogicalLine> {
    let raw: Vec<&str> = text.lines().collect();
    let mut escape = '\\';
    let mut i = 0;

    // Parser directives are only honoured before anything else.
    while let Some(caps) = raw.get(i).and_then(|l| DIRECTIVE.captures(l.trim())) {
        if caps[1].eq_ignore_ascii_case("escape") && &caps[2] == "`" {
            escape = '`';
        }
        i += 1;
    }

    let mut out = Vec::new();
    let mut current = String::new();
    let mut start = 0;

    while i < raw.len() {
        let trimmed = raw[i].trim();
        i += 1;
        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }
        if current.is_empty() {
            start = i;
        }
        if let Some(body) = trimmed.strip_suffix(escape) {
            current.push_str(body.trim_end());
            current.push(' ');
            continue;
        }
        current.push_str(trimmed);

        let mut text = std::mem::take(&mut current);
        let is_run = text
            .split_whitespace()
            .next()
            .is_some_and(|k| k.eq_ignore_ascii_case("RUN"));
        if is_run {
            if let Some(caps) = HEREDOC.captures(&text) {
                let strip_tabs = &caps[1] == "-";
                let delimiter = caps[2].to_string();
                let marker = caps[0].to_string();
                let mut body = Vec::new();
                while i < raw.len() {
                    let line = raw[i];
                    i += 1;
                    let candidate = if strip_tabs { line.trim_start_matches('\t') } else { line };
                    if candidate.trim_end() == delimiter {
                        break;
                    }
                    body.push(candidate.to_string());
                }
                text = text.replacen(&marker, &body.join("\n"), 1);
            }
        }
        out.push(LogicalLine {
            line: start,
            text: text.trim().to_string(),
        });
    }

    if !current.trim().is_empty() {
        out.push(LogicalLine {
            line: start,
            text: current.trim().to_string(),
        });
    }
    out
}

fn split_keyword(text: &str) -> (&str, &str) {
    match text.find(char::is_whitespace) {
        Some(idx) => (&text[..idx], text[idx..].trim()),
        None => (text, ""),
    }
}

// ── Variable expansion ──────────────────────────────────────────────────

/// Expand `$V`, `${V}`, `${V:-d}`, `${V:+a}`, `${V-d}` and `${V+a}`.
///
/// Unset variables expand to nothing. Text in single quotes and `\$` are
/// left alone.
pub fn expand_vars(text: &str, vars: &BTreeMap<String, String>) -> String {
    let chars: Vec<char> = text.chars().collect();
    let mut out = String::with_capacity(text.len());
    let mut in_single = false;
    let mut in_double = false;
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        match c {
            '\'' if !in_double => {
                in_single = !in_single;
                out.push(c);
                i += 1;
            }
            '"' if !in_single => {
                in_double = !in_double;
                out.push(c);
                i += 1;
            }
            '\\' if chars.get(i + 1) == Some(&'$') => {
                out.push('$');
                i += 2;
            }
            '$' if !in_single => {
                if chars.get(i + 1) == Some(&'{') {
                    match chars[i + 2..].iter().position(|&c| c == '}') {
                        Some(offset) => {
                            let inner: String = chars[i + 2..i + 2 + offset].iter().collect();
                            out.push_str(&expand_braced(&inner, vars));
                            i += 3 + offset;
                        }
                        None => {
                            out.push(c);
                            i += 1;
                        }
                    }
                } else {
                    let len = chars[i + 1..].iter().take_while(|c| c.is_ascii_alphanumeric() || **c == '_').count();
                    if len == 0 {
                        out.push(c);
                        i += 1;
                    } else {
                        let name: String = chars[i + 1..i + 1 + len].iter().collect();
                        if let Some(value) = vars.get(&name) {
                            out.push_str(value);
                        }
                        i += 1 + len;
                    }
                }
            }
            _ => {
                out.push(c);
                i += 1;
            }
        }
    }
    out
}

fn expand_braced(inner: &str, vars: &BTreeMap<String, String>) -> String {
    let name_end = inner
        .find(|c: char| !(c.is_ascii_alphanumeric() || c == '_'))
        .unwrap_or(inner.len());
    let (name, modifier) = inner.split_at(name_end);
    let set = vars.get(name);
    let non_empty = set.filter(|v| !v.is_empty());

    if modifier.is_empty() {
        set.cloned().unwrap_or_default()
    } else if let Some(default) = modifier.strip_prefix(":-") {
        non_empty.cloned().unwrap_or_else(|| default.to_string())
    } else if let Some(alt) = modifier.strip_prefix(":+") {
        non_empty.map(|_| alt.to_string()).unwrap_or_default()
    } else if let Some(default) = modifier.strip_prefix('-') {
        set.cloned().unwrap_or_else(|| default.to_string())
    } else if let Some(alt) = modifier.strip_prefix('+') {
        set.map(|_| alt.to_string()).unwrap_or_default()
    } else {
        String::new()
    }
}

// ── Parser ──────────────────────────────────────────────────────────────

/// Per-stage state carried across instructions.
#[derive(Debug, Clone)]
struct StageState {
    vars: BTreeMap<String, String>,
    workdir: String,
    metadata: ImageMetadata,
}

impl Default for StageState {
    fn default() -> Self {
        Self {
            vars: BTreeMap::new(),
            workdir: "/".to_string(),
            metadata: ImageMetadata::default(),
        }
    }
}

struct Parser<'a> {
    options: &'a ParseOptions,
    global_args: BTreeMap<String, String>,
    instructions: Vec<Instruction>,
    stages: Vec<Stage>,
    states: Vec<StageState>,
    context_entries: Vec<BuildContextEntry>,
    warnings: Vec<IncompleteEvidence>,
}

/// Exec-form JSON array, else shell words.
fn arg_words(text: &str) -> Vec<String> {
    let t = text.trim();
    if t.starts_with('[') {
        if let Ok(words) = serde_json::from_str::<Vec<String>>(t) {
            return words;
        }
    }
    split_words(t)
}

fn is_remote(source: &str) -> bool {
    source.contains("://") || source.starts_with("git@")
}

fn parse_pairs(
    keyword: &str,
    text: &str,
    line: usize,
) -> Result<Vec<(String, String)>, ParseError> {
    let words = split_words(text);
    let Some(first) = words.first() else {
        return Err(ParseError::new(line, format!("{keyword} requires at least one key")));
    };

    if first.contains('=') {
        words
            .iter()
            .map(|w| match w.split_once('=') {
                Some((k, v)) if !k.is_empty() => Ok((k.to_string(), v.to_string())),
                _ => Err(ParseError::new(line, format!("malformed {keyword} pair '{w}'"))),
            })
            .collect()
    } else if words.len() < 2 {
        Err(ParseError::new(line, format!("{keyword} {first} requires a value")))
    } else {
        Ok(vec![(first.clone(), words[1..].join(" "))])
    }
}

/// Ports of an `EXPOSE` line. A range wider than [`MAX_PORT_RANGE`] is valid
/// but skipped with a warning.
fn parse_ports(
    text: &str,
    line: usize,
    warnings: &mut Vec<IncompleteEvidence>,
) -> Result<Vec<Port>, ParseError> {
    let invalid = |w: &str| ParseError::new(line, format!("invalid EXPOSE port '{w}'"));
    let mut ports = Vec::new();
    for word in split_words(text) {
        let (numbers, proto) = match word.split_once('/') {
            Some((n, p)) => (n, Some(p)),
            None => (word.as_str(), None),
        };
        let with_proto = |n: &str| match proto {
            Some(p) => format!("{n}/{p}"),
            None => n.to_string(),
        };
        match numbers.split_once('-') {
            Some((lo, hi)) => {
                let lo: u16 = lo.parse().map_err(|_| invalid(&word))?;
                let hi: u16 = hi.parse().map_err(|_| invalid(&word))?;
                if hi < lo {
                    return Err(invalid(&word));
                }
                if u32::from(hi - lo) >= MAX_PORT_RANGE {
                    warnings.push(IncompleteEvidence::PortRangeTooWide {
                        line,
                        range: word.clone(),
                        limit: MAX_PORT_RANGE,
                    });
                    continue;
                }
                for n in lo..=hi {
                    ports.push(with_proto(&n.to_string()).parse().map_err(|_| invalid(&word))?);
                }
            }
            None => ports.push(with_proto(numbers).parse().map_err(|_| invalid(&word))?),
        }
    }
    Ok(ports)
}

impl<'a> Parser<'a> {
    fn new(options: &'a ParseOptions) -> Self {
        Self {
            options,
            global_args: BTreeMap::new(),
            instructions: Vec::new(),
            stages: Vec::new(),
            states: Vec::new(),
            context_entries: Vec::new(),
            warnings: Vec::new(),
        }
    }

    fn line(&mut self, line: &LogicalLine) -> Result<(), ParseError> {
        let (keyword_raw, args) = split_keyword(&line.text);
        let keyword = keyword_raw.to_ascii_uppercase();
        let kind = InstructionKind::from_keyword(&keyword);

        if self.stages.is_empty() {
            match kind {
                Some(InstructionKind::Arg) => return self.global_arg(args, line.line),
                Some(InstructionKind::From) => {}
                _ => {
                    return Err(ParseError::new(
                        line.line,
                        format!("{keyword} before the first FROM"),
                    ))
                }
            }
        }

        match kind {
            Some(InstructionKind::From) => self.from(args, line.line),
            Some(kind) => self.instruction(kind, &keyword, args, line.line),
            None => {
                if self.options.strict {
                    self.warnings.push(IncompleteEvidence::UnknownInstruction {
                        line: line.line,
                        keyword: keyword.clone(),
                    });
                }
                let raw_args = split_words(args);
                self.push(InstructionKind::Other, keyword, raw_args.clone(), raw_args, line.line);
                Ok(())
            }
        }
    }

    fn current(&self) -> usize {
        self.stages.len() - 1
    }

    fn state(&mut self) -> &mut StageState {
        let idx = self.current();
        &mut self.states[idx]
    }

    fn push(
        &mut self,
        kind: InstructionKind,
        keyword: String,
        raw_args: Vec<String>,
        normalized_args: Vec<String>,
        line: usize,
    ) -> usize {
        let stage = self.current();
        self.instructions.push(Instruction {
            kind,
            keyword,
            raw_args,
            normalized_args,
            source_line: line,
            stage,
        });
        self.instructions.len() - 1
    }

    /// Declared name and the value it takes: build arg, else default, else
    /// the global value.
    fn arg_value(&self, word: &str, vars: &BTreeMap<String, String>) -> (String, Option<String>) {
        let (name, default) = match word.split_once('=') {
            Some((n, d)) => (n.to_string(), Some(expand_vars(d, vars))),
            None => (word.to_string(), None),
        };
        let value = self
            .options
            .build_args
            .get(&name)
            .cloned()
            .or(default)
            .or_else(|| self.global_args.get(&name).cloned());
        (name, value)
    }

    fn global_arg(&mut self, args: &str, line: usize) -> Result<(), ParseError> {
        let words = split_words(args);
        if words.is_empty() {
            return Err(ParseError::new(line, "ARG requires a name"));
        }
        for word in &words {
            let (name, value) = self.arg_value(word, &self.global_args.clone());
            if let Some(value) = value {
                self.global_args.insert(name, value);
            }
        }
        Ok(())
    }

    fn from(&mut self, args: &str, line: usize) -> Result<(), ParseError> {
        let expanded = expand_vars(args, &self.global_args);
        let mut platform = None;
        let mut words = Vec::new();
        for word in split_words(&expanded) {
            if let Some(value) = word.strip_prefix("--platform=") {
                // Unresolvable values such as $TARGETPLATFORM are dropped.
                platform = value.parse::<Platform>().ok();
            } else if !word.starts_with("--") {
                words.push(word);
            }
        }

        let (image, name) = match words.as_slice() {
            [] => return Err(ParseError::new(line, "FROM requires an image")),
            [image] => (image.clone(), None),
            [image, as_kw, name] if as_kw.eq_ignore_ascii_case("as") => {
                (image.clone(), Some(name.to_ascii_lowercase()))
            }
            _ => {
                return Err(ParseError::new(
                    line,
                    "malformed FROM, expected `FROM [--platform=P] image [AS name]`",
                ))
            }
        };

        if let Some(name) = &name {
            if self.stages.iter().any(|s| s.name.as_deref() == Some(name.as_str())) {
                return Err(ParseError::new(line, format!("duplicate stage name '{name}'")));
            }
        }

        let earlier = self
            .stages
            .iter()
            .find(|s| s.name.as_deref().is_some_and(|n| n.eq_ignore_ascii_case(&image)));
        let base = if let Some(stage) = earlier {
            StageBase::Stage(stage.index)
        } else if image.eq_ignore_ascii_case("scratch") {
            StageBase::Scratch
        } else {
            let reference =
                normalize_image_ref(&image).map_err(|e| ParseError::new(line, e.to_string()))?;
            StageBase::Image(reference)
        };

        let state = match &base {
            StageBase::Stage(parent) => self.states[*parent].clone(),
            _ => StageState::default(),
        };
        let normalized = match &base {
            StageBase::Scratch => "scratch".to_string(),
            StageBase::Image(r) => r.to_string(),
            StageBase::Stage(i) => self.stages[*i]
                .name
                .clone()
                .unwrap_or_else(|| i.to_string()),
        };

        let index = self.stages.len();
        self.stages.push(Stage {
            index,
            name,
            base,
            platform,
            start: self.instructions.len(),
            end: self.instructions.len(),
            line,
        });
        self.states.push(state);
        self.push(InstructionKind::From, "FROM".to_string(), words, vec![normalized], line);
        Ok(())
    }

    fn instruction(
        &mut self,
        kind: InstructionKind,
        keyword: &str,
        args: &str,
        line: usize,
    ) -> Result<(), ParseError> {
        use InstructionKind as K;

        // The shell sees these unexpanded, and so does the image history.
        if matches!(kind, K::Run | K::Cmd | K::Entrypoint | K::Healthcheck | K::Shell | K::Onbuild) {
            if args.is_empty() && kind == K::Run {
                return Err(ParseError::new(line, "RUN requires a command"));
            }
            let raw = arg_words(args);
            self.push(kind, keyword.to_string(), raw, normalize_args(kind, args), line);
            return Ok(());
        }

        let vars = self.state().vars.clone();
        let expanded = expand_vars(args, &vars);
        let raw = arg_words(&expanded);
        let normalized = normalize_args(kind, &expanded);

        match kind {
            K::Arg => {
                if raw.is_empty() {
                    return Err(ParseError::new(line, "ARG requires a name"));
                }
                for word in split_words(args) {
                    let (name, value) = self.arg_value(&word, &vars);
                    if let Some(value) = value {
                        self.state().vars.insert(name, value);
                    }
                }
            }
            K::Env => {
                for (key, value) in parse_pairs(keyword, &expanded, line)? {
                    let state = self.state();
                    state.vars.insert(key.clone(), value.clone());
                    state.metadata.env.insert(key, value);
                }
            }
            K::Label => {
                for (key, value) in parse_pairs(keyword, &expanded, line)? {
                    self.state().metadata.labels.insert(key, value);
                }
            }
            K::Expose => {
                let ports = parse_ports(&expanded, line, &mut self.warnings)?;
                self.state().metadata.ports.extend(ports);
            }
            K::Volume => {
                if normalized.is_empty() {
                    return Err(ParseError::new(line, "VOLUME requires a path"));
                }
                self.state().metadata.volumes.extend(normalized.iter().cloned());
            }
            K::Workdir => {
                if raw.is_empty() {
                    return Err(ParseError::new(line, "WORKDIR requires a path"));
                }
                let state = self.state();
                let path = resolve_against(&state.workdir, &raw.join(" ")).into_string();
                state.workdir = path.clone();
                state.metadata.workdir = Some(path);
            }
            K::Copy | K::Add => {
                let index = self.instructions.len();
                self.context_entries_for(kind, keyword, &raw, index, line)?;
            }
            _ => {}
        }

        self.push(kind, keyword.to_string(), raw, normalized, line);
        Ok(())
    }

    fn resolve_from(&mut self, name: &str, line: usize) -> ContextSource {
        let current = self.current();
        if let Ok(idx) = name.parse::<usize>() {
            if idx < current {
                return ContextSource::Stage(idx);
            }
        }
        let earlier = self.stages[..current]
            .iter()
            .find(|s| s.name.as_deref().is_some_and(|n| n.eq_ignore_ascii_case(name)));
        if let Some(stage) = earlier {
            return ContextSource::Stage(stage.index);
        }
        if name.contains(':') || name.contains('/') {
            if let Ok(reference) = normalize_image_ref(name) {
                return ContextSource::Image(reference);
            }
        }
        self.warnings.push(IncompleteEvidence::UnresolvedStage {
            line,
            stage: name.to_string(),
        });
        ContextSource::UnresolvedStage
    }

    fn context_entries_for(
        &mut self,
        kind: InstructionKind,
        keyword: &str,
        words: &[String],
        instruction: usize,
        line: usize,
    ) -> Result<(), ParseError> {
        let mut from = None;
        let mut operands = Vec::new();
        for word in words {
            match word.strip_prefix("--") {
                Some(flag) => {
                    if let Some(value) = flag.strip_prefix("from=") {
                        from = Some(value.to_string());
                    }
                }
                None => operands.push(word.as_str()),
            }
        }

        let Some((dest_raw, sources)) = operands.split_last() else {
            return Err(ParseError::new(line, format!("{keyword} requires a source and a destination")));
        };
        if sources.is_empty() {
            return Err(ParseError::new(line, format!("{keyword} requires a source and a destination")));
        }

        let dest_is_dir = dest_raw.ends_with('/') || sources.len() > 1;
        let workdir = self.state().workdir.clone();
        let dest_path = resolve_against(&workdir, dest_raw).into_string();
        let origin = match &from {
            Some(name) => self.resolve_from(name, line),
            None => ContextSource::BuildContext,
        };

        for source in sources {
            let (source_pattern, source_kind) = if from.is_none() && is_remote(source) {
                if kind == InstructionKind::Copy {
                    return Err(ParseError::new(line, "COPY does not accept remote sources"));
                }
                (source.to_string(), ContextSource::Remote)
            } else {
                (normalize_path(source).into_string(), origin.clone())
            };
            self.context_entries.push(BuildContextEntry {
                source_pattern,
                dest_path: dest_path.clone(),
                stage: from.clone(),
                source: source_kind,
                dest_is_dir,
                instruction,
                line,
                in_final_image: false,
            });
        }
        Ok(())
    }

    fn finish(mut self) -> Result<BuildSpec, ParseError> {
        let Some(last) = self.stages.len().checked_sub(1) else {
            return Err(ParseError::new(0, "no FROM instruction"));
        };

        let starts: Vec<usize> = self.stages.iter().map(|s| s.start).collect();
        for (i, stage) in self.stages.iter_mut().enumerate() {
            stage.end = starts.get(i + 1).copied().unwrap_or(self.instructions.len());
        }

        let mut final_chain = vec![last];
        let mut cursor = last;
        while let StageBase::Stage(parent) = self.stages[cursor].base {
            final_chain.push(parent);
            cursor = parent;
        }
        final_chain.reverse();

        let root = &self.stages[final_chain[0]];
        let declared_base = match &root.base {
            StageBase::Image(reference) => DeclaredBase::Image(reference.clone()),
            _ => DeclaredBase::Scratch,
        };
        let declared_platform = final_chain
            .iter()
            .rev()
            .find_map(|&i| self.stages[i].platform.clone());

        let mut declared_metadata = self.states[last].metadata.clone();
        declared_metadata.base_ref = match &declared_base {
            DeclaredBase::Image(reference) => Some(reference.to_string()),
            DeclaredBase::Scratch => None,
        };

        for entry in &mut self.context_entries {
            let stage = self.instructions[entry.instruction].stage;
            entry.in_final_image = final_chain.contains(&stage);
        }

        Ok(BuildSpec {
            instructions: self.instructions,
            stages: self.stages,
            context_entries: self.context_entries,
            declared_metadata,
            declared_base,
            declared_platform,
            final_chain,
            warnings: self.warnings,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::image::Protocol;

    const MULTI_STAGE: &str = r#"
# syntax=docker/dockerfile:1
ARG NODE_VERSION=18
FROM node:${NODE_VERSION} AS builder
WORKDIR /src
COPY package*.json ./
RUN npm ci
COPY . .
RUN npm run build

FROM --platform=linux/amd64 nginx:1.25-alpine
LABEL maintainer="ops@example.com" \
      version="2.1.0"
ENV APP_HOME=/usr/share/nginx/html
COPY --from=builder /src/dist ${APP_HOME}/
EXPOSE 80 443/tcp
CMD ["nginx", "-g", "daemon off;"]
"#;

    fn spec(text: &str) -> BuildSpec {
        parse(text).expect("parse")
    }

    #[test]
    fn test_simple_spec() {
        let spec = spec("FROM node:18\nRUN npm install\nCOPY . /app\n");
        let kinds: Vec<InstructionKind> = spec.instructions.iter().map(|i| i.kind).collect();
        assert_eq!(
            kinds,
            vec![InstructionKind::From, InstructionKind::Run, InstructionKind::Copy]
        );
        assert_eq!(spec.instructions[1].source_line, 2);
        assert_eq!(spec.instructions[1].normalized_args, vec!["npm", "install"]);
        assert_eq!(spec.final_chain, vec![0]);
        match &spec.declared_base {
            DeclaredBase::Image(r) => assert_eq!(r.to_string(), "docker.io/library/node:18"),
            other => panic!("unexpected base {other:?}"),
        }
        assert_eq!(spec.layer_instructions().len(), 2);
    }

    #[test]
    fn test_multi_stage() {
        let spec = spec(MULTI_STAGE);
        assert_eq!(spec.stages.len(), 2);
        assert_eq!(spec.stages[0].name.as_deref(), Some("builder"));
        match &spec.stages[0].base {
            StageBase::Image(r) => assert_eq!(r.tag, "18"),
            other => panic!("unexpected base {other:?}"),
        }
        assert_eq!(spec.final_chain, vec![1]);
        assert_eq!(spec.declared_platform, Some(Platform::new("linux", "amd64")));

        // Only the final stage's layer instructions are aligned.
        let layered: Vec<usize> = spec.layer_instructions().iter().map(|i| i.source_line).collect();
        assert_eq!(layered, vec![15]);

        let meta = &spec.declared_metadata;
        assert_eq!(meta.labels.get("version").map(String::as_str), Some("2.1.0"));
        assert_eq!(meta.env.get("APP_HOME").map(String::as_str), Some("/usr/share/nginx/html"));
        assert!(meta.ports.contains(&Port::tcp(80)));
        assert!(meta.ports.contains(&Port::tcp(443)));
        assert_eq!(meta.base_ref.as_deref(), Some("docker.io/library/nginx:1.25-alpine"));

        let copy_from = spec
            .context_entries
            .iter()
            .find(|e| e.stage.is_some())
            .expect("copy --from entry");
        assert_eq!(copy_from.source, ContextSource::Stage(0));
        assert_eq!(copy_from.dest_path, "/usr/share/nginx/html");
        assert!(copy_from.in_final_image);

        let builder_entries = spec.context_entries.iter().filter(|e| !e.in_final_image).count();
        assert_eq!(builder_entries, 2);
    }

    #[test]
    fn test_workdir_relative_destinations() {
        let spec = spec("FROM alpine\nWORKDIR /app\nWORKDIR src\nCOPY main.py ./\n");
        let entry = &spec.context_entries[0];
        assert_eq!(entry.dest_path, "/app/src");
        assert!(entry.dest_is_dir);
        assert_eq!(spec.declared_metadata.workdir.as_deref(), Some("/app/src"));
    }

    #[test]
    fn test_unresolved_stage_is_a_warning() {
        let spec = spec("FROM alpine\nCOPY --from=builder /bin/app /bin/app\n");
        assert_eq!(spec.context_entries[0].source, ContextSource::UnresolvedStage);
        assert_eq!(
            spec.warnings,
            vec![IncompleteEvidence::UnresolvedStage {
                line: 2,
                stage: "builder".to_string()
            }]
        );
    }

    #[test]
    fn test_copy_from_external_image() {
        let spec = spec("FROM alpine\nCOPY --from=nginx:latest /etc/nginx /etc/nginx\n");
        assert!(matches!(spec.context_entries[0].source, ContextSource::Image(_)));
        assert!(spec.warnings.is_empty());
    }

    #[test]
    fn test_stage_chain_inherits_metadata() {
        let spec = spec(
            "FROM python:3.12 AS base\nENV PYTHONUNBUFFERED=1\nWORKDIR /srv\n\
             FROM base AS final\nRUN pip install flask\n",
        );
        assert_eq!(spec.final_chain, vec![0, 1]);
        assert_eq!(spec.declared_metadata.env.get("PYTHONUNBUFFERED").map(String::as_str), Some("1"));
        assert_eq!(spec.declared_metadata.workdir.as_deref(), Some("/srv"));
        assert!(matches!(spec.declared_base, DeclaredBase::Image(_)));
        assert_eq!(spec.stages[1].base, StageBase::Stage(0));
    }

    #[test]
    fn test_build_args_override_defaults() {
        let options = ParseOptions::default()
            .with_build_args(BTreeMap::from([("TAG".to_string(), "3.19".to_string())]));
        let spec = parse_with("ARG TAG=3.18\nFROM alpine:$TAG\n", &options).expect("parse");
        match &spec.declared_base {
            DeclaredBase::Image(r) => assert_eq!(r.tag, "3.19"),
            other => panic!("unexpected base {other:?}"),
        }
    }

    #[test]
    fn test_run_is_not_expanded() {
        let spec = spec("FROM alpine\nARG PKG=curl\nRUN apk add $PKG\n");
        assert_eq!(spec.instructions[2].normalized_args, vec!["apk", "add", "$PKG"]);
    }

    #[test]
    fn test_line_continuation_and_comments() {
        let spec = spec(
            "FROM debian\nRUN apt-get update \\\n    # refresh first\n    && apt-get install -y b a\n",
        );
        let run = &spec.instructions[1];
        assert_eq!(run.source_line, 2);
        assert_eq!(
            run.normalized_args,
            vec!["apt-get", "update", "&&", "apt-get", "install", "-y", "a", "b"]
        );
    }

    #[test]
    fn test_escape_directive() {
        let spec = spec("# escape=`\nFROM mcr.microsoft.com/windows/servercore\nRUN echo a `\n  b\n");
        assert_eq!(spec.instructions[1].normalized_args, vec!["echo", "a", "b"]);
    }

    #[test]
    fn test_heredoc_run() {
        let spec = spec("FROM alpine\nRUN <<EOF\napk add git\nEOF\nCOPY . /app\n");
        assert_eq!(spec.instructions[1].normalized_args, vec!["apk", "add", "git"]);
        assert_eq!(spec.instructions[2].kind, InstructionKind::Copy);
    }

    #[test]
    fn test_unknown_instruction_kept_as_other() {
        let lenient = spec("FROM alpine\nFROBNICATE x\n");
        assert_eq!(lenient.instructions[1].kind, InstructionKind::Other);
        assert!(lenient.warnings.is_empty());

        let options = ParseOptions {
            strict: true,
            ..ParseOptions::default()
        };
        let strict = parse_with("FROM alpine\nFROBNICATE x\n", &options).expect("parse");
        assert_eq!(strict.instructions[1].keyword, "FROBNICATE");
        assert!(matches!(
            strict.warnings[0],
            IncompleteEvidence::UnknownInstruction { line: 2, .. }
        ));
    }

    #[test]
    fn test_expose_range_and_protocol() {
        let spec = spec("FROM alpine\nEXPOSE 8000-8002/udp 53\n");
        let ports = &spec.declared_metadata.ports;
        assert_eq!(ports.len(), 4);
        assert!(ports.iter().filter(|p| p.protocol == Protocol::Udp).count() == 3);
    }

    #[test]
    fn test_wide_expose_range_is_skipped_with_warning() {
        let spec = spec("FROM alpine\nEXPOSE 10000-20000/udp 8080\n");
        let ports = &spec.declared_metadata.ports;
        assert_eq!(ports.len(), 1);
        assert!(ports.contains(&Port::tcp(8080)));
        assert_eq!(
            spec.warnings,
            vec![IncompleteEvidence::PortRangeTooWide {
                line: 2,
                range: "10000-20000/udp".to_string(),
                limit: MAX_PORT_RANGE,
            }]
        );
        assert!(parse("FROM alpine\nEXPOSE 90-80\n").is_err());
    }

    #[test]
    fn test_bare_from_name_warning_mentions_external_image() {
        let spec = spec("FROM debian:12\nCOPY --from=alpine /etc/apk /etc/apk\n");
        assert_eq!(spec.warnings.len(), 1);
        assert!(spec.warnings[0].to_string().contains("or an external image"));
    }

    #[test]
    fn test_parse_errors() {
        let cases = [
            ("", 0, "empty"),
            ("# only a comment\n", 0, "empty"),
            ("ARG A=1\n", 0, "no FROM"),
            ("RUN echo hi\nFROM alpine\n", 1, "before the first FROM"),
            ("FROM\n", 1, "requires an image"),
            ("FROM alpine AS\n", 1, "malformed FROM"),
            ("FROM alpine AS a\nFROM alpine AS a\n", 2, "duplicate stage"),
            ("FROM alpine\nCOPY onlyone\n", 2, "source and a destination"),
            ("FROM alpine\nENV A=1 =2\n", 2, "malformed ENV"),
            ("FROM alpine\nENV LONELY\n", 2, "requires a value"),
            ("FROM alpine\nEXPOSE http\n", 2, "invalid EXPOSE"),
            ("FROM alpine\nCOPY https://x.io/a /a\n", 2, "remote"),
        ];
        for (text, line, needle) in cases {
            let err = parse(text).expect_err(text);
            assert_eq!(err.line, line, "{text:?}: {err}");
            assert!(err.reason.contains(needle), "{text:?}: {err}");
        }
    }

    #[test]
    fn test_expand_vars_forms() {
        let vars = BTreeMap::from([
            ("A".to_string(), "1".to_string()),
            ("EMPTY".to_string(), String::new()),
        ]);
        assert_eq!(expand_vars("$A-${A}", &vars), "1-1");
        assert_eq!(expand_vars("${MISSING:-d}/${EMPTY:-e}/${EMPTY-f}", &vars), "d/e/");
        assert_eq!(expand_vars("${A:+set}${MISSING:+no}", &vars), "set");
        assert_eq!(expand_vars(r"\$A '$A' $", &vars), "$A '$A' $");
    }
}
