//! Command canonicalization and similarity.
//!
//! Both sides of a comparison go through the same code: Dockerfile
//! instructions via [`normalize_args`], image history entries via
//! [`normalize_command`]. History entries come in several dialects:
//!
//! - classic: `/bin/sh -c apt-get update`, `/bin/sh -c #(nop)  ENV A=b`
//! - BuildKit: `RUN apt-get update # buildkit`, `|2 A=1 B=2 /bin/sh -c make`
//! - exec form: `["/bin/sh","-c","make"]`, `CMD ["node" "server.js"]`
//! - bare: `npm install`

use std::collections::BTreeSet;
use std::fmt;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::domain::InstructionKind;
use crate::normalize::package::canonicalize_installs;
use crate::normalize::path::normalize_path;
use crate::normalize::shell::{join_words, quote_word, split_first_word, split_words};

/// Stand-in for content-addressed COPY/ADD sources (`dir:<hash> in /app`).
pub const CONTENT_REF: &str = "<content>";

const MAX_UNWRAP: usize = 8;

static BUILDKIT_MARKER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\s*#\s*buildkit\s*$").expect("buildkit regex is valid"));

static SHELL_WRAPPER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)^(?:\S*/)?(?:sh|bash|ash|dash)\s+(?:-o\s+\S+\s+)*-[a-z]*c[a-z]*\s+(.*)$")
        .expect("shell wrapper regex is valid")
});

static ARG_COUNT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\|(\d+)$").expect("arg count regex is valid"));

static CONTENT_HASH: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(?:file|dir|multi):[0-9a-fA-F]+$").expect("content hash regex is valid")
});

/// A command in canonical token form.
///
/// `kind` is `None` for bare commands whose instruction is unknown.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NormalizedCommand {
    pub kind: Option<InstructionKind>,
    pub tokens: Vec<String>,
}

impl NormalizedCommand {
    pub fn is_empty(&self) -> bool {
        self.kind.is_none() && self.tokens.is_empty()
    }

    pub fn is_copy_like(&self) -> bool {
        matches!(self.kind, Some(InstructionKind::Copy | InstructionKind::Add))
    }

    /// `(sources, destination)` of a COPY/ADD.
    pub fn copy_parts(&self) -> Option<(&[String], &str)> {
        if !self.is_copy_like() {
            return None;
        }
        let (dest, sources) = self.tokens.split_last()?;
        Some((sources, dest.as_str()))
    }

    /// The `ADD file:<hash> in /` layer that unpacks a root filesystem.
    pub fn is_rootfs_add(&self) -> bool {
        self.kind == Some(InstructionKind::Add)
            && self.tokens.len() == 2
            && self.tokens[0] == CONTENT_REF
            && self.tokens[1] == "/"
    }

    /// Metadata-only history entries (`#(nop) ENV ...`) never carry content.
    pub fn is_metadata_only(&self) -> bool {
        self.kind.is_some_and(|k| !k.produces_layer())
    }
}

fn render_tokens(tokens: &[String]) -> String {
    let mut rendered = join_words(tokens);
    // A leading '[' would read back as an exec-form array.
    if rendered.starts_with('[') {
        let first = format!("'{}'", tokens[0].replace('\'', r"'\''"));
        let rest: Vec<String> = tokens[1..].iter().map(|t| quote_word(t)).collect();
        rendered = std::iter::once(first).chain(rest).collect::<Vec<_>>().join(" ");
    }
    rendered
}

impl fmt::Display for NormalizedCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.kind, self.tokens.is_empty()) {
            (Some(kind), true) => write!(f, "{kind}"),
            (Some(kind), false) => write!(f, "{kind} {}", render_tokens(&self.tokens)),
            (None, _) => f.write_str(&render_tokens(&self.tokens)),
        }
    }
}

fn prepare(raw: &str) -> String {
    let joined = raw.replace("\\\r\n", " ").replace("\\\n", " ");
    BUILDKIT_MARKER.replace(joined.trim(), "").trim().to_string()
}

fn first_word(text: &str) -> Option<&str> {
    text.split_whitespace().next()
}

fn after_first_word(text: &str) -> &str {
    let text = text.trim_start();
    match text.find(char::is_whitespace) {
        Some(idx) => text[idx..].trim(),
        None => "",
    }
}

/// Parse an exec-form array. Go-formatted arrays without commas, as classic
/// history prints them, are accepted when `lenient`.
fn exec_words(text: &str, lenient: bool) -> Option<Vec<String>> {
    let t = text.trim();
    if !(t.starts_with('[') && t.ends_with(']')) {
        return None;
    }
    if let Ok(words) = serde_json::from_str::<Vec<String>>(t) {
        return Some(words);
    }
    let inner = &t[1..t.len() - 1];
    (lenient && inner.contains('"') && !inner.contains(',')).then(|| split_words(inner))
}

/// Script of a `sh -c <script>` exec array.
fn unwrap_shell_words(words: &[String]) -> Option<String> {
    let program = words.first()?;
    let name = program.rsplit('/').next().unwrap_or(program);
    if !matches!(name, "sh" | "bash" | "ash" | "dash") {
        return None;
    }
    let mut i = 1;
    while words.get(i).is_some_and(|w| w == "-o") {
        i += 2;
    }
    let flag = words.get(i)?;
    let is_command_flag = flag.len() > 1
        && flag.starts_with('-')
        && !flag.starts_with("--")
        && flag[1..].chars().all(|c| c.is_ascii_lowercase())
        && flag.contains('c');
    if !is_command_flag {
        return None;
    }
    words.get(i + 1).cloned()
}

/// Script of a `sh -c <script>` command line.
fn unwrap_shell_text(text: &str) -> Option<String> {
    let caps = SHELL_WRAPPER.captures(text)?;
    let script = caps.get(1)?.as_str().trim();
    let quoted = script.starts_with('\'') || script.starts_with('"');
    if quoted {
        let words = split_words(script);
        if words.len() == 1 {
            return words.into_iter().next();
        }
    }
    Some(script.to_string())
}

/// A lone word that splits further is a quoted script.
fn lone_script(words: &[String]) -> Option<String> {
    match words {
        [word] if split_words(word) != words => Some(word.clone()),
        _ => None,
    }
}

/// Tokens of a RUN body: flags stripped, shell wrappers and exec arrays
/// collapsed, package installs canonicalized.
fn run_tokens(args: &str) -> Vec<String> {
    let mut text = args.trim().to_string();
    for _ in 0..MAX_UNWRAP {
        if let Some(words) = exec_words(&text, true) {
            if let Some(script) = unwrap_shell_words(&words).or_else(|| lone_script(&words)) {
                text = script;
                continue;
            }
            return canonicalize_installs(words);
        }
        // --mount, --network, --security
        if let Some((first, rest)) = split_first_word(&text) {
            if first.starts_with("--") {
                text = rest.trim().to_string();
                continue;
            }
        }
        if let Some(script) = unwrap_shell_text(&text) {
            text = script;
            continue;
        }
        let words = split_words(&text);
        if let Some(script) = lone_script(&words) {
            text = script;
            continue;
        }
        return canonicalize_installs(words);
    }
    canonicalize_installs(split_words(&text))
}

fn normalize_copy_path(word: &str) -> String {
    if word.contains("://") || word.starts_with("git@") || word == CONTENT_REF {
        word.to_string()
    } else {
        normalize_path(word).into_string()
    }
}

fn copy_tokens(args: &str) -> Vec<String> {
    let words = exec_words(args, false).unwrap_or_else(|| split_words(args));
    let words: Vec<String> = words.into_iter().filter(|w| !w.starts_with("--")).collect();

    let n = words.len();
    if n >= 3 && words[n - 2] == "in" && words[..n - 2].iter().all(|w| CONTENT_HASH.is_match(w)) {
        return vec![CONTENT_REF.to_string(), normalize_copy_path(&words[n - 1])];
    }
    words.iter().map(|w| normalize_copy_path(w)).collect()
}

/// Canonical argument tokens of an instruction of the given kind.
pub fn normalize_args(kind: InstructionKind, args: &str) -> Vec<String> {
    let args = args.trim();
    match kind {
        InstructionKind::Run => run_tokens(args),
        InstructionKind::Copy | InstructionKind::Add => copy_tokens(args),
        InstructionKind::Workdir => {
            let words = split_words(args);
            if words.is_empty() {
                Vec::new()
            } else {
                vec![normalize_path(&words.join(" ")).into_string()]
            }
        }
        InstructionKind::Volume => exec_words(args, true)
            .unwrap_or_else(|| split_words(args))
            .iter()
            .map(|w| normalize_path(w).into_string())
            .collect(),
        InstructionKind::Cmd | InstructionKind::Entrypoint | InstructionKind::Shell => {
            exec_words(args, true).unwrap_or_else(|| split_words(args))
        }
        _ => split_words(args),
    }
}

/// Canonicalize a recorded build command.
///
/// Idempotent: `normalize_command(&normalize_command(x).to_string())`
/// equals `normalize_command(x)`. Rendering re-quotes tokens, which can
/// surface a wrapper or marker the raw text hid, so the result is settled on
/// a fixed point of render-then-normalize.
pub fn normalize_command(raw: &str) -> NormalizedCommand {
    let mut command = normalize_once(raw);
    for _ in 0..MAX_UNWRAP {
        let again = normalize_once(&command.to_string());
        if again == command {
            break;
        }
        command = again;
    }
    command
}

fn normalize_once(raw: &str) -> NormalizedCommand {
    let mut text = prepare(raw);
    let mut shell_wrapped = false;

    for _ in 0..MAX_UNWRAP {
        if let Some(words) = exec_words(&text, false) {
            match unwrap_shell_words(&words) {
                Some(script) => {
                    text = script;
                    shell_wrapped = true;
                    continue;
                }
                None => {
                    return NormalizedCommand {
                        kind: shell_wrapped.then_some(InstructionKind::Run),
                        tokens: canonicalize_installs(words),
                    }
                }
            }
        }

        let Some(first) = first_word(&text) else {
            break;
        };

        if first == "#(nop)" {
            text = after_first_word(&text).to_string();
            continue;
        }

        if let Some(caps) = ARG_COUNT.captures(first) {
            let count: usize = caps[1].parse().unwrap_or(0);
            let words = split_words(&text);
            let skip = count.saturating_add(1).min(words.len());
            text = join_words(&words[skip..]);
            continue;
        }

        if let Some(kind) = InstructionKind::from_history_keyword(first) {
            return NormalizedCommand {
                kind: Some(kind),
                tokens: normalize_args(kind, after_first_word(&text)),
            };
        }

        if let Some(script) = unwrap_shell_text(&text) {
            text = script;
            shell_wrapped = true;
            continue;
        }
        break;
    }

    NormalizedCommand {
        kind: shell_wrapped.then_some(InstructionKind::Run),
        tokens: run_tokens(&text),
    }
}

// ── Similarity ──────────────────────────────────────────────────────────

/// Jaccard overlap of two token sets; two empty sets are identical.
pub fn token_jaccard(a: &[String], b: &[String]) -> f64 {
    let left: BTreeSet<&str> = a.iter().map(String::as_str).collect();
    let right: BTreeSet<&str> = b.iter().map(String::as_str).collect();
    if left.is_empty() && right.is_empty() {
        return 1.0;
    }
    let inter = left.intersection(&right).count();
    let union = left.union(&right).count();
    inter as f64 / union as f64
}

/// Token-level Levenshtein distance.
pub fn edit_distance(a: &[String], b: &[String]) -> usize {
    if a.is_empty() {
        return b.len();
    }
    let mut prev: Vec<usize> = (0..=b.len()).collect();
    let mut curr = vec![0; b.len() + 1];
    for (i, x) in a.iter().enumerate() {
        curr[0] = i + 1;
        for (j, y) in b.iter().enumerate() {
            let cost = usize::from(x != y);
            curr[j + 1] = (prev[j] + cost).min(prev[j + 1] + 1).min(curr[j] + 1);
        }
        std::mem::swap(&mut prev, &mut curr);
    }
    prev[b.len()]
}

/// `1 - distance / longer length`, in [0, 1].
pub fn edit_similarity(a: &[String], b: &[String]) -> f64 {
    let longest = a.len().max(b.len());
    if longest == 0 {
        return 1.0;
    }
    1.0 - edit_distance(a, b) as f64 / longest as f64
}

fn copy_similarity(a: (&[String], &str), b: (&[String], &str)) -> f64 {
    let (src_a, dest_a) = a;
    let (src_b, dest_b) = b;
    let content_ref = |s: &[String]| s.len() == 1 && s[0] == CONTENT_REF;
    let source = if content_ref(src_a) || content_ref(src_b) {
        1.0
    } else {
        token_jaccard(src_a, src_b)
    };

    let under = |child: &str, parent: &str| {
        child
            .strip_prefix(parent)
            .is_some_and(|rest| rest.starts_with('/') || parent == "/")
    };
    let dest = if dest_a == dest_b {
        1.0
    } else if under(dest_a, dest_b) || under(dest_b, dest_a) {
        0.5
    } else {
        0.0
    };
    0.4 * source + 0.6 * dest
}

/// Hybrid similarity of two canonical commands.
///
/// COPY/ADD pairs compare sources and destination separately; everything
/// else blends token Jaccard with token edit similarity.
pub fn command_similarity(
    a: &NormalizedCommand,
    b: &NormalizedCommand,
    token_weight: f64,
    edit_weight: f64,
) -> f64 {
    if let (Some(pa), Some(pb)) = (a.copy_parts(), b.copy_parts()) {
        return copy_similarity(pa, pb);
    }
    let score =
        token_weight * token_jaccard(&a.tokens, &b.tokens) + edit_weight * edit_similarity(&a.tokens, &b.tokens);
    score.clamp(0.0, 1.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tokens(cmd: &NormalizedCommand) -> Vec<&str> {
        cmd.tokens.iter().map(String::as_str).collect()
    }

    #[test]
    fn test_classic_shell_form() {
        let cmd = normalize_command("/bin/sh -c npm install");
        assert_eq!(cmd.kind, Some(InstructionKind::Run));
        assert_eq!(tokens(&cmd), vec!["npm", "install"]);
    }

    #[test]
    fn test_classic_nop_metadata() {
        let cmd = normalize_command(r#"/bin/sh -c #(nop)  CMD ["node" "server.js"]"#);
        assert_eq!(cmd.kind, Some(InstructionKind::Cmd));
        assert_eq!(tokens(&cmd), vec!["node", "server.js"]);
        assert!(cmd.is_metadata_only());

        let env = normalize_command("/bin/sh -c #(nop) ENV NODE_ENV=production");
        assert_eq!(env.kind, Some(InstructionKind::Env));
        assert_eq!(tokens(&env), vec!["NODE_ENV=production"]);
    }

    #[test]
    fn test_buildkit_forms() {
        let cmd = normalize_command("RUN /bin/sh -c npm ci # buildkit");
        assert_eq!(cmd.kind, Some(InstructionKind::Run));
        assert_eq!(tokens(&cmd), vec!["npm", "ci"]);

        let with_args = normalize_command("|2 VERSION=1.2 MODE=\"fast build\" /bin/sh -c make all");
        assert_eq!(with_args.kind, Some(InstructionKind::Run));
        assert_eq!(tokens(&with_args), vec!["make", "all"]);

        let copy = normalize_command("COPY --chown=node:node ./src/ /app/src/ # buildkit");
        assert_eq!(copy.kind, Some(InstructionKind::Copy));
        assert_eq!(tokens(&copy), vec!["src", "/app/src"]);
    }

    #[test]
    fn test_exec_and_shell_forms_are_equivalent() {
        let exec = normalize_command(r#"["/bin/sh", "-c", "apt-get install -y curl git"]"#);
        let shell = normalize_command("/bin/sh -c apt-get install -y git curl");
        assert_eq!(exec, shell);

        let bash = normalize_command("bash -exc 'pip install flask'");
        assert_eq!(tokens(&bash), vec!["pip", "install", "flask"]);
    }

    #[test]
    fn test_run_flags_stripped() {
        let from_instr = normalize_args(
            InstructionKind::Run,
            "--mount=type=cache,target=/root/.npm --network=none npm install",
        );
        assert_eq!(from_instr, vec!["npm", "install"]);
    }

    #[test]
    fn test_content_addressed_copy() {
        let cmd = normalize_command("/bin/sh -c #(nop) COPY dir:4f1c0a in /app/ ");
        assert_eq!(cmd.kind, Some(InstructionKind::Copy));
        assert_eq!(tokens(&cmd), vec![CONTENT_REF, "/app"]);

        let rootfs = normalize_command("/bin/sh -c #(nop) ADD file:b1a2c3 in / ");
        assert!(rootfs.is_rootfs_add());
    }

    #[test]
    fn test_line_continuations_and_whitespace() {
        let cmd = normalize_command("/bin/sh -c apt-get update \\\n    &&   apt-get install -y b a");
        assert_eq!(
            tokens(&cmd),
            vec!["apt-get", "update", "&&", "apt-get", "install", "-y", "a", "b"]
        );
    }

    #[test]
    fn test_bare_command_has_no_kind() {
        let cmd = normalize_command("npm install");
        assert_eq!(cmd.kind, None);
        assert_eq!(cmd.to_string(), "npm install");
    }

    #[test]
    fn test_lowercase_keyword_is_not_an_instruction() {
        let cmd = normalize_command("copy a b");
        assert_eq!(cmd.kind, None);
    }

    #[test]
    fn test_normalize_is_idempotent() {
        let samples = [
            "/bin/sh -c npm install",
            r#"/bin/sh -c #(nop)  CMD ["node" "server.js"]"#,
            "RUN echo 'hello world' # buildkit",
            "COPY . /app",
            "|1 A=b /bin/sh -c apk add --no-cache git bash",
            r#"["/bin/sh","-c","echo \"quoted\" it's"]"#,
            "/bin/sh -c #(nop) WORKDIR /srv/my app",
            "ADD file:abc in /",
            "[]",
            "a'\"",
            r"a\ b",
            "'--x' a",
            r"-\-x y",
            r#"["a b"]"#,
            "'sh' -c x",
            "'",
        ];
        for raw in samples {
            let once = normalize_command(raw);
            let twice = normalize_command(&once.to_string());
            assert_eq!(once, twice, "{raw} -> {once}");
        }
    }

    #[test]
    fn test_lone_escaped_word_is_a_script() {
        assert_eq!(tokens(&normalize_command("a'\"")), vec!["a"]);
        assert_eq!(tokens(&normalize_command(r"a\ b")), vec!["a", "b"]);
        assert_eq!(tokens(&normalize_command(r#"RUN "apt-get update""#)), vec!["apt-get", "update"]);
        assert_eq!(
            normalize_args(InstructionKind::Run, r#"["echo hi"]"#),
            tokens(&normalize_command(r#"RUN ["echo hi"] # buildkit"#))
        );
        assert_eq!(
            normalize_args(InstructionKind::Run, r#"--mount="type=cache,target=/a b" make"#),
            vec!["make"]
        );
    }

    #[test]
    fn test_similarity_metrics() {
        let a: Vec<String> = vec!["npm".into(), "install".into()];
        let b: Vec<String> = vec!["npm".into(), "ci".into()];
        assert_eq!(token_jaccard(&a, &a), 1.0);
        assert!((token_jaccard(&a, &b) - 1.0 / 3.0).abs() < 1e-12);
        assert_eq!(edit_distance(&a, &b), 1);
        assert_eq!(edit_similarity(&a, &b), 0.5);
        assert_eq!(edit_similarity(&[], &[]), 1.0);
    }

    #[test]
    fn test_command_similarity_hybrid() {
        let a = normalize_command("npm install");
        let b = normalize_command("/bin/sh -c npm install");
        assert_eq!(command_similarity(&a, &b, 0.85, 0.15), 1.0);

        let c = normalize_command("pip install flask");
        assert!(command_similarity(&a, &c, 0.85, 0.15) < 0.4);
    }

    #[test]
    fn test_copy_similarity_focuses_on_destination() {
        let instr = NormalizedCommand {
            kind: Some(InstructionKind::Copy),
            tokens: normalize_args(InstructionKind::Copy, ". /app"),
        };
        let classic = normalize_command("/bin/sh -c #(nop) COPY dir:ab12 in /app ");
        assert_eq!(command_similarity(&instr, &classic, 0.85, 0.15), 1.0);

        let elsewhere = normalize_command("COPY . /srv");
        assert!((command_similarity(&instr, &elsewhere, 0.85, 0.15) - 0.4).abs() < 1e-12);
    }
}
