//! Path canonicalization.

use std::fmt;

use serde::{Deserialize, Serialize};

/// A canonical path: literal, or a glob pattern (a distinct class).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(tag = "class", content = "path", rename_all = "snake_case")]
pub enum NormalizedPath {
    Literal(String),
    Pattern(String),
}

impl NormalizedPath {
    pub fn as_str(&self) -> &str {
        match self {
            Self::Literal(p) | Self::Pattern(p) => p,
        }
    }

    pub fn is_pattern(&self) -> bool {
        matches!(self, Self::Pattern(_))
    }

    pub fn into_string(self) -> String {
        match self {
            Self::Literal(p) | Self::Pattern(p) => p,
        }
    }
}

impl fmt::Display for NormalizedPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Whether a path contains glob metacharacters.
pub fn is_glob(path: &str) -> bool {
    path.contains(['*', '?', '['])
}

/// Resolve `.` and `..`, collapse separators, strip trailing slashes.
///
/// Backslashes are treated as separators and each segment is trimmed of
/// surrounding whitespace. An absolute path never climbs
/// above `/`; a relative one keeps its leading `..` segments. The empty
/// path becomes `.`.
pub fn normalize_path(raw: &str) -> NormalizedPath {
    let unified = raw.trim().replace('\\', "/");
    let absolute = unified.starts_with('/');

    let mut segments: Vec<&str> = Vec::new();
    for segment in unified.split('/') {
        match segment.trim() {
            "" | "." => {}
            ".." => match segments.last() {
                Some(&last) if last != ".." => {
                    segments.pop();
                }
                _ if absolute => {}
                _ => segments.push(".."),
            },
            other => segments.push(other),
        }
    }

    let joined = segments.join("/");
    let path = match (absolute, joined.is_empty()) {
        (true, _) => format!("/{joined}"),
        (false, true) => ".".to_string(),
        (false, false) => joined,
    };

    if is_glob(&path) {
        NormalizedPath::Pattern(path)
    } else {
        NormalizedPath::Literal(path)
    }
}

/// Join `relative` onto `base` (absolute), then normalize.
pub fn resolve_against(base: &str, relative: &str) -> NormalizedPath {
    if relative.trim_start().starts_with('/') {
        normalize_path(relative)
    } else {
        normalize_path(&format!("{}/{}", base.trim_end_matches('/'), relative))
    }
}

/// Last path segment.
pub fn file_name(path: &str) -> &str {
    path.trim_end_matches('/')
        .rsplit('/')
        .next()
        .unwrap_or(path)
}

/// Extension of the last segment, without the dot. Dotfiles have none.
pub fn extension(path: &str) -> Option<&str> {
    let name = file_name(path);
    match name.rfind('.') {
        Some(0) | None => None,
        Some(idx) if idx + 1 < name.len() => Some(&name[idx + 1..]),
        _ => None,
    }
}

/// Parent directory of a normalized absolute path.
pub fn parent(path: &str) -> &str {
    match path.trim_end_matches('/').rfind('/') {
        Some(0) => "/",
        Some(idx) => &path[..idx],
        None => ".",
    }
}
