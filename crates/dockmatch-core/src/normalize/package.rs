//! Package-manager install detection.
//!
//! Tooling frequently reorders the operands of `apt-get install`, `apk add`
//! and friends. Canonicalization keeps every flag where it was (a value-taking
//! flag keeps its value next to it) and sorts the package operands.

use std::fmt;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

static PIP_SPEC: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^([^=<>!~\[]+)(\[[^\]]*\])?(==|>=|<=|!=|~=|>|<)(.+)$")
        .expect("pip spec regex is valid")
});

static RPM_SPEC: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(.+?)-(\d+(?:\.\d+)+[\w.+~:-]*)$").expect("rpm spec regex is valid")
});

/// Separator between chained commands.
pub const AND_THEN: &str = "&&";

const SHELL_OPERATORS: [&str; 7] = [";", "|", "||", ">", ">>", "<", "&"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PackageManager {
    Apt,
    Apk,
    Yum,
    Dnf,
    Pip,
    Npm,
    Yarn,
    Gem,
}

impl PackageManager {
    pub fn from_program(program: &str) -> Option<Self> {
        let name = program.rsplit('/').next().unwrap_or(program);
        match name {
            "apt-get" | "apt" => Some(Self::Apt),
            "apk" => Some(Self::Apk),
            "yum" => Some(Self::Yum),
            "dnf" | "microdnf" => Some(Self::Dnf),
            "pip" | "pip3" => Some(Self::Pip),
            "npm" => Some(Self::Npm),
            "yarn" => Some(Self::Yarn),
            "gem" => Some(Self::Gem),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Apt => "apt",
            Self::Apk => "apk",
            Self::Yum => "yum",
            Self::Dnf => "dnf",
            Self::Pip => "pip",
            Self::Npm => "npm",
            Self::Yarn => "yarn",
            Self::Gem => "gem",
        }
    }

    fn install_subcommands(self) -> &'static [&'static str] {
        match self {
            Self::Apt | Self::Yum | Self::Dnf | Self::Pip | Self::Gem => &["install"],
            Self::Apk => &["add"],
            Self::Npm => &["install", "i", "add", "ci"],
            Self::Yarn => &["add"],
        }
    }

    fn value_flags(self) -> &'static [&'static str] {
        match self {
            Self::Apt => &["-o", "-t", "-c", "--option", "--target-release", "--config-file"],
            Self::Apk => &[
                "-X",
                "--repository",
                "-t",
                "--virtual",
                "-p",
                "--root",
                "--arch",
                "--cache-dir",
            ],
            Self::Yum | Self::Dnf => &[
                "-c",
                "--config",
                "-x",
                "--exclude",
                "--repo",
                "--enablerepo",
                "--disablerepo",
                "--releasever",
            ],
            Self::Pip => &[
                "-r",
                "--requirement",
                "-c",
                "--constraint",
                "-e",
                "--editable",
                "-i",
                "--index-url",
                "--extra-index-url",
                "-f",
                "--find-links",
                "-t",
                "--target",
                "--prefix",
                "--root",
                "--trusted-host",
                "--platform",
                "--python-version",
            ],
            Self::Npm => &["--prefix", "--registry", "-w", "--workspace", "--omit", "--cache"],
            Self::Yarn => &[
                "--cwd",
                "--registry",
                "--network-timeout",
                "--modules-folder",
                "--cache-folder",
            ],
            Self::Gem => &[
                "-v",
                "--version",
                "-i",
                "--install-dir",
                "-n",
                "--bindir",
                "--source",
                "--platform",
            ],
        }
    }

    fn takes_value(self, flag: &str) -> bool {
        !flag.contains('=') && self.value_flags().contains(&flag)
    }
}

impl fmt::Display for PackageManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A package named by an install command, with its pinned version if any.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct PackageRef {
    pub manager: PackageManager,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
}

impl fmt::Display for PackageRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.version {
            Some(v) => write!(f, "{}:{}@{}", self.manager, self.name, v),
            None => write!(f, "{}:{}", self.manager, self.name),
        }
    }
}

/// One `&&` segment recognized as a package install.
struct InstallSegment<'a> {
    manager: PackageManager,
    /// Env prefix, program, global flags and subcommand, verbatim.
    head: &'a [String],
    /// Flags after the subcommand, each followed by its value when it takes one.
    flags: Vec<&'a String>,
    packages: Vec<&'a String>,
}

fn is_env_assignment(word: &str) -> bool {
    match word.split_once('=') {
        Some((key, _)) => {
            !key.is_empty()
                && key
                    .chars()
                    .all(|c| c.is_ascii_alphanumeric() || c == '_')
                && !key.starts_with(|c: char| c.is_ascii_digit())
        }
        None => false,
    }
}

fn is_shell_operator(word: &str) -> bool {
    SHELL_OPERATORS.contains(&word) || word.ends_with(';') || word.contains('>')
}

fn parse_install(segment: &[String]) -> Option<InstallSegment<'_>> {
    let mut i = 0;
    while segment
        .get(i)
        .is_some_and(|w| is_env_assignment(w) || w == "sudo")
    {
        i += 1;
    }

    let program = segment.get(i)?;
    let (manager, mut j) = match PackageManager::from_program(program) {
        Some(m) => (m, i + 1),
        None => {
            let is_python = program
                .rsplit('/')
                .next()
                .is_some_and(|p| p.starts_with("python"));
            let via_module = segment.get(i + 1).is_some_and(|w| w == "-m")
                && segment
                    .get(i + 2)
                    .is_some_and(|w| w == "pip" || w == "pip3");
            if is_python && via_module {
                (PackageManager::Pip, i + 3)
            } else {
                return None;
            }
        }
    };

    while let Some(word) = segment.get(j) {
        if !word.starts_with('-') {
            break;
        }
        j += if manager.takes_value(word) { 2 } else { 1 };
    }
    let subcommand = segment.get(j)?;
    if !manager.install_subcommands().contains(&subcommand.as_str()) {
        return None;
    }
    if segment.iter().any(|w| is_shell_operator(w)) {
        return None;
    }

    let head_end = j + 1;
    let mut flags = Vec::new();
    let mut packages = Vec::new();
    let mut k = head_end;
    while k < segment.len() {
        let word = &segment[k];
        if word.starts_with('-') {
            flags.push(word);
            if manager.takes_value(word) {
                // A dangling value flag would capture a package once reordered.
                let value = segment.get(k + 1)?;
                flags.push(value);
                k += 1;
            }
        } else {
            packages.push(word);
        }
        k += 1;
    }

    Some(InstallSegment {
        manager,
        head: &segment[..head_end],
        flags,
        packages,
    })
}

fn segments(words: &[String]) -> impl Iterator<Item = &[String]> {
    words.split(|w| w == AND_THEN)
}

/// Sort package operands of every install segment; other segments are untouched.
pub fn canonicalize_installs(words: Vec<String>) -> Vec<String> {
    if !words.iter().any(|w| PackageManager::from_program(w).is_some() || w == "-m") {
        return words;
    }

    let mut out = Vec::with_capacity(words.len());
    for (idx, segment) in segments(&words).enumerate() {
        if idx > 0 {
            out.push(AND_THEN.to_string());
        }
        match parse_install(segment) {
            Some(install) => {
                out.extend(install.head.iter().cloned());
                out.extend(install.flags.into_iter().cloned());
                let mut packages: Vec<&String> = install.packages;
                packages.sort();
                out.extend(packages.into_iter().cloned());
            }
            None => out.extend(segment.iter().cloned()),
        }
    }
    out
}

/// Whether any `&&` segment is a package install.
pub fn is_package_install(words: &[String]) -> bool {
    segments(words).any(|s| parse_install(s).is_some())
}

/// Every package named by install segments of a command, in command order.
pub fn extract_packages(words: &[String]) -> Vec<PackageRef> {
    let mut found = Vec::new();
    for segment in segments(words) {
        let Some(install) = parse_install(segment) else {
            continue;
        };
        let mut refs: Vec<PackageRef> = install
            .packages
            .iter()
            .map(|spec| parse_package_spec(install.manager, spec))
            .collect();

        // `gem install rails -v 7.1` pins the single named gem.
        if install.manager == PackageManager::Gem && refs.len() == 1 {
            let pinned = install
                .flags
                .windows(2)
                .find(|w| w[0] == "-v" || w[0] == "--version")
                .map(|w| w[1].clone());
            if let (Some(v), Some(r)) = (pinned, refs.first_mut()) {
                r.version.get_or_insert(v);
            }
        }
        found.extend(refs);
    }
    found
}

fn clean_version(version: &str) -> Option<String> {
    let start = version.find(|c: char| c.is_ascii_digit()).unwrap_or(0);
    let cleaned = &version[start..];
    (!cleaned.is_empty()).then(|| cleaned.to_string())
}

/// Split a package operand into name and version per the manager's convention:
/// `name@ver` (npm, yarn), `name==ver` (pip), `name=ver` (apt, apk),
/// `name-ver` (yum, dnf), `name:ver` (gem).
pub fn parse_package_spec(manager: PackageManager, spec: &str) -> PackageRef {
    let (name, version) = match manager {
        PackageManager::Npm | PackageManager::Yarn => {
            // Scoped packages start with '@'; the version separator comes after.
            let split_at = spec
                .char_indices()
                .skip(1)
                .find(|(_, c)| *c == '@')
                .map(|(i, _)| i);
            match split_at {
                Some(i) => (&spec[..i], clean_version(&spec[i + 1..])),
                None => (spec, None),
            }
        }
        PackageManager::Pip => match PIP_SPEC.captures(spec) {
            Some(caps) => {
                let name = caps.get(1).map_or(spec, |m| m.as_str());
                let op = caps.get(3).map_or("", |m| m.as_str());
                let ver = caps.get(4).map_or("", |m| m.as_str());
                let version = if op == "==" {
                    ver.to_string()
                } else {
                    format!("{op}{ver}")
                };
                (name, Some(version))
            }
            None => (spec.split('[').next().unwrap_or(spec), None),
        },
        PackageManager::Apt | PackageManager::Apk => match spec.split_once('=') {
            Some((n, v)) => (n, clean_version(v)),
            None => (spec, None),
        },
        PackageManager::Yum | PackageManager::Dnf => match RPM_SPEC.captures(spec) {
            Some(caps) => (
                caps.get(1).map_or(spec, |m| m.as_str()),
                caps.get(2).map(|m| m.as_str().to_string()),
            ),
            None => (spec, None),
        },
        PackageManager::Gem => match spec.split_once(':') {
            Some((n, v)) => (n, clean_version(v)),
            None => (spec, None),
        },
    };

    PackageRef {
        manager,
        name: name.to_string(),
        version,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn words(s: &str) -> Vec<String> {
        s.split_whitespace().map(str::to_string).collect()
    }

    #[test]
    fn test_sorts_packages_keeps_flags_in_place() {
        let out = canonicalize_installs(words(
            "apt-get update && apt-get install -y --no-install-recommends zlib1g curl ca-certificates",
        ));
        assert_eq!(
            out.join(" "),
            "apt-get update && apt-get install -y --no-install-recommends ca-certificates curl zlib1g"
        );
    }

    #[test]
    fn test_value_flags_stay_bound() {
        let out = canonicalize_installs(words("pip install requests -r req.txt flask"));
        assert_eq!(out.join(" "), "pip install -r req.txt flask requests");
    }

    #[test]
    fn test_global_flags_and_env_prefix() {
        let out = canonicalize_installs(words(
            "DEBIAN_FRONTEND=noninteractive apt-get -o Acquire::Retries=3 install -y b a",
        ));
        assert_eq!(
            out.join(" "),
            "DEBIAN_FRONTEND=noninteractive apt-get -o Acquire::Retries=3 install -y a b"
        );
        let out = canonicalize_installs(words("apk --no-cache add git bash"));
        assert_eq!(out.join(" "), "apk --no-cache add bash git");
    }

    #[test]
    fn test_non_install_order_preserved() {
        let original = words("make b a && ./configure z y");
        assert_eq!(canonicalize_installs(original.clone()), original);
        assert!(!is_package_install(&original));

        let piped = words("apt-get install b a | tee log");
        assert_eq!(canonicalize_installs(piped.clone()), piped);
    }

    #[test]
    fn test_dangling_value_flag_is_left_alone() {
        let original = words("apt-get install b a -o");
        assert_eq!(canonicalize_installs(original.clone()), original);
    }

    #[test]
    fn test_canonicalization_is_idempotent() {
        let once = canonicalize_installs(words("npm install --save zod @types/node express -w api"));
        let twice = canonicalize_installs(once.clone());
        assert_eq!(once, twice);
    }

    #[test]
    fn test_package_spec_conventions() {
        let npm = parse_package_spec(PackageManager::Npm, "express@4.17.1");
        assert_eq!((npm.name.as_str(), npm.version.as_deref()), ("express", Some("4.17.1")));

        let scoped = parse_package_spec(PackageManager::Npm, "@types/node@20");
        assert_eq!(scoped.name, "@types/node");
        assert_eq!(scoped.version.as_deref(), Some("20"));

        let pip = parse_package_spec(PackageManager::Pip, "requests==2.26.0");
        assert_eq!(pip.version.as_deref(), Some("2.26.0"));
        let ranged = parse_package_spec(PackageManager::Pip, "uvicorn[standard]>=0.20");
        assert_eq!(ranged.name, "uvicorn");
        assert_eq!(ranged.version.as_deref(), Some(">=0.20"));

        let apt = parse_package_spec(PackageManager::Apt, "python3=3.9.5-2");
        assert_eq!(apt.version.as_deref(), Some("3.9.5-2"));

        let rpm = parse_package_spec(PackageManager::Dnf, "nginx-1.20.1-1.el8");
        assert_eq!(rpm.name, "nginx");
        assert_eq!(rpm.version.as_deref(), Some("1.20.1-1.el8"));
        let plain = parse_package_spec(PackageManager::Dnf, "lib64-foo");
        assert_eq!(plain.version, None);
    }

    #[test]
    fn test_extract_packages() {
        let found = extract_packages(&words(
            "apt-get update && apt-get install -y curl=7.88 git && gem install rails -v 7.1",
        ));
        let rendered: Vec<String> = found.iter().map(ToString::to_string).collect();
        assert_eq!(rendered, vec!["apt:curl@7.88", "apt:git", "gem:rails@7.1"]);
    }

    #[test]
    fn test_python_module_pip() {
        let out = canonicalize_installs(words("python3 -m pip install b a"));
        assert_eq!(out.join(" "), "python3 -m pip install a b");
    }
}
