//! Image reference canonicalization.
//!
//! `node:18`, `docker.io/node:18`, `index.docker.io/library/node:18` all
//! normalize to `docker.io/library/node:18`.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Canonical host of the public registry.
pub const DEFAULT_REGISTRY: &str = "docker.io";

/// Host names that refer to the public registry.
const DEFAULT_REGISTRY_ALIASES: [&str; 4] = [
    "docker.io",
    "index.docker.io",
    "registry-1.docker.io",
    "registry.hub.docker.com",
];

pub const DEFAULT_TAG: &str = "latest";

/// A reference that cannot name an image.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid image reference '{0}'")]
pub struct InvalidImageRef(pub String);

/// Canonical `(registry, repository, tag, digest?)` split of an image reference.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ImageRef {
    pub registry: String,
    pub repository: String,
    pub tag: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub digest: Option<String>,
}

impl ImageRef {
    /// Last repository component, e.g. `node` for `library/node`.
    pub fn short_name(&self) -> &str {
        self.repository
            .rsplit('/')
            .next()
            .unwrap_or(&self.repository)
    }

    /// Same registry and repository; tag and digest ignored.
    pub fn same_repository(&self, other: &ImageRef) -> bool {
        self.registry == other.registry && self.repository == other.repository
    }

    /// Repository path without the implicit `library/` namespace.
    pub fn display_repository(&self) -> &str {
        if self.registry == DEFAULT_REGISTRY {
            self.repository
                .strip_prefix("library/")
                .unwrap_or(&self.repository)
        } else {
            &self.repository
        }
    }

    /// Tag-or-digest identity: digests decide when both sides are pinned.
    pub fn same_version(&self, other: &ImageRef) -> bool {
        match (&self.digest, &other.digest) {
            (Some(a), Some(b)) => a == b,
            _ => self.tag == other.tag,
        }
    }

    pub fn is_scratch(&self) -> bool {
        self.registry == DEFAULT_REGISTRY && self.repository == "library/scratch"
    }
}

impl fmt::Display for ImageRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}:{}", self.registry, self.repository, self.tag)?;
        if let Some(d) = &self.digest {
            write!(f, "@{d}")?;
        }
        Ok(())
    }
}

fn canonical_registry(host: &str) -> String {
    let host = host.to_ascii_lowercase();
    if DEFAULT_REGISTRY_ALIASES.contains(&host.as_str()) {
        DEFAULT_REGISTRY.to_string()
    } else {
        host
    }
}

fn looks_like_registry(component: &str) -> bool {
    component.contains('.') || component.contains(':') || component == "localhost"
}

/// Split and canonicalize an image reference.
pub fn normalize_image_ref(raw: &str) -> Result<ImageRef, InvalidImageRef> {
    let trimmed = raw.trim();
    let invalid = || InvalidImageRef(raw.to_string());
    if trimmed.is_empty() || trimmed.chars().any(char::is_whitespace) {
        return Err(invalid());
    }

    let (name, digest) = match trimmed.split_once('@') {
        Some((n, d)) if !d.is_empty() => (n, Some(d.to_ascii_lowercase())),
        Some(_) => return Err(invalid()),
        None => (trimmed, None),
    };

    let mut components: Vec<&str> = name.split('/').collect();
    let registry = if components.len() > 1 && looks_like_registry(components[0]) {
        canonical_registry(components.remove(0))
    } else {
        DEFAULT_REGISTRY.to_string()
    };

    let last = components.pop().ok_or_else(invalid)?;
    let (last_name, tag) = match last.split_once(':') {
        Some((n, t)) if !t.is_empty() => (n, t.to_string()),
        Some(_) => return Err(invalid()),
        None => (last, DEFAULT_TAG.to_string()),
    };
    components.push(last_name);

    if components.iter().any(|c| c.is_empty()) {
        return Err(invalid());
    }

    let mut repository = components.join("/").to_ascii_lowercase();
    if registry == DEFAULT_REGISTRY && !repository.contains('/') {
        repository = format!("library/{repository}");
    }

    Ok(ImageRef {
        registry,
        repository,
        tag,
        digest,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_official_image_defaults() {
        let r = normalize_image_ref("node").expect("ref");
        assert_eq!(r.registry, "docker.io");
        assert_eq!(r.repository, "library/node");
        assert_eq!(r.tag, "latest");
        assert_eq!(r.digest, None);
        assert_eq!(r.short_name(), "node");
    }

    #[test]
    fn test_registry_aliases_collapse() {
        let a = normalize_image_ref("node:18").expect("a");
        let b = normalize_image_ref("docker.io/library/node:18").expect("b");
        let c = normalize_image_ref("index.docker.io/node:18").expect("c");
        let d = normalize_image_ref("registry-1.docker.io/library/node:18").expect("d");
        assert_eq!(a, b);
        assert_eq!(a, c);
        assert_eq!(a, d);
    }

    #[test]
    fn test_private_registry_with_port() {
        let r = normalize_image_ref("localhost:5000/team/app:v2").expect("ref");
        assert_eq!(r.registry, "localhost:5000");
        assert_eq!(r.repository, "team/app");
        assert_eq!(r.tag, "v2");

        let r = normalize_image_ref("ghcr.io/Org/Tool").expect("ref");
        assert_eq!(r.registry, "ghcr.io");
        assert_eq!(r.repository, "org/tool");
    }

    #[test]
    fn test_digest_pinned() {
        let r = normalize_image_ref("python:3.12@sha256:ABCDEF").expect("ref");
        assert_eq!(r.tag, "3.12");
        assert_eq!(r.digest.as_deref(), Some("sha256:abcdef"));

        let pinned_only = normalize_image_ref("python@sha256:abcdef").expect("ref");
        assert_eq!(pinned_only.tag, "latest");
        assert!(r.same_version(&normalize_image_ref("python:3.11@sha256:abcdef").expect("x")));
    }

    #[test]
    fn test_user_namespace_is_not_a_registry() {
        let r = normalize_image_ref("bitnami/redis:7").expect("ref");
        assert_eq!(r.registry, "docker.io");
        assert_eq!(r.repository, "bitnami/redis");
        assert_eq!(r.display_repository(), "bitnami/redis");
    }

    #[test]
    fn test_invalid_refs() {
        assert!(normalize_image_ref("").is_err());
        assert!(normalize_image_ref("node:").is_err());
        assert!(normalize_image_ref("a//b").is_err());
        assert!(normalize_image_ref("node@").is_err());
        assert!(normalize_image_ref("two words").is_err());
    }

    #[test]
    fn test_display_is_idempotent() {
        for raw in ["node", "ghcr.io/a/b:1@sha256:ff", "localhost:5000/x"] {
            let once = normalize_image_ref(raw).expect("once");
            let twice = normalize_image_ref(&once.to_string()).expect("twice");
            assert_eq!(once, twice, "{raw}");
        }
    }
}
