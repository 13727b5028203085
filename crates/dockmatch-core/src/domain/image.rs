//! Observed image evidence, as supplied by external introspection tooling.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::domain::digest::image_fingerprint;

/// Digest placeholder that history tooling reports for layers it cannot address.
pub const MISSING_DIGEST: &str = "<missing>";

/// One content-addressed filesystem delta of an image.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Layer {
    pub digest: String,
    #[serde(default)]
    pub size_bytes: u64,
    /// Build command recorded in the image history, if any.
    #[serde(default)]
    pub created_by: Option<String>,
    /// Chronological position; strictly increasing across the image.
    pub order_index: usize,
}

impl Layer {
    /// Whether `digest` identifies content (as opposed to `<missing>` or empty).
    pub fn has_content_digest(&self) -> bool {
        !self.digest.is_empty() && self.digest != MISSING_DIGEST
    }

    /// Recorded command, ignoring blank strings.
    pub fn command(&self) -> Option<&str> {
        self.created_by
            .as_deref()
            .map(str::trim)
            .filter(|c| !c.is_empty())
    }
}

/// Operating system / architecture pair.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Platform {
    pub os: String,
    pub architecture: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub variant: Option<String>,
}

impl Platform {
    pub fn new(os: &str, architecture: &str) -> Self {
        Self {
            os: os.to_ascii_lowercase(),
            architecture: canonical_arch(architecture),
            variant: None,
        }
    }

    /// Same OS and architecture; variants only compared when both are known.
    pub fn matches(&self, other: &Platform) -> bool {
        if !self.os.eq_ignore_ascii_case(&other.os)
            || canonical_arch(&self.architecture) != canonical_arch(&other.architecture)
        {
            return false;
        }
        match (&self.variant, &other.variant) {
            (Some(a), Some(b)) => a.eq_ignore_ascii_case(b),
            _ => true,
        }
    }
}

fn canonical_arch(arch: &str) -> String {
    match arch.to_ascii_lowercase().as_str() {
        "x86_64" | "x86-64" => "amd64".to_string(),
        "aarch64" => "arm64".to_string(),
        "i386" | "i686" => "386".to_string(),
        other => other.to_string(),
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.os, self.architecture)?;
        if let Some(v) = &self.variant {
            write!(f, "/{v}")?;
        }
        Ok(())
    }
}

impl FromStr for Platform {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parts: Vec<&str> = s.trim().split('/').collect();
        match parts.as_slice() {
            [os, arch] if !os.is_empty() && !arch.is_empty() => Ok(Platform::new(os, arch)),
            [os, arch, variant] if !os.is_empty() && !arch.is_empty() => Ok(Platform {
                variant: Some(variant.to_ascii_lowercase()),
                ..Platform::new(os, arch)
            }),
            _ => Err(format!("invalid platform '{s}', expected os/arch[/variant]")),
        }
    }
}

/// Transport protocol of an exposed port.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    Tcp,
    Udp,
    Sctp,
}

/// An exposed port, written `80/tcp` on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Port {
    pub number: u16,
    pub protocol: Protocol,
}

impl Port {
    pub fn tcp(number: u16) -> Self {
        Self {
            number,
            protocol: Protocol::Tcp,
        }
    }
}

impl fmt::Display for Port {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let proto = match self.protocol {
            Protocol::Tcp => "tcp",
            Protocol::Udp => "udp",
            Protocol::Sctp => "sctp",
        };
        write!(f, "{}/{}", self.number, proto)
    }
}

impl FromStr for Port {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let (num, proto) = match s.split_once('/') {
            Some((n, p)) => (n, p),
            None => (s, "tcp"),
        };
        let number: u16 = num
            .parse()
            .map_err(|_| format!("invalid port number '{num}'"))?;
        let protocol = match proto.to_ascii_lowercase().as_str() {
            "tcp" => Protocol::Tcp,
            "udp" => Protocol::Udp,
            "sctp" => Protocol::Sctp,
            other => return Err(format!("invalid port protocol '{other}'")),
        };
        Ok(Port { number, protocol })
    }
}

impl TryFrom<String> for Port {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Port> for String {
    fn from(port: Port) -> Self {
        port.to_string()
    }
}

/// Labels, environment, ports, volumes and working directory of an image
/// (observed) or of a build spec's final stage (declared).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageMetadata {
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
    #[serde(default)]
    pub env: BTreeMap<String, String>,
    #[serde(default)]
    pub ports: BTreeSet<Port>,
    #[serde(default)]
    pub volumes: BTreeSet<String>,
    #[serde(default)]
    pub workdir: Option<String>,
    #[serde(default)]
    pub base_ref: Option<String>,
}

/// A file path observed inside the image, with optional hints.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileEvidence {
    pub path: String,
    #[serde(default)]
    pub layer_digest: Option<String>,
    #[serde(default)]
    pub content_type: Option<String>,
}

impl FileEvidence {
    pub fn new(path: &str) -> Self {
        Self {
            path: path.to_string(),
            layer_digest: None,
            content_type: None,
        }
    }
}

/// Everything the engine knows about an image.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageDescriptor {
    #[serde(default)]
    pub reference: Option<String>,
    /// Base image reference as recorded by the introspection tool.
    #[serde(default)]
    pub base_ref: Option<String>,
    /// Layer digests of the base image, when the tool could resolve them.
    #[serde(default)]
    pub base_layer_digests: Vec<String>,
    #[serde(default)]
    pub platform: Option<Platform>,
    /// Platforms of the manifest list the image was pulled from, if any.
    #[serde(default)]
    pub manifest_platforms: Vec<Platform>,
    #[serde(default)]
    pub layers: Vec<Layer>,
    #[serde(default)]
    pub metadata: Option<ImageMetadata>,
    #[serde(default)]
    pub files: Option<Vec<FileEvidence>>,
}

impl ImageDescriptor {
    /// Layers in build chronology.
    pub fn ordered_layers(&self) -> Vec<&Layer> {
        let mut layers: Vec<&Layer> = self.layers.iter().collect();
        layers.sort_by_key(|l| l.order_index);
        layers
    }

    /// Observed base reference, preferring the explicit field over metadata.
    pub fn observed_base_ref(&self) -> Option<&str> {
        self.base_ref
            .as_deref()
            .or_else(|| self.metadata.as_ref().and_then(|m| m.base_ref.as_deref()))
            .filter(|r| !r.trim().is_empty())
    }

    /// Cache identity of this descriptor; see [`image_fingerprint`].
    pub fn fingerprint(&self) -> serde_json::Result<String> {
        image_fingerprint(self)
    }
}
