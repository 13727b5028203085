//! Where descriptors and build specs come from.
//!
//! The engine never touches a registry or a runtime; this adapter loads the
//! descriptor JSON and Dockerfile text that introspection tooling produced.

use std::collections::BTreeMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use dockmatch_core::ImageDescriptor;
use serde::{Deserialize, Serialize};
use tracing::debug;
use uuid::Uuid;

use crate::error::{Result, ServiceError};
use crate::pool::MatchRequest;

#[async_trait]
pub trait DescriptorSource: Send + Sync {
    /// Load an image descriptor. Returns `DescriptorNotFound` if absent.
    async fn load_descriptor(&self, location: &str) -> Result<ImageDescriptor>;

    /// Load build spec text.
    async fn load_build_spec(&self, location: &str) -> Result<String>;
}

/// Reads descriptor/Dockerfile pairs from a directory tree.
#[derive(Debug, Clone)]
pub struct FsDescriptorSource {
    root: PathBuf,
}

impl FsDescriptorSource {
    /// Relative locations resolve against `root`.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn resolve(&self, location: &str) -> PathBuf {
        let path = Path::new(location);
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.root.join(path)
        }
    }

    async fn read(&self, location: &str) -> Result<Vec<u8>> {
        let path = self.resolve(location);
        debug!(path = %path.display(), "reading match input");
        tokio::fs::read(&path).await.map_err(|err| match err.kind() {
            ErrorKind::NotFound => ServiceError::DescriptorNotFound(path.display().to_string()),
            _ => ServiceError::Io(err),
        })
    }
}

#[async_trait]
impl DescriptorSource for FsDescriptorSource {
    async fn load_descriptor(&self, location: &str) -> Result<ImageDescriptor> {
        let bytes = self.read(location).await?;
        Ok(serde_json::from_slice(&bytes)?)
    }

    async fn load_build_spec(&self, location: &str) -> Result<String> {
        let bytes = self.read(location).await?;
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }
}

// ---------------------------------------------------------------------------
// Batch manifests
// ---------------------------------------------------------------------------

/// One (Dockerfile, image) pair of a batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchEntry {
    /// Caller's label for the pair; echoed in outcomes.
    #[serde(default)]
    pub name: Option<String>,
    pub dockerfile: String,
    pub image: String,
    #[serde(default)]
    pub build_args: BTreeMap<String, String>,
}

/// `{"entries": [...]}`; locations relative to the manifest's directory.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchManifest {
    pub entries: Vec<BatchEntry>,
}

impl BatchManifest {
    pub async fn load(path: &Path) -> Result<Self> {
        let bytes = tokio::fs::read(path).await.map_err(|err| match err.kind() {
            ErrorKind::NotFound => ServiceError::DescriptorNotFound(path.display().to_string()),
            _ => ServiceError::Io(err),
        })?;
        Ok(serde_json::from_slice(&bytes)?)
    }

    /// Load every entry into a request. Stops at the first entry that fails.
    pub async fn into_requests(self, source: &dyn DescriptorSource) -> Result<Vec<MatchRequest>> {
        let mut requests = Vec::with_capacity(self.entries.len());
        for entry in self.entries {
            let build_spec = source.load_build_spec(&entry.dockerfile).await?;
            let image = source.load_descriptor(&entry.image).await?;
            requests.push(MatchRequest {
                request_id: Uuid::new_v4(),
                name: entry.name,
                build_spec,
                build_args: entry.build_args,
                image,
            });
        }
        Ok(requests)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_missing_descriptor_is_not_found() {
        let dir = tempfile::tempdir().expect("tempdir");
        let source = FsDescriptorSource::new(dir.path());
        let err = source.load_descriptor("nope.json").await.unwrap_err();
        assert!(matches!(err, ServiceError::DescriptorNotFound(_)));
    }

    #[tokio::test]
    async fn test_manifest_entries_become_requests() {
        let dir = tempfile::tempdir().expect("tempdir");
        std::fs::write(dir.path().join("Dockerfile"), "FROM alpine:3.19\n").expect("write");
        std::fs::write(
            dir.path().join("image.json"),
            r#"{"base_ref":"alpine:3.19","layers":[]}"#,
        )
        .expect("write");

        let manifest: BatchManifest = serde_json::from_str(
            r#"{"entries":[{"name":"alpine","dockerfile":"Dockerfile","image":"image.json","build_args":{"V":"1"}}]}"#,
        )
        .expect("manifest");
        let source = FsDescriptorSource::new(dir.path());
        let requests = manifest.into_requests(&source).await.expect("requests");

        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].name.as_deref(), Some("alpine"));
        assert_eq!(requests[0].build_spec, "FROM alpine:3.19\n");
        assert_eq!(requests[0].image.base_ref.as_deref(), Some("alpine:3.19"));
        assert_eq!(requests[0].build_args.get("V").map(String::as_str), Some("1"));
    }
}
