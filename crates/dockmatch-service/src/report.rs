//! Persisted match reports.
//!
//! A report is written as `<dir>/<request_id>/match.json` next to a
//! `match.digest` file holding the SHA-256 of the JSON bytes. Reading a report
//! back verifies the digest before deserializing.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use dockmatch_core::domain::digest::sha256_hex;
use dockmatch_core::MatchResult;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{Result, ServiceError};

/// Bumped on any incompatible change to the report layout.
pub const REPORT_SCHEMA_VERSION: u32 = 1;

const REPORT_FILE: &str = "match.json";
const DIGEST_FILE: &str = "match.digest";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchReport {
    pub schema_version: u32,
    pub request_id: Uuid,
    pub generated_at: DateTime<Utc>,
    /// dockmatch version that produced the result.
    pub engine_version: String,
    pub image_fingerprint: String,
    pub build_spec_fingerprint: String,
    pub config_fingerprint: String,
    /// Canonical digest of `result`; equal for bit-identical results.
    pub result_digest: String,
    pub result: MatchResult,
}

impl MatchReport {
    pub fn new(
        request_id: Uuid,
        image_fingerprint: impl Into<String>,
        build_spec_fingerprint: impl Into<String>,
        config_fingerprint: impl Into<String>,
        result: MatchResult,
    ) -> Result<Self> {
        Ok(Self {
            schema_version: REPORT_SCHEMA_VERSION,
            request_id,
            generated_at: Utc::now(),
            engine_version: dockmatch_core::VERSION.to_string(),
            image_fingerprint: image_fingerprint.into(),
            build_spec_fingerprint: build_spec_fingerprint.into(),
            config_fingerprint: config_fingerprint.into(),
            result_digest: result.digest()?,
            result,
        })
    }
}

/// Persist `<dir>/<request_id>/match.json` and `<dir>/<request_id>/match.digest`.
pub fn write_report(report: &MatchReport, dir: &Path) -> Result<PathBuf> {
    let report_dir = dir.join(report.request_id.to_string());
    std::fs::create_dir_all(&report_dir)?;

    let path = report_dir.join(REPORT_FILE);
    let json = serde_json::to_vec_pretty(report)?;
    let digest = sha256_hex(&json);

    std::fs::write(&path, &json)?;
    std::fs::write(report_dir.join(DIGEST_FILE), digest.as_bytes())?;

    Ok(path)
}

/// Read and verify `<dir>/<request_id>/match.json`.
pub fn read_report(request_id: &Uuid, dir: &Path) -> Result<MatchReport> {
    let report_dir = dir.join(request_id.to_string());
    let json = std::fs::read(report_dir.join(REPORT_FILE))?;
    let expected = std::fs::read_to_string(report_dir.join(DIGEST_FILE))?;
    let actual = sha256_hex(&json);
    if expected.trim() != actual {
        return Err(ServiceError::DigestMismatch {
            expected: expected.trim().to_string(),
            actual,
        });
    }
    Ok(serde_json::from_slice(&json)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use dockmatch_core::{Bucket, SignalCategory, SignalScore};

    fn report() -> MatchReport {
        let result = MatchResult {
            overall_score: 0.85,
            bucket: Bucket::Good,
            signals: vec![SignalScore::new(
                SignalCategory::Sequence,
                0.85,
                vec!["line 2: RUN npm ci matched layer 1".into()],
            )],
            overrides_applied: Default::default(),
        };
        MatchReport::new(Uuid::new_v4(), "img", "spec", "cfg", result).expect("report")
    }

    #[test]
    fn test_report_roundtrip_verifies_digest() {
        let dir = tempfile::tempdir().expect("tempdir");
        let report = report();
        let path = write_report(&report, dir.path()).expect("write");
        assert!(path.ends_with("match.json"));

        let loaded = read_report(&report.request_id, dir.path()).expect("read");
        assert_eq!(loaded, report);
        assert_eq!(loaded.result_digest, report.result.digest().expect("digest"));
    }

    #[test]
    fn test_tampered_report_rejected() {
        let dir = tempfile::tempdir().expect("tempdir");
        let report = report();
        let path = write_report(&report, dir.path()).expect("write");

        let tampered = std::fs::read_to_string(&path)
            .expect("read")
            .replace("0.85", "0.95");
        std::fs::write(&path, tampered).expect("write");

        let err = read_report(&report.request_id, dir.path()).unwrap_err();
        assert!(matches!(err, ServiceError::DigestMismatch { .. }));
    }
}
