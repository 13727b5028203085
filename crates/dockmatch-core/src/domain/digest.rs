//! Fingerprints and canonical digests.
//!
//! Fingerprints key the external result cache: an image is identified by the
//! whole descriptor the engine reads, a build spec by its exact text. Structured
//! values (images, configs, results) are digested over canonical JSON: object
//! keys sorted by UTF-16 code units, integer-valued floats written as integers.

use sha2::{Digest, Sha256};

use crate::domain::image::ImageDescriptor;

/// Hex SHA-256 of raw bytes.
pub fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}

/// Fingerprint of a build spec's exact text.
pub fn build_spec_fingerprint(text: &str) -> String {
    sha256_hex(text.as_bytes())
}

/// Fingerprint of every field of an image descriptor.
///
/// History tooling reports `<missing>` for most layer digests, so commands,
/// platform, metadata and file evidence all take part. Layers are hashed in
/// build chronology; their listing order does not matter.
pub fn image_fingerprint(image: &ImageDescriptor) -> serde_json::Result<String> {
    let mut ordered = image.clone();
    ordered.layers.sort_by_key(|l| l.order_index);
    canonical_digest(&ordered)
}

fn sort_keys_utf16(value: &serde_json::Value) -> serde_json::Value {
    match value {
        serde_json::Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort_by(|a, b| a.encode_utf16().cmp(b.encode_utf16()));

            let mut sorted = serde_json::Map::new();
            for key in keys {
                if let Some(v) = map.get(key) {
                    sorted.insert(key.clone(), sort_keys_utf16(v));
                }
            }
            serde_json::Value::Object(sorted)
        }
        serde_json::Value::Array(arr) => {
            serde_json::Value::Array(arr.iter().map(sort_keys_utf16).collect())
        }
        serde_json::Value::Number(n) => {
            if n.is_i64() || n.is_u64() {
                return value.clone();
            }
            match n.as_f64() {
                Some(f) if f.fract() == 0.0 && f >= i64::MIN as f64 && f <= i64::MAX as f64 => {
                    serde_json::Value::Number(serde_json::Number::from(f as i64))
                }
                _ => value.clone(),
            }
        }
        other => other.clone(),
    }
}

/// Canonical compact JSON for any serializable value.
pub fn canonical_json<T: serde::Serialize>(value: &T) -> serde_json::Result<String> {
    let raw = serde_json::to_value(value)?;
    serde_json::to_string(&sort_keys_utf16(&raw))
}

/// SHA-256 over [`canonical_json`].
pub fn canonical_digest<T: serde::Serialize>(value: &T) -> serde_json::Result<String> {
    Ok(sha256_hex(canonical_json(value)?.as_bytes()))
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::domain::image::{Layer, Platform};

    fn layer(digest: &str, order_index: usize) -> Layer {
        Layer {
            digest: digest.to_string(),
            size_bytes: 10,
            created_by: None,
            order_index,
        }
    }

    fn image(layers: Vec<Layer>) -> ImageDescriptor {
        ImageDescriptor {
            layers,
            ..ImageDescriptor::default()
        }
    }

    #[test]
    fn test_canonical_json_field_order_invariant() {
        let a = serde_json::json!({ "b": 1, "a": { "z": 1, "y": 2 } });
        let b = serde_json::json!({ "a": { "y": 2, "z": 1 }, "b": 1 });
        assert_eq!(
            canonical_json(&a).expect("canonical a"),
            canonical_json(&b).expect("canonical b")
        );
    }

    #[test]
    fn test_canonical_json_integer_valued_float() {
        let input = serde_json::json!({ "weight": 1.0, "ratio": 0.25 });
        let canonical = canonical_json(&input).expect("canonical");
        assert_eq!(canonical, r#"{"ratio":0.25,"weight":1}"#);
    }

    #[test]
    fn test_canonical_json_array_order_preserved() {
        let a = serde_json::json!([3, 1, 2]);
        let b = serde_json::json!([1, 2, 3]);
        assert_ne!(
            canonical_json(&a).expect("a"),
            canonical_json(&b).expect("b")
        );
    }

    #[test]
    fn test_image_fingerprint_uses_chronological_order() {
        let forward = image(vec![layer("sha256:aa", 0), layer("sha256:bb", 1)]);
        let shuffled = image(vec![layer("sha256:bb", 1), layer("sha256:aa", 0)]);
        let reordered = image(vec![layer("sha256:bb", 0), layer("sha256:aa", 1)]);

        let fp = |i: &ImageDescriptor| image_fingerprint(i).expect("fingerprint");
        assert_eq!(fp(&forward), fp(&shuffled));
        assert_ne!(fp(&forward), fp(&reordered));
    }

    #[test]
    fn test_image_fingerprint_covers_commands_and_platform() {
        let base = image(vec![layer("<missing>", 0), layer("<missing>", 1)]);
        let fp = |i: &ImageDescriptor| image_fingerprint(i).expect("fingerprint");

        let mut commands = base.clone();
        commands.layers[1].created_by = Some("/bin/sh -c pip install flask".into());
        assert_ne!(fp(&base), fp(&commands));

        let mut platform = base.clone();
        platform.platform = Some(Platform {
            os: "linux".into(),
            architecture: "arm64".into(),
            variant: None,
        });
        assert_ne!(fp(&base), fp(&platform));

        let mut base_ref = base.clone();
        base_ref.base_ref = Some("python:3.12".into());
        assert_ne!(fp(&base), fp(&base_ref));
    }

    #[test]
    fn test_build_spec_fingerprint_is_sha256_hex() {
        let fp = build_spec_fingerprint("FROM alpine\n");
        assert_eq!(fp.len(), 64);
        assert!(fp.chars().all(|c| c.is_ascii_hexdigit()));
        assert_ne!(fp, build_spec_fingerprint("FROM alpine:3.19\n"));
    }
}
