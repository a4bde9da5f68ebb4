//! Content hashing for integrity stamps.
//!
//! Structured values are serialized to canonical JSON (stable key order)
//! before hashing, so the digest is identical across runs and map insertion
//! orders. xxh3-128 is deliberately non-cryptographic: the stamp detects
//! corruption, it is not a security mechanism.

use crate::error::Result;
use serde::Serialize;
use xxhash_rust::xxh3::xxh3_128;

/// Digest of a structured value via its canonical JSON encoding.
pub fn checksum<T: Serialize>(value: &T) -> Result<String> {
    Ok(digest(&canonical_bytes(value)?))
}

/// Digest of raw bytes, used for per-file checksums in directory trees.
pub fn digest(bytes: &[u8]) -> String {
    format!("{:032x}", xxh3_128(bytes))
}

/// Canonical JSON encoding. `serde_json::Value` objects are BTreeMap-backed
/// and serialize with sorted keys, so a round-trip through `Value`
/// normalizes any insertion-ordered source map.
pub fn canonical_bytes<T: Serialize>(value: &T) -> Result<Vec<u8>> {
    let value = serde_json::to_value(value)?;
    Ok(serde_json::to_vec(&value)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::collections::HashMap;

    #[test]
    fn digest_is_stable_across_insertion_order() {
        let mut forward = HashMap::new();
        forward.insert("a", json!(1));
        forward.insert("b", json!({"x": [1, 2], "y": null}));
        forward.insert("c", json!("tres"));

        let mut reverse = HashMap::new();
        reverse.insert("c", json!("tres"));
        reverse.insert("b", json!({"y": null, "x": [1, 2]}));
        reverse.insert("a", json!(1));

        assert_eq!(checksum(&forward).unwrap(), checksum(&reverse).unwrap());
    }

    #[test]
    fn different_content_yields_different_digest() {
        let a = json!({"stock": 3});
        let b = json!({"stock": 1});
        assert_ne!(checksum(&a).unwrap(), checksum(&b).unwrap());
    }

    #[test]
    fn digest_is_fixed_width_hex() {
        let digest = digest(b"producto");
        assert_eq!(digest.len(), 32);
        assert!(digest.chars().all(|c| c.is_ascii_hexdigit()));
    }
}
