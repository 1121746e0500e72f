//! Content addressing for archived snapshots

use serde::Serialize;
use sha2::{Digest, Sha256};

use crate::error::Result;

/// Compute the SHA-256 hex digest of raw bytes
pub fn content_digest(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}

/// Serialize a value to JSON and digest the exact bytes that were produced
///
/// Returns the payload alongside its digest so callers persist precisely
/// what was hashed.
pub fn digest_json<T: Serialize>(value: &T) -> Result<(String, String)> {
    let payload = serde_json::to_string(value)?;
    let digest = content_digest(payload.as_bytes());
    Ok((payload, digest))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_content_digest_known_value() {
        assert_eq!(
            content_digest(b"hello"),
            "2cf24dba5fb0a30e26e83b2ac5b9e29e1b161e5c1fa7425e73043362938b9824"
        );
    }

    #[test]
    fn test_content_digest_stable() {
        assert_eq!(content_digest(b"lorebase"), content_digest(b"lorebase"));
        assert_ne!(content_digest(b"lorebase"), content_digest(b"Lorebase"));
    }

    #[test]
    fn test_digest_json_matches_payload() {
        #[derive(Serialize)]
        struct Snapshot {
            name: &'static str,
            tags: Vec<&'static str>,
        }

        let (payload, digest) = digest_json(&Snapshot {
            name: "Zhang San",
            tags: vec!["a", "b"],
        })
        .unwrap();

        assert_eq!(payload, r#"{"name":"Zhang San","tags":["a","b"]}"#);
        assert_eq!(digest, content_digest(payload.as_bytes()));
        assert_eq!(digest.len(), 64);
    }
}
