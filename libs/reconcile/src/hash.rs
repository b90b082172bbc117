//! Fingerprints of rendered stack inputs.

use std::fmt;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Short digest of a rendered template or certificate.
///
/// Recorded in the declared object's status so a changed template shows up
/// there, and embedded in templates in place of certificate material.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SpecHash(String);

impl SpecHash {
    pub fn from_bytes(bytes: &[u8]) -> Self {
        let digest = Sha256::digest(bytes);
        // 128 bits is plenty for change detection.
        Self(format!("sha256:{}", hex::encode(&digest[..16])))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SpecHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format() {
        let hash = SpecHash::from_bytes(b"{\"Resources\":{}}");
        assert!(hash.as_str().starts_with("sha256:"));
        assert_eq!(hash.as_str().len(), "sha256:".len() + 32);
        assert_eq!(hash, SpecHash::from_bytes(b"{\"Resources\":{}}"));
    }

    #[test]
    fn test_content_matters() {
        let a = SpecHash::from_bytes(b"{\"WorkerMaxSize\":\"10\"}");
        let b = SpecHash::from_bytes(b"{\"WorkerMaxSize\":\"20\"}");
        assert_ne!(a, b);
    }

    #[test]
    fn test_serializes_as_plain_string() {
        let hash = SpecHash::from_bytes(b"demo");
        let json = serde_json::to_string(&hash).unwrap();
        assert_eq!(json, format!("\"{hash}\""));
        let back: SpecHash = serde_json::from_str(&json).unwrap();
        assert_eq!(back, hash);
    }
}
