//! Content fingerprinting of uploaded media

use crate::error::{StoreError, StoreResult};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;

/// Length of a fingerprint in hex characters (SHA-256)
pub const FINGERPRINT_HEX_LEN: usize = 64;

/// Deterministic content hash of a media blob
///
/// Used to decide whether a persisted playback offset still belongs to the
/// media currently in the store.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Fingerprint(String);

impl Fingerprint {
    /// Parse a stored hex digest
    pub fn parse(value: &str) -> StoreResult<Self> {
        let value = value.trim();
        let valid = value.len() == FINGERPRINT_HEX_LEN
            && value.chars().all(|c| matches!(c, '0'..='9' | 'a'..='f'));
        if !valid {
            return Err(StoreError::InvalidFingerprint {
                value: value.to_string(),
            });
        }
        Ok(Self(value.to_string()))
    }

    /// Hex digest text
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Short prefix for log lines
    pub fn short(&self) -> &str {
        &self.0[..12]
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Compute the fingerprint of a media blob
pub fn digest(bytes: &[u8]) -> Fingerprint {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    Fingerprint(hex::encode(hasher.finalize()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_digest_is_stable() {
        let bytes = b"loop video payload".to_vec();
        assert_eq!(digest(&bytes), digest(&bytes));
        assert_eq!(digest(&bytes).as_str().len(), FINGERPRINT_HEX_LEN);
    }

    #[test]
    fn test_digest_differs_for_distinct_content() {
        let a = digest(b"video A");
        let b = digest(b"video B");
        let empty = digest(b"");
        assert_ne!(a, b);
        assert_ne!(a, empty);
        assert_ne!(b, empty);
    }

    #[test]
    fn test_known_vector() {
        assert_eq!(
            digest(b"abc").as_str(),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn test_parse_round_trip_and_rejects_garbage() {
        let fp = digest(b"clip");
        assert_eq!(Fingerprint::parse(fp.as_str()).unwrap(), fp);
        assert!(Fingerprint::parse("not-a-digest").is_err());
        assert!(Fingerprint::parse(&fp.as_str().to_uppercase()).is_err());
    }
}
