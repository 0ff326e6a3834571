use crate::types::Checksum;
use sha2::{Digest as _, Sha256};

/// Algorithm label stored next to descriptor checksums.
pub const CHECKSUM_ALGORITHM: &str = "sha256";

/// Compute the content checksum of a descriptor byte stream.
///
/// Pure and deterministic: the same bytes always hash to the same value
/// regardless of process or call order.
pub fn checksum(bytes: &[u8]) -> Checksum {
    Checksum::new(format!("{:x}", Sha256::digest(bytes)))
}

/// Checksum for content that may be absent. Missing content hashes as the
/// zero-length input so every stored file carries a checksum.
pub fn checksum_opt(bytes: Option<&[u8]>) -> Checksum {
    checksum(bytes.unwrap_or_default())
}

/// Recompute and compare. Used on read paths to detect corrupted content.
pub fn verify(bytes: &[u8], expected: &Checksum) -> bool {
    checksum(bytes) == *expected
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_vector() {
        assert_eq!(
            checksum(b"abc").as_str(),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn empty_and_absent_are_identical() {
        assert_eq!(checksum(b""), checksum_opt(None));
        assert_eq!(
            checksum(b"").as_str(),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }

    #[test]
    fn stable_across_repeated_invocations() {
        let first = checksum(b"cwlVersion: v1.0\nclass: Workflow\n");
        for _ in 0..50 {
            assert_eq!(first, checksum(b"cwlVersion: v1.0\nclass: Workflow\n"));
        }
    }

    #[test]
    fn different_content_different_checksum() {
        assert_ne!(checksum(b"version 1.0"), checksum(b"version 1.1"));
    }

    #[test]
    fn verify_detects_tamper() {
        let sum = checksum(b"original");
        assert!(verify(b"original", &sum));
        assert!(!verify(b"tampered", &sum));
    }
}
