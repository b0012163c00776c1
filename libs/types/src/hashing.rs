//! SHA-256 helpers
//!
//! All content hashes in the core are hex-encoded 256-bit digests.

use sha2::{Digest, Sha256};

/// Raw 32-byte SHA-256 digest.
pub type Digest256 = [u8; 32];

/// Hash arbitrary bytes into a raw digest.
pub fn sha256(bytes: &[u8]) -> Digest256 {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hasher.finalize().into()
}

/// Hash arbitrary bytes into a lowercase hex string.
pub fn sha256_hex(bytes: &[u8]) -> String {
    hex::encode(sha256(bytes))
}

/// `-0.0` becomes `0.0`; every other value is returned unchanged.
pub fn fold_negative_zero(value: f64) -> f64 {
    if value == 0.0 {
        0.0
    } else {
        value
    }
}

/// Canonical decimal rendering of an `f64` for hashing.
///
/// Uses the shortest representation that round-trips, and folds `-0.0`
/// into `0.0` so that the sign of zero never changes a hash.
pub fn canonical_f64(value: f64) -> String {
    format!("{:?}", fold_negative_zero(value))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sha256_hex_known_vector() {
        assert_eq!(
            sha256_hex(b"abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn test_hex_is_64_chars() {
        assert_eq!(sha256_hex(b"").len(), 64);
    }

    #[test]
    fn test_fold_negative_zero() {
        assert!(fold_negative_zero(-0.0).is_sign_positive());
        assert_eq!(fold_negative_zero(-1.5), -1.5);
        assert!(fold_negative_zero(f64::NAN).is_nan());
    }

    #[test]
    fn test_canonical_f64() {
        assert_eq!(canonical_f64(185.5), "185.5");
        assert_eq!(canonical_f64(100.0), "100.0");
        assert_eq!(canonical_f64(-0.0), "0.0");
        assert_eq!(canonical_f64(0.1 + 0.2), "0.30000000000000004");
    }
}
