//! Cipher suites.
//!
//! The suite id travels in every envelope so that a later suite can be
//! introduced (key rotation, a different KEM) without touching stored data.
//! Unknown ids survive decoding unchanged; only `decrypt` and the shape
//! check need to understand them.

use serde::{Deserialize, Serialize};

/// Wire value of the suite identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "u16", into = "u16")]
pub enum AlgorithmId {
    /// X25519 ephemeral-static, HKDF-SHA256, XChaCha20-Poly1305, bucket padding.
    X25519XChaCha20V1,
    /// Any id this build does not implement.
    Unrecognized(u16),
}

impl AlgorithmId {
    pub const CURRENT: AlgorithmId = AlgorithmId::X25519XChaCha20V1;

    pub fn as_u16(self) -> u16 {
        match self {
            AlgorithmId::X25519XChaCha20V1 => 1,
            AlgorithmId::Unrecognized(v) => v,
        }
    }

    pub fn is_supported(self) -> bool {
        !matches!(self, AlgorithmId::Unrecognized(_))
    }

    /// Length rules for this suite, `None` if unknown.
    pub fn lengths(self) -> Option<SuiteLengths> {
        match self {
            AlgorithmId::X25519XChaCha20V1 => Some(SuiteLengths {
                ephemeral_key: 32,
                nonce: 24,
                tag: 16,
                padded_buckets: &crate::padding::BUCKET_SIZES,
            }),
            AlgorithmId::Unrecognized(_) => None,
        }
    }
}

impl From<u16> for AlgorithmId {
    fn from(v: u16) -> Self {
        match v {
            1 => AlgorithmId::X25519XChaCha20V1,
            other => AlgorithmId::Unrecognized(other),
        }
    }
}

impl From<AlgorithmId> for u16 {
    fn from(a: AlgorithmId) -> Self {
        a.as_u16()
    }
}

impl std::fmt::Display for AlgorithmId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AlgorithmId::X25519XChaCha20V1 => f.write_str("x25519-hkdf-sha256-xchacha20poly1305"),
            AlgorithmId::Unrecognized(v) => write!(f, "unrecognized({v})"),
        }
    }
}

/// Byte lengths a suite mandates for each envelope field.
#[derive(Debug, Clone, Copy)]
pub struct SuiteLengths {
    pub ephemeral_key: usize,
    pub nonce: usize,
    pub tag: usize,
    /// Allowed plaintext sizes after padding; ciphertext = bucket + tag.
    pub padded_buckets: &'static [usize],
}

impl SuiteLengths {
    pub fn ciphertext_len_ok(&self, len: usize) -> bool {
        len > self.tag && self.padded_buckets.contains(&(len - self.tag))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_ids_round_trip_through_u16() {
        let a = AlgorithmId::from(9u16);
        assert_eq!(a, AlgorithmId::Unrecognized(9));
        assert_eq!(u16::from(a), 9);
        assert!(!a.is_supported());
        assert!(a.lengths().is_none());
    }

    #[test]
    fn v1_ciphertext_lengths_follow_buckets() {
        let l = AlgorithmId::CURRENT.lengths().unwrap();
        assert!(l.ciphertext_len_ok(256 + 16));
        assert!(l.ciphertext_len_ok(16384 + 16));
        assert!(!l.ciphertext_len_ok(16));
        assert!(!l.ciphertext_len_ok(300));
        assert!(!l.ciphertext_len_ok(65536 + 16));
    }
}
