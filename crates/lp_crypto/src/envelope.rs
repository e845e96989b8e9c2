//! Structured envelope: everything one holder needs to open one message.
//!
//! The envelope never contains private key material: only the sender's
//! ephemeral *public* key, the nonce, the ciphertext, the suite id and an
//! optional key id naming the recipient public key it was sealed to.
//!
//! Byte fields are kept as `Vec<u8>` rather than fixed arrays because decoded
//! storage data may be truncated or padded; `shape()` is the single place
//! that decides whether the lengths match the suite.

use serde::{Deserialize, Serialize};

use crate::suite::AlgorithmId;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Envelope {
    pub algorithm: AlgorithmId,
    /// Sender-generated ephemeral X25519 public key (key-exchange artifact).
    pub ephemeral_public: Vec<u8>,
    /// Unique per envelope.
    pub nonce: Vec<u8>,
    /// Padded plaintext sealed with the suite AEAD, tag included.
    pub ciphertext: Vec<u8>,
    /// `PublicKeyBytes::key_id` of the key this was sealed to.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key_id: Option<String>,
}

/// Outcome of the key-free structural check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Shape {
    Valid,
    /// Suite id unknown to this build; lengths cannot be judged.
    UnknownSuite(u16),
    Malformed(String),
}

impl Envelope {
    /// Check field presence and lengths against the suite. Needs no key.
    pub fn shape(&self) -> Shape {
        let Some(lengths) = self.algorithm.lengths() else {
            return Shape::UnknownSuite(self.algorithm.as_u16());
        };
        if self.ciphertext.is_empty() || self.ephemeral_public.is_empty() || self.nonce.is_empty() {
            return Shape::Malformed("empty envelope field".into());
        }
        if self.ephemeral_public.len() != lengths.ephemeral_key {
            return Shape::Malformed(format!(
                "ephemeral key is {} bytes, suite requires {}",
                self.ephemeral_public.len(),
                lengths.ephemeral_key
            ));
        }
        if self.nonce.len() != lengths.nonce {
            return Shape::Malformed(format!(
                "nonce is {} bytes, suite requires {}",
                self.nonce.len(),
                lengths.nonce
            ));
        }
        if !lengths.ciphertext_len_ok(self.ciphertext.len()) {
            return Shape::Malformed(format!(
                "ciphertext length {} is not a padded bucket plus tag",
                self.ciphertext.len()
            ));
        }
        Shape::Valid
    }

    pub fn is_structurally_valid(&self) -> bool {
        self.shape() == Shape::Valid
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn well_formed() -> Envelope {
        Envelope {
            algorithm: AlgorithmId::CURRENT,
            ephemeral_public: vec![9u8; 32],
            nonce: vec![1u8; 24],
            ciphertext: vec![0u8; 256 + 16],
            key_id: None,
        }
    }

    #[test]
    fn correct_lengths_are_valid() {
        assert!(well_formed().is_structurally_valid());
    }

    #[test]
    fn each_field_is_checked() {
        let mut e = well_formed();
        e.nonce.truncate(12);
        assert!(matches!(e.shape(), Shape::Malformed(_)));

        let mut e = well_formed();
        e.ephemeral_public.push(0);
        assert!(matches!(e.shape(), Shape::Malformed(_)));

        let mut e = well_formed();
        e.ciphertext.clear();
        assert!(matches!(e.shape(), Shape::Malformed(_)));

        let mut e = well_formed();
        e.ciphertext.pop();
        assert!(matches!(e.shape(), Shape::Malformed(_)));
    }

    #[test]
    fn unknown_suite_is_not_malformed() {
        let mut e = well_formed();
        e.algorithm = AlgorithmId::Unrecognized(42);
        assert_eq!(e.shape(), Shape::UnknownSuite(42));
        assert!(!e.is_structurally_valid());
    }
}
