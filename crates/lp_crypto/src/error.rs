use thiserror::Error;

/// Which side of a send a missing key belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyRole {
    Sender,
    Recipient,
}

impl std::fmt::Display for KeyRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            KeyRole::Sender => f.write_str("sender"),
            KeyRole::Recipient => f.write_str("recipient"),
        }
    }
}

/// Why a well-formed envelope could not be opened by this holder.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureReason {
    /// Envelope was sealed to a different public key.
    WrongKey,
    /// Tag mismatch: corrupted ciphertext or wrong key without a key id.
    Authentication,
    /// `algorithm_id` not implemented by this build.
    UnsupportedAlgorithm,
    /// Viewer is neither sender nor recipient, or holds no envelope for itself.
    NoEnvelopeForHolder,
    /// Decrypted bytes did not unpad to valid UTF-8 text.
    InvalidPlaintext,
}

impl std::fmt::Display for FailureReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            FailureReason::WrongKey => "envelope sealed to a different key",
            FailureReason::Authentication => "authentication tag mismatch",
            FailureReason::UnsupportedAlgorithm => "unsupported algorithm",
            FailureReason::NoEnvelopeForHolder => "no envelope for this holder",
            FailureReason::InvalidPlaintext => "invalid plaintext after unpadding",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Error)]
pub enum CryptoError {
    /// OS entropy source failed. Fatal, not retryable.
    #[error("Entropy source unavailable: {0}")]
    EntropyUnavailable(String),

    /// A public key needed to seal is absent or unusable. Blocks the send.
    #[error("{0} key unavailable")]
    KeyUnavailable(KeyRole),

    #[error("Plaintext too large: {len} bytes (max {max})")]
    PlaintextTooLarge { len: usize, max: usize },

    /// Structural violation: wrong lengths for the suite, empty fields, bad encoding.
    #[error("Malformed envelope: {0}")]
    Malformed(String),

    /// Right shape, but this holder cannot open it. Recoverable locally.
    #[error("Decryption failed: {0}")]
    DecryptionFailed(FailureReason),

    #[error("AEAD encryption failed")]
    AeadEncrypt,

    #[error("Invalid key material: {0}")]
    InvalidKey(String),

    #[error("Base64 decode error: {0}")]
    Base64Decode(#[from] base64::DecodeError),
}

impl CryptoError {
    /// True for the outcomes a viewer resolves with the fallback placeholder.
    pub fn is_recoverable_locally(&self) -> bool {
        matches!(self, CryptoError::DecryptionFailed(_) | CryptoError::Malformed(_))
    }
}
