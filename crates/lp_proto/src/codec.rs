//! Envelope codec - storage and wire representation of an `Envelope`.
//!
//! Format (format version 1): compact JSON, byte fields base64url without
//! padding.
//!
//!   {"v":1,"alg":1,"epk":"…","nonce":"…","ct":"…","kid":"…"}
//!
//! `alg` is the cipher suite and is carried verbatim even when this build
//! does not know it, so stored envelopes of a newer suite survive a
//! decode/encode cycle untouched.

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use serde::{Deserialize, Serialize};

use lp_crypto::{envelope::Shape, AlgorithmId, CryptoError, Envelope};

pub const FORMAT_VERSION: u8 = 1;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum CodecError {
    #[error("Malformed envelope: {0}")]
    Malformed(String),
}

impl From<CodecError> for CryptoError {
    fn from(e: CodecError) -> Self {
        match e {
            CodecError::Malformed(reason) => CryptoError::Malformed(reason),
        }
    }
}

#[derive(Serialize, Deserialize)]
struct WireEnvelope {
    v: u8,
    alg: u16,
    epk: String,
    nonce: String,
    ct: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    kid: Option<String>,
}

pub fn encode(envelope: &Envelope) -> Vec<u8> {
    let wire = WireEnvelope {
        v: FORMAT_VERSION,
        alg: envelope.algorithm.as_u16(),
        epk: URL_SAFE_NO_PAD.encode(&envelope.ephemeral_public),
        nonce: URL_SAFE_NO_PAD.encode(&envelope.nonce),
        ct: URL_SAFE_NO_PAD.encode(&envelope.ciphertext),
        kid: envelope.key_id.clone(),
    };
    // Serialising a struct of strings and integers cannot fail.
    serde_json::to_vec(&wire).unwrap_or_default()
}

pub fn decode(bytes: &[u8]) -> Result<Envelope, CodecError> {
    if bytes.is_empty() {
        return Err(CodecError::Malformed("empty input".into()));
    }
    let wire: WireEnvelope =
        serde_json::from_slice(bytes).map_err(|e| CodecError::Malformed(e.to_string()))?;
    if wire.v != FORMAT_VERSION {
        return Err(CodecError::Malformed(format!("unknown format version {}", wire.v)));
    }
    let field = |name: &str, s: &str| {
        URL_SAFE_NO_PAD
            .decode(s)
            .map_err(|e| CodecError::Malformed(format!("{name}: {e}")))
    };
    Ok(Envelope {
        algorithm: AlgorithmId::from(wire.alg),
        ephemeral_public: field("epk", &wire.epk)?,
        nonce: field("nonce", &wire.nonce)?,
        ciphertext: field("ct", &wire.ct)?,
        key_id: wire.kid,
    })
}

/// True iff every field is present with the length its suite mandates.
pub fn is_structurally_valid(envelope: &Envelope) -> bool {
    envelope.is_structurally_valid()
}

/// What a stored envelope field holds, judged without any key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EnvelopeSlot {
    /// Field missing, empty, or a legacy empty placeholder (`null`, `{}`).
    Absent,
    Valid(Envelope),
    /// Well-formed, but the suite is unknown to this build.
    UnknownSuite(Envelope),
    Malformed(String),
}

impl EnvelopeSlot {
    pub fn is_valid(&self) -> bool {
        matches!(self, EnvelopeSlot::Valid(_))
    }

    /// Absent or malformed: carries nothing anyone could ever open.
    pub fn is_empty_or_corrupt(&self) -> bool {
        matches!(self, EnvelopeSlot::Absent | EnvelopeSlot::Malformed(_))
    }
}

pub fn classify_slot(stored: Option<&[u8]>) -> EnvelopeSlot {
    let Some(bytes) = stored else {
        return EnvelopeSlot::Absent;
    };
    let trimmed = std::str::from_utf8(bytes).map(str::trim).unwrap_or("-");
    if bytes.is_empty() || matches!(trimmed, "" | "null" | "{}") {
        return EnvelopeSlot::Absent;
    }
    match decode(bytes) {
        Err(CodecError::Malformed(reason)) => EnvelopeSlot::Malformed(reason),
        Ok(envelope) => match envelope.shape() {
            Shape::Valid => EnvelopeSlot::Valid(envelope),
            Shape::UnknownSuite(_) => EnvelopeSlot::UnknownSuite(envelope),
            Shape::Malformed(reason) => EnvelopeSlot::Malformed(reason),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lp_crypto::{seal, KeyPair};

    fn sealed() -> Envelope {
        let kp = KeyPair::generate().unwrap();
        seal("codec test", &kp.public).unwrap()
    }

    #[test]
    fn decode_restores_every_field() {
        let env = sealed();
        let decoded = decode(&encode(&env)).unwrap();
        assert_eq!(decoded, env);
        assert!(is_structurally_valid(&decoded));
    }

    #[test]
    fn garbage_is_malformed() {
        assert!(matches!(decode(b""), Err(CodecError::Malformed(_))));
        assert!(matches!(decode(b"not json"), Err(CodecError::Malformed(_))));
        assert!(matches!(
            decode(br#"{"v":1,"alg":1,"epk":"!!","nonce":"","ct":""}"#),
            Err(CodecError::Malformed(_))
        ));
        assert!(matches!(
            decode(br#"{"v":9,"alg":1,"epk":"","nonce":"","ct":""}"#),
            Err(CodecError::Malformed(_))
        ));
    }

    #[test]
    fn unknown_suite_survives_round_trip() {
        let mut env = sealed();
        env.algorithm = AlgorithmId::Unrecognized(300);
        let bytes = encode(&env);
        assert_eq!(decode(&bytes).unwrap().algorithm, AlgorithmId::Unrecognized(300));
        assert!(matches!(classify_slot(Some(&bytes)), EnvelopeSlot::UnknownSuite(_)));
    }

    #[test]
    fn slot_classification() {
        assert_eq!(classify_slot(None), EnvelopeSlot::Absent);
        assert_eq!(classify_slot(Some(b"")), EnvelopeSlot::Absent);
        assert_eq!(classify_slot(Some(b"null")), EnvelopeSlot::Absent);
        assert_eq!(classify_slot(Some(b" {} ")), EnvelopeSlot::Absent);
        assert!(classify_slot(Some(b"{\"v\":1}")).is_empty_or_corrupt());

        let mut short = sealed();
        short.nonce.truncate(4);
        assert!(matches!(classify_slot(Some(&encode(&short))), EnvelopeSlot::Malformed(_)));

        assert!(classify_slot(Some(&encode(&sealed()))).is_valid());
    }

    mod wire {
        use super::*;
        use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
        use lp_crypto::encrypt_for_send;
        use proptest::prelude::*;

        fn contains(haystack: &[u8], needle: &[u8]) -> bool {
            haystack.windows(needle.len()).any(|w| w == needle)
        }

        proptest! {
            #![proptest_config(ProptestConfig::with_cases(32))]

            #[test]
            fn encoded_envelopes_leak_neither_plaintext_nor_keys(plaintext in "[a-zA-Z0-9 ]{24,200}") {
                let sender = KeyPair::generate().unwrap();
                let recipient = KeyPair::generate().unwrap();
                let sealed = encrypt_for_send(&plaintext, Some(&sender), Some(&recipient.public)).unwrap();
                for env in [&sealed.recipient, &sealed.sender] {
                    let wire = encode(env);
                    prop_assert!(!contains(&wire, plaintext.as_bytes()));
                    for secret in [sender.secret_bytes(), recipient.secret_bytes()] {
                        prop_assert!(!contains(&wire, secret));
                        prop_assert!(!contains(&wire, URL_SAFE_NO_PAD.encode(secret).as_bytes()));
                        prop_assert!(!contains(&wire, hex::encode(secret).as_bytes()));
                    }
                }
            }
        }
    }
}
