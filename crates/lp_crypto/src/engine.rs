//! Message crypto engine.
//!
//! One plaintext is sealed twice by the same pure function: once to the
//! recipient's public key and once to the sender's own public key (the
//! self-envelope that lets the sender re-read their history). The two calls
//! share no state, so a failure in one cannot leave the other half-built.
//!
//! Sealing (suite 1):
//!   EK            = fresh X25519 keypair
//!   DH            = X25519(EK_priv, PK_to)            (must be contributory)
//!   K             = HKDF-SHA256(salt = EK_pub || PK_to, ikm = DH, info)
//!   AAD           = suite_id(u16 BE) || EK_pub || PK_to
//!   ciphertext    = XChaCha20-Poly1305(K, nonce, pad(plaintext), AAD)

use tracing::debug;

use crate::{
    aead,
    envelope::{Envelope, Shape},
    error::{CryptoError, FailureReason, KeyRole},
    kdf,
    keypair::{KeyPair, PublicKeyBytes},
    padding,
    suite::AlgorithmId,
};

/// Output of `encrypt_for_send`: two independently decryptable envelopes.
#[derive(Debug, Clone)]
pub struct SealedPair {
    /// Opens only with the recipient's private key.
    pub recipient: Envelope,
    /// Opens only with the sender's private key.
    pub sender: Envelope,
}

fn aad(algorithm: AlgorithmId, ephemeral_public: &[u8; 32], to: &[u8; 32]) -> Vec<u8> {
    let mut out = Vec::with_capacity(2 + 64);
    out.extend_from_slice(&algorithm.as_u16().to_be_bytes());
    out.extend_from_slice(ephemeral_public);
    out.extend_from_slice(to);
    out
}

/// Seal `plaintext` to a single public key.
pub fn seal(plaintext: &str, to: &PublicKeyBytes) -> Result<Envelope, CryptoError> {
    let padded = zeroize::Zeroizing::new(padding::pad_to_bucket(plaintext.as_bytes())?);

    let ephemeral = KeyPair::generate()?;
    let shared = ephemeral.static_secret().diffie_hellman(&to.to_x25519());
    if !shared.was_contributory() {
        return Err(CryptoError::InvalidKey("low-order public key".into()));
    }

    let key = kdf::envelope_key(shared.as_bytes(), ephemeral.public.as_bytes(), to.as_bytes())?;
    let nonce = aead::generate_nonce()?;
    let algorithm = AlgorithmId::CURRENT;
    let ciphertext = aead::seal(
        &key,
        &nonce,
        &padded,
        &aad(algorithm, ephemeral.public.as_bytes(), to.as_bytes()),
    )?;

    Ok(Envelope {
        algorithm,
        ephemeral_public: ephemeral.public.0.to_vec(),
        nonce: nonce.to_vec(),
        ciphertext,
        key_id: Some(to.key_id()),
    })
}

/// Produce the recipient envelope and the sender's self-envelope.
///
/// Both public keys are checked before anything is sealed: a missing or
/// unusable key yields `KeyUnavailable` and no envelope at all.
pub fn encrypt_for_send(
    plaintext: &str,
    sender: Option<&KeyPair>,
    recipient_public: Option<&PublicKeyBytes>,
) -> Result<SealedPair, CryptoError> {
    let sender = sender.ok_or(CryptoError::KeyUnavailable(KeyRole::Sender))?;
    let recipient_public =
        recipient_public.ok_or(CryptoError::KeyUnavailable(KeyRole::Recipient))?;

    if plaintext.len() > padding::MAX_PLAINTEXT_LEN {
        return Err(CryptoError::PlaintextTooLarge {
            len: plaintext.len(),
            max: padding::MAX_PLAINTEXT_LEN,
        });
    }

    let recipient = seal(plaintext, recipient_public).map_err(|e| match e {
        CryptoError::InvalidKey(_) => CryptoError::KeyUnavailable(KeyRole::Recipient),
        other => other,
    })?;
    let sender = seal(plaintext, &sender.public).map_err(|e| match e {
        CryptoError::InvalidKey(_) => CryptoError::KeyUnavailable(KeyRole::Sender),
        other => other,
    })?;

    Ok(SealedPair { recipient, sender })
}

/// Open an envelope with the holder's keypair.
///
/// `Malformed` means the envelope is structurally broken (corrupt data);
/// `DecryptionFailed` means it is well-formed but not openable by this
/// holder. Neither is fatal to the caller.
pub fn decrypt(envelope: &Envelope, holder: &KeyPair) -> Result<String, CryptoError> {
    let result = open_envelope(envelope, holder);
    if let Err(ref e) = result {
        debug!(error = %e, algorithm = %envelope.algorithm, "envelope not opened");
    }
    result
}

fn open_envelope(envelope: &Envelope, holder: &KeyPair) -> Result<String, CryptoError> {
    match envelope.shape() {
        Shape::Valid => {}
        Shape::UnknownSuite(_) => {
            return Err(CryptoError::DecryptionFailed(FailureReason::UnsupportedAlgorithm))
        }
        Shape::Malformed(reason) => return Err(CryptoError::Malformed(reason)),
    }

    if let Some(ref key_id) = envelope.key_id {
        if *key_id != holder.public.key_id() {
            return Err(CryptoError::DecryptionFailed(FailureReason::WrongKey));
        }
    }

    let ephemeral = PublicKeyBytes::from_slice(&envelope.ephemeral_public)
        .map_err(|e| CryptoError::Malformed(e.to_string()))?;
    let nonce: [u8; aead::NONCE_LEN] = envelope
        .nonce
        .as_slice()
        .try_into()
        .map_err(|_| CryptoError::Malformed("nonce length".into()))?;

    let shared = holder.static_secret().diffie_hellman(&ephemeral.to_x25519());
    if !shared.was_contributory() {
        return Err(CryptoError::DecryptionFailed(FailureReason::Authentication));
    }
    let key = kdf::envelope_key(shared.as_bytes(), ephemeral.as_bytes(), holder.public.as_bytes())?;

    let padded = aead::open(
        &key,
        &nonce,
        &envelope.ciphertext,
        &aad(envelope.algorithm, ephemeral.as_bytes(), holder.public.as_bytes()),
    )
    .ok_or(CryptoError::DecryptionFailed(FailureReason::Authentication))?;

    let body = padding::unpad(&padded)
        .ok_or(CryptoError::DecryptionFailed(FailureReason::InvalidPlaintext))?;
    String::from_utf8(body.to_vec())
        .map_err(|_| CryptoError::DecryptionFailed(FailureReason::InvalidPlaintext))
}
