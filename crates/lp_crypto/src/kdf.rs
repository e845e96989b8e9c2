//! Key derivation.
//!
//! `envelope_key` - HKDF-SHA256 over an X25519 shared secret, salted with
//! both public halves so the derived key is bound to this exact exchange.

use hkdf::Hkdf;
use sha2::Sha256;
use zeroize::Zeroizing;

use crate::error::CryptoError;

const ENVELOPE_INFO: &[u8] = b"lockpost-envelope-v1";

/// Derive the 32-byte AEAD key for one envelope.
pub fn envelope_key(
    shared_secret: &[u8; 32],
    ephemeral_public: &[u8; 32],
    recipient_public: &[u8; 32],
) -> Result<Zeroizing<[u8; 32]>, CryptoError> {
    let mut salt = [0u8; 64];
    salt[..32].copy_from_slice(ephemeral_public);
    salt[32..].copy_from_slice(recipient_public);

    let hk = Hkdf::<Sha256>::new(Some(&salt), shared_secret);
    let mut key = Zeroizing::new([0u8; 32]);
    hk.expand(ENVELOPE_INFO, key.as_mut())
        .map_err(|e| CryptoError::InvalidKey(e.to_string()))?;
    Ok(key)
}
