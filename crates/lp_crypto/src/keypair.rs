//! Per-user keypair.
//!
//! Each *user* holds one long-lived X25519 keypair. The public half is
//! published so others can seal envelopes to it; the private half stays in
//! the owning client's key storage and is never serialised into an envelope
//! or handed to any transport.
//!
//! Rotation policy
//! ---------------
//! Keys are never rotated automatically. Replacing a keypair orphans every
//! self-envelope sealed to the old public key, so callers must get explicit
//! user confirmation before overwriting (see `lp_store::keystore`).
//! `version` increments on each confirmed replacement; envelopes carry a
//! key id so a future multi-key store could still pick the right secret.

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use chrono::{DateTime, Utc};
use rand::RngCore;
use serde::{de, Deserialize, Deserializer, Serialize, Serializer};
use x25519_dalek::{PublicKey as X25519Public, StaticSecret};
use zeroize::ZeroizeOnDrop;

use crate::error::CryptoError;

pub const KEY_LEN: usize = 32;

// ── Public key ───────────────────────────────────────────────────────────────

/// 32-byte X25519 public key, base64url-encoded on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PublicKeyBytes(pub [u8; KEY_LEN]);

impl Serialize for PublicKeyBytes {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_b64())
    }
}

impl<'de> Deserialize<'de> for PublicKeyBytes {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        PublicKeyBytes::from_b64(&s).map_err(de::Error::custom)
    }
}

impl PublicKeyBytes {
    pub fn as_bytes(&self) -> &[u8; KEY_LEN] {
        &self.0
    }

    pub fn to_b64(&self) -> String {
        URL_SAFE_NO_PAD.encode(self.0)
    }

    pub fn from_b64(s: &str) -> Result<Self, CryptoError> {
        let bytes = URL_SAFE_NO_PAD.decode(s)?;
        Self::from_slice(&bytes)
    }

    pub fn from_slice(bytes: &[u8]) -> Result<Self, CryptoError> {
        let arr: [u8; KEY_LEN] = bytes.try_into().map_err(|_| {
            CryptoError::InvalidKey(format!(
                "Public key must be {KEY_LEN} bytes, got {}",
                bytes.len()
            ))
        })?;
        Ok(Self(arr))
    }

    /// Short identifier carried in envelopes: first 8 bytes of BLAKE3, hex.
    pub fn key_id(&self) -> String {
        hex::encode(&blake3::hash(&self.0).as_bytes()[..8])
    }

    /// Human-readable fingerprint: BLAKE3 truncated to 20 bytes, hex in
    /// groups of 4, for out-of-band comparison.
    pub fn fingerprint(&self) -> String {
        let hash = blake3::hash(&self.0);
        let hex = hex::encode(&hash.as_bytes()[..20]);
        hex.as_bytes()
            .chunks(4)
            .map(|c| String::from_utf8_lossy(c).into_owned())
            .collect::<Vec<_>>()
            .join(" ")
    }

    pub(crate) fn to_x25519(self) -> X25519Public {
        X25519Public::from(self.0)
    }
}

// ── Keypair ──────────────────────────────────────────────────────────────────

/// A user's keypair.  Drop clears the secret via ZeroizeOnDrop.
#[derive(Clone, ZeroizeOnDrop)]
pub struct KeyPair {
    #[zeroize(skip)]
    pub public: PublicKeyBytes,
    secret_bytes: [u8; KEY_LEN],
    #[zeroize(skip)]
    generated_at: DateTime<Utc>,
    #[zeroize(skip)]
    version: u32,
}

impl KeyPair {
    /// Generate a fresh keypair from the OS entropy source.
    ///
    /// The only failure is an unavailable entropy source, which is fatal.
    pub fn generate() -> Result<Self, CryptoError> {
        let mut secret = [0u8; KEY_LEN];
        rand::rngs::OsRng
            .try_fill_bytes(&mut secret)
            .map_err(|e| CryptoError::EntropyUnavailable(e.to_string()))?;
        let kp = Self::from_secret_bytes(&secret, Utc::now(), 1);
        zeroize::Zeroize::zeroize(&mut secret);
        kp
    }

    /// Rebuild a keypair from stored secret bytes.
    pub fn from_secret_bytes(
        bytes: &[u8],
        generated_at: DateTime<Utc>,
        version: u32,
    ) -> Result<Self, CryptoError> {
        let arr: [u8; KEY_LEN] = bytes.try_into().map_err(|_| {
            CryptoError::InvalidKey(format!(
                "Private key must be {KEY_LEN} bytes, got {}",
                bytes.len()
            ))
        })?;
        let secret = StaticSecret::from(arr);
        let public = PublicKeyBytes(X25519Public::from(&secret).to_bytes());
        Ok(Self {
            public,
            secret_bytes: secret.to_bytes(),
            generated_at,
            version,
        })
    }

    pub fn secret_bytes(&self) -> &[u8; KEY_LEN] {
        &self.secret_bytes
    }

    pub(crate) fn static_secret(&self) -> StaticSecret {
        StaticSecret::from(self.secret_bytes)
    }

    pub fn generated_at(&self) -> DateTime<Utc> {
        self.generated_at
    }

    pub fn version(&self) -> u32 {
        self.version
    }

    /// Same keypair, relabelled as the successor of `previous`.
    pub fn succeeding(mut self, previous: &KeyPair) -> Self {
        self.version = previous.version.saturating_add(1);
        self
    }

    /// Same secret material, regardless of metadata.
    pub fn same_key_as(&self, other: &KeyPair) -> bool {
        let mut diff = 0u8;
        for (a, b) in self.secret_bytes.iter().zip(other.secret_bytes.iter()) {
            diff |= a ^ b;
        }
        diff == 0
    }
}

impl std::fmt::Debug for KeyPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyPair")
            .field("public", &self.public.to_b64())
            .field("version", &self.version)
            .field("generated_at", &self.generated_at)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_keys_are_distinct() {
        let a = KeyPair::generate().unwrap();
        let b = KeyPair::generate().unwrap();
        assert_ne!(a.public, b.public);
        assert!(!a.same_key_as(&b));
        assert_eq!(a.version(), 1);
    }

    #[test]
    fn secret_bytes_rebuild_same_public() {
        let a = KeyPair::generate().unwrap();
        let b = KeyPair::from_secret_bytes(a.secret_bytes(), a.generated_at(), 3).unwrap();
        assert_eq!(a.public, b.public);
        assert!(a.same_key_as(&b));
        assert_eq!(b.version(), 3);
    }

    #[test]
    fn public_b64_round_trip() {
        let a = KeyPair::generate().unwrap();
        let parsed = PublicKeyBytes::from_b64(&a.public.to_b64()).unwrap();
        assert_eq!(parsed, a.public);
        assert!(PublicKeyBytes::from_b64("AAAA").is_err());
    }

    #[test]
    fn public_key_serialises_as_base64_string() {
        let a = KeyPair::generate().unwrap();
        let json = serde_json::to_string(&a.public).unwrap();
        assert_eq!(json, format!("\"{}\"", a.public.to_b64()));
        let back: PublicKeyBytes = serde_json::from_str(&json).unwrap();
        assert_eq!(back, a.public);
        assert!(serde_json::from_str::<PublicKeyBytes>("\"AAAA\"").is_err());
    }

    #[test]
    fn debug_output_hides_secret() {
        let a = KeyPair::generate().unwrap();
        let dbg = format!("{a:?}");
        assert!(!dbg.contains(&hex::encode(a.secret_bytes())));
        assert!(!dbg.contains(&URL_SAFE_NO_PAD.encode(a.secret_bytes())));
    }

    #[test]
    fn fingerprint_is_grouped() {
        let a = KeyPair::generate().unwrap();
        let fp = a.public.fingerprint();
        assert_eq!(fp.split(' ').count(), 10);
        assert_eq!(a.public.key_id().len(), 16);
    }
}
