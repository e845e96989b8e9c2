//! lp_crypto - Lockpost cryptographic core
//!
//! # Design principles
//! - NO custom crypto; all primitives come from audited Rust crates.
//! - Zeroize all secret material on drop.
//! - Keys are explicit parameters of every call; there is no ambient
//!   "current user" state anywhere in this crate.
//!
//! # Module layout
//! - `keypair`  - per-user X25519 keypair, generation, fingerprints
//! - `suite`    - cipher suite identifiers and the lengths each one mandates
//! - `envelope` - structured envelope and its key-free shape check
//! - `padding`  - length-prefixed bucket padding applied before sealing
//! - `aead`     - XChaCha20-Poly1305 seal/open with an explicit nonce
//! - `kdf`      - HKDF-SHA256 envelope key derivation
//! - `engine`   - `encrypt_for_send` / `decrypt`
//! - `error`    - unified error type

pub mod aead;
pub mod engine;
pub mod envelope;
pub mod error;
pub mod kdf;
pub mod keypair;
pub mod padding;
pub mod suite;

#[cfg(test)]
mod proptests;

pub use engine::{decrypt, encrypt_for_send, seal, SealedPair};
pub use envelope::Envelope;
pub use error::{CryptoError, FailureReason, KeyRole};
pub use keypair::{KeyPair, PublicKeyBytes};
pub use suite::AlgorithmId;
