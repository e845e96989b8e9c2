//! The persisted message record.
//!
//! Invariants:
//! - `encrypted == true` requires at least one structurally valid envelope.
//! - `content` and envelopes are mutually exclusive. The irrecoverable
//!   placeholder written by repair is plain content with envelopes cleared.
//!
//! The record is created by the sender's client, never mutated by the
//! recipient, and mutated at most once by repair.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use lp_crypto::SealedPair;

use crate::{
    codec::{self, EnvelopeSlot},
    lifecycle::LifecycleError,
};

/// Stored in place of content that no key-holder can ever recover.
pub const IRRECOVERABLE_PLACEHOLDER: &str = "🔒 This message was encrypted and cannot be recovered";

/// Placeholder strings earlier releases wrote for the same condition.
pub const LEGACY_PLACEHOLDERS: &[&str] = &["[Old encrypted message - content unavailable]"];

/// Shown to a viewer who cannot open a message. Never stored.
pub const UNDECRYPTABLE_PLACEHOLDER: &str = "[Unable to decrypt message]";

pub fn is_legacy_placeholder(content: &str) -> bool {
    LEGACY_PLACEHOLDERS.contains(&content)
}

/// Deterministic conversation id for a pair of participants (order-free).
pub fn conversation_id_for(a: &str, b: &str) -> String {
    let (first, second) = if a <= b { (a, b) } else { (b, a) };
    let mut hasher = blake3::Hasher::new();
    hasher.update(b"lockpost-conversation-v1\x00");
    hasher.update(first.as_bytes());
    hasher.update(b"\x00");
    hasher.update(second.as_bytes());
    hex::encode(&hasher.finalize().as_bytes()[..16])
}

/// What the sender typed, before any crypto.
#[derive(Debug, Clone)]
pub struct Draft {
    pub sender_id: String,
    pub recipient_id: String,
    pub conversation_id: String,
    pub body: String,
}

impl Draft {
    pub fn new(sender_id: impl Into<String>, recipient_id: impl Into<String>, body: impl Into<String>) -> Self {
        let sender_id = sender_id.into();
        let recipient_id = recipient_id.into();
        let conversation_id = conversation_id_for(&sender_id, &recipient_id);
        Self { sender_id, recipient_id, conversation_id, body: body.into() }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub id: String,
    pub sender_id: String,
    pub recipient_id: String,
    pub conversation_id: String,
    /// Plaintext mirror. Empty when `encrypted` and envelopes are present.
    #[serde(default)]
    pub content: String,
    pub encrypted: bool,
    /// Encoded recipient envelope.
    #[serde(default, with = "serde_bytes", skip_serializing_if = "Option::is_none")]
    pub encryption_data: Option<Vec<u8>>,
    /// Encoded sender self-envelope.
    #[serde(default, with = "serde_bytes", skip_serializing_if = "Option::is_none")]
    pub sender_encryption_data: Option<Vec<u8>>,
    pub created_at: DateTime<Utc>,
}

impl Message {
    /// Build the encrypted record from a draft and its sealed envelopes.
    /// The plaintext body is not copied into `content`.
    pub fn encrypted_from(draft: &Draft, sealed: &SealedPair) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            sender_id: draft.sender_id.clone(),
            recipient_id: draft.recipient_id.clone(),
            conversation_id: draft.conversation_id.clone(),
            content: String::new(),
            encrypted: true,
            encryption_data: Some(codec::encode(&sealed.recipient)),
            sender_encryption_data: Some(codec::encode(&sealed.sender)),
            created_at: Utc::now(),
        }
    }

    pub fn plaintext_from(draft: &Draft) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            sender_id: draft.sender_id.clone(),
            recipient_id: draft.recipient_id.clone(),
            conversation_id: draft.conversation_id.clone(),
            content: draft.body.clone(),
            encrypted: false,
            encryption_data: None,
            sender_encryption_data: None,
            created_at: Utc::now(),
        }
    }

    pub fn recipient_slot(&self) -> EnvelopeSlot {
        codec::classify_slot(self.encryption_data.as_deref())
    }

    pub fn sender_slot(&self) -> EnvelopeSlot {
        codec::classify_slot(self.sender_encryption_data.as_deref())
    }

    /// Flagged encrypted, but nothing anyone could open.
    pub fn is_corrupt(&self) -> bool {
        self.encrypted
            && self.recipient_slot().is_empty_or_corrupt()
            && self.sender_slot().is_empty_or_corrupt()
    }

    pub fn is_irrecoverable(&self) -> bool {
        !self.encrypted && self.content == IRRECOVERABLE_PLACEHOLDER
    }

    /// Gate for the send path: a record may only be written if it satisfies
    /// both invariants as produced by a client (repair writes go elsewhere).
    pub fn check_persistable(&self) -> Result<(), LifecycleError> {
        if !self.encrypted {
            if self.encryption_data.is_some() || self.sender_encryption_data.is_some() {
                return Err(LifecycleError::Invariant("plaintext record carries envelopes"));
            }
            return Ok(());
        }
        if !self.recipient_slot().is_valid() || !self.sender_slot().is_valid() {
            return Err(LifecycleError::Invariant("encrypted record without both envelopes"));
        }
        if !self.content.is_empty() {
            return Err(LifecycleError::Invariant("encrypted record carries plaintext content"));
        }
        Ok(())
    }
}
