//! Message lifecycle.
//!
//! ```text
//! Composed ──► EnvelopesBuilt ──► Persisted ──► DeliveredToRecipient ──► DecryptedOk
//!    │               │                                    │
//!    └───────────────┴──► PersistRejected                 └──► DecryptionFailedFallback
//! ```
//!
//! `DecryptionFailedFallback` is viewer-local: re-entering it is allowed and
//! never touches stored ciphertext.

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageState {
    Composed,
    EnvelopesBuilt,
    Persisted,
    DeliveredToRecipient,
    DecryptedOk,
    DecryptionFailedFallback,
    PersistRejected,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum LifecycleError {
    #[error("Illegal transition {from:?} -> {to:?}")]
    IllegalTransition { from: MessageState, to: MessageState },

    #[error("Record invariant violated: {0}")]
    Invariant(&'static str),
}

impl MessageState {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            MessageState::DecryptedOk
                | MessageState::DecryptionFailedFallback
                | MessageState::PersistRejected
        )
    }

    pub fn can_transition_to(self, next: MessageState) -> bool {
        use MessageState::*;
        matches!(
            (self, next),
            (Composed, EnvelopesBuilt)
                | (Composed, PersistRejected)
                | (EnvelopesBuilt, Persisted)
                | (EnvelopesBuilt, PersistRejected)
                | (Persisted, DeliveredToRecipient)
                | (DeliveredToRecipient, DecryptedOk)
                | (DeliveredToRecipient, DecryptionFailedFallback)
                | (DecryptionFailedFallback, DecryptionFailedFallback)
        )
    }

    pub fn transition(self, next: MessageState) -> Result<MessageState, LifecycleError> {
        if self.can_transition_to(next) {
            Ok(next)
        } else {
            Err(LifecycleError::IllegalTransition { from: self, to: next })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::MessageState::*;
    use super::*;

    #[test]
    fn happy_path_is_legal() {
        let s = Composed
            .transition(EnvelopesBuilt)
            .and_then(|s| s.transition(Persisted))
            .and_then(|s| s.transition(DeliveredToRecipient))
            .and_then(|s| s.transition(DecryptedOk))
            .unwrap();
        assert!(s.is_terminal());
    }

    #[test]
    fn rejected_is_terminal_and_never_persists() {
        assert!(Composed.can_transition_to(PersistRejected));
        assert!(PersistRejected.is_terminal());
        assert!(!PersistRejected.can_transition_to(Persisted));
        assert!(!Composed.can_transition_to(Persisted));
    }

    #[test]
    fn fallback_is_idempotent_and_final() {
        assert_eq!(
            DecryptionFailedFallback.transition(DecryptionFailedFallback),
            Ok(DecryptionFailedFallback)
        );
        assert!(DecryptionFailedFallback.transition(DecryptedOk).is_err());
        assert!(DecryptedOk.transition(DecryptionFailedFallback).is_err());
    }
}
