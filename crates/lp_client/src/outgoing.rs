//! The sending side of the lifecycle.

use tracing::{debug, info, warn};

use lp_crypto::{encrypt_for_send, KeyPair, PublicKeyBytes};
use lp_proto::{Draft, Message, MessageState};
use lp_store::MessageStore;

use crate::{error::SendError, transport::Transport};

#[derive(Debug, Clone)]
pub struct SendOutcome {
    pub message: Message,
    /// `DeliveredToRecipient`, or `Persisted` when the transport failed.
    pub state: MessageState,
}

/// Seal, persist, and deliver one message.
///
/// Any error means the record was never written; the state reached before
/// failing is `PersistRejected`. A transport failure is not an error: the
/// record is stored and the outcome stays `Persisted`.
pub async fn send_message(
    draft: &Draft,
    sender_keys: Option<&KeyPair>,
    recipient_public: Option<&PublicKeyBytes>,
    store: &dyn MessageStore,
    transport: &dyn Transport,
) -> Result<SendOutcome, SendError> {
    let state = MessageState::Composed;

    let sealed = match encrypt_for_send(&draft.body, sender_keys, recipient_public) {
        Ok(sealed) => sealed,
        Err(e) => {
            state.transition(MessageState::PersistRejected)?;
            warn!(sender = %draft.sender_id, recipient = %draft.recipient_id, "Send blocked: {e}");
            return Err(e.into());
        }
    };
    let message = Message::encrypted_from(draft, &sealed);
    let state = state.transition(MessageState::EnvelopesBuilt)?;

    let persisted = match message.check_persistable() {
        Ok(()) => store.upsert(&message).await.map_err(|e| e.to_string()),
        Err(e) => Err(e.to_string()),
    };
    if let Err(reason) = persisted {
        state.transition(MessageState::PersistRejected)?;
        warn!(id = %message.id, "Persist rejected: {reason}");
        return Err(SendError::PersistRejected(reason));
    }
    let state = state.transition(MessageState::Persisted)?;
    debug!(id = %message.id, "Message persisted");

    let state = match transport.deliver(&message).await {
        Ok(()) => state.transition(MessageState::DeliveredToRecipient)?,
        Err(e) => {
            warn!(id = %message.id, "Delivery failed, message stays persisted: {e}");
            state
        }
    };

    info!(id = %message.id, ?state, "Message sent");
    Ok(SendOutcome { message, state })
}
