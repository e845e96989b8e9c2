//! Read-only tally of what the message store holds.

use serde::Serialize;

use lp_proto::{
    message::{is_legacy_placeholder, IRRECOVERABLE_PLACEHOLDER},
    Message,
};

use crate::{
    error::StoreError,
    store::{MessageStore, ScanFilter},
};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct MessageCensus {
    pub total: u64,
    /// Encrypted with at least one structurally valid envelope.
    pub encrypted_with_envelope: u64,
    /// Encrypted with nothing openable; what repair exists to fix.
    pub encrypted_without_envelope: u64,
    pub plaintext_with_content: u64,
    pub plaintext_empty: u64,
    /// Current or legacy placeholder content, counted regardless of flags.
    pub placeholders: u64,
}

impl MessageCensus {
    fn count(&mut self, m: &Message) {
        self.total += 1;
        if m.content == IRRECOVERABLE_PLACEHOLDER || is_legacy_placeholder(&m.content) {
            self.placeholders += 1;
        }
        match (m.encrypted, m.content.is_empty()) {
            (true, _) if m.recipient_slot().is_valid() || m.sender_slot().is_valid() => {
                self.encrypted_with_envelope += 1
            }
            (true, _) => self.encrypted_without_envelope += 1,
            (false, false) => self.plaintext_with_content += 1,
            (false, true) => self.plaintext_empty += 1,
        }
    }
}

/// Stream the whole store in pages of `batch_size`.
pub async fn census(store: &dyn MessageStore, batch_size: usize) -> Result<MessageCensus, StoreError> {
    let batch_size = batch_size.max(1);
    let mut tally = MessageCensus::default();
    let mut cursor: Option<String> = None;
    loop {
        let page = store.scan(ScanFilter::All, cursor.as_deref(), batch_size).await?;
        let Some(last) = page.last() else { break };
        cursor = Some(last.id.clone());
        page.iter().for_each(|m| tally.count(m));
        if page.len() < batch_size {
            break;
        }
    }
    Ok(tally)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryMessageStore;
    use lp_proto::{message::LEGACY_PLACEHOLDERS, Draft};

    fn record(id: &str, encrypted: bool, content: &str) -> Message {
        let mut m = Message::plaintext_from(&Draft::new("a", "b", content));
        m.id = id.into();
        m.encrypted = encrypted;
        m
    }

    #[tokio::test]
    async fn tallies_each_class() {
        let store = MemoryMessageStore::new();
        store.upsert(&record("1", true, "")).await.unwrap();
        store.upsert(&record("2", false, "hi")).await.unwrap();
        store.upsert(&record("3", false, "")).await.unwrap();
        store.upsert(&record("4", false, LEGACY_PLACEHOLDERS[0])).await.unwrap();
        store.upsert(&record("5", false, IRRECOVERABLE_PLACEHOLDER)).await.unwrap();
        store.upsert(&record("6", false, " ")).await.unwrap();

        let c = census(&store, 2).await.unwrap();
        assert_eq!(
            c,
            MessageCensus {
                total: 6,
                encrypted_with_envelope: 0,
                encrypted_without_envelope: 1,
                plaintext_with_content: 4,
                plaintext_empty: 1,
                placeholders: 2,
            }
        );
    }
}
