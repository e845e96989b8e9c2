//! The message-store seam.

use async_trait::async_trait;
use lp_proto::Message;

use crate::error::StoreError;

/// Which records a scan returns.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanFilter {
    All,
    Encrypted,
    /// Records flagged encrypted, plus any whose content is a legacy
    /// placeholder string. Everything else is never a repair target.
    RepairCandidates,
}

/// The only mutation repair ever performs, applied as one statement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessagePatch {
    pub encrypted: bool,
    pub content: String,
    /// Null out both envelope fields.
    pub clear_envelopes: bool,
}

#[async_trait]
pub trait MessageStore: Send + Sync {
    /// Insert or replace by id. `created_at` of an existing record is kept.
    async fn upsert(&self, message: &Message) -> Result<(), StoreError>;

    async fn get(&self, id: &str) -> Result<Option<Message>, StoreError>;

    /// Keyset page: records with `id > after`, ascending by id, at most `limit`.
    async fn scan(
        &self,
        filter: ScanFilter,
        after: Option<&str>,
        limit: usize,
    ) -> Result<Vec<Message>, StoreError>;

    /// Returns `false` when no record has that id.
    async fn apply_patch(&self, id: &str, patch: &MessagePatch) -> Result<bool, StoreError>;

    async fn delete(&self, id: &str) -> Result<bool, StoreError>;
}
