//! In-process message store.

use std::{collections::BTreeMap, ops::Bound};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;

use lp_proto::{message::is_legacy_placeholder, Message};

use crate::{
    backup::{BackupReason, BackupStats, BackupStore, MessageBackup},
    error::StoreError,
    store::{MessagePatch, MessageStore, ScanFilter},
};

#[derive(Default)]
pub struct MemoryMessageStore {
    records: RwLock<BTreeMap<String, Message>>,
    backups: RwLock<BTreeMap<String, MessageBackup>>,
}

impl MemoryMessageStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.records.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.read().is_empty()
    }
}

fn matches(filter: ScanFilter, message: &Message) -> bool {
    match filter {
        ScanFilter::All => true,
        ScanFilter::Encrypted => message.encrypted,
        ScanFilter::RepairCandidates => message.encrypted || is_legacy_placeholder(&message.content),
    }
}

#[async_trait]
impl MessageStore for MemoryMessageStore {
    async fn upsert(&self, message: &Message) -> Result<(), StoreError> {
        let mut records = self.records.write();
        let mut message = message.clone();
        if let Some(existing) = records.get(&message.id) {
            message.created_at = existing.created_at;
        }
        records.insert(message.id.clone(), message);
        Ok(())
    }

    async fn get(&self, id: &str) -> Result<Option<Message>, StoreError> {
        Ok(self.records.read().get(id).cloned())
    }

    async fn scan(
        &self,
        filter: ScanFilter,
        after: Option<&str>,
        limit: usize,
    ) -> Result<Vec<Message>, StoreError> {
        let lower = match after {
            Some(id) => Bound::Excluded(id),
            None => Bound::Unbounded,
        };
        let records = self.records.read();
        Ok(records
            .range::<str, _>((lower, Bound::Unbounded))
            .map(|(_, m)| m)
            .filter(|m| matches(filter, m))
            .take(limit)
            .cloned()
            .collect())
    }

    async fn apply_patch(&self, id: &str, patch: &MessagePatch) -> Result<bool, StoreError> {
        let mut records = self.records.write();
        let Some(message) = records.get_mut(id) else {
            return Ok(false);
        };
        message.encrypted = patch.encrypted;
        message.content = patch.content.clone();
        if patch.clear_envelopes {
            message.encryption_data = None;
            message.sender_encryption_data = None;
        }
        Ok(true)
    }

    async fn delete(&self, id: &str) -> Result<bool, StoreError> {
        Ok(self.records.write().remove(id).is_some())
    }
}

#[async_trait]
impl BackupStore for MemoryMessageStore {
    async fn backup(&self, message: &Message, reason: BackupReason) -> Result<bool, StoreError> {
        let mut backups = self.backups.write();
        if backups.contains_key(&message.id) {
            return Ok(false);
        }
        backups.insert(message.id.clone(), MessageBackup::of(message, reason));
        Ok(true)
    }

    async fn get_backup(
        &self,
        original_message_id: &str,
    ) -> Result<Option<MessageBackup>, StoreError> {
        Ok(self.backups.read().get(original_message_id).cloned())
    }

    async fn restorable_for_user(
        &self,
        user_id: &str,
        limit: usize,
    ) -> Result<Vec<MessageBackup>, StoreError> {
        let mut found: Vec<MessageBackup> = self
            .backups
            .read()
            .values()
            .filter(|b| b.restorable && b.involves(user_id))
            .cloned()
            .collect();
        found.sort_by(|a, b| b.original_created_at.cmp(&a.original_created_at));
        found.truncate(limit);
        Ok(found)
    }

    async fn set_restorable(
        &self,
        original_message_id: &str,
        restorable: bool,
    ) -> Result<bool, StoreError> {
        let mut backups = self.backups.write();
        let Some(backup) = backups.get_mut(original_message_id) else {
            return Ok(false);
        };
        backup.restorable = restorable;
        Ok(true)
    }

    async fn backup_stats(&self) -> Result<BackupStats, StoreError> {
        let backups = self.backups.read();
        let mut stats = BackupStats::default();
        for b in backups.values() {
            stats.total += 1;
            stats.restorable += u64::from(b.restorable);
            stats.encrypted += u64::from(b.encrypted);
            *stats.by_reason.entry(b.reason.as_str().to_string()).or_insert(0) += 1;
            stats.oldest = Some(stats.oldest.map_or(b.backed_up_at, |t| t.min(b.backed_up_at)));
            stats.newest = Some(stats.newest.map_or(b.backed_up_at, |t| t.max(b.backed_up_at)));
        }
        Ok(stats)
    }

    async fn cleanup_backups(&self, cutoff: DateTime<Utc>) -> Result<u64, StoreError> {
        let mut backups = self.backups.write();
        let before = backups.len();
        backups.retain(|_, b| b.restorable || b.backed_up_at >= cutoff);
        Ok((before - backups.len()) as u64)
    }
}
