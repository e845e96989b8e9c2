//! Message backups.
//!
//! A backup is a full copy of a message record taken before something
//! destroys part of it. There is at most one backup per original message id:
//! asking for a second one is a no-op, so backup passes can be re-run freely.
//! Backups flagged restorable are never removed by cleanup.

use std::{collections::BTreeMap, fmt, str::FromStr};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::info;

use lp_proto::Message;

use crate::{
    error::StoreError,
    store::{MessageStore, ScanFilter},
};

pub const DEFAULT_RESTORABLE_LIMIT: usize = 20;
pub const DEFAULT_RETENTION_DAYS: i64 = 90;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackupReason {
    /// Taken before repair strips a record's envelopes.
    EncryptionMigration,
    KeyRotation,
    ManualBackup,
    RecoveryPreparation,
}

impl BackupReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            BackupReason::EncryptionMigration => "encryption_migration",
            BackupReason::KeyRotation => "key_rotation",
            BackupReason::ManualBackup => "manual_backup",
            BackupReason::RecoveryPreparation => "recovery_preparation",
        }
    }
}

impl fmt::Display for BackupReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BackupReason {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "encryption_migration" => Ok(BackupReason::EncryptionMigration),
            "key_rotation" => Ok(BackupReason::KeyRotation),
            "manual_backup" => Ok(BackupReason::ManualBackup),
            "recovery_preparation" => Ok(BackupReason::RecoveryPreparation),
            other => Err(StoreError::Corrupt(format!("unknown backup reason '{other}'"))),
        }
    }
}

/// Copy of a message record as it was when backed up.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageBackup {
    pub original_message_id: String,
    pub sender_id: String,
    pub recipient_id: String,
    pub conversation_id: String,
    pub content: String,
    pub encrypted: bool,
    #[serde(with = "serde_bytes", default, skip_serializing_if = "Option::is_none")]
    pub encryption_data: Option<Vec<u8>>,
    #[serde(with = "serde_bytes", default, skip_serializing_if = "Option::is_none")]
    pub sender_encryption_data: Option<Vec<u8>>,
    pub original_created_at: DateTime<Utc>,
    pub reason: BackupReason,
    pub backed_up_at: DateTime<Utc>,
    pub restorable: bool,
}

impl MessageBackup {
    pub fn of(message: &Message, reason: BackupReason) -> Self {
        Self {
            original_message_id: message.id.clone(),
            sender_id: message.sender_id.clone(),
            recipient_id: message.recipient_id.clone(),
            conversation_id: message.conversation_id.clone(),
            content: message.content.clone(),
            encrypted: message.encrypted,
            encryption_data: message.encryption_data.clone(),
            sender_encryption_data: message.sender_encryption_data.clone(),
            original_created_at: message.created_at,
            reason,
            backed_up_at: Utc::now(),
            restorable: true,
        }
    }

    pub fn involves(&self, user_id: &str) -> bool {
        self.sender_id == user_id || self.recipient_id == user_id
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BackupStats {
    pub total: u64,
    pub restorable: u64,
    pub encrypted: u64,
    pub by_reason: BTreeMap<String, u64>,
    pub oldest: Option<DateTime<Utc>>,
    pub newest: Option<DateTime<Utc>>,
}

#[async_trait]
pub trait BackupStore: Send + Sync {
    /// Store a backup of `message`. Returns `false` when one already exists
    /// for that id; the existing backup is left as it is.
    async fn backup(&self, message: &Message, reason: BackupReason) -> Result<bool, StoreError>;

    async fn get_backup(&self, original_message_id: &str)
        -> Result<Option<MessageBackup>, StoreError>;

    /// Restorable backups the user sent or received, newest original first.
    async fn restorable_for_user(
        &self,
        user_id: &str,
        limit: usize,
    ) -> Result<Vec<MessageBackup>, StoreError>;

    /// Returns `false` when no backup has that id.
    async fn set_restorable(
        &self,
        original_message_id: &str,
        restorable: bool,
    ) -> Result<bool, StoreError>;

    async fn backup_stats(&self) -> Result<BackupStats, StoreError>;

    /// Delete non-restorable backups taken before `cutoff`.
    async fn cleanup_backups(&self, cutoff: DateTime<Utc>) -> Result<u64, StoreError>;
}

/// Totals of one backup pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct BackupRun {
    pub scanned: u64,
    pub backed_up: u64,
    pub skipped: u64,
}

/// Back up every encrypted message not yet backed up.
pub async fn backup_all_encrypted(
    messages: &dyn MessageStore,
    backups: &dyn BackupStore,
    batch_size: usize,
) -> Result<BackupRun, StoreError> {
    let run = backup_pass(messages, backups, batch_size, ScanFilter::Encrypted, |_| true).await?;
    info!(
        scanned = run.scanned,
        backed_up = run.backed_up,
        skipped = run.skipped,
        "Encrypted message backup finished"
    );
    Ok(run)
}

/// Back up every message `user_id` sent or received.
pub async fn backup_user_messages(
    messages: &dyn MessageStore,
    backups: &dyn BackupStore,
    user_id: &str,
    batch_size: usize,
) -> Result<BackupRun, StoreError> {
    let run = backup_pass(messages, backups, batch_size, ScanFilter::All, |m| {
        m.sender_id == user_id || m.recipient_id == user_id
    })
    .await?;
    info!(
        user_id,
        scanned = run.scanned,
        backed_up = run.backed_up,
        skipped = run.skipped,
        "User message backup finished"
    );
    Ok(run)
}

async fn backup_pass(
    messages: &dyn MessageStore,
    backups: &dyn BackupStore,
    batch_size: usize,
    filter: ScanFilter,
    wanted: impl Fn(&Message) -> bool + Send + Sync,
) -> Result<BackupRun, StoreError> {
    let batch_size = batch_size.max(1);
    let reason = match filter {
        ScanFilter::Encrypted => BackupReason::EncryptionMigration,
        _ => BackupReason::ManualBackup,
    };
    let mut run = BackupRun::default();
    let mut cursor: Option<String> = None;

    loop {
        let page = messages.scan(filter, cursor.as_deref(), batch_size).await?;
        let Some(last) = page.last() else { break };
        cursor = Some(last.id.clone());

        for message in page.iter().filter(|m| wanted(m)) {
            run.scanned += 1;
            if backups.backup(message, reason).await? {
                run.backed_up += 1;
            } else {
                run.skipped += 1;
            }
        }

        if page.len() < batch_size {
            break;
        }
    }
    Ok(run)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryMessageStore;
    use lp_proto::Draft;

    fn record(id: &str, from: &str, to: &str, encrypted: bool) -> Message {
        let mut m = Message::plaintext_from(&Draft::new(from, to, "body"));
        m.id = id.into();
        m.encrypted = encrypted;
        m
    }

    #[test]
    fn reason_strings_round_trip() {
        for reason in [
            BackupReason::EncryptionMigration,
            BackupReason::KeyRotation,
            BackupReason::ManualBackup,
            BackupReason::RecoveryPreparation,
        ] {
            assert_eq!(reason.as_str().parse::<BackupReason>().unwrap(), reason);
            assert_eq!(
                serde_json::to_string(&reason).unwrap(),
                format!("\"{}\"", reason.as_str())
            );
        }
        assert!(matches!("other".parse::<BackupReason>(), Err(StoreError::Corrupt(_))));
    }

    #[tokio::test]
    async fn second_backup_of_same_id_is_skipped() {
        let store = MemoryMessageStore::new();
        let mut m = record("m1", "alice", "bob", true);
        assert!(store.backup(&m, BackupReason::KeyRotation).await.unwrap());

        m.content = "changed".into();
        assert!(!store.backup(&m, BackupReason::ManualBackup).await.unwrap());

        let kept = store.get_backup("m1").await.unwrap().unwrap();
        assert_eq!(kept.content, "body");
        assert_eq!(kept.reason, BackupReason::KeyRotation);
    }

    #[tokio::test]
    async fn backup_all_encrypted_is_idempotent() {
        let store = MemoryMessageStore::new();
        for (id, enc) in [("a", true), ("b", false), ("c", true), ("d", true)] {
            store.upsert(&record(id, "alice", "bob", enc)).await.unwrap();
        }

        let first = backup_all_encrypted(&store, &store, 2).await.unwrap();
        assert_eq!(first, BackupRun { scanned: 3, backed_up: 3, skipped: 0 });
        assert!(store.get_backup("b").await.unwrap().is_none());

        let second = backup_all_encrypted(&store, &store, 2).await.unwrap();
        assert_eq!(second, BackupRun { scanned: 3, backed_up: 0, skipped: 3 });
        assert_eq!(store.backup_stats().await.unwrap().total, 3);
    }

    #[tokio::test]
    async fn user_backup_covers_both_directions() {
        let store = MemoryMessageStore::new();
        store.upsert(&record("1", "alice", "bob", false)).await.unwrap();
        store.upsert(&record("2", "bob", "alice", true)).await.unwrap();
        store.upsert(&record("3", "bob", "carol", false)).await.unwrap();

        let run = backup_user_messages(&store, &store, "alice", 1).await.unwrap();
        assert_eq!(run.backed_up, 2);
        assert_eq!(store.get_backup("2").await.unwrap().unwrap().reason, BackupReason::ManualBackup);
        assert!(store.get_backup("3").await.unwrap().is_none());

        let listed = store.restorable_for_user("alice", DEFAULT_RESTORABLE_LIMIT).await.unwrap();
        assert_eq!(listed.len(), 2);
        assert!(listed.iter().all(|b| b.involves("alice")));
    }

    #[tokio::test]
    async fn stats_count_by_reason() {
        let store = MemoryMessageStore::new();
        store.backup(&record("1", "a", "b", true), BackupReason::EncryptionMigration).await.unwrap();
        store.backup(&record("2", "a", "b", false), BackupReason::ManualBackup).await.unwrap();
        store.backup(&record("3", "a", "b", true), BackupReason::EncryptionMigration).await.unwrap();
        store.set_restorable("2", false).await.unwrap();

        let stats = store.backup_stats().await.unwrap();
        assert_eq!(stats.total, 3);
        assert_eq!(stats.restorable, 2);
        assert_eq!(stats.encrypted, 2);
        assert_eq!(stats.by_reason.get("encryption_migration"), Some(&2));
        assert_eq!(stats.by_reason.get("manual_backup"), Some(&1));
        assert!(stats.oldest.unwrap() <= stats.newest.unwrap());
    }

    #[tokio::test]
    async fn cleanup_removes_only_old_non_restorable() {
        let store = MemoryMessageStore::new();
        for id in ["keep", "drop"] {
            store.backup(&record(id, "a", "b", true), BackupReason::KeyRotation).await.unwrap();
        }
        assert!(store.set_restorable("drop", false).await.unwrap());
        assert!(!store.set_restorable("missing", false).await.unwrap());

        let past = Utc::now() - chrono::Duration::days(DEFAULT_RETENTION_DAYS);
        assert_eq!(store.cleanup_backups(past).await.unwrap(), 0);

        let future = Utc::now() + chrono::Duration::seconds(5);
        assert_eq!(store.cleanup_backups(future).await.unwrap(), 1);
        assert!(store.get_backup("keep").await.unwrap().is_some());
        assert!(store.get_backup("drop").await.unwrap().is_none());
    }
}
