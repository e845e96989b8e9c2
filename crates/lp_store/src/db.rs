//! SQLite-backed message store via sqlx.

use std::{collections::BTreeMap, path::Path, str::FromStr};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{
    sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions},
    QueryBuilder, Sqlite, SqlitePool,
};

use lp_proto::{message::LEGACY_PLACEHOLDERS, Message};

use crate::{
    backup::{BackupReason, BackupStats, BackupStore, MessageBackup},
    error::StoreError,
    models::{BackupRow, MessageRow},
    store::{MessagePatch, MessageStore, ScanFilter},
};

const COLUMNS: &str = "id, sender_id, recipient_id, conversation_id, content, encrypted, \
                       encryption_data, sender_encryption_data, created_at";

const BACKUP_COLUMNS: &str = "original_message_id, sender_id, recipient_id, conversation_id, \
                              content, encrypted, encryption_data, sender_encryption_data, \
                              original_created_at, reason, backed_up_at, restorable";

/// Cheap to clone (the pool is an Arc internally).
#[derive(Clone)]
pub struct SqliteMessageStore {
    pub pool: SqlitePool,
}

impl SqliteMessageStore {
    /// Open (or create) the database at `db_path` and run pending migrations.
    ///
    /// WAL mode is set on the connection, not in a migration: SQLite refuses
    /// to change `journal_mode` inside the transaction sqlx wraps migrations in.
    pub async fn open(db_path: &Path) -> Result<Self, StoreError> {
        let opts = SqliteConnectOptions::new()
            .filename(db_path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal);

        let pool = SqlitePool::connect_with(opts).await?;
        Self::migrate(pool).await
    }

    /// Private in-memory database, one connection so every query sees it.
    pub async fn open_in_memory() -> Result<Self, StoreError> {
        let opts = SqliteConnectOptions::from_str("sqlite::memory:")?;
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(opts)
            .await?;
        Self::migrate(pool).await
    }

    async fn migrate(pool: SqlitePool) -> Result<Self, StoreError> {
        sqlx::migrate!("./migrations")
            .run(&pool)
            .await
            .map_err(|e| StoreError::Migration(e.to_string()))?;
        Ok(Self { pool })
    }
}

#[async_trait]
impl MessageStore for SqliteMessageStore {
    async fn upsert(&self, message: &Message) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO messages (id, sender_id, recipient_id, conversation_id, content, encrypted, \
                                   encryption_data, sender_encryption_data, created_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT(id) DO UPDATE SET
                 sender_id = excluded.sender_id,
                 recipient_id = excluded.recipient_id,
                 conversation_id = excluded.conversation_id,
                 content = excluded.content,
                 encrypted = excluded.encrypted,
                 encryption_data = excluded.encryption_data,
                 sender_encryption_data = excluded.sender_encryption_data",
        )
        .bind(&message.id)
        .bind(&message.sender_id)
        .bind(&message.recipient_id)
        .bind(&message.conversation_id)
        .bind(&message.content)
        .bind(message.encrypted)
        .bind(message.encryption_data.as_deref())
        .bind(message.sender_encryption_data.as_deref())
        .bind(message.created_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get(&self, id: &str) -> Result<Option<Message>, StoreError> {
        let row: Option<MessageRow> =
            sqlx::query_as(&format!("SELECT {COLUMNS} FROM messages WHERE id = ?"))
                .bind(id)
                .fetch_optional(&self.pool)
                .await?;
        Ok(row.map(Message::from))
    }

    async fn scan(
        &self,
        filter: ScanFilter,
        after: Option<&str>,
        limit: usize,
    ) -> Result<Vec<Message>, StoreError> {
        let mut qb: QueryBuilder<Sqlite> =
            QueryBuilder::new(format!("SELECT {COLUMNS} FROM messages WHERE id > "));
        qb.push_bind(after.unwrap_or("").to_owned());

        match filter {
            ScanFilter::All => {}
            ScanFilter::Encrypted => {
                qb.push(" AND encrypted = 1");
            }
            ScanFilter::RepairCandidates => {
                qb.push(" AND (encrypted = 1 OR content IN (");
                let mut placeholders = qb.separated(", ");
                for p in LEGACY_PLACEHOLDERS {
                    placeholders.push_bind(*p);
                }
                qb.push("))");
            }
        }

        qb.push(" ORDER BY id ASC LIMIT ");
        qb.push_bind(i64::try_from(limit).unwrap_or(i64::MAX));

        let rows: Vec<MessageRow> = qb.build_query_as().fetch_all(&self.pool).await?;
        Ok(rows.into_iter().map(Message::from).collect())
    }

    async fn apply_patch(&self, id: &str, patch: &MessagePatch) -> Result<bool, StoreError> {
        let result = sqlx::query(
            "UPDATE messages SET
                 encrypted = ?,
                 content = ?,
                 encryption_data = CASE WHEN ? THEN NULL ELSE encryption_data END,
                 sender_encryption_data = CASE WHEN ? THEN NULL ELSE sender_encryption_data END
             WHERE id = ?",
        )
        .bind(patch.encrypted)
        .bind(&patch.content)
        .bind(patch.clear_envelopes)
        .bind(patch.clear_envelopes)
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn delete(&self, id: &str) -> Result<bool, StoreError> {
        let result = sqlx::query("DELETE FROM messages WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }
}

#[async_trait]
impl BackupStore for SqliteMessageStore {
    async fn backup(&self, message: &Message, reason: BackupReason) -> Result<bool, StoreError> {
        let backup = MessageBackup::of(message, reason);
        let result = sqlx::query(&format!(
            "INSERT INTO message_backups ({BACKUP_COLUMNS})
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT(original_message_id) DO NOTHING"
        ))
        .bind(&backup.original_message_id)
        .bind(&backup.sender_id)
        .bind(&backup.recipient_id)
        .bind(&backup.conversation_id)
        .bind(&backup.content)
        .bind(backup.encrypted)
        .bind(backup.encryption_data.as_deref())
        .bind(backup.sender_encryption_data.as_deref())
        .bind(backup.original_created_at)
        .bind(backup.reason.as_str())
        .bind(backup.backed_up_at)
        .bind(backup.restorable)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn get_backup(
        &self,
        original_message_id: &str,
    ) -> Result<Option<MessageBackup>, StoreError> {
        let row: Option<BackupRow> = sqlx::query_as(&format!(
            "SELECT {BACKUP_COLUMNS} FROM message_backups WHERE original_message_id = ?"
        ))
        .bind(original_message_id)
        .fetch_optional(&self.pool)
        .await?;
        row.map(MessageBackup::try_from).transpose()
    }

    async fn restorable_for_user(
        &self,
        user_id: &str,
        limit: usize,
    ) -> Result<Vec<MessageBackup>, StoreError> {
        let rows: Vec<BackupRow> = sqlx::query_as(&format!(
            "SELECT {BACKUP_COLUMNS} FROM message_backups
             WHERE restorable = 1 AND (sender_id = ? OR recipient_id = ?)
             ORDER BY original_created_at DESC, original_message_id ASC
             LIMIT ?"
        ))
        .bind(user_id)
        .bind(user_id)
        .bind(i64::try_from(limit).unwrap_or(i64::MAX))
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(MessageBackup::try_from).collect()
    }

    async fn set_restorable(
        &self,
        original_message_id: &str,
        restorable: bool,
    ) -> Result<bool, StoreError> {
        let result = sqlx::query(
            "UPDATE message_backups SET restorable = ? WHERE original_message_id = ?",
        )
        .bind(restorable)
        .bind(original_message_id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn backup_stats(&self) -> Result<BackupStats, StoreError> {
        let (total, restorable, encrypted, oldest, newest): (
            i64,
            i64,
            i64,
            Option<DateTime<Utc>>,
            Option<DateTime<Utc>>,
        ) = sqlx::query_as(
            "SELECT COUNT(*),
                    COALESCE(SUM(restorable), 0),
                    COALESCE(SUM(encrypted), 0),
                    (SELECT backed_up_at FROM message_backups ORDER BY backed_up_at ASC LIMIT 1),
                    (SELECT backed_up_at FROM message_backups ORDER BY backed_up_at DESC LIMIT 1)
             FROM message_backups",
        )
        .fetch_one(&self.pool)
        .await?;

        let reasons: Vec<(String, i64)> = sqlx::query_as(
            "SELECT reason, COUNT(*) FROM message_backups GROUP BY reason ORDER BY reason",
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(BackupStats {
            total: total as u64,
            restorable: restorable as u64,
            encrypted: encrypted as u64,
            by_reason: reasons
                .into_iter()
                .map(|(reason, n)| (reason, n as u64))
                .collect::<BTreeMap<_, _>>(),
            oldest,
            newest,
        })
    }

    async fn cleanup_backups(&self, cutoff: DateTime<Utc>) -> Result<u64, StoreError> {
        let result = sqlx::query(
            "DELETE FROM message_backups WHERE restorable = 0 AND backed_up_at < ?",
        )
        .bind(cutoff)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lp_proto::{message::IRRECOVERABLE_PLACEHOLDER, Draft};

    fn legacy(id: &str, content: &str, encrypted: bool) -> Message {
        let mut m = Message::plaintext_from(&Draft::new("alice", "bob", content));
        m.id = id.to_string();
        m.encrypted = encrypted;
        m
    }

    #[tokio::test]
    async fn open_creates_file_and_runs_migrations() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("messages.db");
        let store = SqliteMessageStore::open(&path).await.unwrap();
        assert!(path.exists());
        assert!(store.get("nope").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn upsert_round_trips_and_keeps_created_at() {
        let store = SqliteMessageStore::open_in_memory().await.unwrap();
        let mut m = legacy("m1", "hello", false);
        m.encryption_data = Some(b"{}".to_vec());
        store.upsert(&m).await.unwrap();
        assert_eq!(store.get("m1").await.unwrap().unwrap(), m);

        let original_created = m.created_at;
        m.content = "edited".into();
        m.created_at = original_created + chrono::Duration::hours(1);
        store.upsert(&m).await.unwrap();
        let got = store.get("m1").await.unwrap().unwrap();
        assert_eq!(got.content, "edited");
        assert_eq!(got.created_at, original_created);
    }

    #[tokio::test]
    async fn null_content_reads_as_empty() {
        let store = SqliteMessageStore::open_in_memory().await.unwrap();
        store.upsert(&legacy("m1", "x", true)).await.unwrap();
        sqlx::query("UPDATE messages SET content = NULL WHERE id = 'm1'")
            .execute(&store.pool)
            .await
            .unwrap();
        assert_eq!(store.get("m1").await.unwrap().unwrap().content, "");
    }

    #[tokio::test]
    async fn scan_pages_by_id_and_filters() {
        let store = SqliteMessageStore::open_in_memory().await.unwrap();
        store.upsert(&legacy("a", "plain", false)).await.unwrap();
        store.upsert(&legacy("b", "", true)).await.unwrap();
        store.upsert(&legacy("c", LEGACY_PLACEHOLDERS[0], false)).await.unwrap();
        store.upsert(&legacy("d", "secret?", true)).await.unwrap();

        let all = store.scan(ScanFilter::All, None, 10).await.unwrap();
        assert_eq!(all.iter().map(|m| m.id.as_str()).collect::<Vec<_>>(), ["a", "b", "c", "d"]);

        let page = store.scan(ScanFilter::All, Some("b"), 1).await.unwrap();
        assert_eq!(page.len(), 1);
        assert_eq!(page[0].id, "c");

        let enc = store.scan(ScanFilter::Encrypted, None, 10).await.unwrap();
        assert_eq!(enc.iter().map(|m| m.id.as_str()).collect::<Vec<_>>(), ["b", "d"]);

        let cand = store.scan(ScanFilter::RepairCandidates, None, 10).await.unwrap();
        assert_eq!(cand.iter().map(|m| m.id.as_str()).collect::<Vec<_>>(), ["b", "c", "d"]);
    }

    #[tokio::test]
    async fn apply_patch_clears_envelopes() {
        let store = SqliteMessageStore::open_in_memory().await.unwrap();
        let mut m = legacy("m1", "", true);
        m.encryption_data = Some(b"garbage".to_vec());
        store.upsert(&m).await.unwrap();

        let patch = MessagePatch {
            encrypted: false,
            content: IRRECOVERABLE_PLACEHOLDER.into(),
            clear_envelopes: true,
        };
        assert!(store.apply_patch("m1", &patch).await.unwrap());
        assert!(!store.apply_patch("missing", &patch).await.unwrap());

        let got = store.get("m1").await.unwrap().unwrap();
        assert!(!got.encrypted);
        assert_eq!(got.content, IRRECOVERABLE_PLACEHOLDER);
        assert!(got.encryption_data.is_none());
        assert!(got.sender_encryption_data.is_none());
    }

    #[tokio::test]
    async fn delete_reports_presence() {
        let store = SqliteMessageStore::open_in_memory().await.unwrap();
        store.upsert(&legacy("m1", "x", false)).await.unwrap();
        assert!(store.delete("m1").await.unwrap());
        assert!(!store.delete("m1").await.unwrap());
    }

    #[tokio::test]
    async fn backup_inserts_once_and_keeps_envelopes() {
        let store = SqliteMessageStore::open_in_memory().await.unwrap();
        let mut m = legacy("m1", "", true);
        m.encryption_data = Some(b"garbage".to_vec());

        assert!(store.backup(&m, BackupReason::EncryptionMigration).await.unwrap());
        assert!(!store.backup(&m, BackupReason::ManualBackup).await.unwrap());

        let b = store.get_backup("m1").await.unwrap().unwrap();
        assert_eq!(b.reason, BackupReason::EncryptionMigration);
        assert_eq!(b.encryption_data.as_deref(), Some(&b"garbage"[..]));
        assert_eq!(b.original_created_at, m.created_at);
        assert!(b.restorable);
    }

    #[tokio::test]
    async fn backup_stats_and_cleanup() {
        let store = SqliteMessageStore::open_in_memory().await.unwrap();
        let empty = store.backup_stats().await.unwrap();
        assert_eq!(empty.total, 0);
        assert!(empty.oldest.is_none());

        store.backup(&legacy("a", "x", true), BackupReason::KeyRotation).await.unwrap();
        store.backup(&legacy("b", "y", false), BackupReason::ManualBackup).await.unwrap();
        assert!(store.set_restorable("b", false).await.unwrap());

        let stats = store.backup_stats().await.unwrap();
        assert_eq!((stats.total, stats.restorable, stats.encrypted), (2, 1, 1));
        assert_eq!(stats.by_reason.get("key_rotation"), Some(&1));
        assert!(stats.oldest.is_some() && stats.newest.is_some());

        assert_eq!(store.restorable_for_user("alice", 20).await.unwrap().len(), 1);

        let cutoff = Utc::now() + chrono::Duration::seconds(5);
        assert_eq!(store.cleanup_backups(cutoff).await.unwrap(), 1);
        assert!(store.get_backup("a").await.unwrap().is_some());
        assert!(store.get_backup("b").await.unwrap().is_none());
    }
}
