//! Database row models.

use chrono::{DateTime, Utc};
use lp_proto::Message;

use crate::{
    backup::{BackupReason, MessageBackup},
    error::StoreError,
};

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct MessageRow {
    pub id: String,
    pub sender_id: String,
    pub recipient_id: String,
    pub conversation_id: String,
    /// NULL on some legacy rows.
    pub content: Option<String>,
    pub encrypted: bool,
    pub encryption_data: Option<Vec<u8>>,
    pub sender_encryption_data: Option<Vec<u8>>,
    pub created_at: DateTime<Utc>,
}

impl From<MessageRow> for Message {
    fn from(row: MessageRow) -> Self {
        Message {
            id: row.id,
            sender_id: row.sender_id,
            recipient_id: row.recipient_id,
            conversation_id: row.conversation_id,
            content: row.content.unwrap_or_default(),
            encrypted: row.encrypted,
            encryption_data: row.encryption_data,
            sender_encryption_data: row.sender_encryption_data,
            created_at: row.created_at,
        }
    }
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct BackupRow {
    pub original_message_id: String,
    pub sender_id: String,
    pub recipient_id: String,
    pub conversation_id: String,
    pub content: String,
    pub encrypted: bool,
    pub encryption_data: Option<Vec<u8>>,
    pub sender_encryption_data: Option<Vec<u8>>,
    pub original_created_at: DateTime<Utc>,
    pub reason: String,
    pub backed_up_at: DateTime<Utc>,
    pub restorable: bool,
}

impl TryFrom<BackupRow> for MessageBackup {
    type Error = StoreError;

    fn try_from(row: BackupRow) -> Result<Self, Self::Error> {
        Ok(MessageBackup {
            reason: row.reason.parse::<BackupReason>()?,
            original_message_id: row.original_message_id,
            sender_id: row.sender_id,
            recipient_id: row.recipient_id,
            conversation_id: row.conversation_id,
            content: row.content,
            encrypted: row.encrypted,
            encryption_data: row.encryption_data,
            sender_encryption_data: row.sender_encryption_data,
            original_created_at: row.original_created_at,
            backed_up_at: row.backed_up_at,
            restorable: row.restorable,
        })
    }
}
