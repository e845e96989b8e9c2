//! lp_store - persistence collaborators for Lockpost
//!
//! # Message store
//! `MessageStore` is the seam to whatever holds message records: upsert by
//! id, keyset-paginated scans, and single-statement patches. `SqliteMessageStore`
//! (sqlx) is the production backend; `MemoryMessageStore` backs tests and
//! embedded use.
//!
//! # Key storage
//! `KeyStore` persists each user's keypair on the owning client. Secret
//! material sits there UNENCRYPTED at rest, the same exposure as browser
//! local storage. This is an accepted, documented risk: wrapping keys with a
//! passphrase would change recovery semantics.
//!
//! # Backups
//! `BackupStore` keeps one copy of a message record per id, taken before a
//! destructive change. Both message stores implement it.
//!
//! # Repair
//! `repair::RepairEngine` walks stored records with a bounded cursor and
//! applies the ordered repair policy without any private key. Given a
//! `BackupStore`, it backs a record up before stripping its envelopes.

pub mod backup;
pub mod census;
pub mod db;
pub mod error;
pub mod keystore;
pub mod memory;
pub mod models;
pub mod repair;
pub mod store;

pub use backup::{
    backup_all_encrypted, backup_user_messages, BackupReason, BackupRun, BackupStats,
    BackupStore, MessageBackup,
};
pub use census::{census, MessageCensus};
pub use db::SqliteMessageStore;
pub use error::{KeyStoreError, StoreError};
pub use keystore::{
    generate_key_pair, load_or_generate, FileKeyStore, KeyInit, KeyStore, MemoryKeyStore,
    OverwritePolicy,
};
pub use memory::MemoryMessageStore;
pub use repair::{plan_repair, RepairEngine, RepairReport, Verdict};
pub use store::{MessagePatch, MessageStore, ScanFilter};
