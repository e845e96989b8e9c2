use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Migration error: {0}")]
    Migration(String),

    #[error("Serialisation error: {0}")]
    Serialisation(#[from] serde_json::Error),

    #[error("Record not found: {0}")]
    NotFound(String),

    #[error("Corrupt stored value: {0}")]
    Corrupt(String),
}

#[derive(Debug, Error)]
pub enum KeyStoreError {
    #[error("Key storage I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialisation error: {0}")]
    Serialisation(#[from] serde_json::Error),

    #[error("Crypto error: {0}")]
    Crypto(#[from] lp_crypto::CryptoError),

    /// Replacing the stored pair would orphan every self-envelope sealed to it.
    #[error("A different keypair is already stored for user {user_id}; replacing it needs explicit confirmation")]
    WouldOrphanHistory { user_id: String },

    #[error("Stored keypair for user {user_id} is unreadable: {reason}")]
    Corrupt { user_id: String, reason: String },

    #[error("Cannot determine key storage directory")]
    NoDataDir,
}
