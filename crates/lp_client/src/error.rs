use lp_crypto::{CryptoError, KeyRole};
use lp_proto::LifecycleError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SendError {
    /// No envelope was built and nothing was written.
    #[error("No {0} key available; generate or fetch keys before sending")]
    KeyUnavailable(KeyRole),

    #[error("Message too large: {len} bytes (max {max})")]
    PlaintextTooLarge { len: usize, max: usize },

    /// The store refused the write. The draft is discarded; compose again.
    #[error("Message was not saved: {0}")]
    PersistRejected(String),

    #[error("Crypto error: {0}")]
    Crypto(CryptoError),

    #[error("Lifecycle error: {0}")]
    Lifecycle(#[from] LifecycleError),
}

impl From<CryptoError> for SendError {
    fn from(e: CryptoError) -> Self {
        match e {
            CryptoError::KeyUnavailable(role) => SendError::KeyUnavailable(role),
            CryptoError::PlaintextTooLarge { len, max } => SendError::PlaintextTooLarge { len, max },
            other => SendError::Crypto(other),
        }
    }
}

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("Recipient channel closed")]
    Closed,

    #[error("Transport error: {0}")]
    Other(String),
}
