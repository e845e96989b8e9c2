//! Viewer-side decryption.
//!
//! A viewer opens only the envelope addressed to them: the sender reads the
//! self-envelope, the recipient reads the recipient envelope. Anything that
//! cannot be opened renders as a fixed placeholder and stays in the
//! conversation. Stored data is never modified from here.

use std::{
    collections::{HashMap, VecDeque},
    sync::Arc,
};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tracing::{debug, warn};
use zeroize::Zeroizing;

use lp_crypto::{decrypt, CryptoError, FailureReason, KeyPair};
use lp_proto::{message::UNDECRYPTABLE_PLACEHOLDER, EnvelopeSlot, Message, MessageState};
use lp_store::KeyStore;

/// Shown while the viewer's key is still loading.
pub const DECRYPTING_LABEL: &str = "Decrypting…";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Decrypted bodies kept in memory, oldest evicted first.
    pub decrypt_cache_capacity: usize,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self { decrypt_cache_capacity: 256 }
    }
}

/// Why a viewer sees the placeholder.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FallbackCause {
    /// The viewer has no keypair loaded.
    NoKey,
    Failed(FailureReason),
    /// The viewer's envelope is structurally broken.
    Malformed,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DisplayContent {
    /// Unencrypted record, shown verbatim (including an empty body).
    Plain(String),
    Decrypted(String),
    Fallback(FallbackCause),
    Decrypting,
}

impl DisplayContent {
    /// Lifecycle state this rendering corresponds to, for encrypted records.
    pub fn state(&self) -> Option<MessageState> {
        match self {
            DisplayContent::Plain(_) => None,
            DisplayContent::Decrypted(_) => Some(MessageState::DecryptedOk),
            DisplayContent::Fallback(_) => Some(MessageState::DecryptionFailedFallback),
            DisplayContent::Decrypting => Some(MessageState::DeliveredToRecipient),
        }
    }
}

/// The text a UI puts in the message bubble.
pub fn render_content(content: &DisplayContent) -> &str {
    match content {
        DisplayContent::Plain(text) | DisplayContent::Decrypted(text) => text.as_str(),
        DisplayContent::Fallback(_) => UNDECRYPTABLE_PLACEHOLDER,
        DisplayContent::Decrypting => DECRYPTING_LABEL,
    }
}

// ── Cache ────────────────────────────────────────────────────────────────────

type CacheKey = (String, String);

/// Successful decryptions only; failures are re-evaluated on every view so a
/// key change can fix them.
struct DecryptCache {
    capacity: usize,
    order: VecDeque<CacheKey>,
    entries: HashMap<CacheKey, Zeroizing<String>>,
}

impl DecryptCache {
    fn new(capacity: usize) -> Self {
        Self { capacity, order: VecDeque::new(), entries: HashMap::new() }
    }

    fn get(&self, key: &CacheKey) -> Option<String> {
        self.entries.get(key).map(|s| s.to_string())
    }

    fn insert(&mut self, key: CacheKey, plaintext: String) {
        if self.capacity == 0 || self.entries.contains_key(&key) {
            return;
        }
        while self.order.len() >= self.capacity {
            match self.order.pop_front() {
                Some(oldest) => {
                    self.entries.remove(&oldest);
                }
                None => break,
            }
        }
        self.order.push_back(key.clone());
        self.entries.insert(key, Zeroizing::new(plaintext));
    }

    fn clear(&mut self) {
        self.order.clear();
        self.entries.clear();
    }

    fn len(&self) -> usize {
        self.entries.len()
    }
}

// ── Deferred key loading ─────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub enum KeyStatus {
    Loading,
    /// `None` when the store holds no keypair for this user.
    Loaded(Option<Arc<KeyPair>>),
}

/// Load `user_id`'s keypair off the async runtime and publish it.
pub fn spawn_key_load(store: Arc<dyn KeyStore>, user_id: String) -> watch::Receiver<KeyStatus> {
    let (tx, rx) = watch::channel(KeyStatus::Loading);
    tokio::task::spawn_blocking(move || {
        let loaded = match store.load_key_pair(&user_id) {
            Ok(kp) => kp.map(Arc::new),
            Err(e) => {
                warn!(user_id = %user_id, "Could not load keypair: {e}");
                None
            }
        };
        let _ = tx.send(KeyStatus::Loaded(loaded));
    });
    rx
}

// ── Viewer ───────────────────────────────────────────────────────────────────

pub struct MessageViewer {
    viewer_id: String,
    cache: Mutex<DecryptCache>,
}

impl MessageViewer {
    pub fn new(viewer_id: impl Into<String>, config: &ClientConfig) -> Self {
        Self {
            viewer_id: viewer_id.into(),
            cache: Mutex::new(DecryptCache::new(config.decrypt_cache_capacity)),
        }
    }

    pub fn viewer_id(&self) -> &str {
        &self.viewer_id
    }

    /// Drop cached plaintext, e.g. after the viewer's keypair was replaced.
    pub fn forget_decrypted(&self) {
        self.cache.lock().clear();
    }

    pub fn cached_count(&self) -> usize {
        self.cache.lock().len()
    }

    fn cache_key(&self, message: &Message) -> CacheKey {
        (message.id.clone(), self.viewer_id.clone())
    }

    /// Render `message` for this viewer with the keys at hand.
    pub fn view(&self, message: &Message, keys: Option<&KeyPair>) -> DisplayContent {
        if !message.encrypted {
            return DisplayContent::Plain(message.content.clone());
        }
        let key = self.cache_key(message);
        if let Some(plaintext) = self.cache.lock().get(&key) {
            return DisplayContent::Decrypted(plaintext);
        }

        let content = self.open(message, keys);
        match &content {
            DisplayContent::Decrypted(plaintext) => {
                self.cache.lock().insert(key, plaintext.clone());
            }
            DisplayContent::Fallback(cause) => {
                debug!(id = %message.id, viewer = %self.viewer_id, ?cause, "Showing placeholder");
            }
            _ => {}
        }
        content
    }

    /// Render with whatever the key loader has published so far.
    pub fn view_with_status(&self, message: &Message, status: &KeyStatus) -> DisplayContent {
        match status {
            KeyStatus::Loaded(keys) => self.view(message, keys.as_deref()),
            KeyStatus::Loading if !message.encrypted => self.view(message, None),
            KeyStatus::Loading => match self.cache.lock().get(&self.cache_key(message)) {
                Some(plaintext) => DisplayContent::Decrypted(plaintext),
                None => DisplayContent::Decrypting,
            },
        }
    }

    /// Wait for the key loader, then render. Dropping the future abandons
    /// the view and nothing else.
    pub async fn view_deferred(
        &self,
        message: &Message,
        mut keys: watch::Receiver<KeyStatus>,
    ) -> DisplayContent {
        let status = match keys.wait_for(|s| matches!(s, KeyStatus::Loaded(_))).await {
            Ok(status) => status.clone(),
            Err(_) => KeyStatus::Loaded(None),
        };
        self.view_with_status(message, &status)
    }

    fn envelope_for_viewer(&self, message: &Message) -> Option<EnvelopeSlot> {
        if self.viewer_id == message.sender_id {
            Some(message.sender_slot())
        } else if self.viewer_id == message.recipient_id {
            Some(message.recipient_slot())
        } else {
            None
        }
    }

    fn open(&self, message: &Message, keys: Option<&KeyPair>) -> DisplayContent {
        let Some(slot) = self.envelope_for_viewer(message) else {
            return DisplayContent::Fallback(FallbackCause::Failed(FailureReason::NoEnvelopeForHolder));
        };
        let envelope = match slot {
            EnvelopeSlot::Valid(env) | EnvelopeSlot::UnknownSuite(env) => env,
            EnvelopeSlot::Absent => {
                return DisplayContent::Fallback(FallbackCause::Failed(FailureReason::NoEnvelopeForHolder))
            }
            EnvelopeSlot::Malformed(_) => return DisplayContent::Fallback(FallbackCause::Malformed),
        };
        let Some(keys) = keys else {
            return DisplayContent::Fallback(FallbackCause::NoKey);
        };
        match decrypt(&envelope, keys) {
            Ok(plaintext) => DisplayContent::Decrypted(plaintext),
            Err(CryptoError::DecryptionFailed(reason)) => DisplayContent::Fallback(FallbackCause::Failed(reason)),
            Err(CryptoError::Malformed(_)) => DisplayContent::Fallback(FallbackCause::Malformed),
            Err(other) => {
                warn!(id = %message.id, "Unexpected decrypt error: {other}");
                DisplayContent::Fallback(FallbackCause::Failed(FailureReason::Authentication))
            }
        }
    }
}
