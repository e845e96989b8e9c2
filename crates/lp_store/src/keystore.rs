//! Client-side keypair persistence.
//!
//! One keypair per user id. A stored pair is never silently replaced: every
//! self-envelope sealed to it would become unreadable. Writes for the same
//! user are serialised so two concurrent first-logins cannot each generate
//! and race a different keypair to disk.

use std::{
    collections::HashMap,
    fs,
    io::{ErrorKind, Write},
    path::{Path, PathBuf},
    sync::Arc,
};

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use chrono::{DateTime, Utc};
use directories::ProjectDirs;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use zeroize::{Zeroize, ZeroizeOnDrop};

use lp_crypto::{KeyPair, PublicKeyBytes};

use crate::error::KeyStoreError;

const STORED_FORMAT: u8 = 1;

/// What to do when a different keypair is already stored for the user.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OverwritePolicy {
    KeepExisting,
    /// Caller has confirmed that existing self-envelopes may be orphaned.
    Replace,
}

pub trait KeyStore: Send + Sync {
    fn load_key_pair(&self, user_id: &str) -> Result<Option<KeyPair>, KeyStoreError>;

    /// Saving the identical keypair again is a no-op under either policy.
    fn save_key_pair(
        &self,
        user_id: &str,
        key_pair: &KeyPair,
        policy: OverwritePolicy,
    ) -> Result<(), KeyStoreError>;
}

/// Result of [`load_or_generate`].
#[derive(Debug)]
pub struct KeyInit {
    pub key_pair: KeyPair,
    /// True when this call created the pair. Callers should publish
    /// `key_pair.public` to the directory.
    pub newly_generated: bool,
}

pub fn generate_key_pair() -> Result<KeyPair, KeyStoreError> {
    Ok(KeyPair::generate()?)
}

/// Load the user's keypair, generating and storing one if none exists.
///
/// If another writer stored a pair between our load and save, that pair wins
/// and is returned.
pub fn load_or_generate(store: &dyn KeyStore, user_id: &str) -> Result<KeyInit, KeyStoreError> {
    if let Some(key_pair) = store.load_key_pair(user_id)? {
        return Ok(KeyInit { key_pair, newly_generated: false });
    }

    let fresh = generate_key_pair()?;
    match store.save_key_pair(user_id, &fresh, OverwritePolicy::KeepExisting) {
        Ok(()) => {
            info!(user_id, key_id = %fresh.public.key_id(), "Generated new keypair");
            Ok(KeyInit { key_pair: fresh, newly_generated: true })
        }
        Err(KeyStoreError::WouldOrphanHistory { .. }) => {
            let key_pair = store.load_key_pair(user_id)?.ok_or_else(|| KeyStoreError::Corrupt {
                user_id: user_id.to_string(),
                reason: "keypair vanished during concurrent initialisation".into(),
            })?;
            Ok(KeyInit { key_pair, newly_generated: false })
        }
        Err(e) => Err(e),
    }
}

/// Decide what `save_key_pair` should write, given what is already stored.
fn resolve_write(
    user_id: &str,
    existing: Option<KeyPair>,
    incoming: &KeyPair,
    policy: OverwritePolicy,
) -> Result<Option<KeyPair>, KeyStoreError> {
    match existing {
        None => Ok(Some(incoming.clone())),
        Some(existing) if existing.same_key_as(incoming) => Ok(None),
        Some(_) if policy == OverwritePolicy::KeepExisting => Err(KeyStoreError::WouldOrphanHistory {
            user_id: user_id.to_string(),
        }),
        Some(existing) => {
            warn!(
                user_id,
                old_key_id = %existing.public.key_id(),
                new_key_id = %incoming.public.key_id(),
                "Replacing stored keypair; earlier self-envelopes become unreadable"
            );
            Ok(Some(incoming.clone().succeeding(&existing)))
        }
    }
}

// ── File-backed store ────────────────────────────────────────────────────────

#[derive(Serialize, Deserialize, Zeroize, ZeroizeOnDrop)]
struct StoredKeyPair {
    #[zeroize(skip)]
    format: u8,
    #[zeroize(skip)]
    public_key: String,
    private_key: String,
    #[zeroize(skip)]
    generated_at: DateTime<Utc>,
    #[zeroize(skip)]
    key_version: u32,
}

impl StoredKeyPair {
    fn from_key_pair(kp: &KeyPair) -> Self {
        Self {
            format: STORED_FORMAT,
            public_key: kp.public.to_b64(),
            private_key: URL_SAFE_NO_PAD.encode(kp.secret_bytes()),
            generated_at: kp.generated_at(),
            key_version: kp.version(),
        }
    }

    fn into_key_pair(self, user_id: &str) -> Result<KeyPair, KeyStoreError> {
        let corrupt = |reason: String| KeyStoreError::Corrupt { user_id: user_id.to_string(), reason };
        if self.format != STORED_FORMAT {
            return Err(corrupt(format!("unknown stored format {}", self.format)));
        }
        let mut secret = URL_SAFE_NO_PAD
            .decode(self.private_key.as_bytes())
            .map_err(|e| corrupt(e.to_string()))?;
        let kp = KeyPair::from_secret_bytes(&secret, self.generated_at, self.key_version);
        secret.zeroize();
        let kp = kp?;
        let public = PublicKeyBytes::from_b64(&self.public_key)?;
        if public != kp.public {
            return Err(corrupt("public key does not match private key".into()));
        }
        Ok(kp)
    }
}

/// Keypairs as JSON files, one per user, in a private directory.
pub struct FileKeyStore {
    dir: PathBuf,
    writers: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl FileKeyStore {
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self, KeyStoreError> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(&dir, fs::Permissions::from_mode(0o700))?;
        }
        Ok(Self { dir, writers: Mutex::new(HashMap::new()) })
    }

    /// Platform data directory for client keys.
    pub fn default_dir() -> Result<PathBuf, KeyStoreError> {
        let dirs = ProjectDirs::from("com", "lockpost", "lockpost").ok_or(KeyStoreError::NoDataDir)?;
        Ok(dirs.data_dir().join("keys"))
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// User ids are opaque; hash them so any id is a safe file name.
    fn path_for(&self, user_id: &str) -> PathBuf {
        let digest = blake3::hash(user_id.as_bytes());
        self.dir.join(format!("{}.json", hex::encode(&digest.as_bytes()[..16])))
    }

    fn writer_lock(&self, user_id: &str) -> Arc<Mutex<()>> {
        self.writers.lock().entry(user_id.to_string()).or_default().clone()
    }

    /// Drop the user's entry once no other writer holds or waits on it.
    /// Clones only happen under the map lock, so the count is stable here.
    fn release_writer(&self, user_id: &str, lock: Arc<Mutex<()>>) {
        let mut writers = self.writers.lock();
        if Arc::strong_count(&lock) == 2 {
            writers.remove(user_id);
        }
    }

    fn write_atomic(&self, path: &Path, stored: &StoredKeyPair) -> Result<(), KeyStoreError> {
        let mut json = serde_json::to_vec_pretty(stored)?;
        let mut tmp = tempfile::NamedTempFile::new_in(&self.dir)?;
        let written = tmp.write_all(&json).and_then(|_| tmp.as_file().sync_all());
        json.zeroize();
        written?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(tmp.path(), fs::Permissions::from_mode(0o600))?;
        }
        tmp.persist(path).map_err(|e| KeyStoreError::Io(e.error))?;
        Ok(())
    }
}

impl FileKeyStore {
    fn existing_then_write(
        &self,
        user_id: &str,
        key_pair: &KeyPair,
        policy: OverwritePolicy,
    ) -> Result<(), KeyStoreError> {
        let existing = self.load_key_pair(user_id)?;
        if let Some(to_write) = resolve_write(user_id, existing, key_pair, policy)? {
            self.write_atomic(&self.path_for(user_id), &StoredKeyPair::from_key_pair(&to_write))?;
        }
        Ok(())
    }
}

impl KeyStore for FileKeyStore {
    fn load_key_pair(&self, user_id: &str) -> Result<Option<KeyPair>, KeyStoreError> {
        let mut raw = match fs::read(self.path_for(user_id)) {
            Ok(raw) => raw,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let parsed: Result<StoredKeyPair, _> = serde_json::from_slice(&raw);
        raw.zeroize();
        let stored = parsed.map_err(|e| KeyStoreError::Corrupt {
            user_id: user_id.to_string(),
            reason: e.to_string(),
        })?;
        stored.into_key_pair(user_id).map(Some)
    }

    fn save_key_pair(
        &self,
        user_id: &str,
        key_pair: &KeyPair,
        policy: OverwritePolicy,
    ) -> Result<(), KeyStoreError> {
        let lock = self.writer_lock(user_id);
        let result = {
            let _guard = lock.lock();
            self.existing_then_write(user_id, key_pair, policy)
        };
        self.release_writer(user_id, lock);
        result
    }
}

// ── In-memory store ──────────────────────────────────────────────────────────

#[derive(Default)]
pub struct MemoryKeyStore {
    pairs: Mutex<HashMap<String, KeyPair>>,
}

impl MemoryKeyStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl KeyStore for MemoryKeyStore {
    fn load_key_pair(&self, user_id: &str) -> Result<Option<KeyPair>, KeyStoreError> {
        Ok(self.pairs.lock().get(user_id).cloned())
    }

    fn save_key_pair(
        &self,
        user_id: &str,
        key_pair: &KeyPair,
        policy: OverwritePolicy,
    ) -> Result<(), KeyStoreError> {
        let mut pairs = self.pairs.lock();
        let existing = pairs.get(user_id).cloned();
        if let Some(to_write) = resolve_write(user_id, existing, key_pair, policy)? {
            pairs.insert(user_id.to_string(), to_write);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn file_store_round_trips_keypair_and_metadata() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileKeyStore::open(dir.path().join("keys")).unwrap();
        assert!(store.load_key_pair("alice").unwrap().is_none());

        let kp = generate_key_pair().unwrap();
        store.save_key_pair("alice", &kp, OverwritePolicy::KeepExisting).unwrap();

        let loaded = store.load_key_pair("alice").unwrap().unwrap();
        assert!(loaded.same_key_as(&kp));
        assert_eq!(loaded.public, kp.public);
        assert_eq!(loaded.version(), 1);
        assert_eq!(loaded.generated_at(), kp.generated_at());
    }

    #[cfg(unix)]
    #[test]
    fn key_file_is_owner_only() {
        use std::os::unix::fs::PermissionsExt;
        let dir = tempfile::tempdir().unwrap();
        let store = FileKeyStore::open(dir.path()).unwrap();
        store
            .save_key_pair("alice", &generate_key_pair().unwrap(), OverwritePolicy::KeepExisting)
            .unwrap();
        let mode = fs::metadata(store.path_for("alice")).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
    }

    #[test]
    fn different_pair_is_refused_without_confirmation() {
        let store = MemoryKeyStore::new();
        let first = generate_key_pair().unwrap();
        store.save_key_pair("bob", &first, OverwritePolicy::KeepExisting).unwrap();

        let second = generate_key_pair().unwrap();
        let err = store
            .save_key_pair("bob", &second, OverwritePolicy::KeepExisting)
            .unwrap_err();
        assert!(matches!(err, KeyStoreError::WouldOrphanHistory { .. }));
        assert!(store.load_key_pair("bob").unwrap().unwrap().same_key_as(&first));

        // Same pair again is fine.
        store.save_key_pair("bob", &first, OverwritePolicy::KeepExisting).unwrap();
    }

    #[test]
    fn confirmed_replace_bumps_version() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileKeyStore::open(dir.path()).unwrap();
        let first = generate_key_pair().unwrap();
        store.save_key_pair("bob", &first, OverwritePolicy::Replace).unwrap();
        let second = generate_key_pair().unwrap();
        store.save_key_pair("bob", &second, OverwritePolicy::Replace).unwrap();

        let loaded = store.load_key_pair("bob").unwrap().unwrap();
        assert!(loaded.same_key_as(&second));
        assert_eq!(loaded.version(), 2);
    }

    #[test]
    fn load_or_generate_is_stable() {
        let store = MemoryKeyStore::new();
        let first = load_or_generate(&store, "carol").unwrap();
        assert!(first.newly_generated);
        let again = load_or_generate(&store, "carol").unwrap();
        assert!(!again.newly_generated);
        assert!(again.key_pair.same_key_as(&first.key_pair));
    }

    #[test]
    fn concurrent_first_login_agrees_on_one_pair() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(FileKeyStore::open(dir.path()).unwrap());
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let store = store.clone();
                std::thread::spawn(move || load_or_generate(&*store, "dave").unwrap())
            })
            .collect();
        let inits: Vec<KeyInit> = handles.into_iter().map(|h| h.join().unwrap()).collect();

        let stored = store.load_key_pair("dave").unwrap().unwrap();
        assert!(inits.iter().all(|i| i.key_pair.same_key_as(&stored)));
        assert_eq!(inits.iter().filter(|i| i.newly_generated).count(), 1);
        assert!(store.writers.lock().is_empty());
    }

    #[test]
    fn writer_locks_do_not_accumulate() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileKeyStore::open(dir.path()).unwrap();
        for i in 0..20 {
            let user = format!("user-{i}");
            store
                .save_key_pair(&user, &generate_key_pair().unwrap(), OverwritePolicy::KeepExisting)
                .unwrap();
            // Failed saves release their entry too.
            assert!(store
                .save_key_pair(&user, &generate_key_pair().unwrap(), OverwritePolicy::KeepExisting)
                .is_err());
        }
        assert!(store.writers.lock().is_empty());
    }

    #[test]
    fn tampered_file_is_reported_corrupt() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileKeyStore::open(dir.path()).unwrap();
        fs::write(store.path_for("erin"), b"{not json").unwrap();
        assert!(matches!(
            store.load_key_pair("erin").unwrap_err(),
            KeyStoreError::Corrupt { .. }
        ));
    }
}
