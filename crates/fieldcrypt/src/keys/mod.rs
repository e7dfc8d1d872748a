//! Key ring: resolution of data keys by identifier, plus rotation.
//!
//! # Lifecycle
//!
//! 1. At startup, [`KeyManager::from_config`] parses every configured
//!    `id=material` pair exactly once and marks the configured id as active.
//!    A missing active key is fatal.
//! 2. The ring is an immutable snapshot held in an [`ArcSwap`]; readers never
//!    block and never observe a half-applied rotation.
//! 3. [`KeyManager::rotate`] installs a new active key and demotes the previous
//!    one to [`KeyStatus::Retired`]. Retired keys stay resolvable forever so
//!    that stored envelopes keep decrypting.
//!
//! # Security invariants
//!
//! - Key material is never logged or included in traces; only key ids are.
//! - Keys are never removed from the ring.

pub mod record;

pub use record::{validate_key_id, KeyMaterial, KeyRecord, KeyStatus};

use std::{
    collections::{HashMap, HashSet},
    sync::{Arc, Mutex},
};

use arc_swap::ArcSwap;
use thiserror::Error;
use tracing::info;

use crate::config::Config;

/// Errors produced by the key ring.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum KeyError {
    /// No key is marked active, or the active id names no configured key.
    #[error("no active encryption key configured")]
    NoActiveKey,

    /// No key with this id exists in the ring.
    #[error("unknown key id: {0}")]
    UnknownKey(String),

    /// The same key id was configured twice.
    #[error("duplicate key id: {0}")]
    DuplicateKey(String),

    /// The key id contains characters outside `[A-Za-z0-9_-]` or is too long.
    #[error("invalid key id: {0:?}")]
    InvalidKeyId(String),

    /// The key material could not be decoded into a 256-bit key.
    #[error("invalid key material for key id {0}")]
    InvalidMaterial(String),
}

/// Immutable view of all keys at one point in time.
#[derive(Debug)]
struct KeyRing {
    keys: HashMap<String, Arc<KeyRecord>>,
    active: Option<String>,
}

impl KeyRing {
    fn active(&self) -> Result<Arc<KeyRecord>, KeyError> {
        self.active
            .as_ref()
            .and_then(|id| self.keys.get(id))
            .cloned()
            .ok_or(KeyError::NoActiveKey)
    }

    /// Build a new snapshot with `active_id` as the only active key.
    fn with_active(keys: impl Iterator<Item = KeyRecord>, active_id: &str) -> Self {
        let keys: HashMap<String, Arc<KeyRecord>> = keys
            .map(|k| {
                let status = if k.key_id() == active_id {
                    KeyStatus::Active
                } else {
                    KeyStatus::Retired
                };
                (k.key_id().to_owned(), Arc::new(k.with_status(status)))
            })
            .collect();
        Self {
            keys,
            active: Some(active_id.to_owned()),
        }
    }
}

/// Thread-safe, cheaply cloneable handle to the key ring.
#[derive(Clone, Debug)]
pub struct KeyManager {
    ring: Arc<ArcSwap<KeyRing>>,
    // Serialises writers; readers go through `ring` without locking.
    write_lock: Arc<Mutex<()>>,
}

impl KeyManager {
    /// Build the key ring from already-parsed records.
    ///
    /// # Errors
    ///
    /// Returns [`KeyError::NoActiveKey`] if `keys` is empty or `active_key_id`
    /// is not among them, and [`KeyError::DuplicateKey`] if an id repeats.
    pub fn init(keys: Vec<KeyRecord>, active_key_id: &str) -> Result<Self, KeyError> {
        let mut seen = HashSet::with_capacity(keys.len());
        for key in &keys {
            if !seen.insert(key.key_id()) {
                return Err(KeyError::DuplicateKey(key.key_id().to_owned()));
            }
        }
        if !seen.contains(active_key_id) {
            return Err(KeyError::NoActiveKey);
        }

        let ring = KeyRing::with_active(keys.into_iter(), active_key_id);
        info!(
            keys_loaded = ring.keys.len(),
            active_key_id = %active_key_id,
            "key ring initialised"
        );
        Ok(Self {
            ring: Arc::new(ArcSwap::new(Arc::new(ring))),
            write_lock: Arc::new(Mutex::new(())),
        })
    }

    /// Build the key ring from `ENCRYPTION_KEYS` / `ACTIVE_KEY_ID`.
    pub fn from_config(cfg: &Config) -> Result<Self, KeyError> {
        let keys = parse_key_list(&cfg.encryption_keys)?;
        Self::init(keys, cfg.active_key_id.trim())
    }

    /// Return the key used for new encryptions.
    pub fn resolve_active_key(&self) -> Result<Arc<KeyRecord>, KeyError> {
        self.ring.load().active()
    }

    /// Return the key with the given id, active or retired.
    pub fn resolve_key_by_id(&self, key_id: &str) -> Result<Arc<KeyRecord>, KeyError> {
        self.ring
            .load()
            .keys
            .get(key_id)
            .cloned()
            .ok_or_else(|| KeyError::UnknownKey(key_id.to_owned()))
    }

    /// Returns `true` if `key_id` names a key in the ring.
    pub fn contains(&self, key_id: &str) -> bool {
        self.ring.load().keys.contains_key(key_id)
    }

    /// Add a new key and make it the active key. The previously active key is
    /// retired but stays available for decryption.
    ///
    /// # Errors
    ///
    /// Returns [`KeyError::DuplicateKey`] if the id is already in the ring.
    pub fn rotate(&self, new_key: KeyRecord) -> Result<(), KeyError> {
        let _guard = self.write_lock.lock().unwrap_or_else(|e| e.into_inner());
        let current = self.ring.load_full();
        if current.keys.contains_key(new_key.key_id()) {
            return Err(KeyError::DuplicateKey(new_key.key_id().to_owned()));
        }

        let new_id = new_key.key_id().to_owned();
        let previous = current.active.clone();
        let all = current
            .keys
            .values()
            .map(|k| k.as_ref().clone())
            .chain(std::iter::once(new_key));
        self.ring.store(Arc::new(KeyRing::with_active(all, &new_id)));

        info!(
            active_key_id = %new_id,
            retired_key_id = previous.as_deref().unwrap_or("-"),
            "encryption key rotated"
        );
        Ok(())
    }

    /// Make an existing key active again, retiring the current one.
    ///
    /// # Errors
    ///
    /// Returns [`KeyError::UnknownKey`] if `key_id` is not in the ring.
    pub fn promote(&self, key_id: &str) -> Result<(), KeyError> {
        let _guard = self.write_lock.lock().unwrap_or_else(|e| e.into_inner());
        let current = self.ring.load_full();
        if !current.keys.contains_key(key_id) {
            return Err(KeyError::UnknownKey(key_id.to_owned()));
        }
        let all = current.keys.values().map(|k| k.as_ref().clone());
        self.ring.store(Arc::new(KeyRing::with_active(all, key_id)));
        info!(active_key_id = %key_id, "encryption key promoted");
        Ok(())
    }

    /// Id of the active key, if any.
    pub fn active_key_id(&self) -> Option<String> {
        self.ring.load().active.clone()
    }

    /// All key ids in the ring, sorted.
    pub fn key_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.ring.load().keys.keys().cloned().collect();
        ids.sort();
        ids
    }

    pub fn len(&self) -> usize {
        self.ring.load().keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ring.load().keys.is_empty()
    }
}

/// Parse a comma-separated list of `id=material` pairs.
///
/// Whitespace around entries is ignored; empty entries are skipped.
pub fn parse_key_list(raw: &str) -> Result<Vec<KeyRecord>, KeyError> {
    let mut out = Vec::new();
    for entry in raw.split(',').map(str::trim).filter(|e| !e.is_empty()) {
        // An entry without `=` may be bare key material; keep it out of the error.
        let (id, material) = entry
            .split_once('=')
            .ok_or_else(|| KeyError::InvalidMaterial("<missing id>".into()))?;
        let id = id.trim();
        let material = KeyMaterial::parse(id, material)?;
        out.push(KeyRecord::new(id, material)?);
    }
    if out.is_empty() {
        return Err(KeyError::NoActiveKey);
    }
    Ok(out)
}
