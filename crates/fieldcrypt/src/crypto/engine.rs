//! [`CipherEngine`]: string-in, envelope-out encryption bound to the key ring.

use tracing::debug;

use super::cipher::{self, CipherError, DecryptionFailure, Envelope};
use crate::keys::{KeyError, KeyManager};

/// Encrypts under the active key and decrypts under whichever key an envelope
/// names. Cheap to clone; all clones share one key ring.
#[derive(Clone, Debug)]
pub struct CipherEngine {
    keys: KeyManager,
}

impl CipherEngine {
    pub fn new(keys: KeyManager) -> Self {
        Self { keys }
    }

    /// The key ring this engine resolves keys from.
    pub fn keys(&self) -> &KeyManager {
        &self.keys
    }

    /// Encrypt `plaintext` under the current active key.
    ///
    /// Empty input is never encrypted: `Ok(None)` tells the caller to keep the
    /// original value.
    pub fn seal(&self, plaintext: &str) -> Result<Option<Envelope>, CipherError> {
        if plaintext.is_empty() {
            return Ok(None);
        }
        let key = self
            .keys
            .resolve_active_key()
            .map_err(|_| CipherError::NoActiveKey)?;
        cipher::encrypt(plaintext, &key).map(Some)
    }

    /// Decrypt an envelope, resolving its key by id.
    pub fn open(&self, envelope: &Envelope) -> Result<String, DecryptionFailure> {
        let key = self.keys.resolve_key_by_id(&envelope.key_id).map_err(|e| match e {
            KeyError::UnknownKey(id) => DecryptionFailure::UnknownKey(id),
            _ => DecryptionFailure::UnknownKey(envelope.key_id.clone()),
        })?;
        let result = cipher::decrypt(envelope, &key);
        if let Err(e) = &result {
            debug!(key_id = %envelope.key_id, reason = e.code(), "envelope failed to open");
        }
        result
    }
}
