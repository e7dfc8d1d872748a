//! [`KeyRecord`]: a single named data key plus its lifecycle status.

use aes_gcm_siv::aead::{rand_core::RngCore, OsRng};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use chrono::{DateTime, Utc};
use serde::Serialize;

use super::KeyError;
use crate::crypto::KEY_LEN;

/// Longest key identifier accepted by the key ring.
pub const MAX_KEY_ID_LEN: usize = 64;

/// Fixed-size key buffer that holds exactly [`KEY_LEN`] bytes.
///
/// When this type is dropped, the memory is overwritten with zeroes to
/// minimise the window during which plaintext key material lives in RAM.
#[derive(Clone)]
pub struct KeyMaterial(Box<[u8; KEY_LEN]>);

impl KeyMaterial {
    /// Copy `bytes` into a new buffer. Returns `None` on a length mismatch.
    pub fn from_slice(bytes: &[u8]) -> Option<Self> {
        if bytes.len() != KEY_LEN {
            return None;
        }
        let mut buf = Box::new([0u8; KEY_LEN]);
        buf.copy_from_slice(bytes);
        Some(Self(buf))
    }

    /// Fill a new buffer from the OS CSPRNG.
    pub fn generate() -> Self {
        let mut buf = Box::new([0u8; KEY_LEN]);
        OsRng.fill_bytes(&mut buf[..]);
        Self(buf)
    }

    /// Parse configured key material.
    ///
    /// Accepted forms: `hex:<64 hex chars>`, `base64:<standard base64>`, or a
    /// bare value that is treated as hex when it is exactly 64 hex characters
    /// and as standard base64 otherwise. The decoded value must be
    /// [`KEY_LEN`] bytes.
    pub fn parse(key_id: &str, encoded: &str) -> Result<Self, KeyError> {
        let encoded = encoded.trim();
        let invalid = || KeyError::InvalidMaterial(key_id.to_owned());

        let decoded = if let Some(h) = encoded.strip_prefix("hex:") {
            hex::decode(h).map_err(|_| invalid())?
        } else if let Some(b) = encoded.strip_prefix("base64:") {
            STANDARD.decode(b).map_err(|_| invalid())?
        } else if encoded.len() == KEY_LEN * 2 && encoded.bytes().all(|b| b.is_ascii_hexdigit()) {
            hex::decode(encoded).map_err(|_| invalid())?
        } else {
            STANDARD.decode(encoded).map_err(|_| invalid())?
        };

        Self::from_slice(&decoded).ok_or_else(invalid)
    }

    /// Borrow the raw key bytes.
    pub fn as_bytes(&self) -> &[u8] {
        &self.0[..]
    }

    /// Standard base64 rendering, used only by the key generator.
    pub fn to_base64(&self) -> String {
        STANDARD.encode(&self.0[..])
    }
}

impl Drop for KeyMaterial {
    fn drop(&mut self) {
        self.0.iter_mut().for_each(|b| *b = 0);
    }
}

impl std::fmt::Debug for KeyMaterial {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Key material is never printed.
        f.write_str("KeyMaterial([REDACTED])")
    }
}

/// Lifecycle state of a key in the ring.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum KeyStatus {
    /// Used for every new encryption. Exactly one key is active.
    Active,
    /// Kept only to decrypt envelopes written before the last rotation.
    Retired,
}

/// A named data key.
#[derive(Debug, Clone)]
pub struct KeyRecord {
    key_id: String,
    material: KeyMaterial,
    created_at: DateTime<Utc>,
    status: KeyStatus,
}

impl KeyRecord {
    /// Build a record from already-parsed material. New records start retired;
    /// the key ring decides which one is active.
    pub fn new(key_id: impl Into<String>, material: KeyMaterial) -> Result<Self, KeyError> {
        let key_id = key_id.into();
        validate_key_id(&key_id)?;
        Ok(Self {
            key_id,
            material,
            created_at: Utc::now(),
            status: KeyStatus::Retired,
        })
    }

    /// Generate a fresh random key with the given identifier.
    pub fn generate(key_id: impl Into<String>) -> Result<Self, KeyError> {
        Self::new(key_id, KeyMaterial::generate())
    }

    pub fn key_id(&self) -> &str {
        &self.key_id
    }

    pub fn material(&self) -> &KeyMaterial {
        &self.material
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn status(&self) -> KeyStatus {
        self.status
    }

    pub fn is_active(&self) -> bool {
        self.status == KeyStatus::Active
    }

    pub(super) fn with_status(&self, status: KeyStatus) -> Self {
        Self {
            status,
            ..self.clone()
        }
    }
}

/// Key ids are embedded in envelope strings, so they are restricted to a
/// separator-free alphabet.
pub fn validate_key_id(key_id: &str) -> Result<(), KeyError> {
    let ok = !key_id.is_empty()
        && key_id.len() <= MAX_KEY_ID_LEN
        && key_id
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'-' || b == b'_');
    if ok {
        Ok(())
    } else {
        Err(KeyError::InvalidKeyId(key_id.to_owned()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const HEX_KEY: &str = "000102030405060708090a0b0c0d0e0f101112131415161718191a1b1c1d1e1f";

    #[test]
    fn parses_prefixed_hex() {
        let m = KeyMaterial::parse("k1", &format!("hex:{HEX_KEY}")).unwrap();
        assert_eq!(m.as_bytes()[1], 0x01);
        assert_eq!(m.as_bytes()[31], 0x1f);
    }

    #[test]
    fn parses_bare_hex_and_base64() {
        let from_hex = KeyMaterial::parse("k1", HEX_KEY).unwrap();
        let b64 = STANDARD.encode(from_hex.as_bytes());
        let from_b64 = KeyMaterial::parse("k1", &b64).unwrap();
        assert_eq!(from_hex.as_bytes(), from_b64.as_bytes());
        let prefixed = KeyMaterial::parse("k1", &format!("base64:{b64}")).unwrap();
        assert_eq!(prefixed.as_bytes(), from_hex.as_bytes());
    }

    #[test]
    fn rejects_short_material() {
        let short = STANDARD.encode([7u8; 16]);
        assert!(matches!(
            KeyMaterial::parse("k1", &short),
            Err(KeyError::InvalidMaterial(id)) if id == "k1"
        ));
        assert!(KeyMaterial::parse("k1", "hex:zz").is_err());
    }

    #[test]
    fn key_id_alphabet_enforced() {
        assert!(validate_key_id("2024-q1_main").is_ok());
        assert!(validate_key_id("").is_err());
        assert!(validate_key_id("has.dot").is_err());
        assert!(validate_key_id(&"x".repeat(MAX_KEY_ID_LEN + 1)).is_err());
    }

    #[test]
    fn material_redacted_in_debug() {
        let record = KeyRecord::generate("k1").unwrap();
        let rendered = format!("{record:?}");
        assert!(rendered.contains("REDACTED"));
        assert!(!rendered.contains(&record.material().to_base64()));
    }

    #[test]
    fn generated_keys_differ() {
        let a = KeyMaterial::generate();
        let b = KeyMaterial::generate();
        assert_ne!(a.as_bytes(), b.as_bytes());
    }
}
