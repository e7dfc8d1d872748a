//! AES-256-GCM-SIV encryption and decryption of individual string fields.
//!
//! Every call draws a fresh 96-bit nonce from the OS CSPRNG, so encrypting the
//! same plaintext twice under the same key yields different envelopes.
//!
//! The envelope header (`v1.<keyId>`) is passed to the AEAD as associated
//! data: an envelope whose key id has been edited fails authentication instead
//! of being decrypted under a different key.

use std::{fmt, str::FromStr};

use aes_gcm_siv::{
    aead::{Aead, KeyInit, OsRng, Payload},
    Aes256GcmSiv, Nonce,
};
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use thiserror::Error;

use crate::keys::{record::validate_key_id, KeyRecord};

/// Byte length of an AES-256 key (32 bytes = 256 bits).
pub const KEY_LEN: usize = 32;

/// Byte length of an AES-GCM-SIV nonce (12 bytes = 96 bits).
pub const NONCE_LEN: usize = 12;

/// Byte length of the authentication tag appended to every ciphertext.
pub const TAG_LEN: usize = 16;

/// Current envelope format version.
pub const ENVELOPE_VERSION: u8 = 1;

/// A parsed, encrypted field value.
///
/// The string representation is
/// `v1.<keyId>.<base64url(nonce)>.<base64url(ciphertext+tag)>`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Envelope {
    /// Envelope format version.
    pub version: u8,
    /// Id of the key the value was encrypted under.
    pub key_id: String,
    /// Raw nonce bytes.
    pub iv: [u8; NONCE_LEN],
    /// Raw ciphertext + authentication tag bytes.
    pub ciphertext: Vec<u8>,
}

/// A string that does not have the shape of an [`Envelope`].
///
/// Codec callers treat this as legacy plaintext, not as a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("value is not an encryption envelope")]
pub struct EnvelopeParseError;

impl Envelope {
    fn associated_data(version: u8, key_id: &str) -> Vec<u8> {
        format!("v{version}.{key_id}").into_bytes()
    }
}

impl fmt::Display for Envelope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "v{}.{}.{}.{}",
            self.version,
            self.key_id,
            URL_SAFE_NO_PAD.encode(self.iv),
            URL_SAFE_NO_PAD.encode(&self.ciphertext),
        )
    }
}

impl FromStr for Envelope {
    type Err = EnvelopeParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parts: Vec<&str> = s.splitn(4, '.').collect();
        if parts.len() != 4 || parts[0] != format!("v{ENVELOPE_VERSION}") {
            return Err(EnvelopeParseError);
        }
        validate_key_id(parts[1]).map_err(|_| EnvelopeParseError)?;

        let iv_bytes = URL_SAFE_NO_PAD
            .decode(parts[2])
            .map_err(|_| EnvelopeParseError)?;
        let iv: [u8; NONCE_LEN] = iv_bytes.try_into().map_err(|_| EnvelopeParseError)?;

        let ciphertext = URL_SAFE_NO_PAD
            .decode(parts[3])
            .map_err(|_| EnvelopeParseError)?;
        if ciphertext.is_empty() {
            return Err(EnvelopeParseError);
        }

        Ok(Self {
            version: ENVELOPE_VERSION,
            key_id: parts[1].to_owned(),
            iv,
            ciphertext,
        })
    }
}

/// Errors produced while encrypting.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CipherError {
    /// The key is the wrong length (must be [`KEY_LEN`] bytes).
    #[error("invalid key length: expected {KEY_LEN} bytes")]
    InvalidKeyLength,

    /// The AEAD primitive refused to produce ciphertext.
    #[error("encryption failed")]
    EncryptionFailure,

    /// No active key is available for new encryptions.
    #[error("no active encryption key")]
    NoActiveKey,
}

/// Why a well-formed envelope could not be turned back into plaintext.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecryptionFailure {
    /// The envelope references a key id the key ring does not hold.
    #[error("envelope references unknown key id {0}")]
    UnknownKey(String),

    /// The ciphertext is truncated, or decrypts to something that is not UTF-8.
    #[error("invalid ciphertext")]
    InvalidCiphertext,

    /// Authentication failed: wrong key material or tampered envelope.
    #[error("integrity check failed")]
    IntegrityCheckFailed,
}

impl DecryptionFailure {
    /// Stable machine-readable code, used in undecryptable-field markers.
    pub fn code(&self) -> &'static str {
        match self {
            DecryptionFailure::UnknownKey(_) => "unknown_key",
            DecryptionFailure::InvalidCiphertext => "invalid_ciphertext",
            DecryptionFailure::IntegrityCheckFailed => "integrity_check_failed",
        }
    }
}

/// Encrypt a plaintext string under `key`.
///
/// # Errors
///
/// Returns [`CipherError::InvalidKeyLength`] if the key material is not
/// [`KEY_LEN`] bytes, or [`CipherError::EncryptionFailure`] on an internal
/// AEAD error.
pub fn encrypt(plaintext: &str, key: &KeyRecord) -> Result<Envelope, CipherError> {
    let cipher = build_cipher(key.material().as_bytes()).ok_or(CipherError::InvalidKeyLength)?;

    use aes_gcm_siv::aead::rand_core::RngCore;
    let mut iv = [0u8; NONCE_LEN];
    OsRng.fill_bytes(&mut iv);

    let aad = Envelope::associated_data(ENVELOPE_VERSION, key.key_id());
    let ciphertext = cipher
        .encrypt(
            Nonce::from_slice(&iv),
            Payload {
                msg: plaintext.as_bytes(),
                aad: &aad,
            },
        )
        .map_err(|_| CipherError::EncryptionFailure)?;

    Ok(Envelope {
        version: ENVELOPE_VERSION,
        key_id: key.key_id().to_owned(),
        iv,
        ciphertext,
    })
}

/// Decrypt `envelope` with an already-resolved `key`.
///
/// # Errors
///
/// Returns [`DecryptionFailure::InvalidCiphertext`] for truncated input or
/// non-UTF-8 plaintext, and [`DecryptionFailure::IntegrityCheckFailed`] when the
/// authentication tag does not verify.
pub fn decrypt(envelope: &Envelope, key: &KeyRecord) -> Result<String, DecryptionFailure> {
    if envelope.ciphertext.len() < TAG_LEN {
        return Err(DecryptionFailure::InvalidCiphertext);
    }
    let cipher =
        build_cipher(key.material().as_bytes()).ok_or(DecryptionFailure::InvalidCiphertext)?;
    let aad = Envelope::associated_data(envelope.version, &envelope.key_id);
    let plaintext = cipher
        .decrypt(
            Nonce::from_slice(&envelope.iv),
            Payload {
                msg: envelope.ciphertext.as_ref(),
                aad: &aad,
            },
        )
        .map_err(|_| DecryptionFailure::IntegrityCheckFailed)?;
    String::from_utf8(plaintext).map_err(|_| DecryptionFailure::InvalidCiphertext)
}

fn build_cipher(key: &[u8]) -> Option<Aes256GcmSiv> {
    if key.len() != KEY_LEN {
        return None;
    }
    Aes256GcmSiv::new_from_slice(key).ok()
}
