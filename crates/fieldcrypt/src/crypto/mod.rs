//! AES-256-GCM-SIV field encryption primitives and the key-aware engine.
//!
//! No HTTP or storage dependencies live here.
//!
//! # Envelope format
//!
//! ```text
//! v1.<keyId>.<base64url-no-pad(nonce)>.<base64url-no-pad(ciphertext+tag)>
//! ```
//!
//! `v1.<keyId>` is also the AEAD associated data. Anything that does not parse
//! as an envelope is treated as legacy plaintext by the codec.

pub mod cipher;
pub mod engine;

pub use cipher::{CipherError, DecryptionFailure, Envelope, EnvelopeParseError, KEY_LEN};
pub use engine::CipherEngine;
