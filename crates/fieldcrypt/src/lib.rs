//! Transparent field-level encryption for JSON records.
//!
//! Sensitive fields named by a policy document are encrypted with AES-256-GCM-SIV
//! into self-describing envelopes (`v1.<keyId>.<iv>.<ciphertext>`) at exactly one
//! boundary per entity type: an HTTP interceptor or a persistence hook.

pub mod boundary;
pub mod codec;
pub mod config;
pub mod crypto;
pub mod keys;
pub mod policy;
pub mod server;
pub mod telemetry;
