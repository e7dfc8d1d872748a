//! [`ObjectCodec`]: walks a record and encrypts or decrypts the fields the
//! classifier marks sensitive.
//!
//! Both boundary adapters go through this one code path, so a field is
//! treated identically whichever boundary triggers it.
//!
//! # Traversal rules
//!
//! - Objects are rebuilt key by key in input order; the input is never mutated.
//! - Arrays are mapped element-wise with the same entity context.
//! - A record nested under an unclassified field is walked with the entity type
//!   the classifier names for that field (its own entity by default).
//! - In a sensitive field only non-empty strings are transformed. Numbers,
//!   booleans, null, empty strings and nested structures are copied unchanged.
//!
//! # Decoding outcomes
//!
//! | stored value                  | result                                  |
//! |-------------------------------|-----------------------------------------|
//! | not an envelope               | legacy plaintext, copied unchanged      |
//! | envelope, decrypts            | plaintext                               |
//! | envelope, fails to decrypt    | `{"$undecryptable": "<reason>"}` marker |

use std::sync::Arc;

use common::UndecryptableField;
use serde_json::{Map, Value};
use thiserror::Error;

use crate::crypto::{CipherEngine, CipherError, DecryptionFailure, Envelope};
use crate::policy::{Boundary, FieldClassifier};

/// Errors that abort encoding. Decoding never fails as a whole.
#[derive(Debug, Error)]
pub enum CodecError {
    /// The cipher could not produce an envelope; nothing may be written.
    #[error("failed to encrypt field {path}: {source}")]
    Encryption {
        path: String,
        #[source]
        source: CipherError,
    },

    /// A sensitive field already holds an envelope under a known key, which
    /// means two adapters are encrypting the same entity.
    #[error("field {path} already holds an encryption envelope")]
    AlreadyEncrypted { path: String },

    /// An adapter was invoked for an entity owned by the other adapter.
    #[error("entity {entity} is encrypted at the {owner} boundary, not the {caller} boundary")]
    BoundaryConflict {
        entity: String,
        owner: Boundary,
        caller: Boundary,
    },
}

/// A sensitive field that held an envelope which could not be decrypted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldFailure {
    /// Location of the field, e.g. `email`, `billing.street`, `items[2].email`.
    pub path: String,
    /// Why decryption failed.
    pub error: DecryptionFailure,
}

/// Output of [`ObjectCodec::decode_from_storage`].
#[derive(Debug, Clone, PartialEq)]
pub struct Decoded {
    /// The record with sensitive fields decrypted (or replaced by markers).
    pub value: Value,
    /// Fields replaced by an undecryptable marker.
    pub failures: Vec<FieldFailure>,
    /// Sensitive string fields that were not envelopes and passed through.
    pub legacy_fields: usize,
}

impl Decoded {
    /// Wrap a value that another boundary is responsible for decoding.
    pub fn passthrough(value: Value) -> Self {
        Self {
            value,
            failures: Vec::new(),
            legacy_fields: 0,
        }
    }

    /// Returns `true` if every envelope decrypted.
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }
}

/// Applies the field classifier and the cipher engine to whole records.
#[derive(Clone, Debug)]
pub struct ObjectCodec {
    classifier: Arc<FieldClassifier>,
    cipher: CipherEngine,
}

impl ObjectCodec {
    pub fn new(classifier: Arc<FieldClassifier>, cipher: CipherEngine) -> Self {
        Self { classifier, cipher }
    }

    pub fn classifier(&self) -> &FieldClassifier {
        &self.classifier
    }

    pub fn cipher(&self) -> &CipherEngine {
        &self.cipher
    }

    /// Fail with [`CodecError::BoundaryConflict`] unless `caller` owns `entity`.
    pub fn ensure_owner(&self, entity: &str, caller: Boundary) -> Result<(), CodecError> {
        let owner = self.classifier.owner(entity);
        if owner == caller {
            Ok(())
        } else {
            Err(CodecError::BoundaryConflict {
                entity: entity.to_owned(),
                owner,
                caller,
            })
        }
    }

    /// Return a copy of `record` with every sensitive string field replaced by
    /// its serialised envelope.
    ///
    /// # Errors
    ///
    /// Returns [`CodecError::Encryption`] if any field fails to encrypt (the
    /// whole record is rejected), or [`CodecError::AlreadyEncrypted`] if a
    /// sensitive field already holds an envelope under a known key.
    pub fn encode_for_storage(&self, entity: &str, record: &Value) -> Result<Value, CodecError> {
        self.encode_value(entity, record, "")
    }

    /// Return a copy of `record` with every sensitive envelope field decrypted.
    ///
    /// Never fails: legacy plaintext passes through, and undecryptable
    /// envelopes become explicit markers listed in [`Decoded::failures`].
    pub fn decode_from_storage(&self, entity: &str, record: &Value) -> Decoded {
        let mut failures = Vec::new();
        let mut legacy_fields = 0;
        let value = self.decode_value(entity, record, "", &mut failures, &mut legacy_fields);
        Decoded {
            value,
            failures,
            legacy_fields,
        }
    }

    fn encode_value(&self, entity: &str, value: &Value, path: &str) -> Result<Value, CodecError> {
        match value {
            Value::Object(map) => {
                let mut out = Map::with_capacity(map.len());
                for (field, child) in map {
                    let child_path = field_path(path, field);
                    let encoded = if self.classifier.is_sensitive(entity, field) {
                        self.encrypt_leaf(child, &child_path)?
                    } else {
                        let nested = self.classifier.nested_entity(entity, field);
                        self.encode_value(nested, child, &child_path)?
                    };
                    out.insert(field.clone(), encoded);
                }
                Ok(Value::Object(out))
            }
            Value::Array(items) => items
                .iter()
                .enumerate()
                .map(|(i, item)| self.encode_value(entity, item, &index_path(path, i)))
                .collect::<Result<Vec<_>, _>>()
                .map(Value::Array),
            other => Ok(other.clone()),
        }
    }

    fn encrypt_leaf(&self, value: &Value, path: &str) -> Result<Value, CodecError> {
        let Value::String(plaintext) = value else {
            return Ok(value.clone());
        };
        if let Ok(existing) = plaintext.parse::<Envelope>() {
            if self.cipher.keys().contains(&existing.key_id) {
                return Err(CodecError::AlreadyEncrypted {
                    path: path.to_owned(),
                });
            }
        }
        match self.cipher.seal(plaintext) {
            Ok(Some(envelope)) => Ok(Value::String(envelope.to_string())),
            Ok(None) => Ok(value.clone()),
            Err(source) => Err(CodecError::Encryption {
                path: path.to_owned(),
                source,
            }),
        }
    }

    fn decode_value(
        &self,
        entity: &str,
        value: &Value,
        path: &str,
        failures: &mut Vec<FieldFailure>,
        legacy: &mut usize,
    ) -> Value {
        match value {
            Value::Object(map) => {
                let mut out = Map::with_capacity(map.len());
                for (field, child) in map {
                    let child_path = field_path(path, field);
                    let decoded = if self.classifier.is_sensitive(entity, field) {
                        self.decrypt_leaf(child, child_path, failures, legacy)
                    } else {
                        let nested = self.classifier.nested_entity(entity, field);
                        self.decode_value(nested, child, &child_path, failures, legacy)
                    };
                    out.insert(field.clone(), decoded);
                }
                Value::Object(out)
            }
            Value::Array(items) => Value::Array(
                items
                    .iter()
                    .enumerate()
                    .map(|(i, item)| self.decode_value(entity, item, &index_path(path, i), failures, legacy))
                    .collect(),
            ),
            other => other.clone(),
        }
    }

    fn decrypt_leaf(
        &self,
        value: &Value,
        path: String,
        failures: &mut Vec<FieldFailure>,
        legacy: &mut usize,
    ) -> Value {
        let Value::String(stored) = value else {
            return value.clone();
        };
        let Ok(envelope) = stored.parse::<Envelope>() else {
            if !stored.is_empty() {
                *legacy += 1;
            }
            return value.clone();
        };
        match self.cipher.open(&envelope) {
            Ok(plaintext) => Value::String(plaintext),
            Err(error) => {
                let marker = UndecryptableField::new(error.code()).to_value();
                failures.push(FieldFailure { path, error });
                marker
            }
        }
    }
}

fn field_path(parent: &str, field: &str) -> String {
    if parent.is_empty() {
        field.to_owned()
    } else {
        format!("{parent}.{field}")
    }
}

fn index_path(parent: &str, index: usize) -> String {
    format!("{parent}[{index}]")
}
