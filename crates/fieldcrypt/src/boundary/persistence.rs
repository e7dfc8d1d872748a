//! Persistence hook: encrypt immediately before a write, decrypt immediately
//! after a read.
//!
//! [`RecordStore`] is the seam to whatever ORM or database sits underneath.
//! [`EncryptedStore`] decorates a store so that entities owned by the
//! persistence boundary are encoded on the way in and decoded on the way out,
//! while entities owned by the HTTP boundary pass through untouched. Writes of
//! HTTP-owned entities must carry the [`Intercepted`] stamp the interceptor
//! sets, so a request that reached a handler around the interceptor is refused
//! rather than stored as plaintext.

use std::{
    collections::HashMap,
    sync::{Arc, RwLock},
};

use serde_json::Value;
use thiserror::Error;
use tokio::task::JoinSet;
use tracing::{debug, warn};

use super::http::Intercepted;
use crate::codec::{CodecError, Decoded, ObjectCodec};
use crate::policy::Boundary;

/// Errors raised by a [`RecordStore`].
#[derive(Debug, Error)]
pub enum StoreError {
    /// The backend cannot be reached or its lock is poisoned.
    #[error("record store unavailable: {0}")]
    Unavailable(String),

    /// The backend rejected the operation.
    #[error("record store rejected the operation: {0}")]
    Backend(String),
}

/// Errors raised by [`PersistenceHook`] batch operations and [`EncryptedStore`].
#[derive(Debug, Error)]
pub enum PersistenceError {
    #[error(transparent)]
    Codec(#[from] CodecError),

    #[error(transparent)]
    Store(#[from] StoreError),

    /// An HTTP-owned entity was written without passing through the
    /// interceptor for that entity.
    #[error("{entity} records are encrypted by the http interceptor, which did not handle this write")]
    NotIntercepted { entity: String },

    /// A blocking codec task panicked or was cancelled.
    #[error("codec task failed: {0}")]
    Task(String),
}

/// Minimal record storage contract the persistence hook wraps.
#[cfg_attr(test, mockall::automock)]
pub trait RecordStore: Send + Sync {
    /// Store one record and return its id.
    fn insert(&self, entity: &str, record: Value) -> Result<String, StoreError>;

    /// Store several records and return their ids in input order.
    fn insert_many(&self, entity: &str, records: Vec<Value>) -> Result<Vec<String>, StoreError>;

    /// Fetch one record by id.
    fn get(&self, entity: &str, id: &str) -> Result<Option<Value>, StoreError>;

    /// Fetch every record of an entity in insertion order.
    fn list(&self, entity: &str) -> Result<Vec<Value>, StoreError>;
}

/// Process-local [`RecordStore`] used by the demo gateway and tests.
///
/// Records that are JSON objects without a string `id` get a UUID v4 id
/// written into them.
#[derive(Debug, Default)]
pub struct MemoryStore {
    tables: RwLock<HashMap<String, Vec<(String, Value)>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn assign_id(mut record: Value) -> (String, Value) {
        let existing = record.get("id").and_then(Value::as_str).map(str::to_owned);
        let id = existing.unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
        if let Value::Object(map) = &mut record {
            map.entry("id").or_insert_with(|| Value::String(id.clone()));
        }
        (id, record)
    }
}

fn poisoned<T>(_: T) -> StoreError {
    StoreError::Unavailable("memory store lock poisoned".into())
}

impl RecordStore for MemoryStore {
    fn insert(&self, entity: &str, record: Value) -> Result<String, StoreError> {
        let (id, record) = Self::assign_id(record);
        let mut tables = self.tables.write().map_err(poisoned)?;
        tables
            .entry(entity.to_owned())
            .or_default()
            .push((id.clone(), record));
        Ok(id)
    }

    fn insert_many(&self, entity: &str, records: Vec<Value>) -> Result<Vec<String>, StoreError> {
        let mut tables = self.tables.write().map_err(poisoned)?;
        let table = tables.entry(entity.to_owned()).or_default();
        let mut ids = Vec::with_capacity(records.len());
        for record in records {
            let (id, record) = Self::assign_id(record);
            ids.push(id.clone());
            table.push((id, record));
        }
        Ok(ids)
    }

    fn get(&self, entity: &str, id: &str) -> Result<Option<Value>, StoreError> {
        let tables = self.tables.read().map_err(poisoned)?;
        Ok(tables
            .get(entity)
            .and_then(|t| t.iter().find(|(rid, _)| rid == id))
            .map(|(_, v)| v.clone()))
    }

    fn list(&self, entity: &str) -> Result<Vec<Value>, StoreError> {
        let tables = self.tables.read().map_err(poisoned)?;
        Ok(tables
            .get(entity)
            .map(|t| t.iter().map(|(_, v)| v.clone()).collect())
            .unwrap_or_default())
    }
}

/// Runs the object codec at the persistence boundary.
#[derive(Clone, Debug)]
pub struct PersistenceHook {
    codec: ObjectCodec,
}

impl PersistenceHook {
    pub fn new(codec: ObjectCodec) -> Self {
        Self { codec }
    }

    /// Returns `true` if this hook is the authoritative encryption point for
    /// `entity`.
    pub fn owns(&self, entity: &str) -> bool {
        self.codec.classifier().owner(entity) == Boundary::Persistence
    }

    /// Encode one record right before it is written.
    ///
    /// # Errors
    ///
    /// Returns [`CodecError::BoundaryConflict`] if the entity is owned by the
    /// HTTP boundary, or any encoding error.
    pub fn before_write(&self, entity: &str, record: &Value) -> Result<Value, CodecError> {
        self.codec.ensure_owner(entity, Boundary::Persistence)?;
        self.codec.encode_for_storage(entity, record)
    }

    /// Decode one record right after it is read.
    pub fn after_read(&self, entity: &str, record: &Value) -> Result<Decoded, CodecError> {
        self.codec.ensure_owner(entity, Boundary::Persistence)?;
        let decoded = self.codec.decode_from_storage(entity, record);
        report(entity, std::slice::from_ref(&decoded));
        Ok(decoded)
    }

    /// Encode a batch, one blocking task per record. Output order matches
    /// input order regardless of completion order.
    pub async fn before_write_batch(
        &self,
        entity: &str,
        records: Vec<Value>,
    ) -> Result<Vec<Value>, PersistenceError> {
        self.codec.ensure_owner(entity, Boundary::Persistence)?;
        let results = self
            .run_batch(entity, records, |codec, entity, record| {
                codec.encode_for_storage(entity, record)
            })
            .await?;
        results
            .into_iter()
            .map(|r| r.map_err(PersistenceError::from))
            .collect()
    }

    /// Decode a batch, one blocking task per record, in input order.
    pub async fn after_read_batch(
        &self,
        entity: &str,
        records: Vec<Value>,
    ) -> Result<Vec<Decoded>, PersistenceError> {
        self.codec.ensure_owner(entity, Boundary::Persistence)?;
        let decoded = self
            .run_batch(entity, records, |codec, entity, record| {
                codec.decode_from_storage(entity, record)
            })
            .await?;
        report(entity, &decoded);
        Ok(decoded)
    }

    async fn run_batch<T, F>(
        &self,
        entity: &str,
        records: Vec<Value>,
        op: F,
    ) -> Result<Vec<T>, PersistenceError>
    where
        T: Send + 'static,
        F: Fn(&ObjectCodec, &str, &Value) -> T + Send + Sync + Copy + 'static,
    {
        let len = records.len();
        let mut set = JoinSet::new();
        for (index, record) in records.into_iter().enumerate() {
            let codec = self.codec.clone();
            let entity = entity.to_owned();
            set.spawn_blocking(move || (index, op(&codec, &entity, &record)));
        }

        let mut slots: Vec<Option<T>> = (0..len).map(|_| None).collect();
        while let Some(joined) = set.join_next().await {
            let (index, result) = joined.map_err(|e| PersistenceError::Task(e.to_string()))?;
            slots[index] = Some(result);
        }
        slots
            .into_iter()
            .map(|slot| slot.ok_or_else(|| PersistenceError::Task("missing batch result".into())))
            .collect()
    }
}

fn report(entity: &str, decoded: &[Decoded]) {
    let paths: Vec<&str> = decoded
        .iter()
        .flat_map(|d| d.failures.iter().map(|f| f.path.as_str()))
        .collect();
    if !paths.is_empty() {
        warn!(entity = %entity, count = paths.len(), fields = ?paths, "undecryptable fields after read");
    }
    let legacy: usize = decoded.iter().map(|d| d.legacy_fields).sum();
    if legacy > 0 {
        debug!(entity = %entity, legacy_fields = legacy, "legacy plaintext passed through");
    }
}

/// A [`RecordStore`] wrapper that applies the persistence hook to the
/// entities it owns.
#[derive(Clone)]
pub struct EncryptedStore {
    inner: Arc<dyn RecordStore>,
    hook: PersistenceHook,
}

impl EncryptedStore {
    pub fn new(inner: Arc<dyn RecordStore>, hook: PersistenceHook) -> Self {
        Self { inner, hook }
    }

    pub fn hook(&self) -> &PersistenceHook {
        &self.hook
    }

    /// Store one record. `via` is the interceptor stamp of the request that
    /// carried it, if any.
    pub async fn insert(
        &self,
        entity: &str,
        record: Value,
        via: Option<&Intercepted>,
    ) -> Result<String, PersistenceError> {
        let record = if self.hook.owns(entity) {
            self.hook.before_write(entity, &record)?
        } else {
            self.ensure_intercepted(entity, via)?;
            record
        };
        Ok(self.inner.insert(entity, record)?)
    }

    pub async fn insert_many(
        &self,
        entity: &str,
        records: Vec<Value>,
        via: Option<&Intercepted>,
    ) -> Result<Vec<String>, PersistenceError> {
        let records = if self.hook.owns(entity) {
            self.hook.before_write_batch(entity, records).await?
        } else {
            self.ensure_intercepted(entity, via)?;
            records
        };
        Ok(self.inner.insert_many(entity, records)?)
    }

    fn ensure_intercepted(&self, entity: &str, via: Option<&Intercepted>) -> Result<(), PersistenceError> {
        match via {
            Some(stamp) if stamp.entity() == entity => Ok(()),
            _ => {
                warn!(entity = %entity, "refusing http-owned write that bypassed the interceptor");
                Err(PersistenceError::NotIntercepted {
                    entity: entity.to_owned(),
                })
            }
        }
    }

    pub async fn get(&self, entity: &str, id: &str) -> Result<Option<Decoded>, PersistenceError> {
        let Some(stored) = self.inner.get(entity, id)? else {
            return Ok(None);
        };
        if self.hook.owns(entity) {
            Ok(Some(self.hook.after_read(entity, &stored)?))
        } else {
            Ok(Some(Decoded::passthrough(stored)))
        }
    }

    pub async fn list(&self, entity: &str) -> Result<Vec<Decoded>, PersistenceError> {
        let stored = self.inner.list(entity)?;
        if self.hook.owns(entity) {
            self.hook.after_read_batch(entity, stored).await
        } else {
            Ok(stored.into_iter().map(Decoded::passthrough).collect())
        }
    }
}
