//! Boundary adapters: the two places the object codec is applied.
//!
//! - [`http`]: an axum middleware that encrypts inbound JSON bodies and
//!   decrypts outbound ones for routed entity types.
//! - [`persistence`]: a hook around a [`persistence::RecordStore`] that
//!   encrypts right before writes and decrypts right after reads.
//!
//! Every entity type is owned by exactly one adapter (see
//! [`crate::policy::Boundary`]). At startup, a route to a persistence-owned
//! entity and an HTTP-owned entity without a route are both refused
//! ([`RouteError`]). At call time the hook fails with
//! [`crate::codec::CodecError::BoundaryConflict`] for HTTP-owned entities, and
//! [`EncryptedStore`] refuses HTTP-owned writes that lack a matching
//! [`Intercepted`] stamp.

pub mod http;
pub mod persistence;

pub use http::{intercept, HttpInterceptor, Intercepted, RouteError, RouteMap, UNDECRYPTABLE_HEADER};
pub use persistence::{
    EncryptedStore, MemoryStore, PersistenceError, PersistenceHook, RecordStore, StoreError,
};
