//! Shared application state injected into every Axum handler.

use std::sync::Arc;

use crate::boundary::{EncryptedStore, HttpInterceptor};
use crate::keys::KeyManager;
use crate::policy::FieldClassifier;

/// Application state shared across all request handlers.
///
/// Every field is `Arc`-backed so Axum can clone the state per request.
#[derive(Clone)]
pub struct AppState {
    /// Key ring, reported by `/health`.
    pub keys: KeyManager,
    pub classifier: Arc<FieldClassifier>,
    /// Record storage with the persistence hook applied.
    pub store: EncryptedStore,
    /// Interceptor state installed on routed paths.
    pub interceptor: HttpInterceptor,
}

impl AppState {
    pub fn new(
        keys: KeyManager,
        classifier: Arc<FieldClassifier>,
        store: EncryptedStore,
        interceptor: HttpInterceptor,
    ) -> Self {
        Self {
            keys,
            classifier,
            store,
            interceptor,
        }
    }
}
