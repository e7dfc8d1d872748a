//! Axum request handlers for the demo gateway.
//!
//! Handlers never touch ciphertext themselves. Records of HTTP-owned entities
//! arrive already encrypted by the interceptor and leave through it again;
//! records of persistence-owned entities are encrypted by [`EncryptedStore`].
//!
//! [`EncryptedStore`]: crate::boundary::EncryptedStore

use axum::{
    extract::{Extension, Path, State},
    http::{HeaderName, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use common::{ErrorResponse, HealthResponse, ServiceError};
use serde_json::Value;

use super::{error::ApiError, state::AppState};
use crate::boundary::{Intercepted, UNDECRYPTABLE_HEADER};
use crate::codec::Decoded;

/// `GET /health`: liveness and readiness check.
///
/// Returns `200 OK` when an active key is loaded, `503` otherwise.
pub async fn health(State(state): State<AppState>) -> Response {
    let active_key_id = state.keys.active_key_id();
    let status_code = if active_key_id.is_some() {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    let body = HealthResponse {
        status: if status_code.is_success() { "ok" } else { "degraded" }.into(),
        active_key_id,
        keys_loaded: state.keys.len(),
        entities_configured: state.classifier.entity_count(),
    };
    (status_code, Json(body)).into_response()
}

/// `POST /api/{entity}`: store one record (JSON object) or a batch (JSON
/// array of objects).
///
/// A single record is answered with `201` and the record as stored, read back
/// through the store; a batch is answered with `201` and the assigned ids.
/// The interceptor's stamp, when present, is handed to the store so it can
/// tell encoded bodies of HTTP-owned entities from ones that bypassed it.
pub async fn create(
    State(state): State<AppState>,
    Path(entity): Path<String>,
    intercepted: Option<Extension<Intercepted>>,
    Json(body): Json<Value>,
) -> Result<Response, ApiError> {
    let via = intercepted.as_ref().map(|Extension(stamp)| stamp);
    match body {
        Value::Object(_) => {
            let id = state.store.insert(&entity, body, via).await?;
            let stored = state
                .store
                .get(&entity, &id)
                .await?
                .ok_or_else(|| ServiceError::Internal(format!("record {id} vanished after insert")))?;
            Ok(with_failures(StatusCode::CREATED, stored.failures.len(), stored.value))
        }
        Value::Array(items) => {
            if !items.iter().all(Value::is_object) {
                return Err(ServiceError::BadRequest("every batch element must be a JSON object".into()).into());
            }
            let ids = state.store.insert_many(&entity, items, via).await?;
            Ok((StatusCode::CREATED, Json(serde_json::json!({ "ids": ids }))).into_response())
        }
        _ => Err(ServiceError::BadRequest("body must be a JSON object or array of objects".into()).into()),
    }
}

/// `GET /api/{entity}`: every stored record of an entity, in insertion order.
pub async fn list(
    State(state): State<AppState>,
    Path(entity): Path<String>,
) -> Result<Response, ApiError> {
    let decoded = state.store.list(&entity).await?;
    let failures: usize = decoded.iter().map(|d| d.failures.len()).sum();
    let values: Vec<Value> = decoded.into_iter().map(|d| d.value).collect();
    Ok(with_failures(StatusCode::OK, failures, Value::Array(values)))
}

/// `GET /api/{entity}/{id}`: one stored record.
pub async fn get(
    State(state): State<AppState>,
    Path((entity, id)): Path<(String, String)>,
) -> Result<Response, ApiError> {
    let Decoded { value, failures, .. } = state
        .store
        .get(&entity, &id)
        .await?
        .ok_or_else(|| ServiceError::NotFound(format!("{entity}/{id}")))?;
    Ok(with_failures(StatusCode::OK, failures.len(), value))
}

/// Catch-all 404 handler.
pub async fn not_found() -> impl IntoResponse {
    let err = ErrorResponse::new("not_found", "the requested resource does not exist");
    (StatusCode::NOT_FOUND, Json(err))
}

fn with_failures(status: StatusCode, failures: usize, body: Value) -> Response {
    let mut resp = (status, Json(body)).into_response();
    if failures > 0 {
        resp.headers_mut().insert(
            HeaderName::from_static(UNDECRYPTABLE_HEADER),
            HeaderValue::from(failures),
        );
    }
    resp
}
