//! Handler error type and its HTTP rendering.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use common::{ErrorResponse, ServiceError};
use tracing::error;

use crate::boundary::{PersistenceError, StoreError};
use crate::codec::CodecError;

/// Wrapper that renders a [`ServiceError`] as a JSON [`ErrorResponse`].
#[derive(Debug)]
pub struct ApiError(pub ServiceError);

impl From<ServiceError> for ApiError {
    fn from(e: ServiceError) -> Self {
        Self(e)
    }
}

impl From<CodecError> for ApiError {
    fn from(e: CodecError) -> Self {
        let mapped = match &e {
            CodecError::Encryption { .. } => ServiceError::EncryptionFailure(e.to_string()),
            CodecError::AlreadyEncrypted { .. } => ServiceError::AlreadyEncrypted(e.to_string()),
            CodecError::BoundaryConflict { .. } => ServiceError::Internal(e.to_string()),
        };
        Self(mapped)
    }
}

impl From<PersistenceError> for ApiError {
    fn from(e: PersistenceError) -> Self {
        let mapped = match e {
            PersistenceError::Codec(codec) => return Self::from(codec),
            PersistenceError::NotIntercepted { entity } => ServiceError::BadRequest(format!(
                "{entity} records must be written through their encrypted route"
            )),
            PersistenceError::Store(StoreError::Unavailable(msg)) => ServiceError::Unavailable(msg),
            PersistenceError::Store(StoreError::Backend(msg)) => ServiceError::Internal(msg),
            PersistenceError::Task(msg) => ServiceError::Internal(msg),
        };
        Self(mapped)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = StatusCode::from_u16(self.0.http_status())
            .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        if status.is_server_error() {
            error!(code = self.0.code(), error = %self.0, "request failed");
        }
        (status, Json(ErrorResponse::from(&self.0))).into_response()
    }
}
