//! Common error types shared across crates.

use thiserror::Error;

/// Top-level service error type.
///
/// Variants map to HTTP status codes returned to callers:
/// - [`ServiceError::BadRequest`] → 400
/// - [`ServiceError::NotFound`] → 404
/// - [`ServiceError::PayloadTooLarge`] → 413
/// - [`ServiceError::UnsupportedMediaType`] → 415
/// - [`ServiceError::AlreadyEncrypted`] → 422
/// - [`ServiceError::EncryptionFailure`] → 500
/// - [`ServiceError::Unavailable`] → 503
#[derive(Debug, Error)]
pub enum ServiceError {
    /// The request was malformed: invalid JSON or a body that is not a record.
    #[error("bad request: {0}")]
    BadRequest(String),

    /// The addressed record or entity does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// A body exceeded the configured buffering limit.
    #[error("payload too large: {0}")]
    PayloadTooLarge(String),

    /// A body on an encrypted route is not plain JSON, so its fields cannot be
    /// inspected.
    #[error("unsupported media type: {0}")]
    UnsupportedMediaType(String),

    /// The caller submitted a value that is already an encryption envelope.
    #[error("already encrypted: {0}")]
    AlreadyEncrypted(String),

    /// A sensitive field could not be encrypted; the write was aborted.
    #[error("encryption failure: {0}")]
    EncryptionFailure(String),

    /// A required resource (key ring, record store) is temporarily unavailable.
    #[error("service unavailable: {0}")]
    Unavailable(String),

    /// An unexpected internal error occurred.
    #[error("internal error: {0}")]
    Internal(String),
}

impl ServiceError {
    /// Returns the HTTP status code that should be sent for this error.
    pub fn http_status(&self) -> u16 {
        match self {
            ServiceError::BadRequest(_) => 400,
            ServiceError::NotFound(_) => 404,
            ServiceError::PayloadTooLarge(_) => 413,
            ServiceError::UnsupportedMediaType(_) => 415,
            ServiceError::AlreadyEncrypted(_) => 422,
            ServiceError::EncryptionFailure(_) => 500,
            ServiceError::Unavailable(_) => 503,
            ServiceError::Internal(_) => 500,
        }
    }

    /// Short machine-readable code used in [`crate::protocol::ErrorResponse`].
    pub fn code(&self) -> &'static str {
        match self {
            ServiceError::BadRequest(_) => "bad_request",
            ServiceError::NotFound(_) => "not_found",
            ServiceError::PayloadTooLarge(_) => "payload_too_large",
            ServiceError::UnsupportedMediaType(_) => "unsupported_media_type",
            ServiceError::AlreadyEncrypted(_) => "already_encrypted",
            ServiceError::EncryptionFailure(_) => "encryption_failure",
            ServiceError::Unavailable(_) => "service_unavailable",
            ServiceError::Internal(_) => "internal_error",
        }
    }
}
