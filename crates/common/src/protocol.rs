//! Wire types exchanged with HTTP callers and written into decoded records.
//!
//! These types are serialised as JSON on the public API. The
//! [`UndecryptableField`] marker is also substituted into records whose
//! sensitive fields fail to decrypt, so callers can tell "never encrypted"
//! apart from "present but unreadable".

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Undecryptable marker
// ---------------------------------------------------------------------------

/// Object key that identifies an [`UndecryptableField`] marker.
pub const UNDECRYPTABLE_KEY: &str = "$undecryptable";

/// Replaces a sensitive field whose stored envelope could not be decrypted.
///
/// Serialises as `{"$undecryptable": "<reason>"}` where `reason` is one of
/// `unknown_key`, `invalid_ciphertext` or `integrity_check_failed`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UndecryptableField {
    /// Machine-readable failure reason.
    #[serde(rename = "$undecryptable")]
    pub reason: String,
}

impl UndecryptableField {
    /// Construct a marker for the given reason code.
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }

    /// Render the marker as a JSON value ready to be placed in a record.
    pub fn to_value(&self) -> serde_json::Value {
        serde_json::json!({ UNDECRYPTABLE_KEY: self.reason })
    }

    /// Returns the marker if `value` is exactly an undecryptable marker object.
    pub fn from_value(value: &serde_json::Value) -> Option<Self> {
        let obj = value.as_object()?;
        if obj.len() != 1 {
            return None;
        }
        obj.get(UNDECRYPTABLE_KEY)
            .and_then(|r| r.as_str())
            .map(Self::new)
    }
}

// ---------------------------------------------------------------------------
// Error response
// ---------------------------------------------------------------------------

/// Standard error response body returned on any non-2xx status.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    /// Short machine-readable error code (e.g. `"encryption_failure"`).
    pub code: String,
    /// Human-readable description safe to expose to callers.
    pub message: String,
}

impl ErrorResponse {
    /// Construct an [`ErrorResponse`] from a code and message.
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
        }
    }
}

impl From<&crate::ServiceError> for ErrorResponse {
    fn from(err: &crate::ServiceError) -> Self {
        Self::new(err.code(), err.to_string())
    }
}

// ---------------------------------------------------------------------------
// Health check
// ---------------------------------------------------------------------------

/// Response body for `GET /health`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    /// Overall service status: `"ok"` or `"degraded"`.
    pub status: String,
    /// Identifier of the key used for new encryptions, if one is active.
    pub active_key_id: Option<String>,
    /// Number of keys (active and retired) held by the key ring.
    pub keys_loaded: usize,
    /// Number of entity types with an explicit field policy.
    pub entities_configured: usize,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn undecryptable_marker_shape() {
        let marker = UndecryptableField::new("unknown_key");
        assert_eq!(marker.to_value(), json!({"$undecryptable": "unknown_key"}));
        let serialised = serde_json::to_value(&marker).unwrap();
        assert_eq!(serialised, marker.to_value());
    }

    #[test]
    fn undecryptable_marker_detection() {
        let v = json!({"$undecryptable": "integrity_check_failed"});
        assert_eq!(
            UndecryptableField::from_value(&v).unwrap().reason,
            "integrity_check_failed"
        );
        assert!(UndecryptableField::from_value(&json!("plain")).is_none());
        assert!(UndecryptableField::from_value(&json!({"$undecryptable": "x", "other": 1})).is_none());
    }

    #[test]
    fn error_response_from_service_error() {
        let e = crate::ServiceError::EncryptionFailure("aead operation failed".into());
        let body = ErrorResponse::from(&e);
        assert_eq!(body.code, "encryption_failure");
        assert!(body.message.contains("aead operation failed"));
    }

    #[test]
    fn health_response_serde() {
        let h = HealthResponse {
            status: "ok".into(),
            active_key_id: Some("k2".into()),
            keys_loaded: 2,
            entities_configured: 3,
        };
        let json = serde_json::to_string(&h).unwrap();
        let decoded: HealthResponse = serde_json::from_str(&json).unwrap();
        assert_eq!(decoded.entities_configured, 3);
        assert_eq!(decoded.active_key_id.as_deref(), Some("k2"));
    }
}
