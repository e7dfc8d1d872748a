//! Configuration loading and validation for the fieldcrypt service.
//!
//! All values are read from environment variables at startup. The process will
//! exit with a clear error message if any required variable is missing or invalid.

use anyhow::{Context, Result};
use serde::Deserialize;

use crate::policy::Boundary;

/// Validated service configuration.
#[derive(Clone, Deserialize)]
pub struct Config {
    /// Comma-separated `id=material` pairs; material is `hex:…`, `base64:…`
    /// or a bare hex/base64 value decoding to 32 bytes. **Required.**
    pub encryption_keys: String,

    /// Id of the key used for new encryptions. **Required.**
    pub active_key_id: String,

    /// Path to the YAML/JSON field policy document. **Required.**
    pub field_policy_path: String,

    /// Adapter that owns entities whose policy names no boundary.
    #[serde(default = "default_boundary")]
    pub default_boundary: Boundary,

    /// Port the HTTP server listens on.
    #[serde(default = "default_listen_port")]
    pub listen_port: u16,

    /// Largest request or response body the interceptor will buffer.
    #[serde(default = "default_max_body_bytes")]
    pub max_body_bytes: usize,

    /// OTLP endpoint for span export. Logs only when unset.
    #[serde(default)]
    pub otel_exporter_otlp_endpoint: Option<String>,

    /// Tracing log level (e.g. `"info"`, `"debug"`).
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

fn default_boundary() -> Boundary {
    Boundary::Persistence
}
fn default_listen_port() -> u16 {
    8080
}
fn default_max_body_bytes() -> usize {
    2 * 1024 * 1024
}
fn default_log_level() -> String {
    "info".into()
}

impl std::fmt::Debug for Config {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Config")
            .field("encryption_keys", &"[REDACTED]")
            .field("active_key_id", &self.active_key_id)
            .field("field_policy_path", &self.field_policy_path)
            .field("default_boundary", &self.default_boundary)
            .field("listen_port", &self.listen_port)
            .field("max_body_bytes", &self.max_body_bytes)
            .field("otel_exporter_otlp_endpoint", &self.otel_exporter_otlp_endpoint)
            .field("log_level", &self.log_level)
            .finish()
    }
}

impl Config {
    /// Load and validate configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns an error if any required variable is absent or cannot be parsed.
    pub fn from_env() -> Result<Self> {
        let cfg = config::Config::builder()
            .add_source(config::Environment::default())
            .build()
            .context("failed to build configuration from environment")?;

        let c: Config = cfg
            .try_deserialize()
            .context("failed to deserialise configuration")?;

        c.validate()?;
        Ok(c)
    }

    /// Validate all fields, returning a descriptive error on the first failure.
    fn validate(&self) -> Result<()> {
        ensure_non_empty(&self.encryption_keys, "ENCRYPTION_KEYS")?;
        ensure_non_empty(&self.active_key_id, "ACTIVE_KEY_ID")?;
        ensure_non_empty(&self.field_policy_path, "FIELD_POLICY_PATH")?;

        if self.max_body_bytes == 0 {
            anyhow::bail!("MAX_BODY_BYTES must be > 0");
        }
        if let Some(endpoint) = &self.otel_exporter_otlp_endpoint {
            ensure_non_empty(endpoint, "OTEL_EXPORTER_OTLP_ENDPOINT")?;
        }
        Ok(())
    }
}

fn ensure_non_empty(value: &str, name: &str) -> Result<()> {
    if value.trim().is_empty() {
        anyhow::bail!("{name} is required and must not be empty");
    }
    Ok(())
}
