//! Structured logging and optional OTLP trace export.
//!
//! # Telemetry invariants
//!
//! - **No plaintext of sensitive fields and no key material** may appear in any
//!   span attribute or log field. Failures are reported by field path, key id
//!   and reason code only.
//! - Log level is configurable via `LOG_LEVEL` (default: `info`) and
//!   overridable with `RUST_LOG`.

pub mod init;

pub use init::init_telemetry;
