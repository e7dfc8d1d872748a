//! Common error and wire types shared across `fieldcrypt` crates.

pub mod error;
pub mod protocol;

pub use error::ServiceError;
pub use protocol::{ErrorResponse, HealthResponse, UndecryptableField};
