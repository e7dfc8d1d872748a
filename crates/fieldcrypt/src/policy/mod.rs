//! Field policy loading and classification.
//!
//! # Responsibilities
//!
//! - Load the field policy document once at startup (YAML or JSON).
//! - Answer "is `entity.field` sensitive?" for the lifetime of the process.
//! - Record which boundary adapter owns encryption for each entity.
//!
//! # Module invariants
//!
//! - **No crypto dependencies.** Classification depends only on names, never
//!   on values, keys or ciphertext.
//! - **Immutable after load.** There is no refresh path; the same question
//!   always gets the same answer.

pub mod classifier;
pub mod document;

pub use classifier::{FieldClassifier, PolicyError};
pub use document::PolicyDocument;

use anyhow::{Context, Result};
use serde::Deserialize;
use tracing::info;

/// The adapter that performs encryption for an entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Boundary {
    /// The HTTP interceptor encrypts request bodies and decrypts responses.
    Http,
    /// The persistence hook encrypts before writes and decrypts after reads.
    Persistence,
}

impl std::fmt::Display for Boundary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Boundary::Http => "http",
            Boundary::Persistence => "persistence",
        })
    }
}

/// Read the document at `path` and compile it into a classifier.
///
/// Returns the parsed document alongside the classifier so the caller can
/// build the HTTP route map from the same source.
///
/// # Errors
///
/// Returns an error if the file cannot be read or parsed, or if it fails
/// validation (unsupported version, empty field names, invalid regexes).
pub fn load(path: &str, default_boundary: Boundary) -> Result<(PolicyDocument, FieldClassifier)> {
    let doc = PolicyDocument::from_path(path)?;
    let classifier = FieldClassifier::from_document(&doc, default_boundary)
        .with_context(|| format!("invalid field policy {path}"))?;
    info!(
        path = %path,
        entities = classifier.entity_count(),
        routes = doc.routes.len(),
        "field policy loaded"
    );
    Ok((doc, classifier))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn boundary_display_matches_serde() {
        let parsed: Boundary = serde_json::from_str("\"persistence\"").unwrap();
        assert_eq!(parsed.to_string(), "persistence");
        assert_eq!(Boundary::Http.to_string(), "http");
    }

    #[test]
    fn load_reads_file() {
        let path = std::env::temp_dir().join(format!("fieldcrypt-policy-{}.yaml", std::process::id()));
        std::fs::write(
            &path,
            "version: 1\nentities:\n  contacts:\n    fields: [email]\nroutes:\n  /api/contacts: contacts\n",
        )
        .unwrap();
        let (doc, classifier) = load(path.to_str().unwrap(), Boundary::Http).unwrap();
        std::fs::remove_file(&path).ok();
        assert_eq!(doc.routes.len(), 1);
        assert!(classifier.is_sensitive("contacts", "email"));
    }
}
