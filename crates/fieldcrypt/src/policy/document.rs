//! On-disk field policy document.
//!
//! ```yaml
//! version: 1
//! heuristics:            # optional; defaults apply when omitted
//!   - "(?i)password"
//! entities:
//!   contacts:
//!     fields: [email, phone, address]
//!     nested: { billing: addresses }
//!     boundary: http
//! routes:
//!   /api/contacts: contacts
//! ```

use std::{collections::BTreeMap, path::Path};

use anyhow::{Context, Result};
use serde::Deserialize;

use super::Boundary;

/// The only document version this build understands.
pub const SUPPORTED_VERSION: u32 = 1;

/// Parsed policy document, prior to validation.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PolicyDocument {
    /// Document format version.
    pub version: u32,

    /// Field-name regexes applied to entities without an explicit policy.
    /// `None` selects the built-in set; an empty list disables heuristics.
    #[serde(default)]
    pub heuristics: Option<Vec<String>>,

    /// Explicit per-entity field lists.
    #[serde(default)]
    pub entities: BTreeMap<String, EntityPolicy>,

    /// HTTP path prefix → entity type.
    #[serde(default)]
    pub routes: BTreeMap<String, String>,
}

/// Explicit policy for one entity type.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct EntityPolicy {
    /// Names of fields that are always encrypted.
    #[serde(default)]
    pub fields: Vec<String>,

    /// Field name → entity type used for records nested under that field.
    #[serde(default)]
    pub nested: BTreeMap<String, String>,

    /// Adapter that is authoritative for this entity.
    #[serde(default)]
    pub boundary: Option<Boundary>,
}

impl PolicyDocument {
    /// Parse a policy document from YAML, falling back to JSON.
    pub fn parse(text: &str) -> Result<Self> {
        match serde_yaml::from_str(text) {
            Ok(doc) => Ok(doc),
            Err(yaml_err) => serde_json::from_str(text).with_context(|| {
                format!("field policy is not valid YAML ({yaml_err}) or JSON")
            }),
        }
    }

    /// Read and parse a policy document from disk.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read field policy {}", path.display()))?;
        Self::parse(&text).with_context(|| format!("failed to parse field policy {}", path.display()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_yaml() {
        let doc = PolicyDocument::parse(
            r#"
version: 1
entities:
  contacts:
    fields: [email, phone]
    nested:
      billing: addresses
    boundary: http
routes:
  /api/contacts: contacts
"#,
        )
        .unwrap();
        assert_eq!(doc.version, 1);
        assert!(doc.heuristics.is_none());
        let contacts = &doc.entities["contacts"];
        assert_eq!(contacts.fields, vec!["email", "phone"]);
        assert_eq!(contacts.nested["billing"], "addresses");
        assert_eq!(contacts.boundary, Some(Boundary::Http));
        assert_eq!(doc.routes["/api/contacts"], "contacts");
    }

    #[test]
    fn parses_json() {
        let doc = PolicyDocument::parse(
            r#"{"version": 1, "heuristics": [], "entities": {"notes": {"fields": ["body"]}}}"#,
        )
        .unwrap();
        assert_eq!(doc.heuristics, Some(vec![]));
        assert_eq!(doc.entities["notes"].boundary, None);
    }

    #[test]
    fn rejects_unknown_keys() {
        assert!(PolicyDocument::parse("version: 1\nentitys: {}\n").is_err());
    }

    #[test]
    fn missing_file_is_an_error() {
        let err = PolicyDocument::from_path("/nonexistent/policy.yaml").unwrap_err();
        assert!(err.to_string().contains("failed to read field policy"));
    }
}
