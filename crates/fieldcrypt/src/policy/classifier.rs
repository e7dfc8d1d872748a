//! [`FieldClassifier`]: decides, by entity type and field name, whether a value
//! must be encrypted.
//!
//! Precedence is fixed: an entity's explicit field list is authoritative; the
//! heuristic regexes apply only to entities that have no explicit policy; any
//! other field is plaintext.

use std::collections::{HashMap, HashSet};

use regex::RegexSet;
use thiserror::Error;

use super::document::{PolicyDocument, SUPPORTED_VERSION};
use super::Boundary;

/// Built-in field-name heuristics used when a document does not list its own.
pub const DEFAULT_HEURISTICS: &[&str] = &[
    r"(?i)pass(word|wd)|^pwd$",
    r"(?i)^ssn$|social_?security",
    r"(?i)credit_?card|card_?number|^cvv$|^cvc$",
    r"(?i)^iban$|account_?number|routing_?number",
    r"(?i)tax_?id|^tin$",
    r"(?i)secret",
];

/// Errors raised while compiling a [`PolicyDocument`].
#[derive(Debug, Error)]
pub enum PolicyError {
    /// The document declares a version this build cannot read.
    #[error("unsupported field policy version {0} (expected {SUPPORTED_VERSION})")]
    UnsupportedVersion(u32),

    /// An entity lists an empty or whitespace-only field name.
    #[error("entity {0} lists an empty field name")]
    EmptyFieldName(String),

    /// A heuristic pattern failed to compile.
    #[error("invalid heuristic pattern {pattern:?}: {source}")]
    InvalidHeuristic {
        pattern: String,
        #[source]
        source: regex::Error,
    },
}

#[derive(Debug, Clone)]
struct EntityRules {
    fields: HashSet<String>,
    nested: HashMap<String, String>,
    boundary: Option<Boundary>,
}

/// Immutable field policy, compiled once at startup.
#[derive(Debug, Clone)]
pub struct FieldClassifier {
    entities: HashMap<String, EntityRules>,
    heuristics: RegexSet,
    default_boundary: Boundary,
}

impl FieldClassifier {
    /// Compile `doc` into a classifier.
    ///
    /// Entities without an explicit `boundary` are owned by `default_boundary`.
    pub fn from_document(doc: &PolicyDocument, default_boundary: Boundary) -> Result<Self, PolicyError> {
        if doc.version != SUPPORTED_VERSION {
            return Err(PolicyError::UnsupportedVersion(doc.version));
        }

        let mut entities = HashMap::with_capacity(doc.entities.len());
        for (name, policy) in &doc.entities {
            if policy.fields.iter().any(|f| f.trim().is_empty()) {
                return Err(PolicyError::EmptyFieldName(name.clone()));
            }
            entities.insert(
                name.clone(),
                EntityRules {
                    fields: policy.fields.iter().cloned().collect(),
                    nested: policy.nested.clone().into_iter().collect(),
                    boundary: policy.boundary,
                },
            );
        }

        let patterns: Vec<String> = match &doc.heuristics {
            Some(list) => list.clone(),
            None => DEFAULT_HEURISTICS.iter().map(|p| (*p).to_owned()).collect(),
        };
        let heuristics = compile_heuristics(&patterns)?;

        Ok(Self {
            entities,
            heuristics,
            default_boundary,
        })
    }

    /// Returns `true` if `field` of `entity` must be encrypted.
    pub fn is_sensitive(&self, entity: &str, field: &str) -> bool {
        match self.entities.get(entity) {
            Some(rules) => rules.fields.contains(field),
            None => self.heuristics.is_match(field),
        }
    }

    /// Entity type to apply to a record nested under `field` of `entity`.
    pub fn nested_entity<'a>(&'a self, entity: &'a str, field: &str) -> &'a str {
        self.entities
            .get(entity)
            .and_then(|rules| rules.nested.get(field))
            .map(String::as_str)
            .unwrap_or(entity)
    }

    /// The single adapter authoritative for encrypting `entity`.
    pub fn owner(&self, entity: &str) -> Boundary {
        self.entities
            .get(entity)
            .and_then(|rules| rules.boundary)
            .unwrap_or(self.default_boundary)
    }

    /// Returns `true` if `entity` has an explicit field list.
    pub fn has_explicit_policy(&self, entity: &str) -> bool {
        self.entities.contains_key(entity)
    }

    /// Number of entity types with an explicit policy.
    pub fn entity_count(&self) -> usize {
        self.entities.len()
    }

    /// Entities with an explicit policy whose owner is `boundary`, sorted.
    pub fn explicit_entities_owned_by(&self, boundary: Boundary) -> Vec<&str> {
        let mut names: Vec<&str> = self
            .entities
            .keys()
            .map(String::as_str)
            .filter(|name| self.owner(name) == boundary)
            .collect();
        names.sort_unstable();
        names
    }
}

fn compile_heuristics(patterns: &[String]) -> Result<RegexSet, PolicyError> {
    // Compile one by one first so the error names the offending pattern.
    for p in patterns {
        regex::Regex::new(p).map_err(|source| PolicyError::InvalidHeuristic {
            pattern: p.clone(),
            source,
        })?;
    }
    RegexSet::new(patterns).map_err(|source| PolicyError::InvalidHeuristic {
        pattern: patterns.join(" | "),
        source,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn classifier(yaml: &str) -> FieldClassifier {
        let doc = PolicyDocument::parse(yaml).expect("valid policy");
        FieldClassifier::from_document(&doc, Boundary::Persistence).expect("compiles")
    }

    const POLICY: &str = r#"
version: 1
entities:
  contacts:
    fields: [email, address, notes]
    nested:
      billing: addresses
    boundary: http
  addresses:
    fields: [street]
"#;

    #[test]
    fn explicit_list_is_authoritative() {
        let c = classifier(POLICY);
        assert!(c.is_sensitive("contacts", "email"));
        assert!(!c.is_sensitive("contacts", "status"));
        // Heuristics never apply to an entity with an explicit list.
        assert!(!c.is_sensitive("contacts", "password"));
    }

    #[test]
    fn heuristics_apply_only_without_explicit_policy() {
        let c = classifier(POLICY);
        assert!(c.is_sensitive("users", "password"));
        assert!(c.is_sensitive("users", "creditCard"));
        assert!(c.is_sensitive("users", "card_number"));
        assert!(c.is_sensitive("users", "ssn"));
        assert!(!c.is_sensitive("users", "username"));
        assert!(!c.is_sensitive("users", "description"));
    }

    #[test]
    fn empty_heuristics_disable_fallback() {
        let c = classifier("version: 1\nheuristics: []\n");
        assert!(!c.is_sensitive("users", "password"));
    }

    #[test]
    fn custom_heuristics_replace_defaults() {
        let c = classifier("version: 1\nheuristics: [\"(?i)^salary$\"]\n");
        assert!(c.is_sensitive("employees", "Salary"));
        assert!(!c.is_sensitive("employees", "password"));
    }

    #[test]
    fn classification_is_stable() {
        let c = classifier(POLICY);
        let first = c.is_sensitive("contacts", "email");
        for _ in 0..100 {
            assert_eq!(c.is_sensitive("contacts", "email"), first);
        }
    }

    #[test]
    fn nested_entity_override_and_inheritance() {
        let c = classifier(POLICY);
        assert_eq!(c.nested_entity("contacts", "billing"), "addresses");
        assert_eq!(c.nested_entity("contacts", "shipping"), "contacts");
        assert_eq!(c.nested_entity("unknown", "x"), "unknown");
    }

    #[test]
    fn owner_uses_explicit_then_default() {
        let c = classifier(POLICY);
        assert_eq!(c.owner("contacts"), Boundary::Http);
        assert_eq!(c.owner("addresses"), Boundary::Persistence);
        assert_eq!(c.owner("users"), Boundary::Persistence);
        assert_eq!(c.entity_count(), 2);
    }

    #[test]
    fn explicit_entities_grouped_by_owner() {
        let c = classifier(
            "version: 1\nentities:\n  leads:\n    fields: [email]\n    boundary: http\n  contacts:\n    fields: [email]\n    boundary: http\n  invoices:\n    fields: [iban]\n",
        );
        assert_eq!(c.explicit_entities_owned_by(Boundary::Http), ["contacts", "leads"]);
        assert_eq!(c.explicit_entities_owned_by(Boundary::Persistence), ["invoices"]);
        assert!(c.has_explicit_policy("leads"));
        assert!(!c.has_explicit_policy("tickets"));
    }

    #[test]
    fn rejects_unsupported_version() {
        let doc = PolicyDocument::parse("version: 2\n").unwrap();
        assert!(matches!(
            FieldClassifier::from_document(&doc, Boundary::Http),
            Err(PolicyError::UnsupportedVersion(2))
        ));
    }

    #[test]
    fn rejects_empty_field_name() {
        let doc = PolicyDocument::parse("version: 1\nentities:\n  notes:\n    fields: [\" \"]\n").unwrap();
        assert!(matches!(
            FieldClassifier::from_document(&doc, Boundary::Http),
            Err(PolicyError::EmptyFieldName(e)) if e == "notes"
        ));
    }

    #[test]
    fn rejects_bad_regex() {
        let doc = PolicyDocument::parse("version: 1\nheuristics: [\"(unclosed\"]\n").unwrap();
        let err = FieldClassifier::from_document(&doc, Boundary::Http).unwrap_err();
        assert!(err.to_string().contains("(unclosed"));
    }
}
