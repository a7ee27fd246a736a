//! Content predicates and ordering for store queries.

use crate::document::{Document, Value};

/// Order in which an entity's history is returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SortOrder {
    #[default]
    Ascending,
    /// Most recent valid time first.
    Descending,
}

/// A predicate over a document's content.
///
/// # Example
///
/// ```
/// use bitemporal_migrate::document::Document;
/// use bitemporal_migrate::query::Predicate;
///
/// let proxy = Predicate::equals("entityProxyOnly", true);
/// let doc = Document::new("e1").with("entityProxyOnly", true);
///
/// assert!(proxy.matches(&doc));
/// assert!(!proxy.matches(&Document::new("e2")));
/// ```
#[derive(Debug, Clone, PartialEq)]
pub enum Predicate {
    /// Matches every document.
    Any,
    /// The key is present with exactly this value.
    Equals { key: String, value: Value },
    /// The key is present, whatever its value.
    HasKey(String),
    /// At least one key lives in this namespace.
    HasNamespace(String),
    All(Vec<Predicate>),
}

impl Predicate {
    pub fn equals(key: impl Into<String>, value: impl Into<Value>) -> Self {
        Predicate::Equals {
            key: key.into(),
            value: value.into(),
        }
    }

    pub fn has_key(key: impl Into<String>) -> Self {
        Predicate::HasKey(key.into())
    }

    pub fn has_namespace(namespace: impl Into<String>) -> Self {
        Predicate::HasNamespace(namespace.into())
    }

    pub fn and(self, other: Predicate) -> Self {
        match self {
            Predicate::All(mut preds) => {
                preds.push(other);
                Predicate::All(preds)
            }
            first => Predicate::All(vec![first, other]),
        }
    }

    pub fn matches(&self, doc: &Document) -> bool {
        match self {
            Predicate::Any => true,
            Predicate::Equals { key, value } => doc.get(key) == Some(value),
            Predicate::HasKey(key) => doc.contains_key(key),
            Predicate::HasNamespace(ns) => doc.keys_in_namespace(ns).next().is_some(),
            Predicate::All(preds) => preds.iter().all(|p| p.matches(doc)),
        }
    }
}
