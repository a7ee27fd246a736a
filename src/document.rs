//! Documents stored in the bitemporal store.
//!
//! A [`Document`] is an identifier plus an ordered mapping of namespaced keys
//! (`namespace.field`) to [`Value`]s. Documents are values: every "mutation"
//! produces a new document, which the store layers on top of the existing
//! history as a new version.
//!
//! ```
//! use bitemporal_migrate::document::{Document, Value};
//!
//! let doc = Document::new("entity-1")
//!     .with("uniqueProperties.name", "Customer")
//!     .with("entityProperties.type", "Table");
//!
//! assert_eq!(doc.get("uniqueProperties.name"), Some(&Value::from("Customer")));
//! assert_eq!(doc.keys_in_namespace("entityProperties").count(), 1);
//! ```

use derive_more::{Display, From, Into};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Separator between a key's namespace and its field name.
pub const NAMESPACE_SEPARATOR: char = '.';

/// Identifier of a document (entity) in the store.
#[derive(
    Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Display, From, Into,
)]
pub struct DocumentId(String);

impl DocumentId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for DocumentId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

/// A single content value.
///
/// Floats compare by bit pattern, so a stored `NaN` equals itself and
/// `0.0` differs from `-0.0`. Replaying a document therefore always
/// recognises identical content.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
    List(Vec<Value>),
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Null, Value::Null) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Int(a), Value::Int(b)) => a == b,
            (Value::Float(a), Value::Float(b)) => a.to_bits() == b.to_bits(),
            (Value::Text(a), Value::Text(b)) => a == b,
            (Value::List(a), Value::List(b)) => a == b,
            _ => false,
        }
    }
}

impl Value {
    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Value::Text(v) => Some(v),
            _ => None,
        }
    }
}

macro_rules! impl_value_from {
    ($($ty:ty => $variant:ident),*) => {
        $(
            impl From<$ty> for Value {
                fn from(v: $ty) -> Self {
                    Value::$variant(v)
                }
            }
        )*
    };
}

impl_value_from!(
    bool => Bool,
    i64 => Int,
    f64 => Float,
    String => Text,
    Vec<Value> => List
);

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Text(v.to_string())
    }
}

/// Splits `namespace.field` into its namespace prefix, if it has one.
pub fn namespace_of(key: &str) -> Option<&str> {
    key.split_once(NAMESPACE_SEPARATOR).map(|(ns, _)| ns)
}

/// A document: identifier plus key-ordered content.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    id: DocumentId,
    content: BTreeMap<String, Value>,
}

impl Document {
    pub fn new(id: impl Into<DocumentId>) -> Self {
        Self {
            id: id.into(),
            content: BTreeMap::new(),
        }
    }

    pub fn from_content(id: impl Into<DocumentId>, content: BTreeMap<String, Value>) -> Self {
        Self {
            id: id.into(),
            content,
        }
    }

    pub fn id(&self) -> &DocumentId {
        &self.id
    }

    pub fn content(&self) -> &BTreeMap<String, Value> {
        &self.content
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.content.get(key)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.content.contains_key(key)
    }

    /// Sets `key`, returning the previous value.
    pub fn put(&mut self, key: impl Into<String>, value: impl Into<Value>) -> Option<Value> {
        self.content.insert(key.into(), value.into())
    }

    pub fn remove(&mut self, key: &str) -> Option<Value> {
        self.content.remove(key)
    }

    /// Clone-with-modification: a copy of this document with `key` set.
    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.put(key, value);
        self
    }

    /// Clone-with-modification: a copy of this document without `key`.
    pub fn without(mut self, key: &str) -> Self {
        self.remove(key);
        self
    }

    /// Keys whose namespace prefix is exactly `namespace`.
    pub fn keys_in_namespace<'a>(&'a self, namespace: &'a str) -> impl Iterator<Item = &'a str> {
        self.content
            .keys()
            .map(String::as_str)
            .filter(move |key| namespace_of(key) == Some(namespace))
    }
}
