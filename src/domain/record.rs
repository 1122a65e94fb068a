//! Record - Ordered Field Map With Key-Based Identity

use std::fmt;
use std::sync::Arc;

use hashlink::LinkedHashMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{Error, Result};

/// A single row: field name -> value, in insertion order
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Record {
    fields: LinkedHashMap<String, Value>,
}

/// Shared record handle held by the cache
pub type RecordRef = Arc<Record>;

static NULL: Value = Value::Null;

impl Record {
    /// Create an empty record
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style field setter
    pub fn with(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.insert(field, value);
        self
    }

    /// Build from `(field, value)` pairs
    pub fn from_pairs<K, V>(pairs: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: Into<String>,
        V: Into<Value>,
    {
        let mut record = Self::new();
        for (field, value) in pairs {
            record.insert(field, value);
        }
        record
    }

    /// Build from a JSON object
    pub fn from_json(value: Value) -> Result<Self> {
        match value {
            Value::Object(map) => Ok(Self::from_pairs(map)),
            other => Err(Error::Invalid {
                message: format!("Record must be a JSON object, got {other}"),
            }),
        }
    }

    /// Set a field, replacing any previous value in place
    pub fn insert(&mut self, field: impl Into<String>, value: impl Into<Value>) -> Option<Value> {
        let field = field.into();
        let value = value.into();
        match self.fields.get_mut(&field) {
            Some(slot) => Some(std::mem::replace(slot, value)),
            None => {
                self.fields.insert(field, value);
                None
            }
        }
    }

    /// Get a field value
    pub fn get(&self, field: &str) -> Option<&Value> {
        self.fields.get(field)
    }

    /// Get a field value, treating missing fields as null
    pub fn value(&self, field: &str) -> &Value {
        self.fields.get(field).unwrap_or(&NULL)
    }

    /// Remove a field
    pub fn remove(&mut self, field: &str) -> Option<Value> {
        self.fields.remove(field)
    }

    /// Iterate fields in order
    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.fields.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Number of fields
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    /// Check if the record has no fields
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Extract the identity of this record for the given primary key fields
    pub fn key(&self, primary_keys: &[String]) -> RecordKey {
        RecordKey(
            primary_keys
                .iter()
                .map(|field| self.value(field).clone())
                .collect(),
        )
    }

    /// Whether both records share the same identity
    pub fn same_identity(&self, other: &Record, primary_keys: &[String]) -> bool {
        !primary_keys.is_empty()
            && primary_keys
                .iter()
                .all(|field| self.value(field) == other.value(field))
    }
}

impl AsRef<Record> for Record {
    fn as_ref(&self) -> &Record {
        self
    }
}

impl From<Vec<(String, Value)>> for Record {
    fn from(pairs: Vec<(String, Value)>) -> Self {
        Self::from_pairs(pairs)
    }
}

/// Primary key value(s) of a record, in primary key field order
#[derive(Debug, Clone, PartialEq)]
pub struct RecordKey(pub Vec<Value>);

impl RecordKey {
    /// Key for a single-field primary key
    pub fn single(value: impl Into<Value>) -> Self {
        Self(vec![value.into()])
    }

    /// Whether the record carries this key
    pub fn matches(&self, record: &Record, primary_keys: &[String]) -> bool {
        primary_keys.len() == self.0.len()
            && primary_keys
                .iter()
                .zip(&self.0)
                .all(|(field, value)| record.value(field) == value)
    }
}

impl fmt::Display for RecordKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0.as_slice() {
            [single] => write!(f, "{single}"),
            values => {
                let parts: Vec<String> = values.iter().map(ToString::to_string).collect();
                write!(f, "({})", parts.join(", "))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn insert_preserves_field_order() {
        let record = Record::new().with("b", 1).with("a", 2).with("b", 3);
        let fields: Vec<_> = record.iter().map(|(k, _)| k).collect();
        assert_eq!(fields, vec!["b", "a"]);
        assert_eq!(record.get("b"), Some(&json!(3)));
    }

    #[test]
    fn composite_identity() {
        let pks = vec!["org".to_string(), "id".to_string()];
        let a = Record::new().with("org", "x").with("id", 1).with("v", 1);
        let b = Record::new().with("org", "x").with("id", 1).with("v", 2);
        let c = Record::new().with("org", "y").with("id", 1);

        assert!(a.same_identity(&b, &pks));
        assert!(!a.same_identity(&c, &pks));
        assert!(a.key(&pks).matches(&b, &pks));
        assert_eq!(a.key(&pks).to_string(), "(\"x\", 1)");
    }

    #[test]
    fn from_json_rejects_non_objects() {
        assert!(Record::from_json(json!([1, 2])).is_err());
        let record = Record::from_json(json!({"id": 7, "name": "n"})).expect("object");
        assert_eq!(record.value("id"), &json!(7));
        assert_eq!(record.value("missing"), &Value::Null);
    }
}
