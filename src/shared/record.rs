//! Record Types
//!
//! A [`Record`] is one row of a remote collection: an ordered map from field
//! name to [`FieldValue`]. Records are materialized into the view store as
//! JSON objects and read back from it through [`Record::from_json`].
//!
//! [`RecordDelta`] describes a local write. A delta without a key inserts a
//! new record; a keyed delta merges its fields into an existing one.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

use crate::shared::error::SyncError;

/// Single field value of a record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FieldValue {
    /// Absent / null value
    Null,
    /// Boolean flag
    Bool(bool),
    /// Numeric value
    Number(f64),
    /// Timestamp, serialized as RFC 3339
    Date(DateTime<Utc>),
    /// Free text
    Text(String),
}

impl FieldValue {
    /// Convert a scalar JSON value. Objects and arrays have no field
    /// representation and yield `None`.
    pub fn from_json(value: &Value) -> Option<Self> {
        match value {
            Value::Null => Some(Self::Null),
            Value::Bool(b) => Some(Self::Bool(*b)),
            Value::Number(n) => n.as_f64().map(Self::Number),
            Value::String(s) => Some(match s.parse::<DateTime<Utc>>() {
                Ok(date) => Self::Date(date),
                Err(_) => Self::Text(s.clone()),
            }),
            Value::Array(_) | Value::Object(_) => None,
        }
    }

    /// Convert into a JSON value
    pub fn to_json(&self) -> Value {
        match self {
            Self::Null => Value::Null,
            Self::Bool(b) => Value::Bool(*b),
            Self::Number(n) => serde_json::Number::from_f64(*n)
                .map(Value::Number)
                .unwrap_or(Value::Null),
            Self::Date(d) => Value::String(d.to_rfc3339()),
            Self::Text(s) => Value::String(s.clone()),
        }
    }

    /// Lenient numeric reading: decimal text is parsed, anything else is 0.
    pub fn as_f64(&self) -> f64 {
        match self {
            Self::Number(n) if n.is_finite() => *n,
            Self::Text(s) => s.trim().parse::<f64>().ok().filter(|n| n.is_finite()).unwrap_or(0.0),
            _ => 0.0,
        }
    }

    /// Text view of the value, if it has one
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Text(s) => Some(s),
            _ => None,
        }
    }

    /// Whether the value is null or empty text
    pub fn is_blank(&self) -> bool {
        match self {
            Self::Null => true,
            Self::Text(s) => s.trim().is_empty(),
            _ => false,
        }
    }

    /// Render as a key string
    pub fn to_key_string(&self) -> Option<String> {
        match self {
            Self::Text(s) => Some(s.clone()),
            Self::Number(n) => Some(n.to_string()),
            Self::Bool(b) => Some(b.to_string()),
            Self::Date(d) => Some(d.to_rfc3339()),
            Self::Null => None,
        }
    }
}

impl From<&str> for FieldValue {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

impl From<String> for FieldValue {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

impl From<f64> for FieldValue {
    fn from(value: f64) -> Self {
        Self::Number(value)
    }
}

impl From<bool> for FieldValue {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl From<DateTime<Utc>> for FieldValue {
    fn from(value: DateTime<Utc>) -> Self {
        Self::Date(value)
    }
}

/// One row of a collection
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Record {
    fields: BTreeMap<String, FieldValue>,
}

impl Record {
    /// Create an empty record
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style field assignment
    pub fn with(mut self, field: impl Into<String>, value: impl Into<FieldValue>) -> Self {
        self.set(field, value);
        self
    }

    /// Build a record from a JSON object, skipping nested values such as
    /// `__metadata` or deferred navigation properties.
    pub fn from_json(value: &Value) -> Result<Self, SyncError> {
        let object = value
            .as_object()
            .ok_or_else(|| SyncError::serialization("record is not a JSON object"))?;

        let fields = object
            .iter()
            .filter_map(|(name, v)| FieldValue::from_json(v).map(|fv| (name.clone(), fv)))
            .collect();

        Ok(Self { fields })
    }

    /// Convert into a JSON object
    pub fn to_json(&self) -> Value {
        let object = self
            .fields
            .iter()
            .map(|(name, value)| (name.clone(), value.to_json()))
            .collect::<serde_json::Map<_, _>>();
        Value::Object(object)
    }

    pub fn get(&self, field: &str) -> Option<&FieldValue> {
        self.fields.get(field)
    }

    pub fn set(&mut self, field: impl Into<String>, value: impl Into<FieldValue>) {
        self.fields.insert(field.into(), value.into());
    }

    pub fn remove(&mut self, field: &str) -> Option<FieldValue> {
        self.fields.remove(field)
    }

    pub fn contains(&self, field: &str) -> bool {
        self.fields.contains_key(field)
    }

    /// Key value of this record under the given key field
    pub fn key(&self, key_field: &str) -> Option<String> {
        self.get(key_field).and_then(FieldValue::to_key_string)
    }

    /// Numeric value of a field, 0 when missing or unparsable
    pub fn number(&self, field: &str) -> f64 {
        self.get(field).map(FieldValue::as_f64).unwrap_or(0.0)
    }

    /// Text value of a field
    pub fn text(&self, field: &str) -> Option<&str> {
        self.get(field).and_then(FieldValue::as_str)
    }

    /// Overwrite fields with those of `other`
    pub fn merge_fields(&mut self, other: &BTreeMap<String, FieldValue>) {
        for (name, value) in other {
            self.fields.insert(name.clone(), value.clone());
        }
    }

    /// Add fields of `other` that this record does not carry yet
    pub fn merge_missing(&mut self, other: &Record) {
        for (name, value) in &other.fields {
            self.fields
                .entry(name.clone())
                .or_insert_with(|| value.clone());
        }
    }

    pub fn fields(&self) -> &BTreeMap<String, FieldValue> {
        &self.fields
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

impl FromIterator<(String, FieldValue)> for Record {
    fn from_iter<I: IntoIterator<Item = (String, FieldValue)>>(iter: I) -> Self {
        Self {
            fields: iter.into_iter().collect(),
        }
    }
}

/// A local write against one record
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RecordDelta {
    /// Key of the target record; `None` inserts a new record
    pub key: Option<String>,
    /// Fields to write
    pub fields: BTreeMap<String, FieldValue>,
}

impl RecordDelta {
    /// Delta updating the record with the given key
    pub fn update(key: impl Into<String>) -> Self {
        Self {
            key: Some(key.into()),
            fields: BTreeMap::new(),
        }
    }

    /// Delta inserting a new record
    pub fn insert() -> Self {
        Self::default()
    }

    /// Builder-style field assignment
    pub fn with(mut self, field: impl Into<String>, value: impl Into<FieldValue>) -> Self {
        self.fields.insert(field.into(), value.into());
        self
    }

    pub fn is_insert(&self) -> bool {
        self.key.is_none()
    }
}
