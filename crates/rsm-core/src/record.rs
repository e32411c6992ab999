//! Normalized records stored in mirrored state slots.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Identity field for records produced from keyed-event sources.
pub const KEY_FIELD: &str = ".key";
/// Identity field for records produced from document sources.
pub const ID_FIELD: &str = ".id";
/// Field wrapping a scalar remote value.
pub const VALUE_FIELD: &str = ".value";
/// Optional slash-joined chain of ancestor identities.
pub const PATH_FIELD: &str = ".path";

/// Which reserved field carries a record's identity.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum IdentityField {
    /// `.key`, used by keyed-event sources.
    Key,
    /// `.id`, used by document sources.
    Id,
}

impl IdentityField {
    pub fn as_str(&self) -> &'static str {
        match self {
            IdentityField::Key => KEY_FIELD,
            IdentityField::Id => ID_FIELD,
        }
    }
}

/// A keyed mapping of field name to value.
///
/// Records always carry one identity field once they leave the normalizer.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Record(Map<String, Value>);

impl Record {
    /// Create an empty record.
    pub fn new() -> Self {
        Self(Map::new())
    }

    /// Build a record from an existing field map.
    pub fn from_map(fields: Map<String, Value>) -> Self {
        Self(fields)
    }

    /// Get a field value.
    pub fn get(&self, field: &str) -> Option<&Value> {
        self.0.get(field)
    }

    /// Set a field value, returning the previous one.
    pub fn insert(&mut self, field: impl Into<String>, value: Value) -> Option<Value> {
        self.0.insert(field.into(), value)
    }

    /// Builder-style field setter.
    pub fn with(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.0.insert(field.into(), value.into());
        self
    }

    /// Identity stored under `field`, if it is a string.
    pub fn identity(&self, field: IdentityField) -> Option<&str> {
        self.0.get(field.as_str()).and_then(Value::as_str)
    }

    /// Check whether this record's identity equals `identity`.
    pub fn has_identity(&self, field: IdentityField, identity: &str) -> bool {
        self.identity(field) == Some(identity)
    }

    pub fn fields(&self) -> &Map<String, Value> {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn into_value(self) -> Value {
        Value::Object(self.0)
    }
}

impl From<Map<String, Value>> for Record {
    fn from(fields: Map<String, Value>) -> Self {
        Self(fields)
    }
}
