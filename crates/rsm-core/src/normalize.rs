//! Conversion of remote snapshots into [`Record`]s.
//!
//! Normalization never fails: absent data maps to a record that carries
//! only its identity field.

use crate::record::{Record, ID_FIELD, KEY_FIELD, PATH_FIELD, VALUE_FIELD};
use crate::snapshot::{DataSnapshot, DocumentSnapshot, Reference};
use serde_json::{Map, Value};

/// Convert a keyed-event snapshot into a record.
///
/// Object values become the record itself; scalars, arrays and null are
/// wrapped under `.value`. The snapshot key is stored under `.key`.
pub fn record_from_data(snapshot: &DataSnapshot, with_path: bool) -> Record {
    let mut record = match &snapshot.value {
        Value::Object(fields) => Record::from_map(fields.clone()),
        other => {
            let mut fields = Map::new();
            fields.insert(VALUE_FIELD.to_string(), other.clone());
            Record::from_map(fields)
        }
    };

    let key = snapshot
        .key()
        .map(|key| Value::String(key.to_string()))
        .unwrap_or(Value::Null);
    record.insert(KEY_FIELD, key);

    if with_path {
        if let Some(reference) = &snapshot.reference {
            record.insert(PATH_FIELD, Value::String(structural_path(reference)));
        }
    }

    record
}

/// Convert a document snapshot into a record keyed by `.id`.
pub fn record_from_document(doc: &DocumentSnapshot, with_path: bool) -> Record {
    let mut record = match &doc.data {
        Some(fields) => Record::from_map(fields.clone()),
        None => Record::new(),
    };

    record.insert(ID_FIELD, Value::String(doc.id.clone()));
    if with_path {
        record.insert(PATH_FIELD, Value::String(doc.path.clone()));
    }

    record
}

/// Slash-joined identities from the root down to `reference`.
pub fn structural_path(reference: &Reference) -> String {
    reference.path()
}
