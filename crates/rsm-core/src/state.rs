//! Named state slots owned by a host store.

use crate::record::Record;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// The value held under one state key.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Slot {
    /// Declared but not yet populated.
    #[default]
    Null,
    /// Exactly one record, replaced wholesale on each change.
    Object(Record),
    /// An ordered sequence of records, unique by identity.
    Array(Vec<Record>),
}

/// Shape of a slot, used to pick how a key is bound.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SlotShape {
    Null,
    Object,
    Array,
}

impl Slot {
    pub fn shape(&self) -> SlotShape {
        match self {
            Slot::Null => SlotShape::Null,
            Slot::Object(_) => SlotShape::Object,
            Slot::Array(_) => SlotShape::Array,
        }
    }

    pub fn as_object(&self) -> Option<&Record> {
        match self {
            Slot::Object(record) => Some(record),
            _ => None,
        }
    }

    pub fn as_array(&self) -> Option<&[Record]> {
        match self {
            Slot::Array(records) => Some(records),
            _ => None,
        }
    }

    pub fn as_array_mut(&mut self) -> Option<&mut Vec<Record>> {
        match self {
            Slot::Array(records) => Some(records),
            _ => None,
        }
    }
}

/// A string-keyed map of slots.
///
/// Keys must be declared before anything can be bound to them.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct State {
    slots: BTreeMap<String, Slot>,
}

impl State {
    pub fn new() -> Self {
        Self::default()
    }

    /// Declare `key` with an initial value, replacing any previous one.
    pub fn declare(&mut self, key: impl Into<String>, slot: Slot) {
        self.slots.insert(key.into(), slot);
    }

    /// Builder-style [`State::declare`].
    pub fn with(mut self, key: impl Into<String>, slot: Slot) -> Self {
        self.declare(key, slot);
        self
    }

    pub fn get(&self, key: &str) -> Option<&Slot> {
        self.slots.get(key)
    }

    pub fn get_mut(&mut self, key: &str) -> Option<&mut Slot> {
        self.slots.get_mut(key)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.slots.contains_key(key)
    }

    pub fn shape(&self, key: &str) -> Option<SlotShape> {
        self.slots.get(key).map(Slot::shape)
    }

    pub fn keys(&self) -> impl Iterator<Item = &String> + '_ {
        self.slots.keys()
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }
}
