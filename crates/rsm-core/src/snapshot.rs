//! Snapshot types delivered by remote sources.
//!
//! Two remote change models are represented here:
//! - keyed-event sources deliver one [`DataSnapshot`] per event, with a
//!   navigable [`Reference`] chain,
//! - document sources deliver [`DocumentSnapshot`]s, and queries deliver
//!   [`QuerySnapshot`]s carrying a pre-computed ordered diff.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::sync::Arc;

/// A location in a keyed-event source, linked to its ancestors.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Reference {
    key: Option<String>,
    parent: Option<Arc<Reference>>,
}

impl Reference {
    /// The root location. It has no key and no parent.
    pub fn root() -> Arc<Self> {
        Arc::new(Self {
            key: None,
            parent: None,
        })
    }

    /// Resolve a slash separated path below the root.
    pub fn from_path(path: &str) -> Arc<Self> {
        path.split('/')
            .filter(|segment| !segment.is_empty())
            .fold(Self::root(), |parent, segment| Self::child(&parent, segment))
    }

    /// A direct child of `parent`.
    pub fn child(parent: &Arc<Self>, key: impl Into<String>) -> Arc<Self> {
        Arc::new(Self {
            key: Some(key.into()),
            parent: Some(parent.clone()),
        })
    }

    pub fn key(&self) -> Option<&str> {
        self.key.as_deref()
    }

    pub fn parent(&self) -> Option<&Arc<Reference>> {
        self.parent.as_ref()
    }

    pub fn is_root(&self) -> bool {
        self.parent.is_none()
    }

    /// Keys from the root down to this location, joined with `/`.
    pub fn path(&self) -> String {
        let mut keys = Vec::new();
        let mut current = Some(self);
        while let Some(reference) = current {
            if let Some(key) = reference.key() {
                keys.push(key);
            }
            current = reference.parent().map(|parent| parent.as_ref());
        }
        keys.reverse();
        keys.join("/")
    }
}

/// A value read from a keyed-event source.
#[derive(Clone, Debug, PartialEq)]
pub struct DataSnapshot {
    /// Key of the location; `None` at the root.
    pub key: Option<String>,
    /// Raw value at the location. `Null` when nothing is stored.
    pub value: Value,
    /// Where the value was read from.
    pub reference: Option<Arc<Reference>>,
}

impl DataSnapshot {
    pub fn new(key: Option<String>, value: Value) -> Self {
        Self {
            key,
            value,
            reference: None,
        }
    }

    /// Snapshot of a location, taking its key from `reference`.
    pub fn at(reference: Arc<Reference>, value: Value) -> Self {
        Self {
            key: reference.key().map(str::to_string),
            value,
            reference: Some(reference),
        }
    }

    pub fn key(&self) -> Option<&str> {
        self.key.as_deref()
    }

    pub fn exists(&self) -> bool {
        !self.value.is_null()
    }
}

/// Metadata attached to document and query snapshots.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotMetadata {
    /// The snapshot was served from a local cache.
    pub from_cache: bool,
    /// The snapshot includes local writes not yet acknowledged.
    pub has_pending_writes: bool,
}

/// A single document read from a document source.
#[derive(Clone, Debug, PartialEq)]
pub struct DocumentSnapshot {
    pub id: String,
    /// Full path, `collection/id`.
    pub path: String,
    /// Field map, `None` when the document does not exist.
    pub data: Option<Map<String, Value>>,
    pub metadata: SnapshotMetadata,
}

impl DocumentSnapshot {
    pub fn new(collection: &str, id: impl Into<String>, data: Option<Map<String, Value>>) -> Self {
        let id = id.into();
        Self {
            path: format!("{}/{}", collection, id),
            id,
            data,
            metadata: SnapshotMetadata::default(),
        }
    }

    pub fn exists(&self) -> bool {
        self.data.is_some()
    }
}

/// One entry of a query diff.
///
/// Indices are relative to the result list as it stands after every
/// preceding change of the same snapshot has been applied.
#[derive(Clone, Debug, PartialEq)]
pub enum DocumentChange {
    Added {
        doc: DocumentSnapshot,
        new_index: usize,
    },
    Modified {
        doc: DocumentSnapshot,
        old_index: usize,
        new_index: usize,
    },
    Removed {
        doc: DocumentSnapshot,
        old_index: usize,
    },
}

impl DocumentChange {
    pub fn doc(&self) -> &DocumentSnapshot {
        match self {
            DocumentChange::Added { doc, .. }
            | DocumentChange::Modified { doc, .. }
            | DocumentChange::Removed { doc, .. } => doc,
        }
    }
}

/// Results of a query plus the ordered diff from the previous delivery.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct QuerySnapshot {
    pub docs: Vec<DocumentSnapshot>,
    pub changes: Vec<DocumentChange>,
    pub metadata: SnapshotMetadata,
}

impl QuerySnapshot {
    /// A first delivery: every document is reported as added in order.
    pub fn initial(docs: Vec<DocumentSnapshot>) -> Self {
        let changes = docs
            .iter()
            .enumerate()
            .map(|(new_index, doc)| DocumentChange::Added {
                doc: doc.clone(),
                new_index,
            })
            .collect();
        Self {
            docs,
            changes,
            metadata: SnapshotMetadata::default(),
        }
    }

    pub fn len(&self) -> usize {
        self.docs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.docs.is_empty()
    }
}
