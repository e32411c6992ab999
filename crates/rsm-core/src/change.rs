//! Remote changes, unified across source styles.
//!
//! Each source style has its own adapter that produces [`RemoteChange`]s;
//! [`RemoteChange::into_mutations`] is the one place that maps them onto
//! the mutation vocabulary.

use crate::mutation::{ArrayOp, Mutation};
use crate::normalize::record_from_document;
use crate::record::Record;
use crate::snapshot::DocumentChange;

/// A change reported by a remote source, with indices already resolved.
#[derive(Clone, Debug, PartialEq)]
pub enum RemoteChange {
    /// A new element at `index`.
    Added { index: usize, record: Record },
    /// An element changed; it moved when `old_index != new_index`.
    Modified {
        old_index: usize,
        new_index: usize,
        record: Record,
    },
    /// An element changed position only.
    Moved { old_index: usize, new_index: usize },
    /// The element at `index` left the result set.
    Removed { index: usize },
    /// A single-record slot received a new value.
    ValueReplaced { record: Record },
}

impl RemoteChange {
    /// Adapt one entry of a query diff.
    pub fn from_document_change(change: &DocumentChange, with_path: bool) -> Self {
        match change {
            DocumentChange::Added { doc, new_index } => RemoteChange::Added {
                index: *new_index,
                record: record_from_document(doc, with_path),
            },
            DocumentChange::Modified {
                doc,
                old_index,
                new_index,
            } => RemoteChange::Modified {
                old_index: *old_index,
                new_index: *new_index,
                record: record_from_document(doc, with_path),
            },
            DocumentChange::Removed { old_index, .. } => {
                RemoteChange::Removed { index: *old_index }
            }
        }
    }

    pub fn is_moved(&self) -> bool {
        match self {
            RemoteChange::Modified {
                old_index,
                new_index,
                ..
            }
            | RemoteChange::Moved {
                old_index,
                new_index,
            } => old_index != new_index,
            _ => false,
        }
    }

    /// Mutations for `key`, in the order they must be committed.
    ///
    /// A modified element that also moved is replaced in its old slot first
    /// and moved afterwards.
    pub fn into_mutations(self, key: &str) -> Vec<Mutation> {
        let array = |op| Mutation::Array {
            key: key.to_string(),
            op,
        };

        match self {
            RemoteChange::Added { index, record } => vec![array(ArrayOp::Insert { index, record })],
            RemoteChange::Modified {
                old_index,
                new_index,
                record,
            } => {
                let mut mutations = vec![array(ArrayOp::Replace {
                    index: old_index,
                    record,
                })];
                if old_index != new_index {
                    mutations.push(array(ArrayOp::Move {
                        from: old_index,
                        to: new_index,
                    }));
                }
                mutations
            }
            RemoteChange::Moved {
                old_index,
                new_index,
            } => vec![array(ArrayOp::Move {
                from: old_index,
                to: new_index,
            })],
            RemoteChange::Removed { index } => vec![array(ArrayOp::Remove { index })],
            RemoteChange::ValueReplaced { record } => vec![Mutation::SetObject {
                key: key.to_string(),
                record,
            }],
        }
    }
}
