// File: `crates/rsm-core/src/lib.rs`
//! Core types for the RSM remote state mirror: records, snapshots, the
//! mutation vocabulary and ordered-mirror indexing.

pub mod change;
pub mod error;
pub mod index;
pub mod mutation;
pub mod normalize;
pub mod once;
pub mod record;
pub mod snapshot;
pub mod state;

pub use change::RemoteChange;
pub use error::ReduceError;
pub use index::{index_of, insertion_index, move_index};
pub use mutation::{reduce, ArrayOp, Mutation, MutationKind};
pub use normalize::{record_from_data, record_from_document, structural_path};
pub use once::CallOnce;
pub use record::{IdentityField, Record, ID_FIELD, KEY_FIELD, PATH_FIELD, VALUE_FIELD};
pub use snapshot::{
    DataSnapshot, DocumentChange, DocumentSnapshot, QuerySnapshot, Reference, SnapshotMetadata,
};
pub use state::{Slot, SlotShape, State};
