//! The fixed mutation vocabulary and the reducers that apply it.
//!
//! Every change a binder makes to host state is one of six mutation kinds.
//! Reducers are pure transitions over a [`State`]; the host store calls
//! [`reduce`] synchronously from its commit entry point.

use crate::error::ReduceError;
use crate::record::Record;
use crate::state::{Slot, State};
use serde::{Deserialize, Serialize};

/// The six mutation kinds.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MutationKind {
    SetObject,
    InitArray,
    ArrayInsert,
    ArrayReplace,
    ArrayMove,
    ArrayRemove,
}

impl MutationKind {
    /// Every kind, in declaration order. Hosts wire their reducers from this.
    pub const ALL: [MutationKind; 6] = [
        MutationKind::SetObject,
        MutationKind::InitArray,
        MutationKind::ArrayInsert,
        MutationKind::ArrayReplace,
        MutationKind::ArrayMove,
        MutationKind::ArrayRemove,
    ];

    /// Stable, namespaced mutation type name.
    pub fn type_name(&self) -> &'static str {
        match self {
            MutationKind::SetObject => "rsm/OBJECT_VALUE",
            MutationKind::InitArray => "rsm/ARRAY_INITIALIZE",
            MutationKind::ArrayInsert => "rsm/ARRAY_ADD",
            MutationKind::ArrayReplace => "rsm/ARRAY_CHANGE",
            MutationKind::ArrayMove => "rsm/ARRAY_MOVE",
            MutationKind::ArrayRemove => "rsm/ARRAY_REMOVE",
        }
    }

    pub fn from_type_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.type_name() == name)
    }
}

impl std::fmt::Display for MutationKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.type_name())
    }
}

/// A positional operation on an array slot.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum ArrayOp {
    /// Splice `record` in at `index`.
    Insert { index: usize, record: Record },
    /// Replace the element at `index`.
    Replace { index: usize, record: Record },
    /// Remove the element at `from` and reinsert it at `to`.
    Move { from: usize, to: usize },
    /// Remove the element at `index`.
    Remove { index: usize },
}

impl ArrayOp {
    pub fn kind(&self) -> MutationKind {
        match self {
            ArrayOp::Insert { .. } => MutationKind::ArrayInsert,
            ArrayOp::Replace { .. } => MutationKind::ArrayReplace,
            ArrayOp::Move { .. } => MutationKind::ArrayMove,
            ArrayOp::Remove { .. } => MutationKind::ArrayRemove,
        }
    }

    /// Apply the operation to `array` in place.
    ///
    /// Bounds are checked before anything is touched, so a failed operation
    /// leaves `array` unchanged.
    pub fn apply(&self, array: &mut Vec<Record>) -> Result<(), ReduceError> {
        let length = array.len();
        match self {
            ArrayOp::Insert { index, record } => {
                check_bounds(*index, length + 1, length)?;
                array.insert(*index, record.clone());
            }
            ArrayOp::Replace { index, record } => {
                check_bounds(*index, length, length)?;
                array[*index] = record.clone();
            }
            ArrayOp::Move { from, to } => {
                check_bounds(*from, length, length)?;
                check_bounds(*to, length, length)?;
                let moved = array.remove(*from);
                array.insert(*to, moved);
            }
            ArrayOp::Remove { index } => {
                check_bounds(*index, length, length)?;
                array.remove(*index);
            }
        }
        Ok(())
    }
}

fn check_bounds(index: usize, limit: usize, length: usize) -> Result<(), ReduceError> {
    if index < limit {
        Ok(())
    } else {
        Err(ReduceError::IndexOutOfBounds { index, length })
    }
}

/// A local state transition, addressed to one state key.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum Mutation {
    /// Replace the object slot wholesale.
    SetObject { key: String, record: Record },
    /// Establish or reset an array slot.
    InitArray { key: String, value: Vec<Record> },
    /// A positional operation on an array slot.
    Array { key: String, op: ArrayOp },
}

impl Mutation {
    pub fn key(&self) -> &str {
        match self {
            Mutation::SetObject { key, .. }
            | Mutation::InitArray { key, .. }
            | Mutation::Array { key, .. } => key,
        }
    }

    pub fn kind(&self) -> MutationKind {
        match self {
            Mutation::SetObject { .. } => MutationKind::SetObject,
            Mutation::InitArray { .. } => MutationKind::InitArray,
            Mutation::Array { op, .. } => op.kind(),
        }
    }
}

/// Apply `mutation` to `state`.
pub fn reduce(state: &mut State, mutation: Mutation) -> Result<(), ReduceError> {
    match mutation {
        Mutation::SetObject { key, record } => {
            let slot = state
                .get_mut(&key)
                .ok_or_else(|| ReduceError::UndeclaredKey(key.clone()))?;
            *slot = Slot::Object(record);
        }
        Mutation::InitArray { key, value } => {
            let slot = state
                .get_mut(&key)
                .ok_or_else(|| ReduceError::UndeclaredKey(key.clone()))?;
            *slot = Slot::Array(value);
        }
        Mutation::Array { key, op } => {
            let slot = state
                .get_mut(&key)
                .ok_or_else(|| ReduceError::UndeclaredKey(key.clone()))?;
            let array = slot
                .as_array_mut()
                .ok_or_else(|| ReduceError::NotAnArray(key.clone()))?;
            op.apply(array)?;
        }
    }
    Ok(())
}
