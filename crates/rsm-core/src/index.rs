//! Position lookups in an ordered mirror.
//!
//! Keyed-event sources report only identities and previous-sibling
//! identities, never indices. These helpers turn them into positions in the
//! local sequence as it stands right now.

use crate::record::{IdentityField, Record};

/// Position of the record whose identity is `identity`.
pub fn index_of(records: &[Record], field: IdentityField, identity: &str) -> Option<usize> {
    records
        .iter()
        .position(|record| record.has_identity(field, identity))
}

/// Target index for an element inserted right after `previous`.
///
/// Without a previous sibling the element goes to the front. Returns `None`
/// when `previous` is not tracked.
pub fn insertion_index(
    records: &[Record],
    field: IdentityField,
    previous: Option<&str>,
) -> Option<usize> {
    match previous {
        Some(previous) => index_of(records, field, previous).map(|index| index + 1),
        None => Some(0),
    }
}

/// Target index for moving the element at `old_index` right after `previous`.
///
/// The move is applied as "remove the old slot, then insert", so when the
/// element sits before its target every later index shifts down by one.
pub fn move_index(
    records: &[Record],
    field: IdentityField,
    old_index: usize,
    previous: Option<&str>,
) -> Option<usize> {
    let candidate = insertion_index(records, field, previous)?;
    if old_index < candidate {
        Some(candidate - 1)
    } else {
        Some(candidate)
    }
}
