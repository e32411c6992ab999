//! In-memory remote sources for testing and demos.
//!
//! Both backends queue every notification and only deliver on `flush()`,
//! so tests decide exactly when remote events reach a binder. Deliveries
//! run outside every backend lock; a handler may write back into the
//! backend, and what it triggers is delivered in the same flush.

pub mod database;
pub mod firestore;

pub use database::{MemoryDatabase, MemoryRef, OrderBy};
pub use firestore::{
    Direction, FieldOp, MemoryCollection, MemoryDocument, MemoryFirestore, MemoryQuery,
    WriteBatch,
};

use parking_lot::Mutex;
use serde_json::Value;
use std::cmp::Ordering;
use std::collections::VecDeque;

type Delivery = Box<dyn FnOnce() + Send>;

/// Where a delivery sits within its batch.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum Phase {
    /// Child-level notifications.
    Primary,
    /// Whole-value notifications, delivered after every primary one.
    Trailing,
}

#[derive(Default)]
struct Batch {
    primary: Vec<Delivery>,
    trailing: Vec<Delivery>,
}

impl Batch {
    fn is_empty(&self) -> bool {
        self.primary.is_empty() && self.trailing.is_empty()
    }
}

#[derive(Default)]
struct QueueState {
    sealed: VecDeque<Batch>,
    open: Batch,
}

/// Pending notifications, grouped in batches.
///
/// Registrations made between two flushes share one open batch; a write
/// seals the open batch and queues its own.
#[derive(Default)]
pub(crate) struct DeliveryQueue {
    state: Mutex<QueueState>,
}

impl DeliveryQueue {
    #[cfg(test)]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a delivery to the open batch.
    pub fn push(&self, phase: Phase, delivery: impl FnOnce() + Send + 'static) {
        let mut state = self.state.lock();
        match phase {
            Phase::Primary => state.open.primary.push(Box::new(delivery)),
            Phase::Trailing => state.open.trailing.push(Box::new(delivery)),
        }
    }

    /// Close the open batch. Later pushes start a new one.
    pub fn seal(&self) {
        let mut state = self.state.lock();
        if !state.open.is_empty() {
            let batch = std::mem::take(&mut state.open);
            state.sealed.push_back(batch);
        }
    }

    /// Deliver everything queued, including what deliveries queue.
    /// Returns the number of deliveries run.
    pub fn flush(&self) -> usize {
        let mut delivered = 0;
        loop {
            self.seal();
            let batch = self.state.lock().sealed.pop_front();
            let Some(batch) = batch else {
                return delivered;
            };
            for delivery in batch.primary.into_iter().chain(batch.trailing) {
                delivery();
                delivered += 1;
            }
        }
    }

    pub fn len(&self) -> usize {
        let state = self.state.lock();
        state
            .sealed
            .iter()
            .chain(std::iter::once(&state.open))
            .map(|batch| batch.primary.len() + batch.trailing.len())
            .sum()
    }

    #[cfg(test)]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn type_rank(value: &Value) -> u8 {
    match value {
        Value::Null => 0,
        Value::Bool(_) => 1,
        Value::Number(_) => 2,
        Value::String(_) => 3,
        Value::Array(_) => 4,
        Value::Object(_) => 5,
    }
}

/// Total order over JSON values: null, booleans, numbers, strings, arrays,
/// objects. Values of the same type compare naturally.
pub(crate) fn compare_values(a: &Value, b: &Value) -> Ordering {
    match (a, b) {
        (Value::Bool(a), Value::Bool(b)) => a.cmp(b),
        (Value::Number(a), Value::Number(b)) => {
            let a = a.as_f64().unwrap_or(f64::NAN);
            let b = b.as_f64().unwrap_or(f64::NAN);
            a.total_cmp(&b)
        }
        (Value::String(a), Value::String(b)) => a.cmp(b),
        (Value::Array(a), Value::Array(b)) => a
            .iter()
            .zip(b.iter())
            .map(|(a, b)| compare_values(a, b))
            .find(|ordering| ordering.is_ne())
            .unwrap_or_else(|| a.len().cmp(&b.len())),
        (Value::Object(a), Value::Object(b)) => a.len().cmp(&b.len()),
        _ => type_rank(a).cmp(&type_rank(b)),
    }
}

/// Whether `a` and `b` hold the same JSON type.
pub(crate) fn same_type(a: &Value, b: &Value) -> bool {
    type_rank(a) == type_rank(b)
}
