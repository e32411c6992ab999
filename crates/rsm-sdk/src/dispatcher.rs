//! The host-side commit entry point and a reference store.

use parking_lot::RwLock;
use rsm_core::{reduce, Mutation, ReduceError, Slot, SlotShape, State};
use tokio::sync::broadcast;

/// The single entry point through which binders change host state.
///
/// Commits are synchronous: when `commit` returns, the mutation is visible
/// to every later read.
pub trait Dispatcher: Send + Sync + 'static {
    /// Apply one mutation.
    fn commit(&self, mutation: Mutation) -> Result<(), ReduceError>;

    /// Shape of the slot at `key`, `None` when the key is undeclared.
    fn shape_of(&self, key: &str) -> Option<SlotShape>;
}

/// Audit channel capacity of [`Store::new`].
pub const DEFAULT_AUDIT_CAPACITY: usize = 256;

/// Reference host store.
///
/// Holds a [`State`] behind a read-write lock, applies mutations with
/// [`reduce`] and broadcasts every committed mutation for auditing.
pub struct Store {
    state: RwLock<State>,
    audit_tx: broadcast::Sender<Mutation>,
}

impl Store {
    pub fn new(state: State) -> Self {
        Self::with_capacity(state, DEFAULT_AUDIT_CAPACITY)
    }

    /// Create a store whose audit channel keeps up to `capacity` mutations.
    pub fn with_capacity(state: State, capacity: usize) -> Self {
        let (audit_tx, _) = broadcast::channel(capacity.max(1));
        Self {
            state: RwLock::new(state),
            audit_tx,
        }
    }

    /// Declare `key` with an initial slot value.
    pub fn declare(&self, key: impl Into<String>, slot: Slot) {
        self.state.write().declare(key, slot);
    }

    /// Current value of `key`.
    pub fn slot(&self, key: &str) -> Option<Slot> {
        self.state.read().get(key).cloned()
    }

    /// Copy of the full state.
    pub fn snapshot(&self) -> State {
        self.state.read().clone()
    }

    /// Subscribe to committed mutations.
    pub fn subscribe(&self) -> broadcast::Receiver<Mutation> {
        self.audit_tx.subscribe()
    }
}

impl Default for Store {
    fn default() -> Self {
        Self::new(State::new())
    }
}

impl Dispatcher for Store {
    fn commit(&self, mutation: Mutation) -> Result<(), ReduceError> {
        reduce(&mut self.state.write(), mutation.clone())?;
        // No audit subscribers is fine.
        let _ = self.audit_tx.send(mutation);
        Ok(())
    }

    fn shape_of(&self, key: &str) -> Option<SlotShape> {
        self.state.read().shape(key)
    }
}

impl std::fmt::Debug for Store {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Store")
            .field("state", &*self.state.read())
            .finish()
    }
}
