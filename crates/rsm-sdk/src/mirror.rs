//! Binder-side mirror of one state slot.

use crate::dispatcher::Dispatcher;
use rsm_core::{index_of, IdentityField, Mutation, Record, RemoteChange};
use std::sync::Weak;
use tracing::{error, trace};

/// Abort on a mirror that no longer matches its remote source.
pub(crate) fn desync(key: &str, reason: &str) -> ! {
    error!(key = %key, reason = %reason, "Mirror out of sync with remote source");
    panic!("mirror for '{}' out of sync with remote source: {}", key, reason);
}

/// Tracks what a binder has mirrored into one state key.
///
/// Array slots keep a shadow copy of the sequence so positions can be
/// resolved before anything is committed. Until the slot is initialized,
/// changes only update the shadow.
pub(crate) struct SlotMirror {
    key: String,
    dispatcher: Weak<dyn Dispatcher>,
    shadow: Vec<Record>,
    initialized: bool,
    detached: bool,
}

impl SlotMirror {
    /// Mirror for an object slot. Commits start immediately.
    pub fn object(key: impl Into<String>, dispatcher: Weak<dyn Dispatcher>) -> Self {
        Self {
            key: key.into(),
            dispatcher,
            shadow: Vec::new(),
            initialized: true,
            detached: false,
        }
    }

    /// Mirror for an array slot, not yet initialized.
    pub fn array(key: impl Into<String>, dispatcher: Weak<dyn Dispatcher>) -> Self {
        Self {
            key: key.into(),
            dispatcher,
            shadow: Vec::new(),
            initialized: false,
            detached: false,
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn shadow(&self) -> &[Record] {
        &self.shadow
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized
    }

    /// Commit the shadow as the slot's initial value. Only the first call
    /// has an effect.
    pub fn initialize(&mut self) -> bool {
        if self.initialized {
            return false;
        }
        self.initialized = true;
        self.commit(Mutation::InitArray {
            key: self.key.clone(),
            value: self.shadow.clone(),
        });
        true
    }

    /// Stop committing. Later changes are dropped.
    pub fn detach(&mut self) {
        self.detached = true;
    }

    /// Position of `identity` in the shadow. Aborts when it is not tracked.
    pub fn position(&self, field: IdentityField, identity: &str) -> usize {
        match index_of(&self.shadow, field, identity) {
            Some(index) => index,
            None => desync(&self.key, &format!("'{}' is not tracked", identity)),
        }
    }

    /// Route one remote change into the shadow and, once initialized, into
    /// the host.
    pub fn apply(&mut self, change: RemoteChange) {
        if self.detached {
            return;
        }
        for mutation in change.into_mutations(&self.key) {
            if let Mutation::Array { op, .. } = &mutation {
                if let Err(err) = op.apply(&mut self.shadow) {
                    desync(&self.key, &err.to_string());
                }
            }
            if self.initialized {
                self.commit(mutation);
            }
        }
    }

    fn commit(&self, mutation: Mutation) {
        if self.detached {
            return;
        }
        let Some(dispatcher) = self.dispatcher.upgrade() else {
            trace!(key = %self.key, "Dispatcher dropped, skipping commit");
            return;
        };
        trace!(key = %self.key, kind = %mutation.kind(), "Committing mutation");
        if let Err(err) = dispatcher.commit(mutation) {
            desync(&self.key, &err.to_string());
        }
    }
}

impl std::fmt::Debug for SlotMirror {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SlotMirror")
            .field("key", &self.key)
            .field("shadow", &self.shadow.len())
            .field("initialized", &self.initialized)
            .field("detached", &self.detached)
            .finish()
    }
}
