//! Per-dispatcher registry of live subscriptions.
//!
//! Each dispatcher gets its own namespace of bindings, created lazily on
//! first bind. A namespace holds only a weak reference to its dispatcher;
//! once the dispatcher is dropped the namespace is pruned on the next
//! registry access and its bindings are torn down.

use crate::dispatcher::Dispatcher;
use crate::source::{EventSource, EventType, ListenerHandle, Unsubscribe};
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Weak};
use tracing::debug;

/// How a binding releases its remote listeners.
pub enum Teardown {
    /// A single procedure releasing a snapshot subscription.
    Unsubscribe(Unsubscribe),
    /// Individual listeners on a keyed-event source.
    Listeners {
        source: Arc<dyn EventSource>,
        handles: BTreeMap<EventType, ListenerHandle>,
    },
}

/// The live subscription for one state key.
///
/// Dropping a binding tears it down.
pub struct Binding {
    key: String,
    teardown: Option<Teardown>,
    hooks: Vec<Box<dyn FnOnce() + Send>>,
}

impl Binding {
    /// A binding released by one unsubscribe procedure.
    pub fn unsubscribe(key: impl Into<String>, unsubscribe: Unsubscribe) -> Self {
        Self {
            key: key.into(),
            teardown: Some(Teardown::Unsubscribe(unsubscribe)),
            hooks: Vec::new(),
        }
    }

    /// A binding over listeners of `source`, initially empty.
    pub fn listeners(key: impl Into<String>, source: Arc<dyn EventSource>) -> Self {
        Self {
            key: key.into(),
            teardown: Some(Teardown::Listeners {
                source,
                handles: BTreeMap::new(),
            }),
            hooks: Vec::new(),
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    /// Record a listener handle. A handle already recorded for the same
    /// event is removed from the source first.
    pub fn add_listener(&mut self, event: EventType, handle: ListenerHandle) {
        if let Some(Teardown::Listeners { source, handles }) = &mut self.teardown {
            if let Some(previous) = handles.insert(event, handle) {
                source.off(event, previous);
            }
        }
    }

    /// Take the handle recorded for `event`, leaving the others in place.
    pub fn take_listener(
        &mut self,
        event: EventType,
    ) -> Option<(Arc<dyn EventSource>, ListenerHandle)> {
        match &mut self.teardown {
            Some(Teardown::Listeners { source, handles }) => handles
                .remove(&event)
                .map(|handle| (source.clone(), handle)),
            _ => None,
        }
    }

    /// Events with a live listener.
    pub fn events(&self) -> Vec<EventType> {
        match &self.teardown {
            Some(Teardown::Listeners { handles, .. }) => handles.keys().copied().collect(),
            _ => Vec::new(),
        }
    }

    /// Run `hook` after the remote listeners have been released.
    pub fn on_teardown(&mut self, hook: impl FnOnce() + Send + 'static) {
        self.hooks.push(Box::new(hook));
    }

    /// Release every remote listener.
    pub fn teardown(mut self) {
        self.release();
    }

    fn release(&mut self) {
        match self.teardown.take() {
            Some(Teardown::Unsubscribe(unsubscribe)) => unsubscribe.call(),
            Some(Teardown::Listeners { source, handles }) => {
                for (event, handle) in handles {
                    source.off(event, handle);
                }
            }
            None => return,
        }
        for hook in self.hooks.drain(..) {
            hook();
        }
        debug!(key = %self.key, "Binding torn down");
    }
}

impl Drop for Binding {
    fn drop(&mut self) {
        self.release();
    }
}

impl std::fmt::Debug for Binding {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Binding")
            .field("key", &self.key)
            .field("events", &self.events())
            .field("live", &self.teardown.is_some())
            .finish()
    }
}

struct Namespace {
    dispatcher: Weak<dyn Dispatcher>,
    bindings: HashMap<String, Binding>,
}

impl Namespace {
    fn is_dead(&self) -> bool {
        self.dispatcher.strong_count() == 0
    }
}

/// Live bindings, grouped per dispatcher.
///
/// Teardown never runs while the registry lock is held.
#[derive(Default)]
pub struct BindingRegistry {
    namespaces: Mutex<HashMap<usize, Namespace>>,
}

fn namespace_id<D: Dispatcher>(dispatcher: &Arc<D>) -> usize {
    Arc::as_ptr(dispatcher) as *const () as usize
}

fn prune(namespaces: &mut HashMap<usize, Namespace>) -> Vec<Binding> {
    let dead: Vec<usize> = namespaces
        .iter()
        .filter(|(_, namespace)| namespace.is_dead())
        .map(|(id, _)| *id)
        .collect();

    let mut released = Vec::new();
    for id in dead {
        if let Some(namespace) = namespaces.remove(&id) {
            debug!(
                bindings = namespace.bindings.len(),
                "Pruning namespace of dropped dispatcher"
            );
            released.extend(namespace.bindings.into_values());
        }
    }
    released
}

impl BindingRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Install `binding` for `dispatcher`, tearing down whatever was bound
    /// at the same key.
    pub fn bind<D: Dispatcher>(&self, dispatcher: &Arc<D>, binding: Binding) {
        let key = binding.key().to_string();
        let (previous, pruned) = {
            let mut namespaces = self.namespaces.lock();
            let pruned = prune(&mut namespaces);
            let namespace = namespaces
                .entry(namespace_id(dispatcher))
                .or_insert_with(|| {
                    let weak = Arc::downgrade(dispatcher);
                    let weak: Weak<dyn Dispatcher> = weak;
                    Namespace {
                        dispatcher: weak,
                        bindings: HashMap::new(),
                    }
                });
            (namespace.bindings.insert(key.clone(), binding), pruned)
        };

        if let Some(previous) = previous {
            debug!(key = %key, "Replacing existing binding");
            previous.teardown();
        }
        drop(pruned);
        debug!(key = %key, "Binding installed");
    }

    /// Tear down the binding at `key`. Returns `false` when nothing was
    /// bound there.
    pub fn unbind<D: Dispatcher>(&self, dispatcher: &Arc<D>, key: &str) -> bool {
        let (removed, pruned) = {
            let mut namespaces = self.namespaces.lock();
            let pruned = prune(&mut namespaces);
            let removed = namespaces
                .get_mut(&namespace_id(dispatcher))
                .and_then(|namespace| namespace.bindings.remove(key));
            (removed, pruned)
        };
        drop(pruned);

        match removed {
            Some(binding) => {
                binding.teardown();
                true
            }
            None => false,
        }
    }

    /// Remove the listener for one event of the binding at `key`.
    pub fn remove_listener<D: Dispatcher>(
        &self,
        dispatcher: &Arc<D>,
        key: &str,
        event: EventType,
    ) -> bool {
        let taken = {
            let mut namespaces = self.namespaces.lock();
            namespaces
                .get_mut(&namespace_id(dispatcher))
                .and_then(|namespace| namespace.bindings.get_mut(key))
                .and_then(|binding| binding.take_listener(event))
        };

        match taken {
            Some((source, handle)) => {
                source.off(event, handle);
                debug!(key = %key, event = %event, "Listener removed");
                true
            }
            None => false,
        }
    }

    /// Tear down every binding of `dispatcher`. Returns how many there were.
    pub fn unbind_all<D: Dispatcher>(&self, dispatcher: &Arc<D>) -> usize {
        let (removed, pruned) = {
            let mut namespaces = self.namespaces.lock();
            let pruned = prune(&mut namespaces);
            let removed = namespaces.remove(&namespace_id(dispatcher));
            (removed, pruned)
        };
        drop(pruned);

        removed
            .map(|namespace| {
                let count = namespace.bindings.len();
                for binding in namespace.bindings.into_values() {
                    binding.teardown();
                }
                count
            })
            .unwrap_or(0)
    }

    pub fn is_bound<D: Dispatcher>(&self, dispatcher: &Arc<D>, key: &str) -> bool {
        self.namespaces
            .lock()
            .get(&namespace_id(dispatcher))
            .map(|namespace| !namespace.is_dead() && namespace.bindings.contains_key(key))
            .unwrap_or(false)
    }

    /// Keys bound for `dispatcher`, sorted.
    pub fn bound_keys<D: Dispatcher>(&self, dispatcher: &Arc<D>) -> Vec<String> {
        let mut keys: Vec<String> = self
            .namespaces
            .lock()
            .get(&namespace_id(dispatcher))
            .map(|namespace| namespace.bindings.keys().cloned().collect())
            .unwrap_or_default();
        keys.sort();
        keys
    }

    /// Number of live namespaces, after pruning dead ones.
    pub fn namespace_count(&self) -> usize {
        let (count, pruned) = {
            let mut namespaces = self.namespaces.lock();
            let pruned = prune(&mut namespaces);
            (namespaces.len(), pruned)
        };
        drop(pruned);
        count
    }
}

impl std::fmt::Debug for BindingRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BindingRegistry")
            .field("namespaces", &self.namespaces.lock().len())
            .finish()
    }
}
