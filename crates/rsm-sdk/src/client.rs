//! High-level client for the RSM SDK.

use crate::action::ActionContext;
use crate::config::MirrorConfig;
use crate::dispatcher::{Dispatcher, Store};
use crate::registry::BindingRegistry;
use rsm_core::State;
use std::sync::Arc;

/// Owns the binding registry and the default options.
///
/// # Example
///
/// ```rust
/// use rsm_sdk::{BindOptions, MemoryFirestore, MetadataChanges, MirrorClient, Store};
/// use rsm_core::{Slot, State};
/// use serde_json::json;
/// use std::sync::Arc;
///
/// let client = MirrorClient::default();
/// let store = Arc::new(Store::new(State::new().with("todos", Slot::Array(Vec::new()))));
/// let remote = MemoryFirestore::new();
/// remote.collection("todos").add(json!({ "text": "write docs" })).unwrap();
///
/// let bind_todos = client.action(|ctx, _: ()| {
///     ctx.bind_snapshot(
///         "todos",
///         &remote.collection("todos"),
///         MetadataChanges::Exclude,
///         BindOptions::default(),
///     )
/// });
/// let _ready = bind_todos(&store, ()).unwrap();
/// remote.flush();
///
/// assert_eq!(store.slot("todos").unwrap().as_array().unwrap().len(), 1);
/// ```
pub struct MirrorClient {
    config: Arc<MirrorConfig>,
    registry: Arc<BindingRegistry>,
}

impl MirrorClient {
    pub fn new(config: MirrorConfig) -> Self {
        Self {
            config: Arc::new(config),
            registry: Arc::new(BindingRegistry::new()),
        }
    }

    pub fn config(&self) -> &MirrorConfig {
        &self.config
    }

    pub fn registry(&self) -> &Arc<BindingRegistry> {
        &self.registry
    }

    /// A reference store over `state` whose audit channel is sized from
    /// the client's configuration.
    pub fn store(&self, state: State) -> Arc<Store> {
        Arc::new(Store::with_capacity(state, self.config.audit_capacity))
    }

    /// A binding context for `dispatcher`.
    pub fn context<D: Dispatcher>(&self, dispatcher: &Arc<D>) -> ActionContext<D> {
        ActionContext::new(
            self.registry.clone(),
            self.config.clone(),
            dispatcher.clone(),
        )
    }

    /// Wrap `f` so it runs with a binding context for whichever dispatcher
    /// it is invoked on. The return value is passed through untouched.
    pub fn action<D, P, R, F>(&self, f: F) -> impl Fn(&Arc<D>, P) -> R
    where
        D: Dispatcher,
        F: Fn(&ActionContext<D>, P) -> R,
    {
        let registry = self.registry.clone();
        let config = self.config.clone();
        move |dispatcher: &Arc<D>, payload: P| {
            let context = ActionContext::new(registry.clone(), config.clone(), dispatcher.clone());
            f(&context, payload)
        }
    }
}

impl Default for MirrorClient {
    fn default() -> Self {
        Self::new(MirrorConfig::default())
    }
}

impl std::fmt::Debug for MirrorClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MirrorClient")
            .field("config", &self.config)
            .field("registry", &self.registry)
            .finish()
    }
}
