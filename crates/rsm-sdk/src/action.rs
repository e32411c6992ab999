//! Execution context handed to enhanced actions.

use crate::config::{BindOptions, MirrorConfig};
use crate::dispatcher::Dispatcher;
use crate::error::Result;
use crate::event_binder::bind_events;
use crate::registry::BindingRegistry;
use crate::snapshot_binder::{bind_snapshot, Ready};
use crate::source::{EventSource, MetadataChanges, SnapshotSource};
use std::sync::Arc;

/// Binding entry points pre-bound to one dispatcher.
pub struct ActionContext<D: Dispatcher> {
    registry: Arc<BindingRegistry>,
    config: Arc<MirrorConfig>,
    dispatcher: Arc<D>,
}

impl<D: Dispatcher> ActionContext<D> {
    pub(crate) fn new(
        registry: Arc<BindingRegistry>,
        config: Arc<MirrorConfig>,
        dispatcher: Arc<D>,
    ) -> Self {
        Self {
            registry,
            config,
            dispatcher,
        }
    }

    /// The dispatcher this context commits into.
    pub fn dispatcher(&self) -> &Arc<D> {
        &self.dispatcher
    }

    /// Bind a document or query source to `key`.
    pub fn bind_snapshot(
        &self,
        key: &str,
        source: &dyn SnapshotSource,
        metadata: MetadataChanges,
        options: BindOptions,
    ) -> Result<Ready> {
        bind_snapshot(
            &self.registry,
            &self.config,
            &self.dispatcher,
            key,
            source,
            metadata,
            options,
        )
    }

    /// Bind a keyed-event source to `key`.
    pub fn bind_events(
        &self,
        key: &str,
        source: Arc<dyn EventSource>,
        options: BindOptions,
    ) -> Result<()> {
        bind_events(
            &self.registry,
            &self.config,
            &self.dispatcher,
            key,
            source,
            options,
        )
    }

    /// Tear down the binding at `key`, if any.
    pub fn unbind(&self, key: &str) -> bool {
        self.registry.unbind(&self.dispatcher, key)
    }

    pub fn is_bound(&self, key: &str) -> bool {
        self.registry.is_bound(&self.dispatcher, key)
    }
}

impl<D: Dispatcher> Clone for ActionContext<D> {
    fn clone(&self) -> Self {
        Self {
            registry: self.registry.clone(),
            config: self.config.clone(),
            dispatcher: self.dispatcher.clone(),
        }
    }
}

impl<D: Dispatcher> std::fmt::Debug for ActionContext<D> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ActionContext")
            .field("config", &self.config)
            .finish()
    }
}
