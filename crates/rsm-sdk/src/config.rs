//! Client configuration and per-binding options.

use crate::dispatcher::DEFAULT_AUDIT_CAPACITY;
use crate::error::RemoteError;
use rsm_core::snapshot::{DataSnapshot, DocumentSnapshot, QuerySnapshot};
use std::sync::Arc;

/// Defaults shared by every binding of a client.
#[derive(Clone, Debug)]
pub struct MirrorConfig {
    /// Defer array initialization until the first full fetch resolves.
    pub wait: bool,
    /// Add a `.path` field to every record.
    pub include_path: bool,
    /// Capacity of a store's committed-mutation channel.
    pub audit_capacity: usize,
}

impl Default for MirrorConfig {
    fn default() -> Self {
        Self {
            wait: true,
            include_path: false,
            audit_capacity: DEFAULT_AUDIT_CAPACITY,
        }
    }
}

/// Builder for mirror configuration.
pub struct MirrorConfigBuilder {
    config: MirrorConfig,
}

impl MirrorConfigBuilder {
    pub fn new() -> Self {
        Self {
            config: MirrorConfig::default(),
        }
    }

    pub fn wait(mut self, enabled: bool) -> Self {
        self.config.wait = enabled;
        self
    }

    pub fn include_path(mut self, enabled: bool) -> Self {
        self.config.include_path = enabled;
        self
    }

    pub fn audit_capacity(mut self, capacity: usize) -> Self {
        self.config.audit_capacity = capacity;
        self
    }

    pub fn build(self) -> MirrorConfig {
        self.config
    }
}

impl Default for MirrorConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// The first consistent value observed by a binding.
#[derive(Clone, Debug, PartialEq)]
pub enum ReadyValue {
    Document(DocumentSnapshot),
    Query(QuerySnapshot),
    Data(DataSnapshot),
}

/// How a key is mirrored.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BindMode {
    AsObject,
    AsArray,
}

/// Callback run once with the first consistent value.
pub type ReadyCallback = Arc<dyn Fn(&ReadyValue) + Send + Sync>;
/// Callback run on subscription failure.
pub type ErrorCallback = Arc<dyn Fn(&RemoteError) + Send + Sync>;

/// Options for a single bind call. Unset fields fall back to the client's
/// [`MirrorConfig`].
#[derive(Clone, Default)]
pub struct BindOptions {
    pub wait: Option<bool>,
    pub include_path: Option<bool>,
    /// Explicit mode for keyed-event sources; inferred from state when unset.
    pub mode: Option<BindMode>,
    pub on_ready: Option<ReadyCallback>,
    pub on_error: Option<ErrorCallback>,
    /// Passed to every live keyed-event listener.
    pub on_cancel: Option<ErrorCallback>,
}

impl BindOptions {
    pub fn builder() -> BindOptionsBuilder {
        BindOptionsBuilder::new()
    }

    pub fn wait_or(&self, config: &MirrorConfig) -> bool {
        self.wait.unwrap_or(config.wait)
    }

    pub fn include_path_or(&self, config: &MirrorConfig) -> bool {
        self.include_path.unwrap_or(config.include_path)
    }
}

impl std::fmt::Debug for BindOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BindOptions")
            .field("wait", &self.wait)
            .field("include_path", &self.include_path)
            .field("mode", &self.mode)
            .field("on_ready", &self.on_ready.is_some())
            .field("on_error", &self.on_error.is_some())
            .field("on_cancel", &self.on_cancel.is_some())
            .finish()
    }
}

/// Builder for bind options.
pub struct BindOptionsBuilder {
    options: BindOptions,
}

impl BindOptionsBuilder {
    pub fn new() -> Self {
        Self {
            options: BindOptions::default(),
        }
    }

    pub fn wait(mut self, enabled: bool) -> Self {
        self.options.wait = Some(enabled);
        self
    }

    pub fn include_path(mut self, enabled: bool) -> Self {
        self.options.include_path = Some(enabled);
        self
    }

    pub fn mode(mut self, mode: BindMode) -> Self {
        self.options.mode = Some(mode);
        self
    }

    pub fn on_ready(mut self, f: impl Fn(&ReadyValue) + Send + Sync + 'static) -> Self {
        self.options.on_ready = Some(Arc::new(f));
        self
    }

    pub fn on_error(mut self, f: impl Fn(&RemoteError) + Send + Sync + 'static) -> Self {
        self.options.on_error = Some(Arc::new(f));
        self
    }

    pub fn on_cancel(mut self, f: impl Fn(&RemoteError) + Send + Sync + 'static) -> Self {
        self.options.on_cancel = Some(Arc::new(f));
        self
    }

    pub fn build(self) -> BindOptions {
        self.options
    }
}

impl Default for BindOptionsBuilder {
    fn default() -> Self {
        Self::new()
    }
}
