//! RSM SDK - Mirror remote data sources into a reducer-driven state store
//!
//! This SDK binds remote documents, queries and keyed event streams to
//! named slots of a [`Store`]. Every remote change becomes one mutation
//! committed through the store's [`Dispatcher`], so the mirrored state can
//! only ever change through the reducer.
//!
//! # Quick Start
//!
//! ```rust
//! use rsm_sdk::{BindOptions, MemoryDatabase, MirrorClient, Store};
//! use rsm_core::{Slot, State};
//! use serde_json::json;
//! use std::sync::Arc;
//!
//! let client = MirrorClient::default();
//! let store = Arc::new(Store::new(State::new().with("scores", Slot::Array(Vec::new()))));
//! let database = MemoryDatabase::new();
//!
//! let context = client.context(&store);
//! let scores = database.reference("scores").order_by_child("points");
//! context.bind_events("scores", Arc::new(scores), BindOptions::default()).unwrap();
//!
//! database.reference("scores/ann").set(json!({ "points": 12 })).unwrap();
//! database.reference("scores/bob").set(json!({ "points": 7 })).unwrap();
//! database.flush();
//!
//! let mirrored = store.slot("scores").unwrap();
//! assert_eq!(mirrored.as_array().unwrap()[0].get(".key"), Some(&json!("bob")));
//! ```
//!
//! # Architecture
//!
//! The SDK is organized into several modules:
//!
//! - [`client`] - Entry point owning the binding registry and defaults
//! - [`action`] - Binding entry points pre-bound to one dispatcher
//! - [`snapshot_binder`] - Document and query bindings
//! - [`event_binder`] - Keyed-event bindings
//! - [`registry`] - Live bindings per dispatcher and key
//! - [`dispatcher`] - The commit seam and the default [`Store`]
//! - [`source`] - Capabilities a remote source exposes
//! - [`memory`] - In-memory remote sources for tests and demos
//! - [`config`] - Client configuration and per-binding options
//! - [`error`] - Error types

pub mod action;
pub mod client;
pub mod config;
pub mod dispatcher;
pub mod error;
pub mod event_binder;
pub mod memory;
mod mirror;
pub mod registry;
pub mod snapshot_binder;
pub mod source;

// Re-exports for convenience
pub use action::ActionContext;
pub use client::MirrorClient;
pub use config::{
    BindMode, BindOptions, BindOptionsBuilder, ErrorCallback, MirrorConfig, MirrorConfigBuilder,
    ReadyCallback, ReadyValue,
};
pub use dispatcher::{Dispatcher, Store, DEFAULT_AUDIT_CAPACITY};
pub use error::{BindError, RemoteError, Result};
pub use event_binder::bind_events;
pub use memory::{
    Direction, FieldOp, MemoryCollection, MemoryDatabase, MemoryDocument, MemoryFirestore,
    MemoryQuery, MemoryRef, OrderBy, WriteBatch,
};
pub use registry::{Binding, BindingRegistry, Teardown};
pub use snapshot_binder::{bind_snapshot, Ready};
pub use source::{
    DocumentRef, ErrorHandler, EventHandler, EventSource, EventType, FetchCallback,
    ListenOptions, ListenerHandle, MetadataChanges, QueryRef, SnapshotHandler, SnapshotSource,
    SourceShape, Unsubscribe,
};

/// Prelude module for convenient imports.
pub mod prelude {
    pub use crate::client::MirrorClient;
    pub use crate::config::{BindMode, BindOptions, MirrorConfig, ReadyValue};
    pub use crate::dispatcher::{Dispatcher, Store};
    pub use crate::error::{BindError, RemoteError};
    pub use crate::source::{EventSource, MetadataChanges, SnapshotSource};
}
