//! Capabilities a remote source must expose to be bound.
//!
//! Two source styles are supported:
//! - snapshot sources ([`SnapshotSource`]) deliver whole documents, or query
//!   results with a pre-computed ordered diff,
//! - keyed-event sources ([`EventSource`]) deliver one event stream per
//!   kind of child change, identified by previous-sibling keys.

use crate::error::RemoteError;
use rsm_core::snapshot::{DataSnapshot, DocumentSnapshot, QuerySnapshot};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Handler for successive snapshot deliveries.
pub type SnapshotHandler<T> = Arc<dyn Fn(T) + Send + Sync>;
/// Handler for subscription failures.
pub type ErrorHandler = Arc<dyn Fn(RemoteError) + Send + Sync>;
/// Continuation for a one-shot fetch.
pub type FetchCallback<T> = Box<dyn FnOnce(std::result::Result<T, RemoteError>) + Send>;
/// Handler for keyed events: the snapshot and its previous sibling key.
pub type EventHandler = Arc<dyn Fn(&DataSnapshot, Option<&str>) + Send + Sync>;

/// Releases every remote listener of one subscription when invoked.
pub struct Unsubscribe(Box<dyn FnOnce() + Send>);

impl Unsubscribe {
    pub fn new(f: impl FnOnce() + Send + 'static) -> Self {
        Self(Box::new(f))
    }

    /// An unsubscribe that does nothing.
    pub fn noop() -> Self {
        Self::new(|| {})
    }

    pub fn call(self) {
        (self.0)()
    }
}

impl std::fmt::Debug for Unsubscribe {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("Unsubscribe")
    }
}

/// Whether metadata-only updates trigger a notification.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum MetadataChanges {
    Include,
    Exclude,
}

/// Options passed to a snapshot listener.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ListenOptions {
    pub metadata_changes: MetadataChanges,
}

impl ListenOptions {
    pub fn new(metadata_changes: MetadataChanges) -> Self {
        Self { metadata_changes }
    }

    pub fn includes_metadata(&self) -> bool {
        self.metadata_changes == MetadataChanges::Include
    }
}

/// A single-document endpoint.
pub trait DocumentRef: Send + Sync {
    /// Path of the collection holding this document.
    fn parent(&self) -> String;

    /// Subscribe to changes of this document.
    fn listen(
        &self,
        options: ListenOptions,
        on_next: SnapshotHandler<DocumentSnapshot>,
        on_error: ErrorHandler,
    ) -> Unsubscribe;
}

/// A collection or ordered query endpoint.
pub trait QueryRef: Send + Sync {
    /// Fetch the current results once.
    fn get(&self, callback: FetchCallback<QuerySnapshot>);

    /// Subscribe to result changes. Every delivery carries the ordered diff
    /// from the previous one.
    fn listen(
        &self,
        options: ListenOptions,
        on_next: SnapshotHandler<QuerySnapshot>,
        on_error: ErrorHandler,
    ) -> Unsubscribe;
}

/// Classification of a snapshot source.
pub enum SourceShape<'a> {
    Document(&'a dyn DocumentRef),
    Query(&'a dyn QueryRef),
    Unsupported,
}

/// A bindable snapshot source.
pub trait SnapshotSource: Send + Sync {
    fn shape(&self) -> SourceShape<'_>;
}

/// Event streams of a keyed-event source.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum EventType {
    Value,
    ChildAdded,
    ChildRemoved,
    ChildChanged,
    ChildMoved,
}

impl EventType {
    pub const CHILD_EVENTS: [EventType; 4] = [
        EventType::ChildAdded,
        EventType::ChildRemoved,
        EventType::ChildChanged,
        EventType::ChildMoved,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            EventType::Value => "value",
            EventType::ChildAdded => "child_added",
            EventType::ChildRemoved => "child_removed",
            EventType::ChildChanged => "child_changed",
            EventType::ChildMoved => "child_moved",
        }
    }

    pub fn is_child_event(&self) -> bool {
        !matches!(self, EventType::Value)
    }
}

impl std::fmt::Display for EventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Handle identifying one registered listener.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ListenerHandle(pub u64);

/// A keyed-event source.
pub trait EventSource: Send + Sync {
    /// Register `handler` for `event`. `on_cancel` fires if the source
    /// revokes the listener.
    fn on(&self, event: EventType, handler: EventHandler, on_cancel: ErrorHandler)
        -> ListenerHandle;

    /// Remove a listener registered with [`EventSource::on`].
    fn off(&self, event: EventType, handle: ListenerHandle);

    /// Deliver the next `event` once.
    fn once(&self, event: EventType, callback: FetchCallback<DataSnapshot>);
}
