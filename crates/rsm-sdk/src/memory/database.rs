//! In-memory JSON tree with keyed child events.
//!
//! A write produces, per listened location, the child events that turn the
//! previous ordered children into the new ones:
//! - `child_removed` for every child that left, in the old order,
//! - a walk over the new order emitting `child_added` for new children and
//!   `child_changed` / `child_moved` for existing ones, each carrying the
//!   key of its new previous sibling,
//! - `value` for the location itself, after every child event.

use super::{compare_values, DeliveryQueue, Phase};
use crate::error::RemoteError;
use crate::source::{
    ErrorHandler, EventHandler, EventSource, EventType, FetchCallback, ListenerHandle,
};
use parking_lot::Mutex;
use rsm_core::{DataSnapshot, Reference};
use serde_json::{Map, Value};
use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering as AtomicOrdering};
use std::sync::Arc;
use tracing::{debug, trace};
use ulid::Ulid;

static NULL: Value = Value::Null;

/// Child ordering of a [`MemoryRef`].
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum OrderBy {
    Key,
    Child(String),
}

#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
struct ViewSpec {
    path: Vec<String>,
    order: OrderBy,
    limit: Option<usize>,
}

type Children = Vec<(String, Value)>;

impl ViewSpec {
    fn sort_key<'a>(&self, value: &'a Value) -> &'a Value {
        match &self.order {
            OrderBy::Key => &NULL,
            OrderBy::Child(field) => value.get(field).unwrap_or(&NULL),
        }
    }

    fn compare(&self, a: &(String, Value), b: &(String, Value)) -> Ordering {
        compare_values(self.sort_key(&a.1), self.sort_key(&b.1)).then_with(|| a.0.cmp(&b.0))
    }

    fn reference(&self) -> Arc<Reference> {
        Reference::from_path(&self.path.join("/"))
    }
}

#[derive(Clone, Debug, PartialEq)]
struct View {
    children: Children,
    value: Value,
}

fn parse_path(path: &str) -> Vec<String> {
    path.split('/')
        .filter(|segment| !segment.is_empty())
        .map(str::to_string)
        .collect()
}

fn value_at<'a>(root: &'a Value, path: &[String]) -> &'a Value {
    path.iter()
        .try_fold(root, |node, key| node.get(key))
        .unwrap_or(&NULL)
}

/// Drop nulls and empty objects; arrays become objects keyed by index.
fn normalize(value: Value) -> Value {
    let children: Map<String, Value> = match value {
        Value::Object(map) => map
            .into_iter()
            .map(|(key, child)| (key, normalize(child)))
            .filter(|(_, child)| !child.is_null())
            .collect(),
        Value::Array(items) => items
            .into_iter()
            .enumerate()
            .map(|(index, child)| (index.to_string(), normalize(child)))
            .filter(|(_, child)| !child.is_null())
            .collect(),
        scalar => return scalar,
    };
    if children.is_empty() {
        Value::Null
    } else {
        Value::Object(children)
    }
}

fn write_at(node: &mut Value, path: &[String], value: Value) {
    let Some((head, rest)) = path.split_first() else {
        *node = value;
        return;
    };
    if !node.is_object() {
        if value.is_null() {
            return;
        }
        *node = Value::Object(Map::new());
    }
    let emptied = match node {
        Value::Object(children) => {
            let child = children.entry(head.clone()).or_insert(Value::Null);
            write_at(child, rest, value);
            if child.is_null() {
                children.remove(head);
            }
            children.is_empty()
        }
        _ => false,
    };
    if emptied {
        *node = Value::Null;
    }
}

fn compute_view(root: &Value, spec: &ViewSpec) -> View {
    let node = value_at(root, &spec.path);
    let mut children: Children = match node {
        Value::Object(map) => map.iter().map(|(k, v)| (k.clone(), v.clone())).collect(),
        _ => Vec::new(),
    };
    children.sort_by(|a, b| spec.compare(a, b));

    let value = match spec.limit {
        None => node.clone(),
        Some(limit) => {
            children.truncate(limit);
            if children.is_empty() {
                Value::Null
            } else {
                Value::Object(children.iter().cloned().collect())
            }
        }
    };
    View { children, value }
}

struct ChildEvent {
    event: EventType,
    key: String,
    value: Value,
    previous: Option<String>,
}

fn child_events(spec: &ViewSpec, old: &Children, new: &Children) -> Vec<ChildEvent> {
    let old_values: HashMap<&str, &Value> = old.iter().map(|(k, v)| (k.as_str(), v)).collect();
    let new_keys: HashSet<&str> = new.iter().map(|(k, _)| k.as_str()).collect();
    let mut events = Vec::new();

    for (key, value) in old {
        if !new_keys.contains(key.as_str()) {
            events.push(ChildEvent {
                event: EventType::ChildRemoved,
                key: key.clone(),
                value: value.clone(),
                previous: None,
            });
        }
    }

    let mut previous: Option<String> = None;
    for (key, value) in new {
        match old_values.get(key.as_str()) {
            None => events.push(ChildEvent {
                event: EventType::ChildAdded,
                key: key.clone(),
                value: value.clone(),
                previous: previous.clone(),
            }),
            Some(old_value) => {
                if *old_value != value {
                    events.push(ChildEvent {
                        event: EventType::ChildChanged,
                        key: key.clone(),
                        value: value.clone(),
                        previous: previous.clone(),
                    });
                }
                if spec.sort_key(old_value) != spec.sort_key(value) {
                    events.push(ChildEvent {
                        event: EventType::ChildMoved,
                        key: key.clone(),
                        value: value.clone(),
                        previous: previous.clone(),
                    });
                }
            }
        }
        previous = Some(key.clone());
    }

    events
}

struct DbListener {
    handle: ListenerHandle,
    spec: ViewSpec,
    event: EventType,
    handler: EventHandler,
    on_cancel: ErrorHandler,
    active: Arc<AtomicBool>,
    once: bool,
}

impl DbListener {
    fn deliver(&self, queue: &DeliveryQueue, snapshot: DataSnapshot, previous: Option<String>) {
        let active = self.active.clone();
        let handler = self.handler.clone();
        let once = self.once;
        let phase = if self.event == EventType::Value {
            Phase::Trailing
        } else {
            Phase::Primary
        };
        queue.push(phase, move || {
            let live = if once {
                active.swap(false, AtomicOrdering::SeqCst)
            } else {
                active.load(AtomicOrdering::SeqCst)
            };
            if live {
                handler(&snapshot, previous.as_deref());
            }
        });
    }

    fn cancel(&self, queue: &DeliveryQueue, err: RemoteError) {
        let active = self.active.clone();
        let on_cancel = self.on_cancel.clone();
        queue.push(Phase::Primary, move || {
            if active.swap(false, AtomicOrdering::SeqCst) {
                on_cancel(err);
            }
        });
    }
}

#[derive(Default)]
struct DatabaseState {
    root: Value,
    denied: Vec<Vec<String>>,
    listeners: Vec<DbListener>,
    views: BTreeMap<ViewSpec, View>,
    next_handle: u64,
}

impl DatabaseState {
    fn is_denied(&self, path: &[String]) -> bool {
        self.denied.iter().any(|denied| path.starts_with(denied))
    }

    fn prune_views(&mut self) {
        let listeners = &self.listeners;
        self.views
            .retain(|spec, _| listeners.iter().any(|listener| &listener.spec == spec));
    }
}

fn permission_denied(path: &[String]) -> RemoteError {
    RemoteError::PermissionDenied(format!("/{}", path.join("/")))
}

/// An in-memory keyed-event database.
///
/// Cloning yields another handle to the same database.
#[derive(Clone, Default)]
pub struct MemoryDatabase {
    state: Arc<Mutex<DatabaseState>>,
    queue: Arc<DeliveryQueue>,
}

impl MemoryDatabase {
    pub fn new() -> Self {
        Self::default()
    }

    /// A reference to the slash separated `path`.
    pub fn reference(&self, path: &str) -> MemoryRef {
        MemoryRef {
            db: self.clone(),
            spec: ViewSpec {
                path: parse_path(path),
                order: OrderBy::Key,
                limit: None,
            },
        }
    }

    /// Deliver every queued event. Returns how many ran.
    pub fn flush(&self) -> usize {
        self.queue.flush()
    }

    pub fn pending(&self) -> usize {
        self.queue.len()
    }

    /// Number of live listeners.
    pub fn listener_count(&self) -> usize {
        self.state
            .lock()
            .listeners
            .iter()
            .filter(|listener| listener.active.load(AtomicOrdering::SeqCst))
            .count()
    }

    /// Current value at `path`.
    pub fn value(&self, path: &str) -> Value {
        value_at(&self.state.lock().root, &parse_path(path)).clone()
    }

    /// Revoke access at and below `path`. Live listeners there are
    /// cancelled; later reads, listens and writes fail.
    pub fn deny_access(&self, path: &str) {
        let path = parse_path(path);
        let mut state = self.state.lock();
        state.denied.push(path.clone());

        let (revoked, kept): (Vec<DbListener>, Vec<DbListener>) =
            std::mem::take(&mut state.listeners)
                .into_iter()
                .partition(|listener| listener.spec.path.starts_with(&path));
        state.listeners = kept;
        state.prune_views();
        debug!(path = %path.join("/"), revoked = revoked.len(), "Access denied");

        self.queue.seal();
        for listener in &revoked {
            listener.cancel(&self.queue, permission_denied(&path));
        }
        self.queue.seal();
    }

    fn write(&self, writes: Vec<(Vec<String>, Value)>) -> Result<(), RemoteError> {
        let mut state = self.state.lock();
        if let Some((path, _)) = writes.iter().find(|(path, _)| state.is_denied(path)) {
            return Err(permission_denied(path));
        }
        for (path, value) in writes {
            trace!(path = %path.join("/"), "write");
            write_at(&mut state.root, &path, normalize(value));
        }
        self.notify(&mut state);
        Ok(())
    }

    /// Queue the events of every listened location that changed.
    fn notify(&self, state: &mut DatabaseState) {
        let DatabaseState {
            root,
            listeners,
            views,
            ..
        } = state;
        listeners.retain(|listener| listener.active.load(AtomicOrdering::SeqCst));

        self.queue.seal();
        for (spec, view) in views.iter_mut() {
            let next = compute_view(root, spec);
            if next == *view {
                continue;
            }
            let parent = spec.reference();

            for change in child_events(spec, &view.children, &next.children) {
                let snapshot =
                    DataSnapshot::at(Reference::child(&parent, change.key), change.value);
                for listener in listeners
                    .iter()
                    .filter(|l| &l.spec == spec && l.event == change.event)
                {
                    listener.deliver(&self.queue, snapshot.clone(), change.previous.clone());
                }
            }

            if next.value != view.value {
                let snapshot = DataSnapshot::at(parent.clone(), next.value.clone());
                for listener in listeners
                    .iter()
                    .filter(|l| &l.spec == spec && l.event == EventType::Value)
                {
                    listener.deliver(&self.queue, snapshot.clone(), None);
                }
            }

            *view = next;
        }
        self.queue.seal();
    }

    fn register(
        &self,
        spec: &ViewSpec,
        event: EventType,
        handler: EventHandler,
        on_cancel: ErrorHandler,
        once: bool,
    ) -> ListenerHandle {
        let mut state = self.state.lock();
        let handle = ListenerHandle(state.next_handle);
        state.next_handle += 1;

        let listener = DbListener {
            handle,
            spec: spec.clone(),
            event,
            handler,
            on_cancel,
            active: Arc::new(AtomicBool::new(true)),
            once,
        };

        if state.is_denied(&spec.path) {
            listener.cancel(&self.queue, permission_denied(&spec.path));
            return handle;
        }

        let DatabaseState { root, views, .. } = &mut *state;
        let view = views
            .entry(spec.clone())
            .or_insert_with(|| compute_view(root, spec));
        let parent = spec.reference();
        match event {
            EventType::Value => {
                listener.deliver(&self.queue, DataSnapshot::at(parent, view.value.clone()), None);
            }
            EventType::ChildAdded => {
                let mut previous: Option<String> = None;
                for (key, value) in &view.children {
                    let snapshot =
                        DataSnapshot::at(Reference::child(&parent, key.clone()), value.clone());
                    listener.deliver(&self.queue, snapshot, previous.clone());
                    previous = Some(key.clone());
                }
            }
            _ => {}
        }

        debug!(path = %spec.path.join("/"), event = %event, "Listener registered");
        state.listeners.push(listener);
        handle
    }

    fn unregister(&self, event: EventType, handle: ListenerHandle) {
        let mut state = self.state.lock();
        for listener in state
            .listeners
            .iter()
            .filter(|l| l.handle == handle && l.event == event)
        {
            listener.active.store(false, AtomicOrdering::SeqCst);
        }
        state
            .listeners
            .retain(|l| !(l.handle == handle && l.event == event));
        state.prune_views();
    }

    fn once(&self, spec: &ViewSpec, event: EventType, callback: FetchCallback<DataSnapshot>) {
        let callback = Arc::new(Mutex::new(Some(callback)));
        let on_value = callback.clone();
        let on_cancel = callback;
        self.register(
            spec,
            event,
            Arc::new(move |snapshot: &DataSnapshot, _previous: Option<&str>| {
                if let Some(callback) = on_value.lock().take() {
                    callback(Ok(snapshot.clone()));
                }
            }),
            Arc::new(move |err: RemoteError| {
                if let Some(callback) = on_cancel.lock().take() {
                    callback(Err(err));
                }
            }),
            true,
        );
    }
}

impl std::fmt::Debug for MemoryDatabase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.lock();
        f.debug_struct("MemoryDatabase")
            .field("root", &state.root)
            .field("listeners", &state.listeners.len())
            .field("pending", &self.queue.len())
            .finish()
    }
}

/// A location in a [`MemoryDatabase`], optionally ordered and limited.
#[derive(Clone)]
pub struct MemoryRef {
    db: MemoryDatabase,
    spec: ViewSpec,
}

impl MemoryRef {
    /// Last path segment, `None` at the root.
    pub fn key(&self) -> Option<&str> {
        self.spec.path.last().map(String::as_str)
    }

    pub fn path(&self) -> String {
        self.spec.path.join("/")
    }

    /// A child location. Ordering and limits are not inherited.
    pub fn child(&self, key: &str) -> MemoryRef {
        let mut path = self.spec.path.clone();
        path.extend(parse_path(key));
        MemoryRef {
            db: self.db.clone(),
            spec: ViewSpec {
                path,
                order: OrderBy::Key,
                limit: None,
            },
        }
    }

    pub fn order_by_key(mut self) -> Self {
        self.spec.order = OrderBy::Key;
        self
    }

    pub fn order_by_child(mut self, field: impl Into<String>) -> Self {
        self.spec.order = OrderBy::Child(field.into());
        self
    }

    pub fn limit_to_first(mut self, limit: usize) -> Self {
        self.spec.limit = Some(limit);
        self
    }

    /// Current value at this location, ignoring ordering and limits.
    pub fn value(&self) -> Value {
        value_at(&self.db.state.lock().root, &self.spec.path).clone()
    }

    /// Keys of the ordered, limited children.
    pub fn ordered_keys(&self) -> Vec<String> {
        let state = self.db.state.lock();
        compute_view(&state.root, &self.spec)
            .children
            .into_iter()
            .map(|(key, _)| key)
            .collect()
    }

    /// Replace the value here. `null` removes it.
    pub fn set(&self, value: Value) -> Result<(), RemoteError> {
        self.db.write(vec![(self.spec.path.clone(), value)])
    }

    /// Write each top-level field of `fields` as a child, in one update.
    pub fn update(&self, fields: Value) -> Result<(), RemoteError> {
        let writes = match fields {
            Value::Object(map) => map
                .into_iter()
                .map(|(key, value)| {
                    let mut path = self.spec.path.clone();
                    path.extend(parse_path(&key));
                    (path, value)
                })
                .collect(),
            other => vec![(self.spec.path.clone(), other)],
        };
        self.db.write(writes)
    }

    pub fn remove(&self) -> Result<(), RemoteError> {
        self.set(Value::Null)
    }

    /// Add a child under a generated key.
    pub fn push(&self, value: Value) -> Result<MemoryRef, RemoteError> {
        let child = self.child(&Ulid::new().to_string());
        child.set(value)?;
        Ok(child)
    }
}

impl EventSource for MemoryRef {
    fn on(
        &self,
        event: EventType,
        handler: EventHandler,
        on_cancel: ErrorHandler,
    ) -> ListenerHandle {
        self.db.register(&self.spec, event, handler, on_cancel, false)
    }

    fn off(&self, event: EventType, handle: ListenerHandle) {
        self.db.unregister(event, handle)
    }

    fn once(&self, event: EventType, callback: FetchCallback<DataSnapshot>) {
        self.db.once(&self.spec, event, callback)
    }
}

impl std::fmt::Debug for MemoryRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryRef")
            .field("path", &self.path())
            .field("order", &self.spec.order)
            .field("limit", &self.spec.limit)
            .finish()
    }
}
