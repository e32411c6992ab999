//! In-memory document store with collections, documents and ordered queries.
//!
//! Query listeners receive the ordered diff between consecutive result
//! lists. Removed entries come first, then added ones, then modified ones;
//! every index is relative to the result list as it stands after the
//! preceding entries of the same delivery.

use super::{compare_values, same_type, DeliveryQueue, Phase};
use crate::error::RemoteError;
use crate::source::{
    DocumentRef, ErrorHandler, FetchCallback, ListenOptions, QueryRef, SnapshotHandler,
    SnapshotSource, SourceShape, Unsubscribe,
};
use parking_lot::Mutex;
use rsm_core::{DocumentChange, DocumentSnapshot, QuerySnapshot, SnapshotMetadata};
use serde_json::{Map, Value};
use std::cmp::Ordering;
use std::collections::{BTreeMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering as AtomicOrdering};
use std::sync::Arc;
use tracing::{debug, trace};
use ulid::Ulid;

type Fields = Map<String, Value>;
type Collections = BTreeMap<String, BTreeMap<String, Fields>>;

static NULL: Value = Value::Null;

/// Comparison applied by [`MemoryQuery::where_field`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FieldOp {
    Equal,
    NotEqual,
    Less,
    LessOrEqual,
    Greater,
    GreaterOrEqual,
}

impl FieldOp {
    fn matches(&self, field: &Value, operand: &Value) -> bool {
        let ordering = same_type(field, operand).then(|| compare_values(field, operand));
        match self {
            FieldOp::Equal => ordering == Some(Ordering::Equal),
            FieldOp::NotEqual => ordering != Some(Ordering::Equal),
            FieldOp::Less => ordering == Some(Ordering::Less),
            FieldOp::LessOrEqual => matches!(ordering, Some(Ordering::Less | Ordering::Equal)),
            FieldOp::Greater => ordering == Some(Ordering::Greater),
            FieldOp::GreaterOrEqual => {
                matches!(ordering, Some(Ordering::Greater | Ordering::Equal))
            }
        }
    }
}

/// Sort direction of [`MemoryQuery::order_by`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Direction {
    Ascending,
    Descending,
}

impl Direction {
    fn apply(&self, ordering: Ordering) -> Ordering {
        match self {
            Direction::Ascending => ordering,
            Direction::Descending => ordering.reverse(),
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
struct Filter {
    field: String,
    op: FieldOp,
    value: Value,
}

#[derive(Clone, Debug, PartialEq)]
struct QuerySpec {
    collection: String,
    filters: Vec<Filter>,
    order: Option<(String, Direction)>,
    limit: Option<usize>,
}

fn field_of<'a>(doc: &'a DocumentSnapshot, field: &str) -> &'a Value {
    doc.data
        .as_ref()
        .and_then(|data| data.get(field))
        .unwrap_or(&NULL)
}

impl QuerySpec {
    fn new(collection: impl Into<String>) -> Self {
        Self {
            collection: collection.into(),
            filters: Vec::new(),
            order: None,
            limit: None,
        }
    }

    fn matches(&self, fields: &Fields) -> bool {
        // Documents lacking the order field never appear in ordered results.
        if let Some((field, _)) = &self.order {
            if !fields.contains_key(field) {
                return false;
            }
        }
        self.filters.iter().all(|filter| {
            fields
                .get(&filter.field)
                .map(|value| filter.op.matches(value, &filter.value))
                .unwrap_or(false)
        })
    }

    fn compare(&self, a: &DocumentSnapshot, b: &DocumentSnapshot) -> Ordering {
        match &self.order {
            Some((field, direction)) => direction
                .apply(compare_values(field_of(a, field), field_of(b, field)))
                .then_with(|| direction.apply(a.id.cmp(&b.id))),
            None => a.id.cmp(&b.id),
        }
    }

    fn evaluate(
        &self,
        collections: &Collections,
        metadata: SnapshotMetadata,
    ) -> Vec<DocumentSnapshot> {
        let Some(docs) = collections.get(&self.collection) else {
            return Vec::new();
        };
        let mut results: Vec<DocumentSnapshot> = docs
            .iter()
            .filter(|(_, fields)| self.matches(fields))
            .map(|(id, fields)| snapshot(&self.collection, id, Some(fields.clone()), metadata))
            .collect();
        results.sort_by(|a, b| self.compare(a, b));
        if let Some(limit) = self.limit {
            results.truncate(limit);
        }
        results
    }
}

fn snapshot(
    collection: &str,
    id: &str,
    data: Option<Fields>,
    metadata: SnapshotMetadata,
) -> DocumentSnapshot {
    let mut doc = DocumentSnapshot::new(collection, id, data);
    doc.metadata = metadata;
    doc
}

/// Ordered diff turning `tracked` into `results`, updating `tracked` along
/// the way.
fn diff_results(
    spec: &QuerySpec,
    tracked: &mut Vec<DocumentSnapshot>,
    results: &[DocumentSnapshot],
) -> Vec<DocumentChange> {
    fn position(tracked: &[DocumentSnapshot], id: &str) -> Option<usize> {
        tracked.iter().position(|doc| doc.id == id)
    }

    let mut changes = Vec::new();

    let removed: Vec<String> = tracked
        .iter()
        .filter(|doc| !results.iter().any(|r| r.id == doc.id))
        .map(|doc| doc.id.clone())
        .collect();
    for id in removed {
        if let Some(old_index) = position(tracked, &id) {
            let doc = tracked.remove(old_index);
            changes.push(DocumentChange::Removed { doc, old_index });
        }
    }

    let added: Vec<&DocumentSnapshot> = results
        .iter()
        .filter(|doc| position(tracked, &doc.id).is_none())
        .collect();
    for doc in added {
        let new_index = tracked.partition_point(|d| spec.compare(d, doc) == Ordering::Less);
        tracked.insert(new_index, doc.clone());
        changes.push(DocumentChange::Added {
            doc: doc.clone(),
            new_index,
        });
    }

    let modified: Vec<&DocumentSnapshot> = results
        .iter()
        .filter(|doc| {
            position(tracked, &doc.id)
                .map(|index| tracked[index].data != doc.data)
                .unwrap_or(false)
        })
        .collect();
    for doc in modified {
        if let Some(old_index) = position(tracked, &doc.id) {
            tracked.remove(old_index);
            let new_index = tracked.partition_point(|d| spec.compare(d, doc) == Ordering::Less);
            tracked.insert(new_index, doc.clone());
            changes.push(DocumentChange::Modified {
                doc: doc.clone(),
                old_index,
                new_index,
            });
        }
    }

    changes
}

enum ListenerKind {
    Document {
        id: String,
        on_next: SnapshotHandler<DocumentSnapshot>,
        last: Option<Fields>,
    },
    Query {
        spec: QuerySpec,
        on_next: SnapshotHandler<QuerySnapshot>,
        tracked: Vec<DocumentSnapshot>,
    },
}

struct Listener {
    id: u64,
    collection: String,
    include_metadata: bool,
    active: Arc<AtomicBool>,
    on_error: ErrorHandler,
    kind: ListenerKind,
}

enum Write {
    Set {
        collection: String,
        id: String,
        data: Fields,
    },
    Update {
        collection: String,
        id: String,
        fields: Fields,
    },
    Delete {
        collection: String,
        id: String,
    },
}

impl Write {
    fn collection(&self) -> &str {
        match self {
            Write::Set { collection, .. }
            | Write::Update { collection, .. }
            | Write::Delete { collection, .. } => collection,
        }
    }
}

#[derive(Default)]
struct FirestoreState {
    collections: Collections,
    denied: HashSet<String>,
    listeners: Vec<Listener>,
    next_listener: u64,
    metadata: SnapshotMetadata,
}

fn permission_denied(collection: &str) -> RemoteError {
    RemoteError::PermissionDenied(format!(
        "Missing or insufficient permissions for '{}'",
        collection
    ))
}

/// Store non-object data under a `value` field.
fn into_fields(data: Value) -> Fields {
    match data {
        Value::Object(fields) => fields,
        other => {
            let mut fields = Map::new();
            fields.insert("value".to_string(), other);
            fields
        }
    }
}

/// An in-memory document database.
///
/// Cloning yields another handle to the same database.
#[derive(Clone, Default)]
pub struct MemoryFirestore {
    state: Arc<Mutex<FirestoreState>>,
    queue: Arc<DeliveryQueue>,
}

impl MemoryFirestore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn collection(&self, name: impl Into<String>) -> MemoryCollection {
        MemoryCollection {
            db: self.clone(),
            name: name.into(),
        }
    }

    pub fn doc(&self, collection: impl Into<String>, id: impl Into<String>) -> MemoryDocument {
        MemoryDocument {
            db: self.clone(),
            collection: collection.into(),
            id: id.into(),
        }
    }

    /// Start an atomic group of writes.
    pub fn batch(&self) -> WriteBatch {
        WriteBatch {
            db: self.clone(),
            writes: Vec::new(),
        }
    }

    /// Deliver every queued notification. Returns how many ran.
    pub fn flush(&self) -> usize {
        self.queue.flush()
    }

    /// Number of queued notifications.
    pub fn pending(&self) -> usize {
        self.queue.len()
    }

    /// Number of live listeners.
    pub fn listener_count(&self) -> usize {
        self.state.lock().listeners.len()
    }

    /// Change snapshot metadata without touching data. Only listeners that
    /// include metadata changes are notified.
    pub fn touch_metadata(&self, from_cache: bool) {
        let mut state = self.state.lock();
        state.metadata.from_cache = from_cache;
        let metadata = state.metadata;

        self.queue.seal();
        let FirestoreState {
            collections,
            listeners,
            ..
        } = &mut *state;
        for listener in listeners.iter_mut().filter(|l| l.include_metadata) {
            let active = listener.active.clone();
            match &mut listener.kind {
                ListenerKind::Document { id, on_next, last } => {
                    let data = collections
                        .get(&listener.collection)
                        .and_then(|docs| docs.get(id.as_str()))
                        .cloned();
                    *last = data.clone();
                    let doc = snapshot(&listener.collection, id, data, metadata);
                    let on_next = on_next.clone();
                    self.queue.push(Phase::Primary, move || {
                        if active.load(AtomicOrdering::SeqCst) {
                            on_next(doc);
                        }
                    });
                }
                ListenerKind::Query {
                    on_next, tracked, ..
                } => {
                    for doc in tracked.iter_mut() {
                        doc.metadata = metadata;
                    }
                    let query = QuerySnapshot {
                        docs: tracked.clone(),
                        changes: Vec::new(),
                        metadata,
                    };
                    let on_next = on_next.clone();
                    self.queue.push(Phase::Primary, move || {
                        if active.load(AtomicOrdering::SeqCst) {
                            on_next(query);
                        }
                    });
                }
            }
        }
        self.queue.seal();
    }

    /// Revoke access to `collection`. Live listeners receive an error and
    /// stop; later reads, listens and writes fail.
    pub fn deny_access(&self, collection: impl Into<String>) {
        let collection = collection.into();
        let mut state = self.state.lock();
        state.denied.insert(collection.clone());

        let (revoked, kept): (Vec<Listener>, Vec<Listener>) =
            std::mem::take(&mut state.listeners)
                .into_iter()
                .partition(|listener| listener.collection == collection);
        state.listeners = kept;
        debug!(collection = %collection, revoked = revoked.len(), "Access denied");

        self.queue.seal();
        for listener in revoked {
            self.push_error(&listener.active, listener.on_error, permission_denied(&collection));
        }
        self.queue.seal();
    }

    fn push_error(&self, active: &Arc<AtomicBool>, on_error: ErrorHandler, err: RemoteError) {
        let active = active.clone();
        self.queue.push(Phase::Primary, move || {
            if active.load(AtomicOrdering::SeqCst) {
                on_error(err);
            }
        });
    }

    fn apply(&self, writes: Vec<Write>) -> Result<(), RemoteError> {
        let mut state = self.state.lock();

        for write in &writes {
            if state.denied.contains(write.collection()) {
                return Err(permission_denied(write.collection()));
            }
            if let Write::Update { collection, id, .. } = write {
                let exists = state
                    .collections
                    .get(collection)
                    .map(|docs| docs.contains_key(id))
                    .unwrap_or(false);
                if !exists {
                    return Err(RemoteError::Other(format!(
                        "No document to update: {}/{}",
                        collection, id
                    )));
                }
            }
        }

        for write in writes {
            match write {
                Write::Set {
                    collection,
                    id,
                    data,
                } => {
                    trace!(collection = %collection, id = %id, "set");
                    state.collections.entry(collection).or_default().insert(id, data);
                }
                Write::Update {
                    collection,
                    id,
                    fields,
                } => {
                    trace!(collection = %collection, id = %id, "update");
                    if let Some(doc) = state
                        .collections
                        .get_mut(&collection)
                        .and_then(|docs| docs.get_mut(&id))
                    {
                        doc.extend(fields);
                    }
                }
                Write::Delete { collection, id } => {
                    trace!(collection = %collection, id = %id, "delete");
                    if let Some(docs) = state.collections.get_mut(&collection) {
                        docs.remove(&id);
                    }
                }
            }
        }

        self.notify(&mut state);
        Ok(())
    }

    /// Queue notifications for every listener whose view changed.
    fn notify(&self, state: &mut FirestoreState) {
        let metadata = state.metadata;
        let FirestoreState {
            collections,
            listeners,
            ..
        } = state;

        self.queue.seal();
        for listener in listeners.iter_mut() {
            let active = listener.active.clone();
            match &mut listener.kind {
                ListenerKind::Document { id, on_next, last } => {
                    let current = collections
                        .get(&listener.collection)
                        .and_then(|docs| docs.get(id.as_str()))
                        .cloned();
                    if *last == current {
                        continue;
                    }
                    *last = current.clone();
                    let doc = snapshot(&listener.collection, id, current, metadata);
                    let on_next = on_next.clone();
                    self.queue.push(Phase::Primary, move || {
                        if active.load(AtomicOrdering::SeqCst) {
                            on_next(doc);
                        }
                    });
                }
                ListenerKind::Query {
                    spec,
                    on_next,
                    tracked,
                } => {
                    let results = spec.evaluate(collections, metadata);
                    let changes = diff_results(spec, tracked, &results);
                    if changes.is_empty() {
                        continue;
                    }
                    let query = QuerySnapshot {
                        docs: results,
                        changes,
                        metadata,
                    };
                    let on_next = on_next.clone();
                    self.queue.push(Phase::Primary, move || {
                        if active.load(AtomicOrdering::SeqCst) {
                            on_next(query);
                        }
                    });
                }
            }
        }
        self.queue.seal();
    }

    fn register(
        &self,
        state: &mut FirestoreState,
        collection: &str,
        include_metadata: bool,
        on_error: ErrorHandler,
        kind: ListenerKind,
    ) -> (Arc<AtomicBool>, Unsubscribe) {
        let id = state.next_listener;
        state.next_listener += 1;
        let active = Arc::new(AtomicBool::new(true));
        state.listeners.push(Listener {
            id,
            collection: collection.to_string(),
            include_metadata,
            active: active.clone(),
            on_error,
            kind,
        });
        debug!(collection = %collection, listener = id, "Listener registered");

        let shared = self.state.clone();
        let flag = active.clone();
        let unsubscribe = Unsubscribe::new(move || {
            flag.store(false, AtomicOrdering::SeqCst);
            shared.lock().listeners.retain(|listener| listener.id != id);
        });
        (active, unsubscribe)
    }

    fn listen_document(
        &self,
        collection: &str,
        id: &str,
        options: ListenOptions,
        on_next: SnapshotHandler<DocumentSnapshot>,
        on_error: ErrorHandler,
    ) -> Unsubscribe {
        let mut state = self.state.lock();
        if state.denied.contains(collection) {
            let active = Arc::new(AtomicBool::new(true));
            self.push_error(&active, on_error, permission_denied(collection));
            return Unsubscribe::new(move || active.store(false, AtomicOrdering::SeqCst));
        }

        let data = state
            .collections
            .get(collection)
            .and_then(|docs| docs.get(id))
            .cloned();
        let doc = snapshot(collection, id, data.clone(), state.metadata);
        let (active, unsubscribe) = self.register(
            &mut state,
            collection,
            options.includes_metadata(),
            on_error,
            ListenerKind::Document {
                id: id.to_string(),
                on_next: on_next.clone(),
                last: data,
            },
        );

        self.queue.push(Phase::Primary, move || {
            if active.load(AtomicOrdering::SeqCst) {
                on_next(doc);
            }
        });
        unsubscribe
    }

    fn listen_query(
        &self,
        spec: QuerySpec,
        options: ListenOptions,
        on_next: SnapshotHandler<QuerySnapshot>,
        on_error: ErrorHandler,
    ) -> Unsubscribe {
        let mut state = self.state.lock();
        if state.denied.contains(&spec.collection) {
            let active = Arc::new(AtomicBool::new(true));
            self.push_error(&active, on_error, permission_denied(&spec.collection));
            return Unsubscribe::new(move || active.store(false, AtomicOrdering::SeqCst));
        }

        let metadata = state.metadata;
        let results = spec.evaluate(&state.collections, metadata);
        let mut initial = QuerySnapshot::initial(results.clone());
        initial.metadata = metadata;

        let collection = spec.collection.clone();
        let (active, unsubscribe) = self.register(
            &mut state,
            &collection,
            options.includes_metadata(),
            on_error,
            ListenerKind::Query {
                spec,
                on_next: on_next.clone(),
                tracked: results,
            },
        );

        self.queue.push(Phase::Primary, move || {
            if active.load(AtomicOrdering::SeqCst) {
                on_next(initial);
            }
        });
        unsubscribe
    }

    fn get_query(&self, spec: &QuerySpec, callback: FetchCallback<QuerySnapshot>) {
        let state = self.state.lock();
        if state.denied.contains(&spec.collection) {
            let err = permission_denied(&spec.collection);
            self.queue.push(Phase::Primary, move || callback(Err(err)));
            return;
        }

        let mut fetched = QuerySnapshot::initial(spec.evaluate(&state.collections, state.metadata));
        fetched.metadata = state.metadata;
        self.queue.push(Phase::Primary, move || callback(Ok(fetched)));
    }
}

impl std::fmt::Debug for MemoryFirestore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.lock();
        f.debug_struct("MemoryFirestore")
            .field("collections", &state.collections.len())
            .field("listeners", &state.listeners.len())
            .field("pending", &self.queue.len())
            .finish()
    }
}

/// A collection, queryable as a whole.
#[derive(Clone)]
pub struct MemoryCollection {
    db: MemoryFirestore,
    name: String,
}

impl MemoryCollection {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn doc(&self, id: impl Into<String>) -> MemoryDocument {
        self.db.doc(self.name.clone(), id)
    }

    /// Create a document under a generated id.
    pub fn add(&self, data: Value) -> Result<MemoryDocument, RemoteError> {
        let doc = self.doc(Ulid::new().to_string());
        doc.set(data)?;
        Ok(doc)
    }

    /// The whole collection as a query.
    pub fn query(&self) -> MemoryQuery {
        MemoryQuery {
            db: self.db.clone(),
            spec: QuerySpec::new(self.name.clone()),
        }
    }

    pub fn where_field(
        &self,
        field: impl Into<String>,
        op: FieldOp,
        value: impl Into<Value>,
    ) -> MemoryQuery {
        self.query().where_field(field, op, value)
    }

    pub fn order_by(&self, field: impl Into<String>, direction: Direction) -> MemoryQuery {
        self.query().order_by(field, direction)
    }

    pub fn limit(&self, limit: usize) -> MemoryQuery {
        self.query().limit(limit)
    }
}

impl QueryRef for MemoryCollection {
    fn get(&self, callback: FetchCallback<QuerySnapshot>) {
        self.query().get(callback)
    }

    fn listen(
        &self,
        options: ListenOptions,
        on_next: SnapshotHandler<QuerySnapshot>,
        on_error: ErrorHandler,
    ) -> Unsubscribe {
        self.query().listen(options, on_next, on_error)
    }
}

impl SnapshotSource for MemoryCollection {
    fn shape(&self) -> SourceShape<'_> {
        SourceShape::Query(self)
    }
}

/// A filtered, ordered and limited view of a collection.
#[derive(Clone)]
pub struct MemoryQuery {
    db: MemoryFirestore,
    spec: QuerySpec,
}

impl MemoryQuery {
    pub fn where_field(
        mut self,
        field: impl Into<String>,
        op: FieldOp,
        value: impl Into<Value>,
    ) -> Self {
        self.spec.filters.push(Filter {
            field: field.into(),
            op,
            value: value.into(),
        });
        self
    }

    pub fn order_by(mut self, field: impl Into<String>, direction: Direction) -> Self {
        self.spec.order = Some((field.into(), direction));
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.spec.limit = Some(limit);
        self
    }

    /// Current results, read synchronously.
    pub fn results(&self) -> Vec<DocumentSnapshot> {
        let state = self.db.state.lock();
        self.spec.evaluate(&state.collections, state.metadata)
    }
}

impl QueryRef for MemoryQuery {
    fn get(&self, callback: FetchCallback<QuerySnapshot>) {
        self.db.get_query(&self.spec, callback)
    }

    fn listen(
        &self,
        options: ListenOptions,
        on_next: SnapshotHandler<QuerySnapshot>,
        on_error: ErrorHandler,
    ) -> Unsubscribe {
        self.db.listen_query(self.spec.clone(), options, on_next, on_error)
    }
}

impl SnapshotSource for MemoryQuery {
    fn shape(&self) -> SourceShape<'_> {
        SourceShape::Query(self)
    }
}

/// A single document.
#[derive(Clone)]
pub struct MemoryDocument {
    db: MemoryFirestore,
    collection: String,
    id: String,
}

impl MemoryDocument {
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn path(&self) -> String {
        format!("{}/{}", self.collection, self.id)
    }

    /// Current fields, `None` when the document does not exist.
    pub fn data(&self) -> Option<Fields> {
        self.db
            .state
            .lock()
            .collections
            .get(&self.collection)
            .and_then(|docs| docs.get(&self.id))
            .cloned()
    }

    /// Replace the document. Non-object data is stored under `value`.
    pub fn set(&self, data: Value) -> Result<(), RemoteError> {
        self.db.apply(vec![self.set_write(data)])
    }

    /// Merge top-level fields into an existing document.
    pub fn update(&self, fields: Value) -> Result<(), RemoteError> {
        self.db.apply(vec![self.update_write(fields)])
    }

    pub fn delete(&self) -> Result<(), RemoteError> {
        self.db.apply(vec![self.delete_write()])
    }

    fn set_write(&self, data: Value) -> Write {
        Write::Set {
            collection: self.collection.clone(),
            id: self.id.clone(),
            data: into_fields(data),
        }
    }

    fn update_write(&self, fields: Value) -> Write {
        Write::Update {
            collection: self.collection.clone(),
            id: self.id.clone(),
            fields: into_fields(fields),
        }
    }

    fn delete_write(&self) -> Write {
        Write::Delete {
            collection: self.collection.clone(),
            id: self.id.clone(),
        }
    }
}

impl DocumentRef for MemoryDocument {
    fn parent(&self) -> String {
        self.collection.clone()
    }

    fn listen(
        &self,
        options: ListenOptions,
        on_next: SnapshotHandler<DocumentSnapshot>,
        on_error: ErrorHandler,
    ) -> Unsubscribe {
        self.db
            .listen_document(&self.collection, &self.id, options, on_next, on_error)
    }
}

impl SnapshotSource for MemoryDocument {
    fn shape(&self) -> SourceShape<'_> {
        SourceShape::Document(self)
    }
}

/// Writes applied together, notifying listeners once.
pub struct WriteBatch {
    db: MemoryFirestore,
    writes: Vec<Write>,
}

impl WriteBatch {
    pub fn set(&mut self, doc: &MemoryDocument, data: Value) -> &mut Self {
        self.writes.push(doc.set_write(data));
        self
    }

    pub fn update(&mut self, doc: &MemoryDocument, fields: Value) -> &mut Self {
        self.writes.push(doc.update_write(fields));
        self
    }

    pub fn delete(&mut self, doc: &MemoryDocument) -> &mut Self {
        self.writes.push(doc.delete_write());
        self
    }

    pub fn len(&self) -> usize {
        self.writes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.writes.is_empty()
    }

    /// Apply every write, or none if one of them fails.
    pub fn commit(self) -> Result<(), RemoteError> {
        self.db.apply(self.writes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::MetadataChanges;
    use serde_json::json;

    type Log = Arc<Mutex<Vec<QuerySnapshot>>>;

    fn listen(query: &dyn QueryRef, metadata: MetadataChanges) -> (Log, Unsubscribe) {
        let log: Log = Arc::new(Mutex::new(Vec::new()));
        let sink = log.clone();
        let unsubscribe = query.listen(
            ListenOptions::new(metadata),
            Arc::new(move |snapshot: QuerySnapshot| sink.lock().push(snapshot)),
            Arc::new(|_: RemoteError| {}),
        );
        (log, unsubscribe)
    }

    fn ids(docs: &[DocumentSnapshot]) -> Vec<&str> {
        docs.iter().map(|doc| doc.id.as_str()).collect()
    }

    /// Replay `changes` the way a mirror would.
    fn replay(mirror: &mut Vec<String>, changes: &[DocumentChange]) {
        for change in changes {
            match change {
                DocumentChange::Added { doc, new_index } => {
                    mirror.insert(*new_index, doc.id.clone())
                }
                DocumentChange::Modified {
                    old_index,
                    new_index,
                    ..
                } => {
                    let id = mirror.remove(*old_index);
                    mirror.insert(*new_index, id);
                }
                DocumentChange::Removed { old_index, .. } => {
                    mirror.remove(*old_index);
                }
            }
        }
    }

    #[test]
    fn test_initial_listen_reports_everything_added() {
        let db = MemoryFirestore::new();
        let items = db.collection("items");
        items.doc("b").set(json!({ "n": 2 })).unwrap();
        items.doc("a").set(json!({ "n": 1 })).unwrap();

        let (log, _unsubscribe) = listen(&items, MetadataChanges::Exclude);
        assert_eq!(db.flush(), 1);

        let log = log.lock();
        assert_eq!(ids(&log[0].docs), vec!["a", "b"]);
        assert_eq!(log[0].changes.len(), 2);
    }

    #[test]
    fn test_ordered_query_reports_moves() {
        let db = MemoryFirestore::new();
        let items = db.collection("items");
        for (id, n) in [("first", 1), ("second", 2), ("third", 3)] {
            items.doc(id).set(json!({ "n": n })).unwrap();
        }
        let query = items.order_by("n", Direction::Descending);
        let (log, _unsubscribe) = listen(&query, MetadataChanges::Exclude);
        db.flush();

        items.doc("first").update(json!({ "n": 4 })).unwrap();
        db.flush();

        let log = log.lock();
        assert_eq!(ids(&log[0].docs), vec!["third", "second", "first"]);
        assert_eq!(
            log[1].changes,
            vec![DocumentChange::Modified {
                doc: snapshot(
                    "items",
                    "first",
                    json!({ "n": 4 }).as_object().cloned(),
                    SnapshotMetadata::default()
                ),
                old_index: 2,
                new_index: 0,
            }]
        );
    }

    #[test]
    fn test_limit_moves_documents_in_and_out() {
        let db = MemoryFirestore::new();
        let items = db.collection("items");
        for n in 0..4 {
            items.doc(format!("d{}", n)).set(json!({ "n": n })).unwrap();
        }
        let query = items.order_by("n", Direction::Ascending).limit(2);
        let (log, _unsubscribe) = listen(&query, MetadataChanges::Exclude);
        db.flush();

        items.doc("d3").update(json!({ "n": -1 })).unwrap();
        db.flush();

        let log = log.lock();
        let mut mirror: Vec<String> = Vec::new();
        for snapshot in log.iter() {
            replay(&mut mirror, &snapshot.changes);
        }
        assert_eq!(mirror, vec!["d3", "d0"]);
        assert!(matches!(log[1].changes[0], DocumentChange::Removed { old_index: 1, .. }));
    }

    #[test]
    fn test_filters_and_batches() {
        let db = MemoryFirestore::new();
        let items = db.collection("items");
        let query = items.where_field("done", FieldOp::Equal, false);
        let (log, _unsubscribe) = listen(&query, MetadataChanges::Exclude);

        let mut batch = db.batch();
        batch
            .set(&items.doc("a"), json!({ "done": false }))
            .set(&items.doc("b"), json!({ "done": true }))
            .set(&items.doc("c"), json!({ "done": false }));
        assert_eq!(batch.len(), 3);
        batch.commit().unwrap();
        db.flush();

        let log = log.lock();
        assert_eq!(log.len(), 2);
        assert_eq!(ids(&log[1].docs), vec!["a", "c"]);
        assert_eq!(query.results().len(), 2);
    }

    #[test]
    fn test_failed_batch_applies_nothing() {
        let db = MemoryFirestore::new();
        let items = db.collection("items");

        let mut batch = db.batch();
        batch
            .set(&items.doc("a"), json!({ "n": 1 }))
            .update(&items.doc("missing"), json!({ "n": 2 }));

        assert!(batch.commit().is_err());
        assert!(items.doc("a").data().is_none());
    }

    #[test]
    fn test_metadata_only_changes_respect_listen_options() {
        let db = MemoryFirestore::new();
        let items = db.collection("items");
        items.add(json!({ "n": 1 })).unwrap();

        let (included, _a) = listen(&items, MetadataChanges::Include);
        let (excluded, _b) = listen(&items, MetadataChanges::Exclude);
        db.flush();

        db.touch_metadata(true);
        db.flush();

        assert_eq!(included.lock().len(), 2);
        assert!(included.lock()[1].metadata.from_cache);
        assert!(included.lock()[1].changes.is_empty());
        assert_eq!(excluded.lock().len(), 1);
    }

    #[test]
    fn test_unsubscribe_stops_pending_and_future_deliveries() {
        let db = MemoryFirestore::new();
        let items = db.collection("items");
        let (log, unsubscribe) = listen(&items, MetadataChanges::Exclude);
        assert_eq!(db.listener_count(), 1);

        unsubscribe.call();
        items.add(json!({ "n": 1 })).unwrap();
        db.flush();

        assert!(log.lock().is_empty());
        assert_eq!(db.listener_count(), 0);
    }

    #[test]
    fn test_denied_collection_errors() {
        let db = MemoryFirestore::new();
        let items = db.collection("items");
        let errors = Arc::new(Mutex::new(Vec::new()));
        let sink = errors.clone();
        let _unsubscribe = items.listen(
            ListenOptions::new(MetadataChanges::Exclude),
            Arc::new(|_: QuerySnapshot| {}),
            Arc::new(move |err: RemoteError| sink.lock().push(err)),
        );

        db.deny_access("items");
        db.flush();

        assert_eq!(errors.lock().len(), 1);
        assert!(matches!(errors.lock()[0], RemoteError::PermissionDenied(_)));
        assert!(items.add(json!({})).is_err());
        assert_eq!(db.listener_count(), 0);
    }

    #[test]
    fn test_document_listener_sees_lifecycle() {
        let db = MemoryFirestore::new();
        let doc = db.doc("settings", "main");
        let log = Arc::new(Mutex::new(Vec::new()));
        let sink = log.clone();
        let _unsubscribe = doc.listen(
            ListenOptions::new(MetadataChanges::Exclude),
            Arc::new(move |snapshot: DocumentSnapshot| sink.lock().push(snapshot.exists())),
            Arc::new(|_: RemoteError| {}),
        );

        doc.set(json!({ "theme": "dark" })).unwrap();
        doc.set(json!({ "theme": "dark" })).unwrap();
        doc.delete().unwrap();
        db.flush();

        assert_eq!(*log.lock(), vec![false, true, false]);
        assert_eq!(doc.parent(), "settings");
        assert_eq!(doc.path(), "settings/main");
    }
}
