//! Integration tests for remote-to-store bindings.
//!
//! Tests cover:
//! - Query bindings following inserts, removals and reorders
//! - Documents entering and leaving a filtered range
//! - Document and keyed-event bindings into object slots
//! - Keyed-event array bindings resolving positions from sibling keys
//! - Ready resolution, rebinding and teardown
//! - Initial array commits in immediate and deferred modes
//! - Remote failures reaching the binding's callbacks

use rsm_core::{Mutation, MutationKind, Slot, State, ID_FIELD, KEY_FIELD, PATH_FIELD};
use rsm_sdk::{
    BindError, BindOptions, Direction, EventType, FieldOp, MemoryDatabase, MemoryFirestore,
    MetadataChanges, MirrorClient, Ready, ReadyValue, RemoteError, Store,
};
use serde_json::json;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio_test::{assert_pending, assert_ready_ok, task};

fn array_store(key: &str) -> Arc<Store> {
    Arc::new(Store::new(State::new().with(key, Slot::Array(Vec::new()))))
}

fn object_store(key: &str) -> Arc<Store> {
    Arc::new(Store::new(State::new().with(key, Slot::Null)))
}

/// Identities of the mirrored array at `key`.
fn identities(store: &Store, key: &str, field: &str) -> Vec<String> {
    store
        .slot(key)
        .and_then(|slot| slot.as_array().map(|records| records.to_vec()))
        .unwrap_or_default()
        .iter()
        .filter_map(|record| record.get(field).and_then(|v| v.as_str()).map(str::to_string))
        .collect()
}

fn drain(audit: &mut broadcast::Receiver<Mutation>) -> Vec<MutationKind> {
    let mut kinds = Vec::new();
    while let Ok(mutation) = audit.try_recv() {
        kinds.push(mutation.kind());
    }
    kinds
}

#[tokio::test]
async fn test_query_binding_follows_remote_order() {
    let remote = MemoryFirestore::new();
    let tasks = remote.collection("tasks");
    tasks.doc("first").set(json!({ "rank": 1 })).unwrap();
    tasks.doc("second").set(json!({ "rank": 2 })).unwrap();
    tasks.doc("third").set(json!({ "rank": 3 })).unwrap();

    let client = MirrorClient::default();
    let store = array_store("tasks");
    let query = tasks.order_by("rank", Direction::Ascending);
    let ready = client
        .context(&store)
        .bind_snapshot("tasks", &query, MetadataChanges::Exclude, BindOptions::default())
        .unwrap();

    let mut ready = task::spawn(ready);
    assert_pending!(ready.poll());

    remote.flush();
    assert!(ready.is_woken());
    match assert_ready_ok!(ready.poll()) {
        ReadyValue::Query(snapshot) => assert_eq!(snapshot.len(), 3),
        other => panic!("unexpected ready value: {:?}", other),
    }
    assert_eq!(identities(&store, "tasks", ID_FIELD), vec!["first", "second", "third"]);

    let mut audit = store.subscribe();
    tasks.doc("third").update(json!({ "rank": 0 })).unwrap();
    remote.flush();

    assert_eq!(
        drain(&mut audit),
        vec![MutationKind::ArrayReplace, MutationKind::ArrayMove]
    );
    assert_eq!(identities(&store, "tasks", ID_FIELD), vec!["third", "first", "second"]);
}

#[tokio::test]
async fn test_modification_in_place_does_not_move() {
    let remote = MemoryFirestore::new();
    let tasks = remote.collection("tasks");
    tasks.doc("a").set(json!({ "rank": 1, "title": "draft" })).unwrap();
    tasks.doc("b").set(json!({ "rank": 2, "title": "review" })).unwrap();

    let client = MirrorClient::default();
    let store = array_store("tasks");
    let ready = client
        .context(&store)
        .bind_snapshot(
            "tasks",
            &tasks.order_by("rank", Direction::Ascending),
            MetadataChanges::Exclude,
            BindOptions::default(),
        )
        .unwrap();
    remote.flush();
    ready.await.unwrap();

    let mut audit = store.subscribe();
    tasks.doc("a").update(json!({ "title": "final" })).unwrap();
    remote.flush();

    assert_eq!(drain(&mut audit), vec![MutationKind::ArrayReplace]);
    let slot = store.slot("tasks").unwrap();
    assert_eq!(slot.as_array().unwrap()[0].get("title"), Some(&json!("final")));
}

#[tokio::test]
async fn test_removal_and_addition() {
    let remote = MemoryFirestore::new();
    let notes = remote.collection("notes");
    for id in ["a", "b", "c"] {
        notes.doc(id).set(json!({ "body": id })).unwrap();
    }

    let client = MirrorClient::default();
    let store = array_store("notes");
    let ready = client
        .context(&store)
        .bind_snapshot("notes", &notes, MetadataChanges::Exclude, BindOptions::default())
        .unwrap();
    remote.flush();
    ready.await.unwrap();

    notes.doc("b").delete().unwrap();
    notes.doc("d").set(json!({ "body": "d" })).unwrap();
    remote.flush();

    assert_eq!(identities(&store, "notes", ID_FIELD), vec!["a", "c", "d"]);
}

#[tokio::test]
async fn test_deferred_mode_applies_additions_after_fetch() {
    let remote = MemoryFirestore::new();
    let items = remote.collection("items");

    let client = MirrorClient::default();
    let store = array_store("items");
    let ready = client
        .context(&store)
        .bind_snapshot(
            "items",
            &items.order_by("index", Direction::Ascending),
            MetadataChanges::Exclude,
            BindOptions::builder().wait(true).build(),
        )
        .unwrap();

    items.doc("x").set(json!({ "index": 0 })).unwrap();
    items.doc("y").set(json!({ "index": 1 })).unwrap();
    assert_eq!(store.slot("items"), Some(Slot::Array(Vec::new())));

    remote.flush();
    ready.await.unwrap();

    let slot = store.slot("items").unwrap();
    let values: Vec<_> = slot
        .as_array()
        .unwrap()
        .iter()
        .map(|record| record.clone().into_value())
        .collect();
    assert_eq!(
        values,
        vec![
            json!({ ".id": "x", "index": 0 }),
            json!({ ".id": "y", "index": 1 }),
        ]
    );
}

#[tokio::test]
async fn test_deferred_mode_initializes_once_before_changes() {
    let remote = MemoryFirestore::new();
    let items = remote.collection("items");
    items.doc("a").set(json!({ "index": 0 })).unwrap();

    let client = MirrorClient::default();
    let store = array_store("items");
    let mut audit = store.subscribe();
    let ready = client
        .context(&store)
        .bind_snapshot(
            "items",
            &items.order_by("index", Direction::Ascending),
            MetadataChanges::Exclude,
            BindOptions::builder().wait(true).build(),
        )
        .unwrap();
    assert!(drain(&mut audit).is_empty());

    items.doc("b").set(json!({ "index": 1 })).unwrap();
    remote.flush();
    ready.await.unwrap();

    items.doc("c").set(json!({ "index": 2 })).unwrap();
    remote.flush();

    assert_eq!(
        drain(&mut audit),
        vec![
            MutationKind::InitArray,
            MutationKind::ArrayInsert,
            MutationKind::ArrayInsert,
        ]
    );
    assert_eq!(identities(&store, "items", ID_FIELD), vec!["a", "b", "c"]);
}

#[tokio::test]
async fn test_immediate_mode_initializes_empty_on_bind() {
    let remote = MemoryFirestore::new();
    let items = remote.collection("items");
    items.doc("a").set(json!({ "index": 0 })).unwrap();
    items.doc("b").set(json!({ "index": 1 })).unwrap();

    let client = MirrorClient::default();
    let store = array_store("items");
    let mut audit = store.subscribe();
    let ready = client
        .context(&store)
        .bind_snapshot(
            "items",
            &items.order_by("index", Direction::Ascending),
            MetadataChanges::Exclude,
            BindOptions::builder().wait(false).build(),
        )
        .unwrap();

    match audit.try_recv().unwrap() {
        Mutation::InitArray { key, value } => {
            assert_eq!(key, "items");
            assert!(value.is_empty());
        }
        other => panic!("expected an initial array, got {:?}", other),
    }
    assert!(drain(&mut audit).is_empty());

    remote.flush();
    ready.await.unwrap();

    assert_eq!(
        drain(&mut audit),
        vec![MutationKind::ArrayInsert, MutationKind::ArrayInsert]
    );
    assert_eq!(identities(&store, "items", ID_FIELD), vec!["a", "b"]);
}

#[tokio::test]
async fn test_query_on_ready_fires_once_across_batches() {
    let remote = MemoryFirestore::new();
    let items = remote.collection("items");
    items.doc("a").set(json!({ "n": 1 })).unwrap();

    let ready_calls = Arc::new(AtomicUsize::new(0));
    let client = MirrorClient::default();
    let store = array_store("items");
    let ready = client
        .context(&store)
        .bind_snapshot(
            "items",
            &items,
            MetadataChanges::Exclude,
            BindOptions::builder()
                .on_ready({
                    let ready_calls = ready_calls.clone();
                    move |_| {
                        ready_calls.fetch_add(1, Ordering::SeqCst);
                    }
                })
                .build(),
        )
        .unwrap();

    remote.flush();
    for n in 2..5 {
        items.doc("a").update(json!({ "n": n })).unwrap();
        items.doc(format!("d{}", n)).set(json!({ "n": n })).unwrap();
        remote.flush();
    }

    ready.await.unwrap();
    assert_eq!(ready_calls.load(Ordering::SeqCst), 1);
    assert_eq!(identities(&store, "items", ID_FIELD).len(), 4);
}

#[tokio::test]
async fn test_rebinding_from_on_ready_keeps_first_ready() {
    let remote = MemoryFirestore::new();
    remote.collection("drafts").doc("d1").set(json!({})).unwrap();
    remote.collection("posts").doc("p1").set(json!({})).unwrap();

    let client = MirrorClient::default();
    let store = array_store("items");
    let context = Arc::new(client.context(&store));
    let ready_calls = Arc::new(AtomicUsize::new(0));
    let rebound = Arc::new(parking_lot::Mutex::new(None::<Ready>));

    let drafts = context
        .bind_snapshot(
            "items",
            &remote.collection("drafts"),
            MetadataChanges::Exclude,
            BindOptions::builder()
                .on_ready({
                    let context = context.clone();
                    let posts = remote.collection("posts");
                    let ready_calls = ready_calls.clone();
                    let rebound = rebound.clone();
                    move |_| {
                        ready_calls.fetch_add(1, Ordering::SeqCst);
                        let ready = context
                            .bind_snapshot(
                                "items",
                                &posts,
                                MetadataChanges::Exclude,
                                BindOptions::default(),
                            )
                            .unwrap();
                        *rebound.lock() = Some(ready);
                    }
                })
                .build(),
        )
        .unwrap();

    remote.flush();

    match drafts.await.unwrap() {
        ReadyValue::Query(snapshot) => assert_eq!(snapshot.len(), 1),
        other => panic!("unexpected ready value: {:?}", other),
    }
    assert_eq!(ready_calls.load(Ordering::SeqCst), 1);
    let posts = rebound.lock().take().unwrap();
    posts.await.unwrap();
    assert_eq!(identities(&store, "items", ID_FIELD), vec!["p1"]);
    assert_eq!(remote.listener_count(), 1);
}

#[test]
fn test_documents_entering_and_leaving_range() {
    let remote = MemoryFirestore::new();
    let items = remote.collection("items");
    items.doc("a").set(json!({ "n": 1 })).unwrap();
    items.doc("b").set(json!({ "n": 2 })).unwrap();
    items.doc("c").set(json!({ "n": 3 })).unwrap();

    let client = MirrorClient::default();
    let store = array_store("items");
    let query = items
        .where_field("n", FieldOp::GreaterOrEqual, 2)
        .order_by("n", Direction::Ascending);
    let _ready = client
        .context(&store)
        .bind_snapshot("items", &query, MetadataChanges::Exclude, BindOptions::default())
        .unwrap();
    remote.flush();
    assert_eq!(identities(&store, "items", ID_FIELD), vec!["b", "c"]);

    items.doc("a").update(json!({ "n": 5 })).unwrap();
    remote.flush();
    assert_eq!(identities(&store, "items", ID_FIELD), vec!["b", "c", "a"]);

    items.doc("b").update(json!({ "n": 0 })).unwrap();
    remote.flush();
    assert_eq!(identities(&store, "items", ID_FIELD), vec!["c", "a"]);

    let mut batch = remote.batch();
    batch.delete(&items.doc("c")).set(&items.doc("e"), json!({ "n": 4 }));
    batch.commit().unwrap();
    remote.flush();
    assert_eq!(identities(&store, "items", ID_FIELD), vec!["e", "a"]);
    assert_eq!(
        identities(&store, "items", ID_FIELD),
        query.results().into_iter().map(|doc| doc.id).collect::<Vec<_>>()
    );
}

#[tokio::test]
async fn test_document_binding_into_object_slot() {
    let remote = MemoryFirestore::new();
    let theme = remote.doc("settings", "theme");
    theme.set(json!({ "mode": "dark" })).unwrap();

    let client = MirrorClient::default();
    let store = object_store("theme");
    let options = BindOptions::builder().include_path(true).build();
    let ready = client
        .context(&store)
        .bind_snapshot("theme", &theme, MetadataChanges::Exclude, options)
        .unwrap();
    remote.flush();

    match ready.await.unwrap() {
        ReadyValue::Document(doc) => assert_eq!(doc.id, "theme"),
        other => panic!("unexpected ready value: {:?}", other),
    }
    let slot = store.slot("theme").unwrap();
    let record = slot.as_object().unwrap();
    assert_eq!(record.get("mode"), Some(&json!("dark")));
    assert_eq!(record.get(ID_FIELD), Some(&json!("theme")));
    assert_eq!(record.get(PATH_FIELD), Some(&json!("settings/theme")));

    theme.delete().unwrap();
    remote.flush();
    let slot = store.slot("theme").unwrap();
    let record = slot.as_object().unwrap();
    assert_eq!(record.get("mode"), None);
    assert_eq!(record.get(ID_FIELD), Some(&json!("theme")));
}

#[test]
fn test_metadata_changes_follow_listen_option() {
    let remote = MemoryFirestore::new();
    let profile = remote.doc("users", "ann");
    profile.set(json!({ "name": "Ann" })).unwrap();

    let client = MirrorClient::default();
    let watching = object_store("profile");
    let ignoring = object_store("profile");
    let _a = client
        .context(&watching)
        .bind_snapshot("profile", &profile, MetadataChanges::Include, BindOptions::default())
        .unwrap();
    let _b = client
        .context(&ignoring)
        .bind_snapshot("profile", &profile, MetadataChanges::Exclude, BindOptions::default())
        .unwrap();
    remote.flush();

    let mut watching_audit = watching.subscribe();
    let mut ignoring_audit = ignoring.subscribe();
    remote.touch_metadata(true);
    remote.flush();

    assert_eq!(drain(&mut watching_audit), vec![MutationKind::SetObject]);
    assert!(drain(&mut ignoring_audit).is_empty());
}

#[test]
fn test_undeclared_key_subscribes_nothing() {
    let remote = MemoryFirestore::new();
    let client = MirrorClient::default();
    let store = array_store("items");

    let result = client.context(&store).bind_snapshot(
        "missing",
        &remote.collection("items"),
        MetadataChanges::Exclude,
        BindOptions::default(),
    );

    assert!(matches!(result, Err(BindError::UndeclaredKey(key)) if key == "missing"));
    assert_eq!(remote.listener_count(), 0);
    assert_eq!(remote.pending(), 0);
}

#[tokio::test]
async fn test_rebinding_replaces_previous_binding() {
    let remote = MemoryFirestore::new();
    remote.collection("drafts").doc("d1").set(json!({})).unwrap();
    remote.collection("posts").doc("p1").set(json!({})).unwrap();

    let client = MirrorClient::default();
    let store = array_store("items");
    let context = client.context(&store);
    let drafts = context
        .bind_snapshot(
            "items",
            &remote.collection("drafts"),
            MetadataChanges::Exclude,
            BindOptions::default(),
        )
        .unwrap();
    let posts = context
        .bind_snapshot(
            "items",
            &remote.collection("posts"),
            MetadataChanges::Exclude,
            BindOptions::default(),
        )
        .unwrap();
    assert_eq!(remote.listener_count(), 1);

    remote.flush();
    assert!(matches!(drafts.await, Err(BindError::Unbound(key)) if key == "items"));
    posts.await.unwrap();
    assert_eq!(identities(&store, "items", ID_FIELD), vec!["p1"]);

    remote.collection("drafts").doc("d2").set(json!({})).unwrap();
    remote.flush();
    assert_eq!(identities(&store, "items", ID_FIELD), vec!["p1"]);

    assert!(context.unbind("items"));
    assert!(!context.unbind("items"));
    assert!(!context.unbind("never-bound"));
    assert_eq!(remote.listener_count(), 0);
}

#[tokio::test]
async fn test_permission_denied_reaches_callbacks() {
    let remote = MemoryFirestore::new();
    remote.deny_access("secrets");

    let errors = Arc::new(AtomicUsize::new(0));
    let counter = errors.clone();
    let options = BindOptions::builder()
        .on_error(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        })
        .build();

    let client = MirrorClient::default();
    let store = object_store("secret");
    let ready = client
        .context(&store)
        .bind_snapshot(
            "secret",
            &remote.doc("secrets", "s1"),
            MetadataChanges::Exclude,
            options,
        )
        .unwrap();
    remote.flush();

    assert!(matches!(
        ready.await,
        Err(BindError::Remote(RemoteError::PermissionDenied(_)))
    ));
    assert_eq!(errors.load(Ordering::SeqCst), 1);
    assert_eq!(store.slot("secret"), Some(Slot::Null));
}

#[test]
fn test_access_revoked_after_ready_stops_mirroring() {
    let remote = MemoryFirestore::new();
    remote.collection("feed").doc("a").set(json!({})).unwrap();

    let errors = Arc::new(AtomicUsize::new(0));
    let counter = errors.clone();
    let options = BindOptions::builder()
        .on_error(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        })
        .build();

    let client = MirrorClient::default();
    let store = array_store("feed");
    let _ready = client
        .context(&store)
        .bind_snapshot("feed", &remote.collection("feed"), MetadataChanges::Exclude, options)
        .unwrap();
    remote.flush();
    assert_eq!(identities(&store, "feed", ID_FIELD), vec!["a"]);

    remote.deny_access("feed");
    remote.flush();

    assert_eq!(errors.load(Ordering::SeqCst), 1);
    assert_eq!(remote.listener_count(), 0);
    assert_eq!(identities(&store, "feed", ID_FIELD), vec!["a"]);
}

#[test]
fn test_event_binding_orders_by_child() {
    let database = MemoryDatabase::new();
    let scores = database.reference("scores");
    scores.child("ann").set(json!({ "points": 10 })).unwrap();
    scores.child("bob").set(json!({ "points": 5 })).unwrap();

    let client = MirrorClient::default();
    let store = array_store("scores");
    let ordered = scores.clone().order_by_child("points");
    client
        .context(&store)
        .bind_events("scores", Arc::new(ordered.clone()), BindOptions::default())
        .unwrap();
    database.flush();
    assert_eq!(identities(&store, "scores", KEY_FIELD), vec!["bob", "ann"]);

    scores.child("cid").set(json!({ "points": 7 })).unwrap();
    database.flush();
    assert_eq!(identities(&store, "scores", KEY_FIELD), vec!["bob", "cid", "ann"]);

    scores.child("bob").update(json!({ "points": 11 })).unwrap();
    database.flush();
    assert_eq!(identities(&store, "scores", KEY_FIELD), vec!["cid", "ann", "bob"]);

    scores.child("ann").remove().unwrap();
    database.flush();
    assert_eq!(identities(&store, "scores", KEY_FIELD), vec!["cid", "bob"]);
    assert_eq!(identities(&store, "scores", KEY_FIELD), ordered.ordered_keys());

    let slot = store.slot("scores").unwrap();
    assert_eq!(slot.as_array().unwrap()[1].get("points"), Some(&json!(11)));
}

#[test]
fn test_event_binding_reverses_order() {
    let database = MemoryDatabase::new();
    let list = database.reference("list");
    for (key, position) in [("a", 1), ("b", 2), ("c", 3)] {
        list.child(key).set(json!({ "position": position })).unwrap();
    }

    let client = MirrorClient::default();
    let store = array_store("list");
    let ordered = list.clone().order_by_child("position");
    client
        .context(&store)
        .bind_events("list", Arc::new(ordered), BindOptions::default())
        .unwrap();
    database.flush();

    list.child("c").update(json!({ "position": 0 })).unwrap();
    database.flush();
    assert_eq!(identities(&store, "list", KEY_FIELD), vec!["c", "a", "b"]);

    list.child("a").update(json!({ "position": 4 })).unwrap();
    database.flush();
    assert_eq!(identities(&store, "list", KEY_FIELD), vec!["c", "b", "a"]);
}

#[test]
fn test_event_binding_into_object_slot() {
    let database = MemoryDatabase::new();
    let profile = database.reference("users/ann");
    profile.set(json!({ "name": "Ann" })).unwrap();

    let ready_calls = Arc::new(AtomicUsize::new(0));
    let counter = ready_calls.clone();
    let options = BindOptions::builder()
        .on_ready(move |value| {
            if let ReadyValue::Data(snapshot) = value {
                assert_eq!(snapshot.key(), Some("ann"));
                counter.fetch_add(1, Ordering::SeqCst);
            }
        })
        .build();

    let client = MirrorClient::default();
    let store = object_store("profile");
    client
        .context(&store)
        .bind_events("profile", Arc::new(profile.clone()), options)
        .unwrap();
    database.flush();

    let slot = store.slot("profile").unwrap();
    let record = slot.as_object().unwrap();
    assert_eq!(record.get("name"), Some(&json!("Ann")));
    assert_eq!(record.get(KEY_FIELD), Some(&json!("ann")));
    assert_eq!(ready_calls.load(Ordering::SeqCst), 1);

    profile.set(json!("gone")).unwrap();
    database.flush();
    let slot = store.slot("profile").unwrap();
    assert_eq!(slot.as_object().unwrap().get(".value"), Some(&json!("gone")));
    assert_eq!(ready_calls.load(Ordering::SeqCst), 1);
}

#[test]
fn test_event_binding_cancelled_by_remote() {
    let database = MemoryDatabase::new();
    let feed = database.reference("feed");
    feed.push(json!({ "text": "hello" })).unwrap();

    let cancels = Arc::new(AtomicUsize::new(0));
    let counter = cancels.clone();
    let options = BindOptions::builder()
        .on_cancel(move |err| {
            assert!(matches!(err, RemoteError::PermissionDenied(_)));
            counter.fetch_add(1, Ordering::SeqCst);
        })
        .build();

    let client = MirrorClient::default();
    let store = array_store("feed");
    let context = client.context(&store);
    context.bind_events("feed", Arc::new(feed.clone()), options).unwrap();
    database.flush();
    assert_eq!(identities(&store, "feed", KEY_FIELD).len(), 1);

    database.deny_access("feed");
    database.flush();

    // One cancellation per child listener.
    assert_eq!(cancels.load(Ordering::SeqCst), EventType::CHILD_EVENTS.len());
    assert_eq!(database.listener_count(), 0);
    assert!(context.unbind("feed"));
}

#[test]
fn test_unbind_removes_every_listener() {
    let database = MemoryDatabase::new();
    let client = MirrorClient::default();
    let store = array_store("items");
    let context = client.context(&store);

    context
        .bind_events("items", Arc::new(database.reference("items")), BindOptions::default())
        .unwrap();
    database.flush();
    assert_eq!(database.listener_count(), EventType::CHILD_EVENTS.len());

    assert!(context.unbind("items"));
    assert_eq!(database.listener_count(), 0);

    database.reference("items").push(json!({ "late": true })).unwrap();
    database.flush();
    assert!(identities(&store, "items", KEY_FIELD).is_empty());
}

#[test]
fn test_dropped_dispatcher_releases_bindings() {
    let remote = MemoryFirestore::new();
    let client = MirrorClient::default();

    {
        let store = array_store("items");
        let _ready = client
            .context(&store)
            .bind_snapshot(
                "items",
                &remote.collection("items"),
                MetadataChanges::Exclude,
                BindOptions::default(),
            )
            .unwrap();
        remote.flush();
        assert_eq!(client.registry().namespace_count(), 1);
    }

    remote.collection("items").doc("late").set(json!({})).unwrap();
    remote.flush();

    assert_eq!(client.registry().namespace_count(), 0);
    assert_eq!(remote.listener_count(), 0);
}
