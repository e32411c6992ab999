use rsm_core::{Slot, State, ID_FIELD, KEY_FIELD};
use rsm_sdk::{
    BindOptions, Direction, MemoryDatabase, MemoryFirestore, MetadataChanges, MirrorClient,
    MirrorConfigBuilder, ReadyValue, Store,
};
use serde_json::json;
use std::sync::Arc;
use stress_test::{stress_test_batching, stress_test_events, stress_test_queries, StressResult};
use tracing::info;
use tracing_subscriber::EnvFilter;


fn main() -> StressResult<()> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("rsm=info,rsm_sdk=info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let rt = tokio::runtime::Runtime::new()?;
    rt.block_on(async_main())
}

fn print_slot(store: &Store, key: &str, identity: &str) {
    let Some(slot) = store.slot(key) else {
        return;
    };
    match &slot {
        Slot::Array(records) => {
            for (index, record) in records.iter().enumerate() {
                let id = record.get(identity).cloned().unwrap_or_default();
                println!("  [{}] {} {}", index, id, record.clone().into_value());
            }
        }
        Slot::Object(record) => println!("  {}", record.clone().into_value()),
        Slot::Null => println!("  (empty)"),
    }
}

/// Mirror an ordered task query into an array slot.
async fn demo_task_board(client: &MirrorClient) -> StressResult<()> {
    println!("\n[Demo 1/2] Task board mirrored from a document query");

    let remote = MemoryFirestore::new();
    let tasks = remote.collection("tasks");
    tasks.doc("design").set(json!({ "title": "Design schema", "priority": 2 }))?;
    tasks.doc("build").set(json!({ "title": "Build binder", "priority": 1 }))?;

    let store = client.store(State::new().with("tasks", Slot::Array(Vec::new())));
    let mut audit = store.subscribe();

    let ready = client.context(&store).bind_snapshot(
        "tasks",
        &tasks.order_by("priority", Direction::Ascending),
        MetadataChanges::Exclude,
        BindOptions::default(),
    )?;
    remote.flush();
    if let ReadyValue::Query(snapshot) = ready.await? {
        info!(results = snapshot.len(), "Task board ready");
    }

    tasks.doc("ship").set(json!({ "title": "Ship it", "priority": 3 }))?;
    tasks.doc("design").update(json!({ "priority": 0 }))?;
    tasks.doc("build").delete()?;
    remote.flush();

    print_slot(&store, "tasks", ID_FIELD);
    while let Ok(mutation) = audit.try_recv() {
        println!("  committed {}", mutation.kind());
    }
    Ok(())
}

/// Mirror a keyed leaderboard into an array slot and a profile into an object slot.
async fn demo_leaderboard(client: &MirrorClient) -> StressResult<()> {
    println!("\n[Demo 2/2] Leaderboard mirrored from keyed events");

    let database = MemoryDatabase::new();
    let scores = database.reference("scores");
    scores.child("ann").set(json!({ "points": 40 }))?;
    scores.child("bob").set(json!({ "points": 25 }))?;
    database.reference("profiles/ann").set(json!({ "name": "Ann", "team": "red" }))?;

    let store = client.store(
        State::new()
            .with("leaders", Slot::Array(Vec::new()))
            .with("profile", Slot::Null),
    );
    let context = client.context(&store);
    context.bind_events(
        "leaders",
        Arc::new(scores.clone().order_by_child("points").limit_to_first(3)),
        BindOptions::default(),
    )?;
    context.bind_events(
        "profile",
        Arc::new(database.reference("profiles/ann")),
        BindOptions::builder()
            .on_ready(|value| info!(?value, "Profile ready"))
            .build(),
    )?;
    database.flush();

    scores.child("cid").set(json!({ "points": 10 }))?;
    scores.child("ann").update(json!({ "points": 5 }))?;
    scores.push(json!({ "points": 99 }))?;
    database.flush();

    print_slot(&store, "leaders", KEY_FIELD);
    print_slot(&store, "profile", KEY_FIELD);

    context.unbind("leaders");
    context.unbind("profile");
    info!(listeners = database.listener_count(), "Bindings torn down");
    Ok(())
}

async fn async_main() -> StressResult<()> {
    let client = MirrorClient::new(MirrorConfigBuilder::new().wait(true).build());

    println!("\n╔════════════════════════════════════════════════════════════╗");
    println!("║            MIRROR DEMOS                                    ║");
    println!("╚════════════════════════════════════════════════════════════╝");
    demo_task_board(&client).await?;
    demo_leaderboard(&client).await?;

    // Run async stress tests
    println!("\n\n╔════════════════════════════════════════════════════════════╗");
    println!("║            ASYNC STRESS TESTS                              ║");
    println!("╚════════════════════════════════════════════════════════════╝");

    // Test 1: query bindings, flushing after every write
    let stats = stress_test_queries(4, 200, 1).await?;
    stats.print();

    // Test 2: keyed-event bindings, flushing after every write
    let stats = stress_test_events(4, 200, 1).await?;
    stats.print();

    // Test 3: query bindings with batched deliveries
    let stats = stress_test_queries(10, 1000, 25).await?;
    stats.print();

    // Test 4: keyed-event bindings with batched deliveries
    let stats = stress_test_events(10, 1000, 25).await?;
    stats.print();

    // Test 5: batching analysis
    stress_test_batching(256).await?;

    println!("\n✓ All stress tests completed successfully!");
    Ok(())
}
