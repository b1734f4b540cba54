#![cfg(feature = "test-utils")]

use bson::oid::ObjectId;
use bson::{Document, doc};
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use etl::destination::memory::MemoryDestination;
use etl::error::ErrorKind;
use etl::pipeline::Pipeline;
use etl::source::memory::{MemorySource, TailSession, TailSessionEnd};
use etl::state::task::TaskPhase;
use etl::test_utils::config::{test_index, test_replicator_config, test_task};
use etl::test_utils::notify::{TimedNotify, wait_for_phase};
use etl::test_utils::oplog::{
    delete_entry, insert_entry, migrated, noop_entry, update_entry,
};
use etl::transform::MappingTransformer;
use etl::types::Mutation;
use etl_config::shared::{CheckpointPhase, CheckpointTime, ReplicatorConfig, TaskConfig};
use etl_telemetry::tracing::init_test_tracing;
use serde_json::json;

const NAMESPACE: &str = "app.users";

type TestPipeline = Pipeline<MemorySource, MemoryDestination, MappingTransformer>;

fn object_id(n: u8) -> ObjectId {
    let mut bytes = [0u8; 12];
    bytes[0] = 0x5f;
    bytes[11] = n;
    ObjectId::from_bytes(bytes)
}

fn user(n: u8, name: &str) -> Document {
    doc! { "_id": object_id(n), "name": name }
}

fn users_task() -> TaskConfig {
    test_task("app", "users", "users")
}

/// A task that skips the scan and follows the change log from `from`.
fn tailing_users_task(from: DateTime<Utc>) -> TaskConfig {
    let mut task = users_task();
    task.from.phase = CheckpointPhase::Tail;
    task.from.time = Some(CheckpointTime::Millis(from.timestamp_millis()));
    task
}

fn epoch_secs(time: DateTime<Utc>) -> u32 {
    time.timestamp() as u32
}

fn create_pipeline(
    config: ReplicatorConfig,
    source: &MemorySource,
    destination: &MemoryDestination,
) -> TestPipeline {
    Pipeline::new(
        config,
        source.clone(),
        destination.clone(),
        MappingTransformer::new(),
    )
}

#[tokio::test(flavor = "multi_thread")]
async fn scan_delivers_documents_newest_first_then_tails() {
    init_test_tracing();

    let source = MemorySource::new();
    let destination = MemoryDestination::new();
    source
        .insert_documents(
            NAMESPACE,
            vec![user(1, "ada"), user(2, "grace"), user(3, "edsger")],
        )
        .await;

    let before = Utc::now();
    let mut pipeline = create_pipeline(
        test_replicator_config([("users", users_task())]),
        &source,
        &destination,
    );
    let mutations = destination.notify_on_mutations(3).await;
    pipeline.start().await.unwrap();

    TimedNotify::new(mutations).notified().await;
    let mut phases = pipeline.subscribe("users").unwrap();
    let phase =
        wait_for_phase(&mut phases, |phase| matches!(phase, TaskPhase::Tailing { .. })).await;

    let calls = destination.bulk_calls().await;
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].index, "users");
    assert_eq!(
        calls[0].mutations,
        vec![
            Mutation::create(object_id(3).to_hex(), json!({ "name": "edsger" })),
            Mutation::create(object_id(2).to_hex(), json!({ "name": "grace" })),
            Mutation::create(object_id(1).to_hex(), json!({ "name": "ada" })),
        ]
    );

    // Without a checkpoint time the tail starts where the task started.
    let TaskPhase::Tailing { resume_from, .. } = phase else {
        unreachable!()
    };
    assert!(resume_from >= before && resume_from <= Utc::now());
    assert_eq!(source.scan_calls().await[0].1.to_hex(), "ffffffffffffffffffffffff");
}

#[tokio::test(flavor = "multi_thread")]
async fn scan_resumes_below_the_checkpoint_id() {
    init_test_tracing();

    let source = MemorySource::new();
    let destination = MemoryDestination::new();
    source
        .insert_documents(
            NAMESPACE,
            vec![user(1, "ada"), user(2, "grace"), user(3, "edsger")],
        )
        .await;

    let mut task = users_task();
    task.from.id = Some(object_id(2).to_hex());
    let mut pipeline = create_pipeline(
        test_replicator_config([("users", task)]),
        &source,
        &destination,
    );
    let mutations = destination.notify_on_mutations(2).await;
    pipeline.start().await.unwrap();

    TimedNotify::new(mutations).notified().await;

    let ids: Vec<String> = destination
        .mutations()
        .await
        .into_iter()
        .map(|mutation| mutation.id)
        .collect();
    assert_eq!(ids, vec![object_id(2).to_hex(), object_id(1).to_hex()]);
}

#[tokio::test(flavor = "multi_thread")]
async fn unset_fields_are_nulled_on_the_document_from_the_selector() {
    init_test_tracing();

    let source = MemorySource::new();
    let destination = MemoryDestination::new();
    let now = Utc::now();
    source
        .push_tail_session(
            NAMESPACE,
            TailSession::new(
                vec![update_entry(
                    NAMESPACE,
                    epoch_secs(now),
                    object_id(7),
                    doc! { "$unset": { "nickname": "" } },
                )],
                TailSessionEnd::Pending,
            ),
        )
        .await;

    let mut pipeline = create_pipeline(
        test_replicator_config([("users", tailing_users_task(now))]),
        &source,
        &destination,
    );
    let mutations = destination.notify_on_mutations(1).await;
    pipeline.start().await.unwrap();

    TimedNotify::new(mutations).notified().await;

    assert_eq!(
        destination.mutations().await,
        vec![Mutation::update(object_id(7).to_hex(), json!({ "nickname": null }))]
    );
    assert!(source.scan_calls().await.is_empty());
}

#[tokio::test(flavor = "multi_thread")]
async fn migration_noop_and_foreign_entries_are_not_replicated() {
    init_test_tracing();

    let source = MemorySource::new();
    let destination = MemoryDestination::new();
    let now = Utc::now();
    let time = epoch_secs(now);
    source
        .push_tail_session(
            NAMESPACE,
            TailSession::new(
                vec![
                    migrated(insert_entry(NAMESPACE, time, user(1, "moved"))),
                    insert_entry("app.orders", time, user(2, "order")),
                    noop_entry(NAMESPACE, time),
                    insert_entry(NAMESPACE, time, user(3, "ada")),
                    delete_entry(NAMESPACE, time, object_id(4)),
                ],
                TailSessionEnd::Pending,
            ),
        )
        .await;

    let mut pipeline = create_pipeline(
        test_replicator_config([("users", tailing_users_task(now))]),
        &source,
        &destination,
    );
    let mutations = destination.notify_on_mutations(2).await;
    pipeline.start().await.unwrap();

    TimedNotify::new(mutations).notified().await;

    let calls = destination.bulk_calls().await;
    assert_eq!(calls.len(), 1);
    assert_eq!(
        calls[0].mutations,
        vec![
            Mutation::create(object_id(3).to_hex(), json!({ "name": "ada" })),
            Mutation::delete(object_id(4).to_hex()),
        ]
    );
}

#[tokio::test(flavor = "multi_thread")]
async fn rejected_bulk_is_dropped_and_replication_continues() {
    init_test_tracing();

    let source = MemorySource::new();
    let destination = MemoryDestination::new();
    source
        .insert_documents(
            NAMESPACE,
            (1..=4).map(|n| user(n, "user")).collect(),
        )
        .await;
    destination.fail_next_bulks(1).await;

    let mut config = test_replicator_config([("users", users_task())]);
    config.controls.elasticsearch_bulk_size = Some(2);
    let mut pipeline = create_pipeline(config, &source, &destination);
    let mutations = destination.notify_on_mutations(2).await;
    pipeline.start().await.unwrap();

    TimedNotify::new(mutations).notified().await;

    let failed = destination.failed_bulk_calls().await;
    assert_eq!(failed.len(), 1);
    let failed_ids: Vec<String> = failed[0].mutations.iter().map(|m| m.id.clone()).collect();
    assert_eq!(failed_ids, vec![object_id(4).to_hex(), object_id(3).to_hex()]);

    let applied_ids: Vec<String> = destination
        .mutations()
        .await
        .into_iter()
        .map(|mutation| mutation.id)
        .collect();
    assert_eq!(applied_ids, vec![object_id(2).to_hex(), object_id(1).to_hex()]);
}

#[tokio::test(flavor = "multi_thread")]
async fn scan_failure_moves_on_to_the_tail() {
    init_test_tracing();

    let source = MemorySource::new();
    let destination = MemoryDestination::new();
    source
        .insert_documents(
            NAMESPACE,
            (1..=5).map(|n| user(n, "user")).collect(),
        )
        .await;
    source.fail_scan_after(2).await;

    let mut pipeline = create_pipeline(
        test_replicator_config([("users", users_task())]),
        &source,
        &destination,
    );
    let tail_calls = source.notify_on_tail_calls(1).await;
    pipeline.start().await.unwrap();

    TimedNotify::new(tail_calls).notified().await;

    let ids: Vec<String> = destination
        .mutations()
        .await
        .into_iter()
        .map(|mutation| mutation.id)
        .collect();
    assert_eq!(ids, vec![object_id(5).to_hex(), object_id(4).to_hex()]);
    assert_eq!(source.tail_calls().await.len(), 1);
}

#[tokio::test(flavor = "multi_thread")]
async fn failed_tail_restarts_a_rewind_window_before_the_failure() {
    init_test_tracing();

    let source = MemorySource::new();
    let destination = MemoryDestination::new();
    let checkpoint = DateTime::parse_from_rfc3339("2024-01-01T00:00:00Z")
        .unwrap()
        .with_timezone(&Utc);
    source
        .push_tail_session(NAMESPACE, TailSession::new(Vec::new(), TailSessionEnd::Fail))
        .await;

    let before = Utc::now();
    let mut pipeline = create_pipeline(
        test_replicator_config([("users", tailing_users_task(checkpoint))]),
        &source,
        &destination,
    );
    let tail_calls = source.notify_on_tail_calls(2).await;
    pipeline.start().await.unwrap();

    TimedNotify::new(tail_calls).notified().await;
    let after = Utc::now();

    let calls = source.tail_calls().await;
    assert_eq!(calls[0].1, checkpoint);

    let rewind = ChronoDuration::seconds(60);
    assert!(calls[1].1 >= before - rewind);
    assert!(calls[1].1 <= after - rewind);

    let mut phases = pipeline.subscribe("users").unwrap();
    let phase = wait_for_phase(&mut phases, |phase| {
        matches!(phase, TaskPhase::Tailing { attempt: 1, .. })
    })
    .await;
    assert!(!phase.is_halted());
}

#[tokio::test(flavor = "multi_thread")]
async fn tail_recovers_after_a_failure_and_resets_its_attempts() {
    init_test_tracing();

    let source = MemorySource::new();
    let destination = MemoryDestination::new();
    let now = Utc::now();
    let time = epoch_secs(now);
    source
        .push_tail_session(NAMESPACE, TailSession::new(Vec::new(), TailSessionEnd::Fail))
        .await;
    source
        .push_tail_session(
            NAMESPACE,
            TailSession::new(
                vec![insert_entry(NAMESPACE, time, user(1, "ada"))],
                TailSessionEnd::Pending,
            ),
        )
        .await;

    let mut pipeline = create_pipeline(
        test_replicator_config([("users", tailing_users_task(now))]),
        &source,
        &destination,
    );
    let mutations = destination.notify_on_mutations(1).await;
    pipeline.start().await.unwrap();

    TimedNotify::new(mutations).notified().await;

    let mut phases = pipeline.subscribe("users").unwrap();
    let phase = wait_for_phase(&mut phases, |phase| {
        matches!(phase, TaskPhase::Tailing { last_ts: Some(_), .. })
    })
    .await;
    let TaskPhase::Tailing { attempt, .. } = phase else {
        unreachable!()
    };
    assert_eq!(attempt, 0);
    assert_eq!(source.tail_calls().await.len(), 2);
}

#[tokio::test(flavor = "multi_thread")]
async fn indices_are_created_with_the_suffix_unless_present() {
    init_test_tracing();

    let source = MemorySource::new();
    let destination = MemoryDestination::new();
    destination.add_existing_index("orders_v2").await;
    source
        .insert_documents(NAMESPACE, vec![user(1, "ada")])
        .await;

    let mut config = test_replicator_config([("users", users_task())]);
    config.elasticsearch.indices = vec![test_index("users"), test_index("orders")];
    config.controls.index_name_suffix = Some("_v2".to_string());
    let mut pipeline = create_pipeline(config, &source, &destination);
    let mutations = destination.notify_on_mutations(1).await;
    pipeline.start().await.unwrap();

    TimedNotify::new(mutations).notified().await;

    assert_eq!(destination.created_indices().await, vec!["users_v2".to_string()]);
    let mappings = destination.mappings().await;
    assert_eq!(mappings.len(), 1);
    assert_eq!(mappings[0].index, "users_v2");
    assert_eq!(destination.bulk_calls().await[0].index, "users_v2");
    assert_eq!(pipeline.config().tasks["users"].load.index, "users_v2");
}

#[tokio::test(flavor = "multi_thread")]
async fn index_setup_failure_stops_the_start() {
    init_test_tracing();

    let source = MemorySource::new();
    let destination = MemoryDestination::new();
    destination.fail_setup().await;

    let mut config = test_replicator_config([("users", users_task())]);
    config.elasticsearch.indices = vec![test_index("users")];
    let mut pipeline = create_pipeline(config, &source, &destination);

    let err = pipeline.start().await.unwrap_err();

    assert_eq!(err.kind(), ErrorKind::DestinationIndexSetupFailed);
    assert!(pipeline.task_phases().is_empty());
    assert!(source.scan_calls().await.is_empty());
    assert!(source.tail_calls().await.is_empty());
}

#[tokio::test(flavor = "multi_thread")]
async fn completed_tail_halts_only_its_own_task() {
    init_test_tracing();

    let source = MemorySource::new();
    let destination = MemoryDestination::new();
    let now = Utc::now();
    let time = epoch_secs(now);
    source
        .push_tail_session(
            NAMESPACE,
            TailSession::new(
                vec![insert_entry(NAMESPACE, time, user(1, "ada"))],
                TailSessionEnd::Complete,
            ),
        )
        .await;
    source
        .insert_documents("app.orders", vec![doc! { "_id": object_id(9), "total": 3 }])
        .await;

    let mut orders = test_task("app", "orders", "orders");
    orders.from.id = Some(object_id(9).to_hex());
    let mut pipeline = create_pipeline(
        test_replicator_config([("users", tailing_users_task(now)), ("orders", orders)]),
        &source,
        &destination,
    );
    pipeline.start().await.unwrap();

    let mut users = pipeline.subscribe("users").unwrap();
    let halted = wait_for_phase(&mut users, TaskPhase::is_halted).await;
    let expected_ts = DateTime::from_timestamp(i64::from(time), 0).unwrap();
    assert_eq!(halted, TaskPhase::Halted { last_ts: Some(expected_ts) });

    let mut orders = pipeline.subscribe("orders").unwrap();
    let phase = wait_for_phase(&mut orders, |phase| {
        matches!(phase, TaskPhase::Tailing { .. })
    })
    .await;
    assert!(!phase.is_halted());

    let orders_mutations: Vec<Mutation> = destination
        .bulk_calls()
        .await
        .into_iter()
        .filter(|call| call.index == "orders")
        .flat_map(|call| call.mutations)
        .collect();
    assert_eq!(
        orders_mutations,
        vec![Mutation::create(object_id(9).to_hex(), json!({ "total": 3 }))]
    );
    assert!(
        destination
            .mutations()
            .await
            .contains(&Mutation::create(object_id(1).to_hex(), json!({ "name": "ada" })))
    );

    let phases = pipeline.task_phases();
    assert!(phases["users"].is_halted());
    assert!(!phases["orders"].is_halted());
}

#[tokio::test(flavor = "multi_thread")]
async fn shutdown_aborts_workers_and_shuts_the_destination_down() {
    init_test_tracing();

    let source = MemorySource::new();
    let destination = MemoryDestination::new();

    let mut pipeline = create_pipeline(
        test_replicator_config([("users", users_task())]),
        &source,
        &destination,
    );
    let tail_calls = source.notify_on_tail_calls(1).await;
    pipeline.start().await.unwrap();
    TimedNotify::new(tail_calls).notified().await;

    let mut phases = pipeline.subscribe("users").unwrap();
    phases.borrow_and_update();
    pipeline.shutdown().await.unwrap();

    assert!(destination.is_shut_down().await);
    // The aborted worker drops its sender.
    assert!(tokio::time::timeout(std::time::Duration::from_secs(5), phases.changed())
        .await
        .unwrap()
        .is_err());
}
