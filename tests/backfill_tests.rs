//! Backfilling a missing field, through the queue and in place.

mod common;

use common::{Harness, INDEX, batched, migration, test_config};
use search_migrations::client::Script;
use search_migrations::migration::strategies::BackfillField;
use search_migrations::{Migration, MigrationError, MigrationPolicy, MigrationState, SearchClient};
use serde_json::{Map, json};

fn backfill_hidden(batch_size: usize) -> Migration {
    batched(20240105100000, "backfill_hidden_on_issues", batch_size, BackfillField::new("Issue", "hidden"))
}

#[tokio::test]
async fn test_backfill_enqueues_in_batches_then_stops() {
    let h = Harness::new();
    h.seed("issue", 3, json!({})).await;
    let migration = backfill_hidden(2);

    assert!(!h.completed(&migration).await);

    migration.migrate(&h.ctx).await.unwrap();
    assert_eq!(h.queue.total_tracked().await, 2);
    assert_eq!(h.run_pipeline(json!({ "hidden": false })).await, 2);
    assert!(!h.completed(&migration).await);
    assert_eq!(h.state(20240105100000).await.documents_remaining, Some(3));

    migration.migrate(&h.ctx).await.unwrap();
    assert_eq!(h.queue.total_tracked().await, 1);
    h.run_pipeline(json!({ "hidden": false })).await;
    assert!(h.completed(&migration).await);

    let writes_before = h.backend.call_count("update_by_query").await + h.backend.call_count("update_mapping").await;
    migration.migrate(&h.ctx).await.unwrap();
    assert_eq!(h.queue.total_tracked().await, 0);
    assert!(h.queue.batch_sizes().await.is_empty());
    assert_eq!(
        h.backend.call_count("update_by_query").await + h.backend.call_count("update_mapping").await,
        writes_before
    );
    assert_eq!(h.state(20240105100000).await.documents_remaining, Some(0));
}

#[tokio::test]
async fn test_backfill_only_touches_its_record_type() {
    let h = Harness::new();
    h.seed("issue", 2, json!({})).await;
    h.seed("note", 2, json!({})).await;
    let migration = backfill_hidden(10);

    migration.migrate(&h.ctx).await.unwrap();
    let references = h.queue.drain().await;
    assert_eq!(references.len(), 2);
    assert!(references.iter().all(|r| r.record_type == "Issue"));
}

#[tokio::test]
async fn test_backfill_converges_for_any_batch_size() {
    let one = Harness::new();
    let all = Harness::new();
    for h in [&one, &all] {
        h.seed("issue", 5, json!({})).await;
        h.seed_one("issue", 6, json!({ "hidden": true })).await;
    }

    let steps = one
        .migrate_until_completed(&backfill_hidden(1), json!({ "hidden": false }), 20)
        .await;
    assert_eq!(steps, 5);
    let steps = all
        .migrate_until_completed(&backfill_hidden(5), json!({ "hidden": false }), 20)
        .await;
    assert_eq!(steps, 1);

    assert_eq!(one.snapshot().await, all.snapshot().await);
}

#[tokio::test]
async fn test_unbatched_backfill_takes_everything_at_once() {
    let h = Harness::new();
    h.seed("issue", 250, json!({})).await;
    let migration = migration(1, "backfill_unbatched", BackfillField::new("Issue", "hidden"));

    migration.migrate(&h.ctx).await.unwrap();
    assert_eq!(h.queue.batch_sizes().await, vec![100, 100, 50]);
}

#[tokio::test]
async fn test_unbatched_backfill_page_is_capped_by_default_batch_size() {
    let h = Harness::with_config(test_config().default_batch_size(120));
    h.seed("issue", 250, json!({})).await;
    let migration = migration(1, "backfill_unbatched", BackfillField::new("Issue", "hidden"));

    migration.migrate(&h.ctx).await.unwrap();
    assert_eq!(h.queue.batch_sizes().await, vec![100, 20]);
    assert_eq!(h.state(1).await.documents_remaining, Some(250));
    assert_eq!(h.run_pipeline(json!({ "hidden": true })).await, 120);

    let steps = h
        .migrate_until_completed(&migration, json!({ "hidden": true }), 5)
        .await;
    assert_eq!(steps, 2);
}

#[tokio::test]
async fn test_backfill_adds_only_missing_mapping_properties() {
    let h = Harness::new();
    let mut properties = Map::new();
    properties.insert("title".to_string(), json!({ "type": "text" }));
    h.backend.create_index_with_properties(INDEX, properties).await;
    h.seed("issue", 1, json!({})).await;

    let strategy = BackfillField::new("Issue", "hidden")
        .with_mapping("hidden", json!({ "type": "boolean" }))
        .with_mapping("title", json!({ "type": "keyword" }));
    let migration = batched(2, "add_hidden", 10, strategy);

    migration.migrate(&h.ctx).await.unwrap();
    assert_eq!(h.backend.call_count("update_mapping").await, 1);

    let mapping = h.backend.get_mapping(INDEX).await.unwrap();
    assert_eq!(mapping["hidden"], json!({ "type": "boolean" }));
    assert_eq!(mapping["title"], json!({ "type": "text" }));

    h.run_pipeline(json!({ "hidden": false })).await;
    migration.migrate(&h.ctx).await.unwrap();
    assert_eq!(h.backend.call_count("update_mapping").await, 1);
}

#[tokio::test]
async fn test_script_backfill_updates_in_place_by_update_batch_size() {
    let h = Harness::new();
    h.seed("issue", 5, json!({})).await;
    let policy = MigrationPolicy::new(3, "backfill_hidden_in_place")
        .batched()
        .batch_size(100)
        .update_batch_size(2);
    let migration = Migration::new(
        policy,
        BackfillField::new("Issue", "hidden").with_script(Script::set_field("hidden", false)),
    );

    migration.migrate(&h.ctx).await.unwrap();
    assert_eq!(h.state(3).await.documents_remaining, Some(3));
    assert_eq!(h.queue.total_tracked().await, 0);

    migration.migrate(&h.ctx).await.unwrap();
    migration.migrate(&h.ctx).await.unwrap();
    assert!(h.completed(&migration).await);
    assert_eq!(h.backend.call_count("update_by_query").await, 3);

    let document = h.backend.get_document(INDEX, "issue_4").await.unwrap();
    assert_eq!(document.source["hidden"], json!(false));
}

#[tokio::test]
async fn test_batched_backfill_without_batch_size_is_not_implemented() {
    let h = Harness::new();
    h.seed("issue", 1, json!({})).await;
    let migration = Migration::new(
        MigrationPolicy::new(4, "no_batch_size").batched(),
        BackfillField::new("Issue", "hidden"),
    );

    let err = migration.migrate(&h.ctx).await.unwrap_err();
    assert!(matches!(err, MigrationError::NotImplemented { ref what, .. } if what == "batch_size"));
    assert_eq!(h.queue.total_tracked().await, 0);
}

#[tokio::test]
async fn test_operator_batch_size_override_wins() {
    let h = Harness::new();
    h.seed("issue", 5, json!({})).await;
    let migration = backfill_hidden(5);
    h.save_state(
        20240105100000,
        &MigrationState {
            batch_size: Some(2),
            ..Default::default()
        },
    )
    .await;

    migration.migrate(&h.ctx).await.unwrap();
    assert_eq!(h.queue.total_tracked().await, 2);
}

#[tokio::test]
async fn test_completed_twice_agrees_and_writes_nothing() {
    let h = Harness::new();
    h.seed("issue", 3, json!({})).await;
    let migration = backfill_hidden(2);

    for _ in 0..2 {
        let before = h.observe(&migration).await;
        let first = migration.completed(&h.ctx).await.unwrap();
        let second = migration.completed(&h.ctx).await.unwrap();
        assert!(!first);
        assert_eq!(first, second);
        assert_eq!(h.observe(&migration).await, before);

        migration.migrate(&h.ctx).await.unwrap();
    }
    assert_eq!(h.backend.call_count("update_by_query").await, 0);
}
