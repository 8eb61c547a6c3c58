//! End-to-end collection sync scenarios against in-process doubles.

use chrono::{TimeZone, Utc};
use clap::Parser;
use mongodb::bson::doc;

use checkpoint::{CheckpointStore, MemoryStore, COLLECTION_SYNC_DOMAIN};
use shoplens_analytics::config::EngineConfig;
use shoplens_analytics::sync::SyncEngine;
use shoplens_analytics::testing::{MemorySource, MemoryWarehouse, UnreachableCheckpointStore};
use shoplens_analytics::value::RowValue;

fn config() -> EngineConfig {
    EngineConfig::parse_from(["test"])
}

fn user(id: &str, email: &str, updated_at: chrono::DateTime<Utc>) -> mongodb::bson::Document {
    doc! {
        "_id": id,
        "email": email,
        "updated_at": mongodb::bson::DateTime::from_chrono(updated_at),
    }
}

#[tokio::test]
async fn first_run_performs_a_full_load() {
    let source = MemorySource::new();
    source.insert(
        "users",
        vec![
            user("u1", "a@example.com", Utc.with_ymd_and_hms(2024, 1, 1, 9, 0, 0).unwrap()),
            user("u2", "b@example.com", Utc.with_ymd_and_hms(2024, 1, 1, 11, 0, 0).unwrap()),
        ],
    );
    let warehouse = MemoryWarehouse::new();
    let checkpoints = MemoryStore::new();
    let config = config();

    let before = Utc::now();
    SyncEngine::new(&source, &warehouse, &checkpoints, &config)
        .sync_all()
        .await
        .unwrap();

    // Both users landed via plain inserts, no MERGE, no staging leftovers
    let table = warehouse.table("foundation.users").unwrap();
    assert_eq!(table.rows.len(), 2);
    assert_eq!(warehouse.merge_count(), 0);
    assert!(warehouse.staging_tables().is_empty());

    // Destination tables exist for every registered collection
    for table in ["foundation.users", "foundation.products", "foundation.scans"] {
        assert!(warehouse.table(table).is_some(), "{table} missing");
    }

    // Checkpoint was written with the run-start time
    let checkpoint = checkpoints
        .get(COLLECTION_SYNC_DOMAIN)
        .await
        .unwrap()
        .expect("checkpoint must be set after a successful run");
    assert!(checkpoint >= before);
    assert!(checkpoint <= Utc::now());
}

#[tokio::test]
async fn incremental_run_merges_only_records_updated_after_the_checkpoint() {
    let checkpoint_at = Utc.with_ymd_and_hms(2024, 1, 1, 10, 0, 0).unwrap();
    let source = MemorySource::new();
    source.insert(
        "users",
        vec![
            user("u1", "a@example.com", Utc.with_ymd_and_hms(2024, 1, 1, 9, 0, 0).unwrap()),
            user("u2", "b@example.com", Utc.with_ymd_and_hms(2024, 1, 1, 11, 0, 0).unwrap()),
        ],
    );
    let warehouse = MemoryWarehouse::new();
    let checkpoints = MemoryStore::with_checkpoint(COLLECTION_SYNC_DOMAIN, checkpoint_at);
    let config = config();

    SyncEngine::new(&source, &warehouse, &checkpoints, &config)
        .sync_all()
        .await
        .unwrap();

    // Only the 11:00 user passed the strictly-after filter; it arrived via
    // a single MERGE and the staging table was dropped afterwards
    let table = warehouse.table("foundation.users").unwrap();
    assert_eq!(table.rows.len(), 1);
    assert_eq!(
        table.rows[0].get("id"),
        Some(&RowValue::String("u2".into()))
    );
    assert_eq!(warehouse.merge_count(), 1);
    assert!(warehouse.staging_tables().is_empty());

    // The destination was never cleared in incremental mode
    assert!(!warehouse
        .statements()
        .iter()
        .any(|s| s.starts_with("DELETE FROM foundation.users")));

    // Checkpoint advanced past the seeded value
    let advanced = checkpoints
        .get(COLLECTION_SYNC_DOMAIN)
        .await
        .unwrap()
        .unwrap();
    assert!(advanced > checkpoint_at);
}

#[tokio::test]
async fn failed_job_leaves_the_checkpoint_untouched() {
    let checkpoint_at = Utc.with_ymd_and_hms(2024, 1, 1, 10, 0, 0).unwrap();
    let source = MemorySource::new();
    source.insert(
        "users",
        vec![user(
            "u1",
            "a@example.com",
            Utc.with_ymd_and_hms(2024, 1, 1, 11, 0, 0).unwrap(),
        )],
    );
    let warehouse = MemoryWarehouse::new();
    warehouse.fail_statements_containing("MERGE INTO foundation.users");
    let checkpoints = MemoryStore::with_checkpoint(COLLECTION_SYNC_DOMAIN, checkpoint_at);
    let config = config();

    let err = SyncEngine::new(&source, &warehouse, &checkpoints, &config)
        .sync_all()
        .await
        .unwrap_err();
    assert!(format!("{err:#}").contains("sync-users"));

    // The next run retries the same window
    assert_eq!(
        checkpoints.get(COLLECTION_SYNC_DOMAIN).await.unwrap(),
        Some(checkpoint_at)
    );
    // Staging was cleaned up despite the failure
    assert!(warehouse.staging_tables().is_empty());
}

#[tokio::test]
async fn failed_full_load_insert_leaves_no_checkpoint_behind() {
    let source = MemorySource::new();
    source.insert(
        "users",
        vec![user("u1", "a@example.com", Utc::now())],
    );
    let warehouse = MemoryWarehouse::new();
    warehouse.fail_inserts_into("foundation.users");
    let checkpoints = MemoryStore::new();
    let config = config();

    let err = SyncEngine::new(&source, &warehouse, &checkpoints, &config)
        .sync_all()
        .await
        .unwrap_err();
    assert!(format!("{err:#}").contains("sync-users"));

    // A failed batch write aborts the run before a checkpoint ever exists,
    // so the next run is a full load again
    assert_eq!(checkpoints.get(COLLECTION_SYNC_DOMAIN).await.unwrap(), None);
}

#[tokio::test]
async fn unreachable_checkpoint_store_aborts_before_any_work() {
    let source = MemorySource::new();
    source.insert(
        "users",
        vec![user("u1", "a@example.com", Utc::now())],
    );
    let warehouse = MemoryWarehouse::new();
    let config = config();

    let err = SyncEngine::new(&source, &warehouse, &UnreachableCheckpointStore, &config)
        .sync_all()
        .await
        .unwrap_err();

    // Failed loudly instead of falling back to a destructive full load
    assert!(format!("{err:#}").contains("Failed to read sync checkpoint"));
    assert!(warehouse.calls().is_empty());
}

#[tokio::test]
async fn full_load_paginates_the_source() {
    let source = MemorySource::new();
    let documents: Vec<_> = (0..5)
        .map(|i| user(&format!("u{i}"), &format!("u{i}@example.com"), Utc::now()))
        .collect();
    source.insert("users", documents);

    let warehouse = MemoryWarehouse::new();
    let checkpoints = MemoryStore::new();
    let mut config = config();
    config.page_size = 2;

    SyncEngine::new(&source, &warehouse, &checkpoints, &config)
        .sync_all()
        .await
        .unwrap();

    // Three pages of two, two, one; every record landed exactly once
    let table = warehouse.table("foundation.users").unwrap();
    assert_eq!(table.rows.len(), 5);
}
