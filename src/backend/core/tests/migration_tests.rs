//! Integration tests for realm migration orchestration.
//!
//! Tests cover:
//! - Migration-required gating before and after a run
//! - Per-realm records and re-run idempotency
//! - Failure reporting, retry of failed scripts, and blocking aborts
//! - Progress event streams

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use serde_json::json;
use tessera_core::migration::{
    progress_channel, FnMigration, MigrationOutcome, MigrationRegistry, MigrationService,
};
use tessera_core::security::RuleSet;
use tessera_core::store::{DataStore, DocFilter, InMemoryDataStore, StoreHandle};
use tessera_core::TesseraError;
use tokio_stream::StreamExt;

fn service_with(registry: Arc<MigrationRegistry>) -> (Arc<InMemoryDataStore>, MigrationService) {
    let store = Arc::new(InMemoryDataStore::new());
    let rules = RuleSet::builder().with_system_access().build();
    let service = MigrationService::new(store.clone(), rules, registry);
    (store, service)
}

fn marker(id: &'static str, order: i32) -> FnMigration {
    FnMigration::new(id, order, move |handle| async move {
        handle.insert_one("markers", id, json!({ "id": id })).await?;
        Ok(())
    })
}

// ============================================================================
// Gating
// ============================================================================

#[tokio::test]
async fn test_check_then_run_then_check() {
    let registry = MigrationRegistry::builder()
        .register(marker("m1", 1))
        .register(marker("m2", 2))
        .build();
    let (store, service) = service_with(registry);

    let err = service.check_migration_required("r1").await.unwrap_err();
    match err {
        TesseraError::MigrationRequired { realm, pending } => {
            assert_eq!(realm, "r1");
            assert_eq!(pending, vec!["m1", "m2"]);
        }
        other => panic!("unexpected error: {other}"),
    }

    let (tx, mut rx) = progress_channel(8);
    let summary = service.run_all_unrun_migrations("r1", tx).await.unwrap();
    assert_eq!(summary.applied, vec!["m1", "m2"]);

    let events: Vec<_> = [rx.next().await.unwrap(), rx.next().await.unwrap()]
        .into_iter()
        .collect();
    assert!(events.iter().all(|e| e.outcome == MigrationOutcome::Success));
    assert!(events.iter().all(|e| e.realm == "r1"));

    // Two Success records persisted in the realm's store.
    let handle = store.handle("r1").unwrap();
    let records = handle
        .find_many("migration_records", &DocFilter::new(), 0, None, None)
        .await
        .unwrap();
    assert_eq!(records.len(), 2);
    assert!(records.iter().all(|r| r["outcome"] == "success"));

    service.check_migration_required("r1").await.unwrap();
}

#[tokio::test]
async fn test_realms_migrate_independently() {
    let registry = MigrationRegistry::builder().register(marker("m1", 1)).build();
    let (_store, service) = service_with(registry);

    let (tx, _rx) = progress_channel(8);
    service.run_all_unrun_migrations("r1", tx).await.unwrap();

    service.check_migration_required("r1").await.unwrap();
    assert!(service.check_migration_required("r2").await.is_err());
}

// ============================================================================
// Idempotency and Retry
// ============================================================================

#[tokio::test]
async fn test_rerun_does_not_reapply_successes() {
    let registry = MigrationRegistry::builder().register(marker("m1", 1)).build();
    let (store, service) = service_with(registry);

    for _ in 0..2 {
        let (tx, _rx) = progress_channel(8);
        service.run_all_unrun_migrations("r1", tx).await.unwrap();
    }

    // The marker insert would have failed with a duplicate on a second
    // apply; exactly one marker proves the script ran once.
    let handle = store.handle("r1").unwrap();
    let markers = handle
        .find_many("markers", &DocFilter::new(), 0, None, None)
        .await
        .unwrap();
    assert_eq!(markers.len(), 1);
}

#[tokio::test]
async fn test_failed_script_is_retried_and_later_scripts_still_run() {
    let fail_once = Arc::new(AtomicBool::new(true));
    let flag = fail_once.clone();
    let flaky = FnMigration::new("m1", 1, move |_handle| {
        let flag = flag.clone();
        async move {
            if flag.swap(false, Ordering::SeqCst) {
                anyhow::bail!("transient store outage");
            }
            Ok(())
        }
    });
    let registry = MigrationRegistry::builder()
        .register(flaky)
        .register(marker("m2", 2))
        .build();
    let (_store, service) = service_with(registry);

    // First run: m1 fails, m2 still runs.
    let (tx, mut rx) = progress_channel(8);
    let summary = service.run_all_unrun_migrations("r1", tx).await.unwrap();
    assert_eq!(summary.failed, vec!["m1"]);
    assert_eq!(summary.applied, vec!["m2"]);
    assert!(!summary.aborted);

    let first = rx.next().await.unwrap();
    assert_eq!(first.migration_id, "m1");
    assert_eq!(first.outcome, MigrationOutcome::Failed);
    assert!(first.detail.as_deref().unwrap().contains("transient"));
    let second = rx.next().await.unwrap();
    assert_eq!(second.migration_id, "m2");
    assert_eq!(second.outcome, MigrationOutcome::Success);

    assert!(service.check_migration_required("r1").await.is_err());

    // Second run: only the failed script is retried.
    let (tx, mut rx) = progress_channel(8);
    let summary = service.run_all_unrun_migrations("r1", tx).await.unwrap();
    assert_eq!(summary.applied, vec!["m1"]);
    assert_eq!(summary.skipped, vec!["m2"]);

    let retried = rx.next().await.unwrap();
    assert_eq!(retried.migration_id, "m1");
    assert_eq!(retried.outcome, MigrationOutcome::Success);
    assert!(rx.next().await.is_none());

    service.check_migration_required("r1").await.unwrap();
}

#[tokio::test]
async fn test_concurrent_winner_record_is_not_overwritten() {
    // Simulate losing a race: while this script runs, another run of the
    // same script has already applied and recorded Success under the
    // deterministic record id. This run's script then fails.
    let racer = FnMigration::new("m1", 1, |handle| async move {
        handle
            .insert_one(
                "migration_records",
                "r1:m1",
                json!({
                    "id": "r1:m1",
                    "realm": "r1",
                    "migration_id": "m1",
                    "outcome": "success",
                    "error_detail": null,
                    "run_at": "2026-01-01T00:00:00Z",
                    "data_domain": {
                        "realm": "r1",
                        "org_ref_name": "r1",
                        "account_id": "r1",
                        "owner_id": "system",
                        "tenant_id": "r1"
                    }
                }),
            )
            .await?;
        anyhow::bail!("lost the race to a concurrent run");
    });
    let registry = MigrationRegistry::builder().register(racer).build();
    let (store, service) = service_with(registry);

    let (tx, _rx) = progress_channel(8);
    let summary = service.run_all_unrun_migrations("r1", tx).await.unwrap();
    assert_eq!(summary.failed, vec!["m1"]);

    // The loser's Failed write hit the unique-id constraint and was dropped;
    // the winner's Success record stands and the realm counts as migrated.
    let handle = store.handle("r1").unwrap();
    let records = handle
        .find_many("migration_records", &DocFilter::new(), 0, None, None)
        .await
        .unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0]["outcome"], "success");

    service.check_migration_required("r1").await.unwrap();
}

// ============================================================================
// Blocking Failures
// ============================================================================

#[tokio::test]
async fn test_blocking_failure_aborts_the_run() {
    let doomed = FnMigration::new("m1", 1, |_handle| async {
        anyhow::bail!("schema precondition not met")
    })
    .blocking();
    let registry = MigrationRegistry::builder()
        .register(doomed)
        .register(marker("m2", 2))
        .build();
    let (store, service) = service_with(registry);

    let (tx, _rx) = progress_channel(8);
    let summary = service.run_all_unrun_migrations("r1", tx).await.unwrap();
    assert_eq!(summary.failed, vec!["m1"]);
    assert!(summary.applied.is_empty());
    assert!(summary.aborted);

    // m2 never ran.
    let handle = store.handle("r1").unwrap();
    let markers = handle
        .find_many("markers", &DocFilter::new(), 0, None, None)
        .await
        .unwrap();
    assert!(markers.is_empty());

    // The failure is recorded for later retry.
    let records = handle
        .find_many("migration_records", &DocFilter::new(), 0, None, None)
        .await
        .unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0]["outcome"], "failed");
}
