//! End-to-end lifecycle scenarios against the mock provider and a real RocksDB store.
//!
//! Run with:
//!   cargo test -p preview-fleet-control --test scenarios

use std::sync::Arc;

use chrono::{Duration, Utc};
use preview_fleet_control::{
    ControlError, EnvironmentId, EnvironmentStatus, LifecycleManager, PreviewConfig,
    PreviewLifecycle, ProvisioningStep,
};
use preview_fleet_provider::{DryRunProvider, MockProvider, Operation};
use preview_fleet_store::{DryRunStore, RocksStore, Store};
use tempfile::TempDir;

// =============================================================================
// Helpers
// =============================================================================

type Manager = LifecycleManager<MockProvider, RocksStore>;

fn config() -> PreviewConfig {
    PreviewConfig {
        ttl_days: 7,
        max_environments: 10,
        preview_domain: "preview.example.dev".into(),
        ..PreviewConfig::default()
    }
}

fn setup_with(config: PreviewConfig) -> (Manager, Arc<MockProvider>, TempDir) {
    let dir = TempDir::new().unwrap();
    let store = Arc::new(RocksStore::open(dir.path()).unwrap());
    let provider = Arc::new(MockProvider::new());
    let manager = LifecycleManager::new(Arc::clone(&provider), store, config).unwrap();
    (manager, provider, dir)
}

fn setup() -> (Manager, Arc<MockProvider>, TempDir) {
    setup_with(config())
}

fn backdate(manager: &Manager, id: &EnvironmentId, by: Duration) {
    let mut record = manager.store().get_environment(id).unwrap().unwrap();
    record.created_at = Utc::now() - by;
    manager.store().put_environment(&record).unwrap();
}

// =============================================================================
// Scenarios
// =============================================================================

#[tokio::test]
async fn scenario_a_create_list_delete() {
    let (manager, provider, _dir) = setup();

    let record = manager.create(42, "feature/x").await.unwrap();
    assert_eq!(record.id.as_str(), "pr-42-feature-x");
    assert_eq!(record.status, EnvironmentStatus::Active);
    assert_eq!(record.url, "https://pr-42-feature-x.preview.example.dev");
    assert_eq!(provider.namespace_titles().len(), 3);
    assert_eq!(provider.worker_names(), vec!["pr-42-feature-x"]);

    let list = manager.list().await.unwrap();
    assert_eq!(list.environments.len(), 1);
    assert_eq!(list.environments[0].record.id, record.id);

    let result = manager.delete(&record.id).await.unwrap();
    assert!(result.is_complete());
    assert!(provider.worker_names().is_empty());
    assert!(provider.namespace_titles().is_empty());
    assert!(manager.store().get_environment(&record.id).unwrap().is_none());

    let list = manager.list().await.unwrap();
    assert!(list.environments.is_empty());
}

#[tokio::test]
async fn scenario_b_cleanup_respects_ttl() {
    let (manager, provider, _dir) = setup();
    let old = manager.create(1, "old").await.unwrap();
    let young = manager.create(2, "young").await.unwrap();
    backdate(&manager, &old.id, Duration::days(8));
    backdate(&manager, &young.id, Duration::days(1));

    let report = manager.cleanup().await.unwrap();

    assert_eq!(report.expiry.to_string(), "1 deleted, 1 kept, 0 errors");
    assert_eq!(report.errors(), 0);
    assert!(manager.store().get_environment(&old.id).unwrap().is_none());
    assert!(manager.store().get_environment(&young.id).unwrap().is_some());
    assert_eq!(provider.worker_names(), vec!["pr-2-young"]);
}

#[tokio::test]
async fn scenario_c_worker_failure_rolls_back() {
    let (manager, provider, _dir) = setup();
    provider.fail_on(Operation::DeployWorker);

    let err = manager.create(5, "broken").await.unwrap_err();

    assert!(matches!(
        err,
        ControlError::ProvisioningError {
            step: ProvisioningStep::WorkerDeployment,
            ..
        }
    ));
    assert_eq!(provider.call_count(Operation::CreateKvNamespace), 3);
    assert!(provider.namespace_titles().is_empty());
    assert!(provider.branch_names().is_empty());
    let id = EnvironmentId::derive(5, "broken").unwrap();
    assert!(manager.store().get_environment(&id).unwrap().is_none());
    assert_eq!(manager.capacity().unwrap().in_use, 0);
}

// =============================================================================
// Properties
// =============================================================================

#[tokio::test]
async fn delete_is_idempotent() {
    let (manager, _provider, _dir) = setup();
    let record = manager.create(3, "twice").await.unwrap();

    let first = manager.delete(&record.id).await.unwrap();
    let second = manager.delete(&record.id).await.unwrap();

    assert!(first.record_found);
    assert!(second.was_noop());
    assert!(second.is_complete());
}

#[tokio::test]
async fn capacity_counts_only_live_environments() {
    let (manager, provider, _dir) = setup_with(PreviewConfig {
        max_environments: 1,
        ..config()
    });
    manager.create(1, "one").await.unwrap();

    let err = manager.create(2, "two").await.unwrap_err();
    assert!(matches!(err, ControlError::CapacityExceeded { in_use: 1, limit: 1 }));
    assert_eq!(provider.worker_names(), vec!["pr-1-one"]);

    let one = EnvironmentId::derive(1, "one").unwrap();
    manager.delete(&one).await.unwrap();
    manager.create(2, "two").await.unwrap();
    assert_eq!(provider.worker_names(), vec!["pr-2-two"]);
}

#[tokio::test]
async fn database_failure_degrades_to_shared_database() {
    let (manager, provider, _dir) = setup();
    provider.fail_on(Operation::CreateDatabaseBranch);

    let record = manager.create(7, "db").await.unwrap();

    assert_eq!(record.status, EnvironmentStatus::Active);
    assert!(record.resources.database.is_none());
    let worker = provider.worker_config("pr-7-db").unwrap();
    assert_eq!(worker.vars["DATABASE_MODE"], "shared");
}

#[tokio::test]
async fn corrupted_record_is_surfaced_then_removed() {
    let (manager, provider, _dir) = setup();
    manager.create(1, "fine").await.unwrap();
    let bad = EnvironmentId::derive(2, "bad").unwrap();
    manager.store().write_garbage(&bad).unwrap();
    provider.seed_worker("pr-2-bad");

    let list = manager.list().await.unwrap();
    assert_eq!(list.environments.len(), 1);
    assert_eq!(list.corrupted.len(), 1);
    assert_eq!(list.corrupted[0].environment_id.as_ref(), Some(&bad));

    let report = manager.cleanup().await.unwrap();
    assert_eq!(report.orphans.environments_removed, 1);

    let list = manager.list().await.unwrap();
    assert!(list.corrupted.is_empty());
    assert_eq!(provider.worker_names(), vec!["pr-1-fine"]);
}

#[tokio::test]
async fn orphans_converge_within_two_passes() {
    let (manager, provider, _dir) = setup();
    manager.create(1, "keep").await.unwrap();
    provider.seed_namespace("pr-123-test-session");
    provider.seed_worker("pr-124-ghost");
    provider.seed_branch("pr-125-left");

    manager.orphans().run().await.unwrap();
    let second = manager.orphans().run().await.unwrap();

    assert_eq!(second.environments_removed, 0);
    assert_eq!(second.resources_removed, 0);
    assert_eq!(second.errors, 0);
    assert_eq!(provider.worker_names(), vec!["pr-1-keep"]);
    assert_eq!(provider.branch_names(), vec!["pr-1-keep"]);
    assert!(!provider
        .namespace_titles()
        .contains(&"pr-123-test-session".to_string()));
}

#[tokio::test]
async fn in_flight_create_survives_cleanup() {
    let (manager, provider, _dir) = setup();
    let id = EnvironmentId::derive(9, "busy").unwrap();
    let record = preview_fleet_store::EnvironmentRecord::new(
        id.clone(),
        9,
        "busy",
        "https://pr-9-busy.preview.example.dev",
        Utc::now(),
    );
    manager.store().put_environment(&record).unwrap();
    provider.seed_namespace("pr-9-busy-session");

    manager.cleanup().await.unwrap();

    assert!(manager.store().get_environment(&id).unwrap().is_some());
    assert_eq!(provider.namespace_titles(), vec!["pr-9-busy-session"]);
}

#[tokio::test]
async fn dry_run_performs_no_mutations() {
    let dir = TempDir::new().unwrap();
    let store = Arc::new(DryRunStore::new(RocksStore::open(dir.path()).unwrap()));
    let provider = Arc::new(DryRunProvider::new(MockProvider::new()));
    let manager = LifecycleManager::new(
        Arc::clone(&provider),
        Arc::clone(&store),
        PreviewConfig {
            dry_run: true,
            ..config()
        },
    )
    .unwrap();

    let record = manager.create(11, "dry").await.unwrap();
    assert_eq!(record.status, EnvironmentStatus::Active);

    let mock = provider.inner();
    assert_eq!(mock.call_count(Operation::CreateKvNamespace), 0);
    assert_eq!(mock.call_count(Operation::DeployWorker), 0);
    assert!(mock.namespace_titles().is_empty());
    assert!(store.inner().scan_environments().unwrap().records.is_empty());

    manager.delete(&record.id).await.unwrap();
    manager.cleanup().await.unwrap();
    assert_eq!(mock.call_count(Operation::DeleteWorker), 0);
}
