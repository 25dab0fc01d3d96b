//! Lifecycle service implementation.
//!
//! This module provides the `PreviewLifecycle` trait and the `LifecycleManager`
//! implementation that coordinates provisioning, capacity and reconciliation.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use preview_fleet_core::EnvironmentId;
use preview_fleet_provider::{HealthStatus, ResourceProvider};
use preview_fleet_store::{EnvironmentRecord, EnvironmentStatus, Store, StoreError};

use crate::error::{ControlError, Result};
use crate::expiry::{CleanupSummary, ExpiryReconciler};
use crate::health::{HealthMonitor, HealthReport};
use crate::lifecycle;
use crate::notify::Notifier;
use crate::orphan::{OrphanDetector, OrphanReport};
use crate::pool::run_bounded;
use crate::provisioner::{DeletionResult, ResourceProvisioner};
use crate::types::{Capacity, EnvironmentList, EnvironmentListing, PreviewConfig};

/// Combined outcome of expiry followed by orphan cleanup.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CleanupReport {
    /// The expiry pass.
    pub expiry: CleanupSummary,
    /// The orphan pass.
    pub orphans: OrphanReport,
}

impl CleanupReport {
    /// Total failures across both passes.
    #[must_use]
    pub fn errors(&self) -> u32 {
        self.expiry.errors + self.orphans.errors
    }

    /// Every failure line across both passes.
    #[must_use]
    pub fn failures(&self) -> Vec<String> {
        let mut all = self.expiry.failures.clone();
        all.extend(self.orphans.failures.iter().cloned());
        if let Some(reason) = &self.orphans.aborted {
            all.push(reason.clone());
        }
        all
    }
}

impl fmt::Display for CleanupReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "expiry: {}; orphans: {}", self.expiry, self.orphans)
    }
}

/// Trait defining the preview environment operations.
///
/// Implementations handle state persistence, capacity and coordination with
/// the cloud provider.
#[async_trait]
pub trait PreviewLifecycle: Send + Sync {
    // =========================================================================
    // Environment Operations
    // =========================================================================

    /// Create the environment for a pull request, or return it if it is already active.
    ///
    /// # Errors
    ///
    /// Returns `ControlError::CapacityExceeded` if no slot can be freed,
    /// `ControlError::ProvisioningInProgress` if another create is running and
    /// `ControlError::ProvisioningError` if a critical step failed.
    async fn create(&self, pr_number: u32, branch: &str) -> Result<EnvironmentRecord>;

    /// Delete an environment and everything it owns. Deleting a missing
    /// environment succeeds.
    ///
    /// # Errors
    ///
    /// Returns an error only if the store cannot be read; partial failures are
    /// reported in the result.
    async fn delete(&self, environment_id: &EnvironmentId) -> Result<DeletionResult>;

    /// List every environment, probing the health of active ones.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be scanned. Failed probes are
    /// reported per environment.
    async fn list(&self) -> Result<EnvironmentList>;

    /// Current slot usage.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be read.
    fn capacity(&self) -> Result<Capacity>;

    // =========================================================================
    // Reconciliation
    // =========================================================================

    /// Expire old environments, then remove orphans.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be scanned. Per-environment
    /// failures are counted in the report.
    async fn cleanup(&self) -> Result<CleanupReport>;

    /// Probe every active environment.
    ///
    /// # Errors
    ///
    /// Returns an error if active environments cannot be listed.
    async fn monitor(&self) -> Result<HealthReport>;
}

/// The main lifecycle service implementation.
pub struct LifecycleManager<P, S> {
    store: Arc<S>,
    config: Arc<PreviewConfig>,
    provisioner: ResourceProvisioner<P, S>,
    expiry: ExpiryReconciler<P, S>,
    orphans: OrphanDetector<P, S>,
    health: HealthMonitor<P, S>,
    notifier: Notifier,
}

impl<P: ResourceProvider, S: Store> LifecycleManager<P, S> {
    /// Create a new lifecycle manager.
    ///
    /// # Errors
    ///
    /// Returns `ControlError::Config` if the notification client cannot be built.
    pub fn new(provider: Arc<P>, store: Arc<S>, config: PreviewConfig) -> Result<Self> {
        let config = Arc::new(config);
        let notifier = Notifier::new(&config)?;
        let provisioner =
            ResourceProvisioner::new(Arc::clone(&provider), Arc::clone(&store), Arc::clone(&config));

        Ok(Self {
            expiry: ExpiryReconciler::new(
                provisioner.clone(),
                Arc::clone(&store),
                Arc::clone(&config),
            ),
            orphans: OrphanDetector::new(
                provisioner.clone(),
                Arc::clone(&provider),
                Arc::clone(&store),
                Arc::clone(&config),
            ),
            health: HealthMonitor::new(provider, Arc::clone(&store), Arc::clone(&config)),
            provisioner,
            store,
            config,
            notifier,
        })
    }

    /// Get a reference to the store.
    #[must_use]
    pub fn store(&self) -> &S {
        &self.store
    }

    /// Get the configuration.
    #[must_use]
    pub fn config(&self) -> &PreviewConfig {
        &self.config
    }

    /// The TTL reconciler.
    #[must_use]
    pub const fn expiry(&self) -> &ExpiryReconciler<P, S> {
        &self.expiry
    }

    /// The orphan reconciler.
    #[must_use]
    pub const fn orphans(&self) -> &OrphanDetector<P, S> {
        &self.orphans
    }

    /// The health monitor.
    #[must_use]
    pub const fn health(&self) -> &HealthMonitor<P, S> {
        &self.health
    }

    /// The notifier.
    #[must_use]
    pub const fn notifier(&self) -> &Notifier {
        &self.notifier
    }

    fn slots(&self) -> Result<Capacity> {
        Ok(Capacity {
            in_use: self.store.count_live_environments()?,
            limit: self.config.max_environments,
        })
    }

    /// Clear whatever stands under `id` before a fresh create, or return the
    /// record if it is already serving.
    async fn resolve_existing(&self, id: &EnvironmentId) -> Result<Option<EnvironmentRecord>> {
        let existing = match self.store.get_environment(id) {
            Ok(record) => record,
            Err(StoreError::Corruption { key, reason }) => {
                tracing::warn!(%key, %reason, "Replacing corrupted record");
                self.provisioner.delete(id).await?.check()?;
                return Ok(None);
            }
            Err(e) => return Err(e.into()),
        };

        let Some(record) = existing else {
            return Ok(None);
        };

        if record.status == EnvironmentStatus::Active {
            tracing::info!(environment_id = %id, "Environment already active");
            return Ok(Some(record));
        }
        if lifecycle::is_in_flight(&record, self.config.provisioning_grace(), Utc::now()) {
            return Err(ControlError::ProvisioningInProgress(id.clone()));
        }

        tracing::warn!(
            environment_id = %id,
            status = %record.status,
            "Replacing environment left in a non-active state"
        );
        self.provisioner.delete(id).await?.check()?;
        Ok(None)
    }

    /// Make sure a slot is free, running expiry once if the cap is reached.
    async fn ensure_capacity(&self, pr_number: u32) -> Result<Capacity> {
        let capacity = self.slots()?;
        if !capacity.is_full() {
            return Ok(capacity);
        }

        tracing::info!(%capacity, "At capacity; running expiry to free a slot");
        let summary = self.expiry.run().await?;
        tracing::info!(%summary, "Expiry before create complete");

        let capacity = self.slots()?;
        if capacity.is_full() {
            tracing::warn!(%capacity, pr_number, "Refusing create at capacity");
            self.notifier.capacity_exceeded(capacity, pr_number).await;
            return Err(ControlError::CapacityExceeded {
                in_use: capacity.in_use,
                limit: capacity.limit,
            });
        }
        Ok(capacity)
    }
}

#[async_trait]
impl<P: ResourceProvider + 'static, S: Store + 'static> PreviewLifecycle for LifecycleManager<P, S> {
    // =========================================================================
    // Environment Operations
    // =========================================================================

    async fn create(&self, pr_number: u32, branch: &str) -> Result<EnvironmentRecord> {
        let id = EnvironmentId::derive(pr_number, branch)?;

        if let Some(active) = self.resolve_existing(&id).await? {
            return Ok(active);
        }

        let before = self.ensure_capacity(pr_number).await?;
        let record = self.provisioner.provision(&id, pr_number, branch).await?;

        let after = Capacity {
            in_use: before.in_use + 1,
            limit: before.limit,
        };
        if after.is_near_limit() {
            tracing::warn!(capacity = %after, "Preview environments near capacity");
            self.notifier.capacity_warning(after).await;
        }

        tracing::info!(
            environment_id = %record.id,
            pr_number,
            url = %record.url,
            "Created preview environment"
        );
        Ok(record)
    }

    async fn delete(&self, environment_id: &EnvironmentId) -> Result<DeletionResult> {
        self.provisioner.delete(environment_id).await
    }

    async fn list(&self) -> Result<EnvironmentList> {
        let scan = self.store.scan_environments()?;

        let mut environments = run_bounded(
            scan.records,
            self.config.max_concurrency,
            |record| async move {
                let health = if lifecycle::is_serving(record.status) {
                    Some(self.health.probe(&record).await)
                } else {
                    None
                };
                EnvironmentListing { record, health }
            },
        )
        .await;
        environments.sort_by(|a, b| {
            (a.record.pr_number, &a.record.id).cmp(&(b.record.pr_number, &b.record.id))
        });

        Ok(EnvironmentList {
            environments,
            corrupted: scan.corrupted,
        })
    }

    fn capacity(&self) -> Result<Capacity> {
        self.slots()
    }

    // =========================================================================
    // Reconciliation
    // =========================================================================

    async fn cleanup(&self) -> Result<CleanupReport> {
        let expiry = self.expiry.run().await?;
        let orphans = self.orphans.run().await?;
        let report = CleanupReport { expiry, orphans };

        tracing::info!(%report, "Cleanup complete");
        self.notifier
            .cleanup_errors(report.errors(), &report.to_string(), &report.failures())
            .await;
        Ok(report)
    }

    async fn monitor(&self) -> Result<HealthReport> {
        let report = self.health.run().await?;

        let unhealthy: Vec<(String, String)> = report
            .unhealthy
            .iter()
            .map(|u| (u.environment_id.to_string(), u.reason.clone()))
            .collect();
        self.notifier.unhealthy(&unhealthy).await;
        Ok(report)
    }
}

/// Returns true if a listing row is healthy or was not probed.
#[must_use]
pub fn is_listing_healthy(listing: &EnvironmentListing) -> bool {
    !matches!(listing.health, Some(HealthStatus::Unhealthy { .. }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use preview_fleet_provider::{MockProvider, Operation};
    use preview_fleet_store::RocksStore;
    use tempfile::TempDir;

    fn setup_with(config: PreviewConfig) -> (LifecycleManager<MockProvider, RocksStore>, Arc<MockProvider>, TempDir) {
        let dir = TempDir::new().unwrap();
        let store = Arc::new(RocksStore::open(dir.path()).unwrap());
        let provider = Arc::new(MockProvider::new());
        let manager = LifecycleManager::new(Arc::clone(&provider), store, config).unwrap();
        (manager, provider, dir)
    }

    fn setup() -> (LifecycleManager<MockProvider, RocksStore>, Arc<MockProvider>, TempDir) {
        setup_with(PreviewConfig::default())
    }

    fn age(manager: &LifecycleManager<MockProvider, RocksStore>, id: &EnvironmentId, by: Duration) {
        let mut record = manager.store().get_environment(id).unwrap().unwrap();
        record.created_at -= by;
        manager.store().put_environment(&record).unwrap();
    }

    #[tokio::test]
    async fn create_is_idempotent() {
        let (manager, provider, _dir) = setup();

        let first = manager.create(42, "feature/x").await.unwrap();
        let second = manager.create(42, "feature/x").await.unwrap();

        assert_eq!(first, second);
        assert_eq!(provider.call_count(Operation::DeployWorker), 1);
        assert_eq!(provider.call_count(Operation::CreateKvNamespace), 3);
        assert_eq!(manager.capacity().unwrap().in_use, 1);
    }

    #[tokio::test]
    async fn create_rejects_concurrent_provisioning() {
        let (manager, provider, _dir) = setup();
        let id = EnvironmentId::derive(5, "busy").unwrap();
        let record = EnvironmentRecord::new(id.clone(), 5, "busy", "https://x", Utc::now());
        manager.store().put_environment(&record).unwrap();

        let err = manager.create(5, "busy").await.unwrap_err();

        assert!(matches!(err, ControlError::ProvisioningInProgress(ref got) if *got == id));
        assert_eq!(provider.call_count(Operation::CreateKvNamespace), 0);
    }

    #[tokio::test]
    async fn create_retries_stale_provisioning() {
        let (manager, provider, _dir) = setup();
        let id = EnvironmentId::derive(6, "stale").unwrap();
        let record = EnvironmentRecord::new(
            id.clone(),
            6,
            "stale",
            "https://x",
            Utc::now() - Duration::hours(2),
        );
        manager.store().put_environment(&record).unwrap();
        provider.seed_namespace("pr-6-stale-session");

        let created = manager.create(6, "stale").await.unwrap();

        assert_eq!(created.status, EnvironmentStatus::Active);
        assert_eq!(provider.namespace_titles().len(), 3);
    }

    #[tokio::test]
    async fn create_replaces_error_record() {
        let (manager, provider, _dir) = setup();
        provider.fail_on(Operation::DeployWorker);
        provider.fail_on(Operation::DeleteKvNamespace);
        manager.create(7, "flaky").await.unwrap_err();

        let id = EnvironmentId::derive(7, "flaky").unwrap();
        let stuck = manager.store().get_environment(&id).unwrap().unwrap();
        assert_eq!(stuck.status, EnvironmentStatus::Error);

        provider.clear_failure(Operation::DeployWorker);
        provider.clear_failure(Operation::DeleteKvNamespace);
        let created = manager.create(7, "flaky").await.unwrap();
        assert_eq!(created.status, EnvironmentStatus::Active);
        assert_eq!(provider.namespace_titles().len(), 3);
    }

    #[tokio::test]
    async fn create_replaces_corrupted_record() {
        let (manager, _provider, _dir) = setup();
        let id = EnvironmentId::derive(8, "bad").unwrap();
        manager.store().write_garbage(&id).unwrap();

        let created = manager.create(8, "bad").await.unwrap();
        assert_eq!(created.id, id);
        assert!(manager.store().scan_environments().unwrap().corrupted.is_empty());
    }

    #[tokio::test]
    async fn capacity_is_enforced() {
        let (manager, provider, _dir) = setup_with(PreviewConfig {
            max_environments: 2,
            ..PreviewConfig::default()
        });
        manager.create(1, "a").await.unwrap();
        manager.create(2, "b").await.unwrap();

        let err = manager.create(3, "c").await.unwrap_err();

        assert!(matches!(err, ControlError::CapacityExceeded { in_use: 2, limit: 2 }));
        assert!(!provider.worker_names().contains(&"pr-3-c".to_string()));
        assert_eq!(manager.capacity().unwrap().in_use, 2);
    }

    #[tokio::test]
    async fn expiry_frees_a_slot() {
        let (manager, provider, _dir) = setup_with(PreviewConfig {
            max_environments: 1,
            ..PreviewConfig::default()
        });
        let old = manager.create(1, "old").await.unwrap();
        age(&manager, &old.id, Duration::days(8));

        let created = manager.create(2, "new").await.unwrap();

        assert_eq!(created.status, EnvironmentStatus::Active);
        assert!(manager.store().get_environment(&old.id).unwrap().is_none());
        assert_eq!(provider.worker_names(), vec!["pr-2-new"]);
    }

    #[tokio::test]
    async fn list_probes_active_environments() {
        let (manager, provider, _dir) = setup();
        manager.create(2, "b").await.unwrap();
        manager.create(1, "a").await.unwrap();
        provider.set_health(
            "https://pr-2-b.preview.test/api/health",
            HealthStatus::Unhealthy {
                reason: "status 500".into(),
            },
        );

        let list = manager.list().await.unwrap();

        let names: Vec<&str> = list
            .environments
            .iter()
            .map(|l| l.record.id.as_str())
            .collect();
        assert_eq!(names, vec!["pr-1-a", "pr-2-b"]);
        assert!(is_listing_healthy(&list.environments[0]));
        assert!(!is_listing_healthy(&list.environments[1]));
    }

    #[tokio::test]
    async fn cleanup_runs_expiry_then_orphans() {
        let (manager, provider, _dir) = setup();
        let old = manager.create(1, "old").await.unwrap();
        manager.create(2, "new").await.unwrap();
        age(&manager, &old.id, Duration::days(8));
        provider.seed_namespace("pr-9-loose-cache");

        let report = manager.cleanup().await.unwrap();

        assert_eq!(report.expiry.to_string(), "1 deleted, 1 kept, 0 errors");
        assert_eq!(report.orphans.resources_removed, 1);
        assert_eq!(report.errors(), 0);
        assert_eq!(provider.worker_names(), vec!["pr-2-new"]);
    }

    #[tokio::test]
    async fn monitor_reports_unhealthy() {
        let (manager, provider, _dir) = setup();
        manager.create(3, "c").await.unwrap();
        provider.set_health(
            "https://pr-3-c.preview.test/api/health",
            HealthStatus::Unhealthy {
                reason: "timed out".into(),
            },
        );

        let report = manager.monitor().await.unwrap();
        assert_eq!(report.to_string(), "1 checked, 0 healthy, 1 unhealthy");
    }
}
