//! Orphan detection.
//!
//! Converges the cloud account and the metadata store: every preview worker,
//! KV namespace and database branch must belong to an `active` environment
//! with a live worker, or to a create still in flight. Everything else is
//! deleted, along with records whose resources are gone.

use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use preview_fleet_core::{parse_kv_namespace_title, EnvironmentId};
use preview_fleet_provider::{DeleteOutcome, ProviderError, ResourceProvider};
use preview_fleet_store::{EnvironmentStatus, Store};

use crate::error::Result;
use crate::lifecycle;
use crate::pool::{run_bounded, with_timeout};
use crate::provisioner::ResourceProvisioner;
use crate::types::PreviewConfig;

/// Outcome of an orphan pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OrphanReport {
    /// Whole environments removed.
    pub environments_removed: u32,
    /// Individual loose resources removed.
    pub resources_removed: u32,
    /// Candidates left alone because a create is in flight.
    pub skipped_in_flight: u32,
    /// Failures encountered.
    pub errors: u32,
    /// One line per failure.
    pub failures: Vec<String>,
    /// Set when the pass could not run at all.
    pub aborted: Option<String>,
}

impl OrphanReport {
    fn error(&mut self, message: String) {
        tracing::warn!(error = %message, "Orphan cleanup error");
        self.errors += 1;
        self.failures.push(message);
    }

    fn resource_outcome(
        &mut self,
        resource: &Loose,
        outcome: std::result::Result<DeleteOutcome, ProviderError>,
    ) {
        match outcome {
            Ok(DeleteOutcome::Deleted) => self.resources_removed += 1,
            Ok(DeleteOutcome::NotFound) => {
                tracing::debug!(resource = %resource, "Orphaned resource already gone");
            }
            Err(e) => self.error(format!("{resource}: {e}")),
        }
    }
}

impl fmt::Display for OrphanReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(reason) = &self.aborted {
            return write!(f, "aborted: {reason}");
        }
        write!(
            f,
            "{} environments removed, {} resources removed, {} skipped in flight, {} errors",
            self.environments_removed, self.resources_removed, self.skipped_in_flight, self.errors
        )
    }
}

/// Environments found in the first phase of a pass.
#[derive(Default)]
struct Classification {
    /// Healthy `active` environments with a live worker.
    kept: BTreeSet<EnvironmentId>,
    /// In-flight creates.
    protected: BTreeSet<EnvironmentId>,
    /// Environments to delete whole.
    doomed: BTreeSet<EnvironmentId>,
}

enum Loose {
    Namespace { id: String, title: String },
    Branch(String),
}

impl fmt::Display for Loose {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Namespace { id, title } => write!(f, "kv namespace {title} ({id})"),
            Self::Branch(name) => write!(f, "database branch {name}"),
        }
    }
}

/// Finds and removes resources and records that no longer belong together.
pub struct OrphanDetector<P, S> {
    provisioner: ResourceProvisioner<P, S>,
    provider: Arc<P>,
    store: Arc<S>,
    config: Arc<PreviewConfig>,
}

impl<P: ResourceProvider, S: Store> OrphanDetector<P, S> {
    /// Create a new detector.
    #[must_use]
    pub fn new(
        provisioner: ResourceProvisioner<P, S>,
        provider: Arc<P>,
        store: Arc<S>,
        config: Arc<PreviewConfig>,
    ) -> Self {
        Self {
            provisioner,
            provider,
            store,
            config,
        }
    }

    /// Run one orphan pass against the current time.
    ///
    /// # Errors
    ///
    /// Returns an error only if the store cannot be scanned.
    pub async fn run(&self) -> Result<OrphanReport> {
        self.run_at(Utc::now()).await
    }

    /// Run one orphan pass as if the time were `now`.
    ///
    /// # Errors
    ///
    /// Returns an error only if the store cannot be scanned.
    pub async fn run_at(&self, now: DateTime<Utc>) -> Result<OrphanReport> {
        let mut report = OrphanReport::default();
        let timeout = self.config.operation_timeout;

        // Without the worker list nothing can be judged safely.
        let workers = match with_timeout(timeout, "list workers", self.provider.list_workers()).await {
            Ok(workers) => workers,
            Err(e) => {
                tracing::error!(error = %e, "Cannot list workers; skipping orphan cleanup");
                report.aborted = Some(format!("listing workers failed: {e}"));
                report.errors = 1;
                return Ok(report);
            }
        };
        let live_workers: BTreeSet<EnvironmentId> = workers
            .iter()
            .filter_map(|name| EnvironmentId::parse(name).ok())
            .collect();

        let classes = self.classify(&live_workers, now, &mut report)?;
        tracing::info!(
            kept = classes.kept.len(),
            in_flight = classes.protected.len(),
            candidates = classes.doomed.len(),
            "Running orphan cleanup"
        );

        self.remove_environments(&classes.doomed, now, &mut report)
            .await;
        self.remove_loose_resources(&classes, now, &mut report)
            .await;

        tracing::info!(
            environments_removed = report.environments_removed,
            resources_removed = report.resources_removed,
            skipped_in_flight = report.skipped_in_flight,
            errors = report.errors,
            "Orphan cleanup complete"
        );
        Ok(report)
    }

    fn classify(
        &self,
        live_workers: &BTreeSet<EnvironmentId>,
        now: DateTime<Utc>,
        report: &mut OrphanReport,
    ) -> Result<Classification> {
        let grace = self.config.provisioning_grace();
        let scan = self.store.scan_environments()?;
        let mut classes = Classification::default();

        for entry in scan.corrupted {
            match entry.environment_id {
                Some(id) => {
                    tracing::warn!(environment_id = %id, reason = %entry.reason, "Corrupted record scheduled for removal");
                    classes.doomed.insert(id);
                }
                None => report.error(format!(
                    "corrupted record {} has no recognizable environment id: {}",
                    entry.key, entry.reason
                )),
            }
        }

        let mut tracked = BTreeSet::new();
        for record in scan.records {
            tracked.insert(record.id.clone());
            let id = record.id.clone();

            if lifecycle::is_in_flight(&record, grace, now) {
                classes.protected.insert(id);
                continue;
            }

            match record.status {
                EnvironmentStatus::Active if live_workers.contains(&id) => {
                    classes.kept.insert(id);
                }
                EnvironmentStatus::Active => {
                    tracing::warn!(environment_id = %id, "Active environment has no worker");
                    classes.doomed.insert(id);
                }
                EnvironmentStatus::Provisioning => {
                    tracing::warn!(environment_id = %id, "Provisioning record is stale");
                    classes.doomed.insert(id);
                }
                EnvironmentStatus::Expired | EnvironmentStatus::Deleting | EnvironmentStatus::Error => {
                    classes.doomed.insert(id);
                }
            }
        }

        for id in live_workers.difference(&tracked) {
            if !classes.doomed.contains(id) {
                tracing::warn!(environment_id = %id, "Worker has no metadata record");
                classes.doomed.insert(id.clone());
            }
        }

        Ok(classes)
    }

    /// Returns true if a create for `id` started after the scan.
    fn started_since_scan(&self, id: &EnvironmentId, now: DateTime<Utc>) -> bool {
        match self.store.get_environment(id) {
            Ok(Some(record)) => {
                lifecycle::is_in_flight(&record, self.config.provisioning_grace(), now)
            }
            Ok(None) | Err(_) => false,
        }
    }

    async fn remove_environments(
        &self,
        doomed: &BTreeSet<EnvironmentId>,
        now: DateTime<Utc>,
        report: &mut OrphanReport,
    ) {
        let mut targets = Vec::new();
        for id in doomed {
            if self.started_since_scan(id, now) {
                report.skipped_in_flight += 1;
            } else {
                targets.push(id.clone());
            }
        }

        let results = run_bounded(targets, self.config.max_concurrency, |id| async move {
            let result = self.provisioner.delete(&id).await;
            (id, result)
        })
        .await;

        for (id, result) in results {
            match result {
                Ok(deletion) => {
                    if deletion.record_found || !deletion.deleted.is_empty() {
                        report.environments_removed += 1;
                    }
                    for failure in deletion.failed {
                        report.error(format!("{id}: {failure}"));
                    }
                }
                Err(e) => report.error(format!("{id}: {e}")),
            }
        }
    }

    async fn remove_loose_resources(
        &self,
        classes: &Classification,
        now: DateTime<Utc>,
        report: &mut OrphanReport,
    ) {
        let timeout = self.config.operation_timeout;
        let mut loose: Vec<(EnvironmentId, Loose)> = Vec::new();

        match with_timeout(timeout, "list KV namespaces", self.provider.list_kv_namespaces()).await {
            Ok(namespaces) => loose.extend(namespaces.into_iter().filter_map(|ns| {
                let (owner, _) = parse_kv_namespace_title(&ns.title)?;
                Some((
                    owner,
                    Loose::Namespace {
                        id: ns.id,
                        title: ns.title,
                    },
                ))
            })),
            Err(e) => report.error(format!("listing KV namespaces failed: {e}")),
        }

        match with_timeout(
            timeout,
            "list database branches",
            self.provider.list_database_branches(),
        )
        .await
        {
            Ok(branches) => loose.extend(branches.into_iter().filter_map(|name| {
                let owner = EnvironmentId::parse(&name).ok()?;
                Some((owner, Loose::Branch(name)))
            })),
            Err(e) => report.error(format!("listing database branches failed: {e}")),
        }

        let mut targets = Vec::new();
        for (owner, resource) in loose {
            if classes.kept.contains(&owner) || classes.protected.contains(&owner) {
                continue;
            }
            if self.started_since_scan(&owner, now) {
                report.skipped_in_flight += 1;
                continue;
            }
            targets.push((owner, resource));
        }

        let results = run_bounded(targets, self.config.max_concurrency, |(owner, resource)| async move {
            tracing::warn!(environment_id = %owner, resource = %resource, "Removing orphaned resource");
            let outcome = match &resource {
                Loose::Namespace { id, .. } => {
                    with_timeout(timeout, "delete KV namespace", self.provider.delete_kv_namespace(id)).await
                }
                Loose::Branch(name) => {
                    with_timeout(
                        timeout,
                        "destroy database branch",
                        self.provider.destroy_database_branch(name),
                    )
                    .await
                }
            };
            (resource, outcome)
        })
        .await;

        for (resource, outcome) in results {
            report.resource_outcome(&resource, outcome);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use preview_fleet_provider::{MockProvider, Operation};
    use preview_fleet_store::{EnvironmentRecord, RocksStore};
    use tempfile::TempDir;

    struct Harness {
        orphans: OrphanDetector<MockProvider, RocksStore>,
        provisioner: ResourceProvisioner<MockProvider, RocksStore>,
        provider: Arc<MockProvider>,
        store: Arc<RocksStore>,
        _dir: TempDir,
    }

    fn harness() -> Harness {
        let dir = TempDir::new().unwrap();
        let store = Arc::new(RocksStore::open(dir.path()).unwrap());
        let provider = Arc::new(MockProvider::new());
        let config = Arc::new(PreviewConfig::default());
        let provisioner =
            ResourceProvisioner::new(Arc::clone(&provider), Arc::clone(&store), Arc::clone(&config));
        Harness {
            orphans: OrphanDetector::new(
                provisioner.clone(),
                Arc::clone(&provider),
                Arc::clone(&store),
                config,
            ),
            provisioner,
            provider,
            store,
            _dir: dir,
        }
    }

    fn id(pr: u32, branch: &str) -> EnvironmentId {
        EnvironmentId::derive(pr, branch).unwrap()
    }

    #[tokio::test]
    async fn healthy_environments_are_untouched() {
        let h = harness();
        h.provisioner.provision(&id(1, "a"), 1, "a").await.unwrap();

        let report = h.orphans.run().await.unwrap();

        assert_eq!(report, OrphanReport::default());
        assert_eq!(h.provider.namespace_titles().len(), 3);
        assert_eq!(h.provider.worker_names(), vec!["pr-1-a"]);
    }

    #[tokio::test]
    async fn loose_namespace_is_removed() {
        let h = harness();
        h.provider.seed_namespace("pr-123-test-session");
        h.provider.seed_namespace("production-cache");

        let report = h.orphans.run().await.unwrap();

        assert_eq!(report.resources_removed, 1);
        assert_eq!(h.provider.namespace_titles(), vec!["production-cache"]);
    }

    #[tokio::test]
    async fn untracked_worker_is_removed_with_its_resources() {
        let h = harness();
        h.provider.seed_worker("pr-5-ghost");
        h.provider.seed_namespace("pr-5-ghost-cache");
        h.provider.seed_worker("marketing-site");

        let report = h.orphans.run().await.unwrap();

        assert_eq!(report.environments_removed, 1);
        assert_eq!(h.provider.worker_names(), vec!["marketing-site"]);
        assert!(h.provider.namespace_titles().is_empty());
    }

    #[tokio::test]
    async fn active_record_without_worker_is_removed() {
        let h = harness();
        let env = id(6, "lost");
        h.provisioner.provision(&env, 6, "lost").await.unwrap();
        h.provider.remove_worker("pr-6-lost");

        let report = h.orphans.run().await.unwrap();

        assert_eq!(report.environments_removed, 1);
        assert!(h.store.get_environment(&env).unwrap().is_none());
        assert!(h.provider.namespace_titles().is_empty());
        assert!(h.provider.branch_names().is_empty());
    }

    #[tokio::test]
    async fn in_flight_create_is_protected() {
        let h = harness();
        let env = id(7, "busy");
        let record = EnvironmentRecord::new(env.clone(), 7, "busy", "https://x", Utc::now());
        h.store.put_environment(&record).unwrap();
        h.provider.seed_namespace("pr-7-busy-session");

        let report = h.orphans.run().await.unwrap();

        assert_eq!(report.resources_removed, 0);
        assert!(h.store.get_environment(&env).unwrap().is_some());
        assert_eq!(h.provider.namespace_titles(), vec!["pr-7-busy-session"]);
    }

    #[tokio::test]
    async fn stale_provisioning_is_removed() {
        let h = harness();
        let env = id(8, "stuck");
        let record = EnvironmentRecord::new(
            env.clone(),
            8,
            "stuck",
            "https://x",
            Utc::now() - Duration::hours(2),
        );
        h.store.put_environment(&record).unwrap();
        h.provider.seed_namespace("pr-8-stuck-session");

        let report = h.orphans.run().await.unwrap();

        assert_eq!(report.environments_removed, 1);
        assert!(h.store.get_environment(&env).unwrap().is_none());
        assert!(h.provider.namespace_titles().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn loose_resources_are_removed_in_parallel() {
        let h = harness();
        for pr in 100..108 {
            h.provider.seed_namespace(&format!("pr-{pr}-loose-cache"));
        }
        h.provider
            .set_latency(Operation::DeleteKvNamespace, std::time::Duration::from_secs(10));

        let started = tokio::time::Instant::now();
        let report = h.orphans.run().await.unwrap();

        assert_eq!(report.resources_removed, 8);
        assert_eq!(report.errors, 0);
        // Eight 10s deletes, four at a time.
        assert!(started.elapsed() < std::time::Duration::from_secs(30));
        assert!(h.provider.namespace_titles().is_empty());
    }

    #[tokio::test]
    async fn worker_listing_failure_aborts() {
        let h = harness();
        h.provider.seed_namespace("pr-9-x-cache");
        h.provider.fail_on(Operation::ListWorkers);

        let report = h.orphans.run().await.unwrap();

        assert!(report.aborted.is_some());
        assert_eq!(report.errors, 1);
        assert!(report.to_string().starts_with("aborted"));
        assert_eq!(h.provider.namespace_titles(), vec!["pr-9-x-cache"]);
    }

    #[tokio::test]
    async fn converges_in_one_pass() {
        let h = harness();
        h.provisioner.provision(&id(1, "keep"), 1, "keep").await.unwrap();
        h.provider.seed_worker("pr-2-ghost");
        h.provider.seed_namespace("pr-3-loose-rate-limit");
        h.provider.seed_branch("pr-4-loose");

        h.orphans.run().await.unwrap();
        let second = h.orphans.run().await.unwrap();

        assert_eq!(second, OrphanReport::default());
        assert_eq!(h.provider.worker_names(), vec!["pr-1-keep"]);
        assert_eq!(h.provider.branch_names(), vec!["pr-1-keep"]);
        assert_eq!(h.provider.namespace_titles().len(), 3);
    }
}
