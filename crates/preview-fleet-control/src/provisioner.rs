//! Resource provisioning and deletion for a single environment.
//!
//! [`ResourceProvisioner::provision`] creates the resources of one environment
//! in order, checkpointing the metadata record after each one and unwinding a
//! [`RollbackStack`] if a critical step fails. [`ResourceProvisioner::delete`]
//! removes every resource independently and always removes the record.

use std::collections::BTreeSet;
use std::sync::Arc;

use chrono::Utc;
use preview_fleet_core::{parse_kv_namespace_title, EnvironmentId, KvRole};
use preview_fleet_provider::{DeleteOutcome, ProviderError, ResourceProvider, WorkerConfig};
use preview_fleet_store::{
    DatabaseBranchRef, EnvironmentRecord, EnvironmentStatus, KvNamespaceRef, Store, StoreError,
};

use crate::error::{ControlError, ProvisioningStep, Result};
use crate::lifecycle;
use crate::pool::with_timeout;
use crate::rollback::{Compensation, RollbackStack};
use crate::types::PreviewConfig;

/// Outcome of deleting one environment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeletionResult {
    /// The environment deleted.
    pub environment_id: EnvironmentId,
    /// Whether a record existed, readable or not.
    pub record_found: bool,
    /// Resources that were removed.
    pub deleted: Vec<String>,
    /// Resources that were already gone.
    pub absent: Vec<String>,
    /// Resources whose deletion failed, with the reason.
    pub failed: Vec<String>,
    /// Whether the metadata record is gone.
    pub metadata_removed: bool,
}

impl DeletionResult {
    fn new(environment_id: EnvironmentId) -> Self {
        Self {
            environment_id,
            record_found: false,
            deleted: Vec::new(),
            absent: Vec::new(),
            failed: Vec::new(),
            metadata_removed: false,
        }
    }

    fn record(&mut self, label: String, outcome: std::result::Result<DeleteOutcome, ProviderError>) {
        match outcome {
            Ok(DeleteOutcome::Deleted) => self.deleted.push(label),
            Ok(DeleteOutcome::NotFound) => self.absent.push(label),
            Err(e) => {
                tracing::warn!(
                    environment_id = %self.environment_id,
                    resource = %label,
                    error = %e,
                    "Resource deletion failed"
                );
                self.failed.push(format!("{label}: {e}"));
            }
        }
    }

    /// Whether every resource and the record are gone.
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty() && self.metadata_removed
    }

    /// Whether there was nothing to delete at all.
    #[must_use]
    pub fn was_noop(&self) -> bool {
        !self.record_found && self.deleted.is_empty() && self.failed.is_empty()
    }

    /// Convert a partial failure into `ControlError::DeletionPartialFailure`.
    ///
    /// # Errors
    ///
    /// Returns the error if any deletion failed.
    pub fn check(self) -> Result<Self> {
        if self.failed.is_empty() {
            Ok(self)
        } else {
            Err(ControlError::DeletionPartialFailure {
                environment_id: self.environment_id,
                failed: self.failed,
            })
        }
    }
}

/// Builds the per-environment configuration injected into the worker.
#[must_use]
pub fn worker_config(record: &EnvironmentRecord) -> WorkerConfig {
    let mut config = WorkerConfig::default();

    for ns in &record.resources.kv_namespaces {
        config
            .kv_bindings
            .insert(ns.role.binding().to_string(), ns.id.clone());
    }

    config.vars.insert("ENVIRONMENT".into(), "preview".into());
    config
        .vars
        .insert("PREVIEW_NAME".into(), record.id.to_string());
    config
        .vars
        .insert("PR_NUMBER".into(), record.pr_number.to_string());
    config
        .vars
        .insert("BRANCH_NAME".into(), record.branch_name.clone());

    match &record.resources.database {
        Some(db) => {
            config.vars.insert("DATABASE_MODE".into(), "branch".into());
            config.vars.insert("DATABASE_URL".into(), db.url.clone());
            config
                .secrets
                .insert("DATABASE_AUTH_TOKEN".into(), db.token.clone());
        }
        None => {
            config.vars.insert("DATABASE_MODE".into(), "shared".into());
        }
    }

    config
}

/// Creates and deletes the cloud resources of single environments.
pub struct ResourceProvisioner<P, S> {
    provider: Arc<P>,
    store: Arc<S>,
    config: Arc<PreviewConfig>,
}

impl<P, S> Clone for ResourceProvisioner<P, S> {
    fn clone(&self) -> Self {
        Self {
            provider: Arc::clone(&self.provider),
            store: Arc::clone(&self.store),
            config: Arc::clone(&self.config),
        }
    }
}

impl<P: ResourceProvider, S: Store> ResourceProvisioner<P, S> {
    /// Create a new provisioner.
    #[must_use]
    pub fn new(provider: Arc<P>, store: Arc<S>, config: Arc<PreviewConfig>) -> Self {
        Self {
            provider,
            store,
            config,
        }
    }

    /// Provision every resource for `id` and persist an `active` record.
    ///
    /// The caller is responsible for idempotency and capacity checks.
    ///
    /// # Errors
    ///
    /// Returns `ControlError::ProvisioningError` naming the failed critical step.
    /// By then the partial work has been rolled back and the record deleted, or,
    /// if some compensation failed, the record is kept in the `error` state
    /// listing what remains.
    pub async fn provision(
        &self,
        id: &EnvironmentId,
        pr_number: u32,
        branch: &str,
    ) -> Result<EnvironmentRecord> {
        let url = id.preview_url(&self.config.preview_domain);
        let mut record = EnvironmentRecord::new(id.clone(), pr_number, branch, url, Utc::now());

        self.store
            .put_environment(&record)
            .map_err(|e| ControlError::provisioning(id, ProvisioningStep::Metadata, e))?;

        tracing::info!(environment_id = %id, "Provisioning preview environment");

        let mut rollback = RollbackStack::new();
        match self.run_steps(&mut record, &mut rollback).await {
            Ok(()) => {
                tracing::info!(environment_id = %id, url = %record.url, "Preview environment active");
                Ok(record)
            }
            Err(e) => Err(self.abort(record, rollback, e).await),
        }
    }

    async fn run_steps(
        &self,
        record: &mut EnvironmentRecord,
        rollback: &mut RollbackStack,
    ) -> Result<()> {
        let id = record.id.clone();
        let timeout = self.config.operation_timeout;

        for role in KvRole::ALL {
            let title = id.kv_namespace_title(role);
            let ns = with_timeout(
                timeout,
                "create KV namespace",
                self.provider.create_kv_namespace(&title),
            )
            .await
            .map_err(|e| ControlError::provisioning(&id, ProvisioningStep::KvNamespaces, e))?;

            rollback.push(Compensation::DeleteKvNamespace {
                id: ns.id.clone(),
                title: ns.title.clone(),
            });
            record.resources.kv_namespaces.push(KvNamespaceRef {
                role,
                id: ns.id,
                title: ns.title,
            });
            self.checkpoint(record)?;
            tracing::debug!(environment_id = %id, %role, "Created KV namespace");
        }

        self.create_database_branch(record, rollback).await?;

        let name = id.worker_name().to_string();
        let worker = worker_config(record);
        // Upload may succeed before route enablement fails, so the compensation goes first.
        rollback.push(Compensation::DeleteWorker { name: name.clone() });
        with_timeout(timeout, "deploy worker", self.provider.deploy_worker(&name, &worker))
            .await
            .map_err(|e| ControlError::provisioning(&id, ProvisioningStep::WorkerDeployment, e))?;

        record.resources.worker = Some(name.clone());
        record.resources.route = Some(id.route_host(&self.config.preview_domain));
        self.checkpoint(record)?;

        match with_timeout(timeout, "verify route", self.provider.verify_route(&name)).await {
            Ok(true) => record.resources.route_verified = true,
            Ok(false) => {
                tracing::warn!(environment_id = %id, "Route not enabled yet; continuing");
            }
            Err(e) => {
                tracing::warn!(
                    environment_id = %id,
                    step = %ProvisioningStep::RouteVerification,
                    error = %e,
                    "Route verification failed; continuing"
                );
            }
        }

        lifecycle::transition(record, EnvironmentStatus::Active)?;
        self.checkpoint(record)
    }

    /// Best-effort: any failure leaves the environment on the shared database.
    async fn create_database_branch(
        &self,
        record: &mut EnvironmentRecord,
        rollback: &mut RollbackStack,
    ) -> Result<()> {
        let id = record.id.clone();

        if !self.provider.database_branching_enabled() {
            tracing::info!(environment_id = %id, "Database branching disabled; using shared database");
            return Ok(());
        }

        let name = id.database_branch_name().to_string();
        // Creation may hand back an existing branch of the same name; it is
        // compensated like a new one, since the name belongs to this environment.
        match with_timeout(
            self.config.operation_timeout,
            "create database branch",
            self.provider.create_database_branch(&name),
        )
        .await
        {
            Ok(branch) => {
                rollback.push(Compensation::DestroyDatabaseBranch {
                    name: branch.name.clone(),
                });
                record.resources.database = Some(DatabaseBranchRef {
                    name: branch.name,
                    url: branch.url,
                    token: branch.token,
                });
                self.checkpoint(record)?;
                tracing::debug!(environment_id = %id, "Created database branch");
            }
            Err(e) => {
                tracing::warn!(
                    environment_id = %id,
                    step = %ProvisioningStep::DatabaseBranch,
                    error = %e,
                    "Database branch creation failed; falling back to shared database"
                );
            }
        }

        Ok(())
    }

    fn checkpoint(&self, record: &mut EnvironmentRecord) -> Result<()> {
        record.updated_at = Utc::now();
        self.store
            .put_environment(record)
            .map_err(|e| ControlError::provisioning(&record.id, ProvisioningStep::Metadata, e))
    }

    /// Unwind after a critical failure and decide what happens to the record.
    async fn abort(
        &self,
        mut record: EnvironmentRecord,
        rollback: RollbackStack,
        error: ControlError,
    ) -> ControlError {
        let id = record.id.clone();
        tracing::error!(environment_id = %id, error = %error, "Provisioning failed; rolling back");

        let residue = rollback
            .unwind(self.provider.as_ref(), self.config.operation_timeout)
            .await;

        if residue.is_empty() {
            if let Err(e) = self.store.delete_environment(&id) {
                tracing::error!(
                    environment_id = %id,
                    error = %e,
                    "Failed to remove metadata after rollback"
                );
            }
            return error;
        }

        // Keep only what is still out there so cleanup can find it.
        let resources = &mut record.resources;
        resources.kv_namespaces.retain(|ns| {
            residue.iter().any(
                |c| matches!(c, Compensation::DeleteKvNamespace { id, .. } if *id == ns.id),
            )
        });
        if !residue
            .iter()
            .any(|c| matches!(c, Compensation::DestroyDatabaseBranch { .. }))
        {
            resources.database = None;
        }
        if !residue
            .iter()
            .any(|c| matches!(c, Compensation::DeleteWorker { .. }))
        {
            resources.worker = None;
            resources.route = None;
        }

        let left: Vec<String> = residue.iter().map(ToString::to_string).collect();
        record.status = EnvironmentStatus::Error;
        record.error_message = Some(format!("{error}; rollback left: {}", left.join(", ")));
        record.updated_at = Utc::now();

        if let Err(e) = self.store.put_environment(&record) {
            tracing::error!(environment_id = %id, error = %e, "Failed to record rollback residue");
        } else {
            tracing::warn!(
                environment_id = %id,
                residue = %left.join(", "),
                "Rollback incomplete; environment kept in error state"
            );
        }

        error
    }

    /// Delete every resource of `id` and its record.
    ///
    /// Resources are located from the record when it is readable and by naming
    /// convention otherwise, so corrupted and untracked environments are
    /// cleaned up too. Partial failures are reported in the result, not as an
    /// error.
    ///
    /// # Errors
    ///
    /// Returns an error only if the store cannot be read at all.
    pub async fn delete(&self, id: &EnvironmentId) -> Result<DeletionResult> {
        let mut result = DeletionResult::new(id.clone());
        let timeout = self.config.operation_timeout;

        let record = match self.store.get_environment(id) {
            Ok(record) => record,
            Err(StoreError::Corruption { key, reason }) => {
                tracing::warn!(%key, %reason, "Deleting environment with corrupted record");
                None
            }
            Err(e) => return Err(e.into()),
        };
        let record = match record {
            Some(r) if r.status != EnvironmentStatus::Deleting => {
                match self.store.update_environment(id, |r: &mut EnvironmentRecord| {
                    lifecycle::transition(r, EnvironmentStatus::Deleting)
                }) {
                    Ok(updated) => Some(updated),
                    Err(ControlError::Store(StoreError::NotFound)) => None,
                    Err(e) => return Err(e),
                }
            }
            other => other,
        };
        result.record_found = record.is_some();

        tracing::info!(
            environment_id = %id,
            tracked = result.record_found,
            "Deleting preview environment"
        );

        // Worker first so the preview stops serving before its storage disappears.
        let worker = record
            .as_ref()
            .and_then(|r| r.resources.worker.clone())
            .unwrap_or_else(|| id.worker_name().to_string());
        let outcome = with_timeout(timeout, "delete worker", self.provider.delete_worker(&worker)).await;
        result.record(format!("worker {worker}"), outcome);

        let mut namespaces: BTreeSet<(String, String)> = record
            .as_ref()
            .map(|r| {
                r.resources
                    .kv_namespaces
                    .iter()
                    .map(|ns| (ns.id.clone(), ns.title.clone()))
                    .collect()
            })
            .unwrap_or_default();
        match with_timeout(timeout, "list KV namespaces", self.provider.list_kv_namespaces()).await {
            Ok(live) => {
                namespaces.extend(
                    live.into_iter()
                        .filter(|ns| {
                            parse_kv_namespace_title(&ns.title).is_some_and(|(owner, _)| owner == *id)
                        })
                        .map(|ns| (ns.id, ns.title)),
                );
            }
            Err(e) => {
                tracing::warn!(environment_id = %id, error = %e, "Cannot list KV namespaces");
                if record.is_none() {
                    result.failed.push(format!("kv namespace discovery: {e}"));
                }
            }
        }
        for (ns_id, title) in namespaces {
            let outcome = with_timeout(
                timeout,
                "delete KV namespace",
                self.provider.delete_kv_namespace(&ns_id),
            )
            .await;
            result.record(format!("kv namespace {title}"), outcome);
        }

        let branch = record
            .as_ref()
            .and_then(|r| r.resources.database.as_ref())
            .map(|db| db.name.clone())
            .or_else(|| {
                self.provider
                    .database_branching_enabled()
                    .then(|| id.database_branch_name().to_string())
            });
        if let Some(branch) = branch {
            let outcome = with_timeout(
                timeout,
                "destroy database branch",
                self.provider.destroy_database_branch(&branch),
            )
            .await;
            result.record(format!("database branch {branch}"), outcome);
        }

        match self.store.delete_environment(id) {
            Ok(existed) => {
                result.metadata_removed = true;
                result.record_found |= existed;
            }
            Err(e) => {
                tracing::error!(environment_id = %id, error = %e, "Failed to remove metadata record");
                result.failed.push(format!("metadata record: {e}"));
            }
        }

        if result.failed.is_empty() {
            tracing::info!(
                environment_id = %id,
                deleted = result.deleted.len(),
                already_absent = result.absent.len(),
                "Preview environment deleted"
            );
        } else {
            tracing::warn!(
                environment_id = %id,
                failed = result.failed.len(),
                "Preview environment deleted with residue; orphan cleanup will retry"
            );
        }

        Ok(result)
    }
}
