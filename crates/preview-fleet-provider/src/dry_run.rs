//! A provider wrapper for `--dry-run`.
//!
//! Reads (listings, route checks, health probes) go to the wrapped provider so
//! reports reflect reality; every mutation is logged and reported as successful
//! without touching the account.

use async_trait::async_trait;

use crate::error::{ProviderError, Result};
use crate::provider::ResourceProvider;
use crate::types::{DatabaseBranch, DeleteOutcome, HealthStatus, KvNamespace, WorkerConfig};

/// Provider that never mutates anything.
#[derive(Debug, Clone)]
pub struct DryRunProvider<P> {
    inner: P,
}

impl<P: ResourceProvider> DryRunProvider<P> {
    /// Wrap a provider.
    pub fn new(inner: P) -> Self {
        Self { inner }
    }

    /// The wrapped provider.
    pub fn inner(&self) -> &P {
        &self.inner
    }
}

#[async_trait]
impl<P: ResourceProvider> ResourceProvider for DryRunProvider<P> {
    async fn create_kv_namespace(&self, title: &str) -> Result<KvNamespace> {
        tracing::info!(%title, "[dry run] Would create KV namespace");
        Ok(KvNamespace {
            id: format!("dry-run-{title}"),
            title: title.to_string(),
        })
    }

    async fn delete_kv_namespace(&self, id: &str) -> Result<DeleteOutcome> {
        tracing::info!(%id, "[dry run] Would delete KV namespace");
        Ok(DeleteOutcome::Deleted)
    }

    async fn list_kv_namespaces(&self) -> Result<Vec<KvNamespace>> {
        self.inner.list_kv_namespaces().await
    }

    fn database_branching_enabled(&self) -> bool {
        self.inner.database_branching_enabled()
    }

    async fn create_database_branch(&self, name: &str) -> Result<DatabaseBranch> {
        if !self.inner.database_branching_enabled() {
            return Err(ProviderError::DatabaseBranchingDisabled);
        }
        tracing::info!(database = %name, "[dry run] Would create database branch");
        Ok(DatabaseBranch {
            name: name.to_string(),
            url: format!("libsql://{name}.dry-run"),
            token: String::new(),
        })
    }

    async fn destroy_database_branch(&self, name: &str) -> Result<DeleteOutcome> {
        tracing::info!(database = %name, "[dry run] Would destroy database branch");
        Ok(DeleteOutcome::Deleted)
    }

    async fn list_database_branches(&self) -> Result<Vec<String>> {
        self.inner.list_database_branches().await
    }

    async fn deploy_worker(&self, name: &str, config: &WorkerConfig) -> Result<()> {
        tracing::info!(worker = %name, ?config, "[dry run] Would deploy worker");
        Ok(())
    }

    async fn delete_worker(&self, name: &str) -> Result<DeleteOutcome> {
        tracing::info!(worker = %name, "[dry run] Would delete worker");
        Ok(DeleteOutcome::Deleted)
    }

    async fn list_workers(&self) -> Result<Vec<String>> {
        self.inner.list_workers().await
    }

    async fn verify_route(&self, name: &str) -> Result<bool> {
        tracing::info!(worker = %name, "[dry run] Skipping route verification");
        Ok(true)
    }

    async fn health_check(&self, url: &str) -> HealthStatus {
        self.inner.health_check(url).await
    }
}
