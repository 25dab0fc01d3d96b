//! The production provider: Cloudflare for workers and KV, Turso for database
//! branches, and a plain HTTP client for health probes.

use std::time::Duration;

use async_trait::async_trait;

use crate::cloudflare::CloudflareClient;
use crate::error::{ProviderError, Result};
use crate::provider::ResourceProvider;
use crate::turso::TursoClient;
use crate::types::{
    DatabaseBranch, DeleteOutcome, HealthStatus, KvNamespace, ProviderConfig, WorkerConfig,
};

/// [`ResourceProvider`] backed by the real cloud APIs.
#[derive(Debug, Clone)]
pub struct PlatformProvider {
    cloudflare: CloudflareClient,
    turso: Option<TursoClient>,
    health_client: reqwest::Client,
}

impl PlatformProvider {
    /// Build the provider from configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if an HTTP client cannot be built.
    pub fn new(config: ProviderConfig) -> Result<Self> {
        let cloudflare = CloudflareClient::new(config.cloudflare, config.request_timeout)?;
        let turso = config
            .turso
            .map(|turso| TursoClient::new(turso, config.request_timeout))
            .transpose()?;
        let health_client = reqwest::Client::builder()
            .timeout(config.health_timeout)
            .connect_timeout(Duration::from_secs(5))
            .build()?;

        if turso.is_none() {
            tracing::info!("Database branching not configured; previews will use the shared database");
        }

        Ok(Self {
            cloudflare,
            turso,
            health_client,
        })
    }

    fn turso(&self) -> Result<&TursoClient> {
        self.turso
            .as_ref()
            .ok_or(ProviderError::DatabaseBranchingDisabled)
    }
}

#[async_trait]
impl ResourceProvider for PlatformProvider {
    async fn create_kv_namespace(&self, title: &str) -> Result<KvNamespace> {
        self.cloudflare.create_kv_namespace(title).await
    }

    async fn delete_kv_namespace(&self, id: &str) -> Result<DeleteOutcome> {
        self.cloudflare.delete_kv_namespace(id).await
    }

    async fn list_kv_namespaces(&self) -> Result<Vec<KvNamespace>> {
        self.cloudflare.list_kv_namespaces().await
    }

    fn database_branching_enabled(&self) -> bool {
        self.turso.is_some()
    }

    async fn create_database_branch(&self, name: &str) -> Result<DatabaseBranch> {
        self.turso()?.create_branch(name).await
    }

    async fn destroy_database_branch(&self, name: &str) -> Result<DeleteOutcome> {
        match &self.turso {
            Some(turso) => turso.destroy_branch(name).await,
            None => Ok(DeleteOutcome::NotFound),
        }
    }

    async fn list_database_branches(&self) -> Result<Vec<String>> {
        match &self.turso {
            Some(turso) => {
                let parent = &turso.config().parent_database;
                let mut names = turso.list_databases().await?;
                names.retain(|name| name != parent);
                Ok(names)
            }
            None => Ok(Vec::new()),
        }
    }

    async fn deploy_worker(&self, name: &str, config: &WorkerConfig) -> Result<()> {
        self.cloudflare.deploy_worker(name, config).await
    }

    async fn delete_worker(&self, name: &str) -> Result<DeleteOutcome> {
        self.cloudflare.delete_worker(name).await
    }

    async fn list_workers(&self) -> Result<Vec<String>> {
        self.cloudflare.list_workers().await
    }

    async fn verify_route(&self, name: &str) -> Result<bool> {
        self.cloudflare.verify_route(name).await
    }

    async fn health_check(&self, url: &str) -> HealthStatus {
        match self.health_client.get(url).send().await {
            Ok(response) if response.status() == reqwest::StatusCode::OK => HealthStatus::Healthy,
            Ok(response) => HealthStatus::Unhealthy {
                reason: format!("status {}", response.status().as_u16()),
            },
            Err(e) if e.is_timeout() => HealthStatus::Unhealthy {
                reason: "timed out".to_string(),
            },
            Err(e) => HealthStatus::Unhealthy {
                reason: e.to_string(),
            },
        }
    }
}
