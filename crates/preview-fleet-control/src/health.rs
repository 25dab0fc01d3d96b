//! Health probing of active environments.

use std::fmt;
use std::sync::Arc;

use preview_fleet_core::EnvironmentId;
use preview_fleet_provider::{HealthStatus, ResourceProvider};
use preview_fleet_store::{EnvironmentRecord, EnvironmentStatus, Store};

use crate::error::{ControlError, Result};
use crate::pool::run_bounded;
use crate::types::PreviewConfig;

/// Path probed on every preview.
pub const HEALTH_PATH: &str = "/api/health";

/// An environment that failed its probe.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnhealthyEnvironment {
    /// The environment.
    pub environment_id: EnvironmentId,
    /// The URL probed.
    pub url: String,
    /// Why the probe failed.
    pub reason: String,
}

/// Outcome of a monitoring pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HealthReport {
    /// Environments probed.
    pub checked: usize,
    /// Environments that answered 200.
    pub healthy: usize,
    /// Environments that did not.
    pub unhealthy: Vec<UnhealthyEnvironment>,
}

impl HealthReport {
    /// The failures as `ControlError::HealthCheckFailure`s.
    #[must_use]
    pub fn failures(&self) -> Vec<ControlError> {
        self.unhealthy
            .iter()
            .map(|u| ControlError::HealthCheckFailure {
                environment_id: u.environment_id.clone(),
                reason: u.reason.clone(),
            })
            .collect()
    }

    /// Whether every probed environment is healthy.
    #[must_use]
    pub fn all_healthy(&self) -> bool {
        self.unhealthy.is_empty()
    }
}

impl fmt::Display for HealthReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} checked, {} healthy, {} unhealthy",
            self.checked,
            self.healthy,
            self.unhealthy.len()
        )
    }
}

/// The URL probed for an environment.
#[must_use]
pub fn health_url(record: &EnvironmentRecord) -> String {
    format!("{}{HEALTH_PATH}", record.url.trim_end_matches('/'))
}

/// Probes active environments. Never mutates state.
pub struct HealthMonitor<P, S> {
    provider: Arc<P>,
    store: Arc<S>,
    config: Arc<PreviewConfig>,
}

impl<P: ResourceProvider, S: Store> HealthMonitor<P, S> {
    /// Create a new monitor.
    #[must_use]
    pub fn new(provider: Arc<P>, store: Arc<S>, config: Arc<PreviewConfig>) -> Self {
        Self {
            provider,
            store,
            config,
        }
    }

    /// Probe one environment.
    pub async fn probe(&self, record: &EnvironmentRecord) -> HealthStatus {
        let url = health_url(record);
        // The provider's own client times out too; this bounds anything else.
        match tokio::time::timeout(self.config.health_timeout, self.provider.health_check(&url)).await
        {
            Ok(status) => status,
            Err(_) => HealthStatus::Unhealthy {
                reason: "timed out".to_string(),
            },
        }
    }

    /// Probe every active environment.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be read.
    pub async fn run(&self) -> Result<HealthReport> {
        let active = self
            .store
            .list_environments_by_status(EnvironmentStatus::Active)?;

        let results = run_bounded(active, self.config.max_concurrency, |record| async move {
            let status = self.probe(&record).await;
            (record, status)
        })
        .await;

        let mut report = HealthReport {
            checked: results.len(),
            ..HealthReport::default()
        };
        for (record, status) in results {
            match status {
                HealthStatus::Healthy => report.healthy += 1,
                HealthStatus::Unhealthy { reason } => {
                    tracing::warn!(
                        environment_id = %record.id,
                        url = %record.url,
                        %reason,
                        "Preview environment unhealthy"
                    );
                    report.unhealthy.push(UnhealthyEnvironment {
                        url: health_url(&record),
                        environment_id: record.id,
                        reason,
                    });
                }
            }
        }
        report
            .unhealthy
            .sort_by(|a, b| a.environment_id.pr_number().cmp(&b.environment_id.pr_number()));

        tracing::info!(
            checked = report.checked,
            healthy = report.healthy,
            unhealthy = report.unhealthy.len(),
            "Health check complete"
        );
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use preview_fleet_provider::MockProvider;
    use preview_fleet_store::RocksStore;
    use tempfile::TempDir;

    fn record(pr: u32, status: EnvironmentStatus) -> EnvironmentRecord {
        let id = EnvironmentId::derive(pr, "main").unwrap();
        let url = id.preview_url("preview.test");
        let mut record = EnvironmentRecord::new(id, pr, "main", url, Utc::now());
        record.status = status;
        record
    }

    #[tokio::test]
    async fn probes_only_active_environments() {
        let dir = TempDir::new().unwrap();
        let store = Arc::new(RocksStore::open(dir.path()).unwrap());
        let provider = Arc::new(MockProvider::new());

        store.put_environment(&record(1, EnvironmentStatus::Active)).unwrap();
        store.put_environment(&record(2, EnvironmentStatus::Active)).unwrap();
        store.put_environment(&record(3, EnvironmentStatus::Error)).unwrap();
        provider.set_health(
            "https://pr-2-main.preview.test/api/health",
            HealthStatus::Unhealthy {
                reason: "status 502".into(),
            },
        );

        let monitor = HealthMonitor::new(provider, store, Arc::new(PreviewConfig::default()));
        let report = monitor.run().await.unwrap();

        assert_eq!(report.checked, 2);
        assert_eq!(report.healthy, 1);
        assert_eq!(report.to_string(), "2 checked, 1 healthy, 1 unhealthy");
        assert_eq!(report.unhealthy[0].environment_id.as_str(), "pr-2-main");
        assert_eq!(report.unhealthy[0].reason, "status 502");
        assert!(matches!(
            report.failures().as_slice(),
            [ControlError::HealthCheckFailure { .. }]
        ));
    }

    #[test]
    fn health_url_appends_path() {
        let r = record(4, EnvironmentStatus::Active);
        assert_eq!(health_url(&r), "https://pr-4-main.preview.test/api/health");
    }
}
