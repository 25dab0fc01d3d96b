//! TTL expiry.
//!
//! Every environment older than the TTL is deleted, whatever its state, except
//! a `provisioning` record still inside its grace window.

use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use preview_fleet_core::EnvironmentId;
use preview_fleet_provider::ResourceProvider;
use preview_fleet_store::{EnvironmentRecord, EnvironmentStatus, Store};

use crate::error::{ControlError, Result};
use crate::lifecycle;
use crate::pool::run_bounded;
use crate::provisioner::ResourceProvisioner;
use crate::types::PreviewConfig;

/// Totals of a cleanup pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CleanupSummary {
    /// Environments removed.
    pub deleted: u32,
    /// Environments left in place.
    pub kept: u32,
    /// Failures encountered.
    pub errors: u32,
    /// One line per failure.
    pub failures: Vec<String>,
}

impl CleanupSummary {
    /// Fold another pass into this one.
    pub fn merge(&mut self, other: Self) {
        self.deleted += other.deleted;
        self.kept += other.kept;
        self.errors += other.errors;
        self.failures.extend(other.failures);
    }

    fn error(&mut self, message: String) {
        self.errors += 1;
        self.failures.push(message);
    }
}

impl fmt::Display for CleanupSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} deleted, {} kept, {} errors",
            self.deleted, self.kept, self.errors
        )
    }
}

enum Outcome {
    Deleted,
    Partial(String),
    Failed(String),
}

/// Deletes environments past their TTL.
pub struct ExpiryReconciler<P, S> {
    provisioner: ResourceProvisioner<P, S>,
    store: Arc<S>,
    config: Arc<PreviewConfig>,
}

impl<P: ResourceProvider, S: Store> ExpiryReconciler<P, S> {
    /// Create a new reconciler.
    #[must_use]
    pub fn new(
        provisioner: ResourceProvisioner<P, S>,
        store: Arc<S>,
        config: Arc<PreviewConfig>,
    ) -> Self {
        Self {
            provisioner,
            store,
            config,
        }
    }

    /// Run one expiry pass against the current time.
    ///
    /// # Errors
    ///
    /// Returns an error only if the store cannot be scanned.
    pub async fn run(&self) -> Result<CleanupSummary> {
        self.run_at(Utc::now()).await
    }

    /// Run one expiry pass as if the time were `now`.
    ///
    /// # Errors
    ///
    /// Returns an error only if the store cannot be scanned.
    pub async fn run_at(&self, now: DateTime<Utc>) -> Result<CleanupSummary> {
        let ttl = self.config.ttl();
        let grace = self.config.provisioning_grace();
        let scan = self.store.scan_environments()?;

        let mut summary = CleanupSummary::default();
        let mut expired = Vec::new();

        for record in scan.records {
            if lifecycle::is_in_flight(&record, grace, now) || !record.is_older_than(ttl, now) {
                summary.kept += 1;
            } else {
                expired.push(record);
            }
        }
        if !scan.corrupted.is_empty() {
            tracing::warn!(
                count = scan.corrupted.len(),
                "Skipping corrupted records during expiry; orphan cleanup handles them"
            );
        }

        tracing::info!(
            candidates = expired.len(),
            ttl_days = self.config.ttl_days,
            "Running expiry"
        );

        let outcomes = run_bounded(expired, self.config.max_concurrency, |record| async move {
            let id = record.id.clone();
            (id, self.expire(record).await)
        })
        .await;

        for (id, outcome) in outcomes {
            match outcome {
                Outcome::Deleted => summary.deleted += 1,
                Outcome::Partial(message) => {
                    summary.deleted += 1;
                    summary.error(format!("{id}: {message}"));
                }
                Outcome::Failed(message) => {
                    summary.kept += 1;
                    summary.error(format!("{id}: {message}"));
                }
            }
        }

        tracing::info!(
            deleted = summary.deleted,
            kept = summary.kept,
            errors = summary.errors,
            "Expiry complete"
        );
        Ok(summary)
    }

    async fn expire(&self, record: EnvironmentRecord) -> Outcome {
        let id = record.id.clone();
        tracing::info!(
            environment_id = %id,
            status = %record.status,
            created_at = %record.created_at,
            "Environment expired"
        );

        if record.status == EnvironmentStatus::Active {
            if let Err(e) = self.store.update_environment(&id, |r: &mut EnvironmentRecord| {
                lifecycle::transition(r, EnvironmentStatus::Expired)
            }) {
                tracing::debug!(environment_id = %id, error = %e, "Could not mark environment expired");
            }
        }

        match self.provisioner.delete(&id).await {
            Ok(result) if result.failed.is_empty() => Outcome::Deleted,
            Ok(result) => Outcome::Partial(result.failed.join(", ")),
            Err(e) => self.force_remove_record(&id, &e),
        }
    }

    /// Resource deletion could not even start; drop the record so the next
    /// orphan pass treats whatever is left as untracked.
    fn force_remove_record(&self, id: &EnvironmentId, cause: &ControlError) -> Outcome {
        tracing::error!(environment_id = %id, error = %cause, "Expiry deletion failed");
        match self.store.delete_environment(id) {
            Ok(_) => Outcome::Partial(cause.to_string()),
            Err(e) => Outcome::Failed(format!("{cause}; record removal failed: {e}")),
        }
    }
}
