//! Error types for the control layer.
//!
//! This module defines all errors that can occur while creating, deleting and
//! reconciling preview environments.

use std::fmt;

use preview_fleet_core::{EnvironmentId, IdError};
use preview_fleet_provider::ProviderError;
use preview_fleet_store::{EnvironmentStatus, StoreError};
use thiserror::Error;

/// A result type using `ControlError`.
pub type Result<T> = std::result::Result<T, ControlError>;

/// Boxed cause of a failed provisioning step.
pub type StepSource = Box<dyn std::error::Error + Send + Sync + 'static>;

/// The provisioning step that failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProvisioningStep {
    /// Writing or updating the metadata record.
    Metadata,
    /// Creating the KV namespaces.
    KvNamespaces,
    /// Creating the database branch.
    DatabaseBranch,
    /// Deploying the worker.
    WorkerDeployment,
    /// Verifying the public route.
    RouteVerification,
}

impl ProvisioningStep {
    /// Whether a failure at this step aborts provisioning.
    #[must_use]
    pub const fn is_critical(self) -> bool {
        matches!(
            self,
            Self::Metadata | Self::KvNamespaces | Self::WorkerDeployment
        )
    }
}

impl fmt::Display for ProvisioningStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Metadata => "metadata",
            Self::KvNamespaces => "kv namespaces",
            Self::DatabaseBranch => "database branch",
            Self::WorkerDeployment => "worker deployment",
            Self::RouteVerification => "route verification",
        })
    }
}

/// Errors that can occur in control operations.
#[derive(Debug, Error)]
pub enum ControlError {
    /// The environment cap is reached even after running expiry.
    #[error("capacity exceeded: {in_use} of {limit} preview environments in use")]
    CapacityExceeded {
        /// Environments currently occupying a slot.
        in_use: u32,
        /// The configured maximum.
        limit: u32,
    },

    /// A critical provisioning step failed; the call's own partial work was rolled back.
    #[error("provisioning {environment_id} failed at {step}: {source}")]
    ProvisioningError {
        /// The environment being provisioned.
        environment_id: EnvironmentId,
        /// The step that failed.
        step: ProvisioningStep,
        /// The underlying failure.
        #[source]
        source: StepSource,
    },

    /// Some resource deletions failed. The metadata record was still removed.
    #[error("deletion of {environment_id} left {} resource(s) behind: {}", .failed.len(), .failed.join(", "))]
    DeletionPartialFailure {
        /// The environment being deleted.
        environment_id: EnvironmentId,
        /// Descriptions of the failed deletions.
        failed: Vec<String>,
    },

    /// A health probe failed.
    #[error("health check failed for {environment_id}: {reason}")]
    HealthCheckFailure {
        /// The environment probed.
        environment_id: EnvironmentId,
        /// Why the probe failed.
        reason: String,
    },

    /// A stored record cannot be decoded.
    #[error("corrupted metadata record {key}: {reason}")]
    MetadataCorruption {
        /// The raw key of the record.
        key: String,
        /// Why decoding failed.
        reason: String,
    },

    /// Another invocation is still provisioning this environment.
    #[error("environment {0} is still being provisioned")]
    ProvisioningInProgress(EnvironmentId),

    /// The requested state transition is not valid.
    #[error("invalid state transition for {environment_id}: cannot transition from {from} to {to}")]
    InvalidState {
        /// The environment being transitioned.
        environment_id: EnvironmentId,
        /// The current state.
        from: EnvironmentStatus,
        /// The requested target state.
        to: EnvironmentStatus,
    },

    /// An environment id or PR number was malformed.
    #[error("invalid environment: {0}")]
    InvalidEnvironmentId(#[from] IdError),

    /// Invalid configuration.
    #[error("configuration error: {0}")]
    Config(String),

    /// Storage layer error.
    #[error("storage error: {0}")]
    Store(#[source] StoreError),

    /// Provider error.
    #[error("provider error: {0}")]
    Provider(#[from] ProviderError),

    /// Internal error.
    #[error("internal error: {0}")]
    Internal(String),
}

impl From<StoreError> for ControlError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::Corruption { key, reason } => Self::MetadataCorruption { key, reason },
            other => Self::Store(other),
        }
    }
}

impl ControlError {
    /// Wrap a step failure.
    pub fn provisioning(
        environment_id: &EnvironmentId,
        step: ProvisioningStep,
        source: impl Into<StepSource>,
    ) -> Self {
        Self::ProvisioningError {
            environment_id: environment_id.clone(),
            step,
            source: source.into(),
        }
    }

    /// Returns true if this error might be resolved by retrying.
    #[must_use]
    pub fn is_retriable(&self) -> bool {
        match self {
            Self::Provider(e) => e.is_retriable(),
            Self::ProvisioningError { source, .. } => source
                .downcast_ref::<ProviderError>()
                .is_some_and(ProviderError::is_retriable),
            Self::ProvisioningInProgress(_) | Self::Store(_) | Self::DeletionPartialFailure { .. } => true,
            Self::CapacityExceeded { .. }
            | Self::HealthCheckFailure { .. }
            | Self::MetadataCorruption { .. }
            | Self::InvalidState { .. }
            | Self::InvalidEnvironmentId(_)
            | Self::Config(_)
            | Self::Internal(_) => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn corruption_maps_to_metadata_corruption() {
        let err: ControlError = StoreError::Corruption {
            key: "pr-1".into(),
            reason: "bad cbor".into(),
        }
        .into();
        assert!(matches!(err, ControlError::MetadataCorruption { ref key, .. } if key == "pr-1"));

        let err: ControlError = StoreError::NotFound.into();
        assert!(matches!(err, ControlError::Store(StoreError::NotFound)));
    }

    #[test]
    fn provisioning_error_names_step() {
        let id = EnvironmentId::derive(42, "feature/x").unwrap();
        let err = ControlError::provisioning(
            &id,
            ProvisioningStep::WorkerDeployment,
            ProviderError::Api {
                status: 500,
                message: "boom".into(),
            },
        );
        let text = err.to_string();
        assert!(text.contains("pr-42-feature-x"));
        assert!(text.contains("worker deployment"));
        assert!(err.is_retriable());
    }

    #[test]
    fn partial_failure_lists_residue() {
        let id = EnvironmentId::derive(7, "docs").unwrap();
        let err = ControlError::DeletionPartialFailure {
            environment_id: id,
            failed: vec!["worker pr-7-docs: timed out".into()],
        };
        assert_eq!(
            err.to_string(),
            "deletion of pr-7-docs left 1 resource(s) behind: worker pr-7-docs: timed out"
        );
    }

    #[test]
    fn critical_steps() {
        assert!(ProvisioningStep::KvNamespaces.is_critical());
        assert!(ProvisioningStep::WorkerDeployment.is_critical());
        assert!(ProvisioningStep::Metadata.is_critical());
        assert!(!ProvisioningStep::DatabaseBranch.is_critical());
        assert!(!ProvisioningStep::RouteVerification.is_critical());
    }

    #[test]
    fn capacity_is_not_retriable() {
        assert!(!ControlError::CapacityExceeded { in_use: 10, limit: 10 }.is_retriable());
    }
}
