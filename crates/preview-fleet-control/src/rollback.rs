//! Compensating actions for partially provisioned environments.
//!
//! Every completed provisioning step pushes its inverse onto a [`RollbackStack`].
//! If a critical step fails the stack is unwound newest-first. Compensations
//! that fail are returned so the caller can keep them tracked.

use std::fmt;
use std::time::Duration;

use preview_fleet_provider::{DeleteOutcome, ProviderError, ResourceProvider};

use crate::pool::with_timeout;

/// The inverse of one provisioning step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Compensation {
    /// Delete a KV namespace that was created.
    DeleteKvNamespace {
        /// Provider id.
        id: String,
        /// Namespace title.
        title: String,
    },
    /// Destroy a database branch that was created.
    DestroyDatabaseBranch {
        /// Branch name.
        name: String,
    },
    /// Delete a worker that was (possibly partially) deployed.
    DeleteWorker {
        /// Worker name.
        name: String,
    },
}

impl Compensation {
    async fn run<P: ResourceProvider + ?Sized>(
        &self,
        provider: &P,
        timeout: Duration,
    ) -> Result<DeleteOutcome, ProviderError> {
        match self {
            Self::DeleteKvNamespace { id, .. } => {
                with_timeout(timeout, "delete KV namespace", provider.delete_kv_namespace(id)).await
            }
            Self::DestroyDatabaseBranch { name } => {
                with_timeout(
                    timeout,
                    "destroy database branch",
                    provider.destroy_database_branch(name),
                )
                .await
            }
            Self::DeleteWorker { name } => {
                with_timeout(timeout, "delete worker", provider.delete_worker(name)).await
            }
        }
    }
}

impl fmt::Display for Compensation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::DeleteKvNamespace { id, title } => write!(f, "kv namespace {title} ({id})"),
            Self::DestroyDatabaseBranch { name } => write!(f, "database branch {name}"),
            Self::DeleteWorker { name } => write!(f, "worker {name}"),
        }
    }
}

/// Compensations for one provisioning call, in the order their steps completed.
#[derive(Debug, Default)]
pub struct RollbackStack {
    actions: Vec<Compensation>,
}

impl RollbackStack {
    /// An empty stack.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the inverse of a completed step.
    pub fn push(&mut self, action: Compensation) {
        self.actions.push(action);
    }

    /// Number of pending compensations.
    #[must_use]
    pub fn len(&self) -> usize {
        self.actions.len()
    }

    /// Whether nothing needs undoing.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }

    /// Run every compensation newest-first and return those that failed.
    ///
    /// A compensation never stops the unwind; a resource that is already gone
    /// counts as compensated.
    pub async fn unwind<P: ResourceProvider + ?Sized>(
        self,
        provider: &P,
        timeout: Duration,
    ) -> Vec<Compensation> {
        let mut failed = Vec::new();

        for action in self.actions.into_iter().rev() {
            match action.run(provider, timeout).await {
                Ok(outcome) => {
                    tracing::debug!(resource = %action, ?outcome, "Rolled back");
                }
                Err(e) => {
                    tracing::error!(resource = %action, error = %e, "Rollback step failed");
                    failed.push(action);
                }
            }
        }

        failed
    }
}
