//! The provider abstraction.
//!
//! Orchestration only talks to cloud resources through [`ResourceProvider`], so
//! the lifecycle logic can run against real APIs, a dry-run wrapper, or the
//! in-memory mock.

use async_trait::async_trait;

use crate::error::Result;
use crate::types::{DatabaseBranch, DeleteOutcome, HealthStatus, KvNamespace, WorkerConfig};

/// Trait for provisioning and tearing down preview resources.
#[async_trait]
pub trait ResourceProvider: Send + Sync {
    /// Create a KV namespace with the given title.
    ///
    /// # Errors
    ///
    /// Returns an error if the API call fails.
    async fn create_kv_namespace(&self, title: &str) -> Result<KvNamespace>;

    /// Delete a KV namespace by id. A missing namespace is not an error.
    ///
    /// # Errors
    ///
    /// Returns an error if the API call fails.
    async fn delete_kv_namespace(&self, id: &str) -> Result<DeleteOutcome>;

    /// List every KV namespace in the account.
    ///
    /// # Errors
    ///
    /// Returns an error if the API call fails.
    async fn list_kv_namespaces(&self) -> Result<Vec<KvNamespace>>;

    /// Whether database branching is configured.
    fn database_branching_enabled(&self) -> bool;

    /// Create (or fetch, if it already exists) a database branch and mint a token for it.
    ///
    /// # Errors
    ///
    /// Returns [`crate::ProviderError::DatabaseBranchingDisabled`] when branching is not
    /// configured, or another error if the API call fails.
    async fn create_database_branch(&self, name: &str) -> Result<DatabaseBranch>;

    /// Destroy a database branch. A missing branch is not an error.
    ///
    /// # Errors
    ///
    /// Returns an error if the API call fails.
    async fn destroy_database_branch(&self, name: &str) -> Result<DeleteOutcome>;

    /// List database names. Empty when branching is disabled.
    ///
    /// # Errors
    ///
    /// Returns an error if the API call fails.
    async fn list_database_branches(&self) -> Result<Vec<String>>;

    /// Upload the worker bundle under `name` with the given configuration and
    /// enable its public route.
    ///
    /// # Errors
    ///
    /// Returns an error if the bundle cannot be read or the API call fails.
    async fn deploy_worker(&self, name: &str, config: &WorkerConfig) -> Result<()>;

    /// Delete a worker. A missing worker is not an error.
    ///
    /// # Errors
    ///
    /// Returns an error if the API call fails.
    async fn delete_worker(&self, name: &str) -> Result<DeleteOutcome>;

    /// List deployed worker names.
    ///
    /// # Errors
    ///
    /// Returns an error if the API call fails.
    async fn list_workers(&self) -> Result<Vec<String>>;

    /// Check that the worker's public route is enabled.
    ///
    /// # Errors
    ///
    /// Returns an error if the API call fails.
    async fn verify_route(&self, name: &str) -> Result<bool>;

    /// Probe a URL; anything but 200 within the timeout is unhealthy.
    async fn health_check(&self, url: &str) -> HealthStatus;
}

/// An in-memory provider for tests.
#[cfg(any(test, feature = "test-utils"))]
pub mod mock {
    use std::collections::{BTreeMap, HashMap};
    use std::time::Duration;

    use async_trait::async_trait;
    use parking_lot::Mutex;

    use super::ResourceProvider;
    use crate::error::{ProviderError, Result};
    use crate::types::{DatabaseBranch, DeleteOutcome, HealthStatus, KvNamespace, WorkerConfig};

    /// Provider operations that can be made to fail.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub enum Operation {
        /// `create_kv_namespace`
        CreateKvNamespace,
        /// `delete_kv_namespace`
        DeleteKvNamespace,
        /// `list_kv_namespaces`
        ListKvNamespaces,
        /// `create_database_branch`
        CreateDatabaseBranch,
        /// `destroy_database_branch`
        DestroyDatabaseBranch,
        /// `list_database_branches`
        ListDatabaseBranches,
        /// `deploy_worker`
        DeployWorker,
        /// `delete_worker`
        DeleteWorker,
        /// `list_workers`
        ListWorkers,
        /// `verify_route`
        VerifyRoute,
    }

    #[derive(Default)]
    struct MockState {
        namespaces: BTreeMap<String, KvNamespace>,
        branches: BTreeMap<String, DatabaseBranch>,
        workers: BTreeMap<String, WorkerConfig>,
        health: HashMap<String, HealthStatus>,
        /// Remaining successful calls before an operation starts failing.
        failures: HashMap<Operation, usize>,
        latency: HashMap<Operation, Duration>,
        calls: HashMap<Operation, usize>,
        next_id: u64,
    }

    impl MockState {
        fn enter(&mut self, op: Operation) -> Result<()> {
            *self.calls.entry(op).or_default() += 1;
            match self.failures.get_mut(&op) {
                Some(0) => Err(ProviderError::Api {
                    status: 500,
                    message: format!("injected failure: {op:?}"),
                }),
                Some(remaining) => {
                    *remaining -= 1;
                    Ok(())
                }
                None => Ok(()),
            }
        }
    }

    /// A provider that keeps resources in memory, with failure injection.
    pub struct MockProvider {
        state: Mutex<MockState>,
        branching: bool,
    }

    impl Default for MockProvider {
        fn default() -> Self {
            Self::new()
        }
    }

    impl MockProvider {
        /// Create a mock with database branching enabled.
        #[must_use]
        pub fn new() -> Self {
            Self {
                state: Mutex::new(MockState::default()),
                branching: true,
            }
        }

        /// Create a mock with database branching disabled.
        #[must_use]
        pub fn without_branching() -> Self {
            Self {
                branching: false,
                ..Self::new()
            }
        }

        /// Make `op` fail on every call from now on.
        pub fn fail_on(&self, op: Operation) {
            self.state.lock().failures.insert(op, 0);
        }

        /// Let `op` succeed `successes` more times, then fail.
        pub fn fail_after(&self, op: Operation, successes: usize) {
            self.state.lock().failures.insert(op, successes);
        }

        /// Stop injecting failures for `op`.
        pub fn clear_failure(&self, op: Operation) {
            self.state.lock().failures.remove(&op);
        }

        /// Delay every call to `op` by `delay` before it runs.
        pub fn set_latency(&self, op: Operation, delay: Duration) {
            self.state.lock().latency.insert(op, delay);
        }

        /// Set the health probe result for a URL. Unknown URLs are healthy.
        pub fn set_health(&self, url: &str, status: HealthStatus) {
            self.state.lock().health.insert(url.to_string(), status);
        }

        /// Number of calls made to `op`, including failed ones.
        #[must_use]
        pub fn call_count(&self, op: Operation) -> usize {
            self.state.lock().calls.get(&op).copied().unwrap_or(0)
        }

        /// Titles of all live KV namespaces.
        #[must_use]
        pub fn namespace_titles(&self) -> Vec<String> {
            self.state
                .lock()
                .namespaces
                .values()
                .map(|ns| ns.title.clone())
                .collect()
        }

        /// Names of all deployed workers.
        #[must_use]
        pub fn worker_names(&self) -> Vec<String> {
            self.state.lock().workers.keys().cloned().collect()
        }

        /// Names of all database branches.
        #[must_use]
        pub fn branch_names(&self) -> Vec<String> {
            self.state.lock().branches.keys().cloned().collect()
        }

        /// The configuration a worker was deployed with.
        #[must_use]
        pub fn worker_config(&self, name: &str) -> Option<WorkerConfig> {
            self.state.lock().workers.get(name).cloned()
        }

        /// Insert a namespace directly, bypassing failure injection.
        pub fn seed_namespace(&self, title: &str) -> KvNamespace {
            let mut state = self.state.lock();
            state.next_id += 1;
            let ns = KvNamespace {
                id: format!("kv-{:04}", state.next_id),
                title: title.to_string(),
            };
            state.namespaces.insert(ns.id.clone(), ns.clone());
            ns
        }

        /// Insert a worker directly, bypassing failure injection.
        pub fn seed_worker(&self, name: &str) {
            self.state
                .lock()
                .workers
                .insert(name.to_string(), WorkerConfig::default());
        }

        /// Insert a database branch directly, bypassing failure injection.
        pub fn seed_branch(&self, name: &str) {
            self.state
                .lock()
                .branches
                .insert(name.to_string(), Self::branch(name));
        }

        /// Remove a worker directly, simulating out-of-band deletion.
        pub fn remove_worker(&self, name: &str) {
            self.state.lock().workers.remove(name);
        }

        async fn settle(&self, op: Operation) {
            let delay = self.state.lock().latency.get(&op).copied();
            if let Some(delay) = delay {
                tokio::time::sleep(delay).await;
            }
        }

        fn branch(name: &str) -> DatabaseBranch {
            DatabaseBranch {
                name: name.to_string(),
                url: format!("libsql://{name}-mock.turso.io"),
                token: format!("token-{name}"),
            }
        }
    }

    #[async_trait]
    impl ResourceProvider for MockProvider {
        async fn create_kv_namespace(&self, title: &str) -> Result<KvNamespace> {
            self.settle(Operation::CreateKvNamespace).await;
            let mut state = self.state.lock();
            state.enter(Operation::CreateKvNamespace)?;
            if let Some(existing) = state.namespaces.values().find(|ns| ns.title == title) {
                return Err(ProviderError::Api {
                    status: 400,
                    message: format!("a namespace with title {} already exists", existing.title),
                });
            }
            state.next_id += 1;
            let ns = KvNamespace {
                id: format!("kv-{:04}", state.next_id),
                title: title.to_string(),
            };
            state.namespaces.insert(ns.id.clone(), ns.clone());
            Ok(ns)
        }

        async fn delete_kv_namespace(&self, id: &str) -> Result<DeleteOutcome> {
            self.settle(Operation::DeleteKvNamespace).await;
            let mut state = self.state.lock();
            state.enter(Operation::DeleteKvNamespace)?;
            Ok(match state.namespaces.remove(id) {
                Some(_) => DeleteOutcome::Deleted,
                None => DeleteOutcome::NotFound,
            })
        }

        async fn list_kv_namespaces(&self) -> Result<Vec<KvNamespace>> {
            self.settle(Operation::ListKvNamespaces).await;
            let mut state = self.state.lock();
            state.enter(Operation::ListKvNamespaces)?;
            Ok(state.namespaces.values().cloned().collect())
        }

        fn database_branching_enabled(&self) -> bool {
            self.branching
        }

        async fn create_database_branch(&self, name: &str) -> Result<DatabaseBranch> {
            if !self.branching {
                return Err(ProviderError::DatabaseBranchingDisabled);
            }
            self.settle(Operation::CreateDatabaseBranch).await;
            let mut state = self.state.lock();
            state.enter(Operation::CreateDatabaseBranch)?;
            let branch = state
                .branches
                .entry(name.to_string())
                .or_insert_with(|| Self::branch(name));
            Ok(branch.clone())
        }

        async fn destroy_database_branch(&self, name: &str) -> Result<DeleteOutcome> {
            self.settle(Operation::DestroyDatabaseBranch).await;
            let mut state = self.state.lock();
            state.enter(Operation::DestroyDatabaseBranch)?;
            Ok(match state.branches.remove(name) {
                Some(_) => DeleteOutcome::Deleted,
                None => DeleteOutcome::NotFound,
            })
        }

        async fn list_database_branches(&self) -> Result<Vec<String>> {
            self.settle(Operation::ListDatabaseBranches).await;
            let mut state = self.state.lock();
            state.enter(Operation::ListDatabaseBranches)?;
            Ok(state.branches.keys().cloned().collect())
        }

        async fn deploy_worker(&self, name: &str, config: &WorkerConfig) -> Result<()> {
            self.settle(Operation::DeployWorker).await;
            let mut state = self.state.lock();
            state.enter(Operation::DeployWorker)?;
            state.workers.insert(name.to_string(), config.clone());
            Ok(())
        }

        async fn delete_worker(&self, name: &str) -> Result<DeleteOutcome> {
            self.settle(Operation::DeleteWorker).await;
            let mut state = self.state.lock();
            state.enter(Operation::DeleteWorker)?;
            Ok(match state.workers.remove(name) {
                Some(_) => DeleteOutcome::Deleted,
                None => DeleteOutcome::NotFound,
            })
        }

        async fn list_workers(&self) -> Result<Vec<String>> {
            self.settle(Operation::ListWorkers).await;
            let mut state = self.state.lock();
            state.enter(Operation::ListWorkers)?;
            Ok(state.workers.keys().cloned().collect())
        }

        async fn verify_route(&self, name: &str) -> Result<bool> {
            self.settle(Operation::VerifyRoute).await;
            let mut state = self.state.lock();
            state.enter(Operation::VerifyRoute)?;
            Ok(state.workers.contains_key(name))
        }

        async fn health_check(&self, url: &str) -> HealthStatus {
            self.state
                .lock()
                .health
                .get(url)
                .cloned()
                .unwrap_or(HealthStatus::Healthy)
        }
    }

}
