//! A store wrapper that reads through and never writes.
//!
//! Used for `--dry-run`: every mutation is logged and reported as if it had
//! succeeded, while the underlying database stays untouched.

use preview_fleet_core::EnvironmentId;

use crate::error::{Result, StoreError};
use crate::types::{EnvironmentRecord, EnvironmentStatus};
use crate::{EnvironmentScan, Store};

/// Read-through, write-nothing store.
pub struct DryRunStore<S> {
    inner: S,
}

impl<S: Store> DryRunStore<S> {
    /// Wrap a store.
    pub fn new(inner: S) -> Self {
        Self { inner }
    }

    /// The wrapped store.
    pub fn inner(&self) -> &S {
        &self.inner
    }
}

impl<S: Store> Store for DryRunStore<S> {
    fn put_environment(&self, record: &EnvironmentRecord) -> Result<()> {
        tracing::info!(
            environment_id = %record.id,
            status = %record.status,
            "[dry run] Would write environment record"
        );
        Ok(())
    }

    fn get_environment(&self, id: &EnvironmentId) -> Result<Option<EnvironmentRecord>> {
        self.inner.get_environment(id)
    }

    fn update_environment<F, E>(
        &self,
        id: &EnvironmentId,
        update: F,
    ) -> std::result::Result<EnvironmentRecord, E>
    where
        F: FnOnce(&mut EnvironmentRecord) -> std::result::Result<(), E>,
        E: From<StoreError>,
    {
        let mut record = self
            .inner
            .get_environment(id)?
            .ok_or(StoreError::NotFound)?;
        update(&mut record)?;
        tracing::info!(
            environment_id = %id,
            status = %record.status,
            "[dry run] Would update environment record"
        );
        Ok(record)
    }

    fn delete_environment(&self, id: &EnvironmentId) -> Result<bool> {
        let existed = match self.inner.get_environment(id) {
            Ok(record) => record.is_some(),
            Err(StoreError::Corruption { .. }) => true,
            Err(e) => return Err(e),
        };
        tracing::info!(environment_id = %id, "[dry run] Would delete environment record");
        Ok(existed)
    }

    fn list_environments_by_status(
        &self,
        status: EnvironmentStatus,
    ) -> Result<Vec<EnvironmentRecord>> {
        self.inner.list_environments_by_status(status)
    }

    fn count_environments_by_status(&self, status: EnvironmentStatus) -> Result<u32> {
        self.inner.count_environments_by_status(status)
    }

    fn scan_environments(&self) -> Result<EnvironmentScan> {
        self.inner.scan_environments()
    }
}
