//! `RocksDB` metadata store for preview-fleet.
//!
//! This crate persists one [`EnvironmentRecord`] per preview environment using
//! `RocksDB` with column families for indexing.
//!
//! # Architecture
//!
//! The storage uses the following column families:
//!
//! - `environments`: Primary environment records, keyed by environment id
//! - `environments_by_status`: Index for counting and listing environments by status
//!
//! Records are encoded with CBOR. A record that can no longer be decoded is
//! reported as [`StoreError::Corruption`] rather than silently dropped, and
//! [`Store::scan_environments`] lists such entries separately so cleanup can
//! remove them.
//!
//! # Example
//!
//! ```no_run
//! use preview_fleet_store::{EnvironmentStatus, RocksStore, Store};
//!
//! let store = RocksStore::open("/tmp/preview-fleet-db").unwrap();
//! let active = store.list_environments_by_status(EnvironmentStatus::Active).unwrap();
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod dry_run;
pub mod error;
pub mod keys;
pub mod rocks;
pub mod schema;
pub mod types;

pub use dry_run::DryRunStore;
pub use error::{Result, StoreError};
pub use rocks::RocksStore;
pub use types::{
    DatabaseBranchRef, EnvironmentRecord, EnvironmentResources, EnvironmentStatus, KvNamespaceRef,
};

use preview_fleet_core::EnvironmentId;

/// An entry whose value could not be decoded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CorruptedEntry {
    /// Raw key, rendered lossily as UTF-8.
    pub key: String,
    /// The environment id the key names, if it parses as one.
    pub environment_id: Option<EnvironmentId>,
    /// Decoding failure.
    pub reason: String,
}

/// Result of a full scan over the environment records.
#[derive(Debug, Clone, Default)]
pub struct EnvironmentScan {
    /// Records that decoded successfully.
    pub records: Vec<EnvironmentRecord>,
    /// Entries that did not.
    pub corrupted: Vec<CorruptedEntry>,
}

/// The storage trait defining all metadata operations.
///
/// This trait abstracts the storage layer, allowing for different implementations
/// (`RocksDB`, or a dry-run wrapper that never writes).
pub trait Store: Send + Sync {
    /// Insert or replace an environment record.
    ///
    /// This also maintains the status index.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn put_environment(&self, record: &EnvironmentRecord) -> Result<()>;

    /// Get an environment record by id.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Corruption`] if the stored value cannot be decoded,
    /// or another error if the database operation fails.
    fn get_environment(&self, id: &EnvironmentId) -> Result<Option<EnvironmentRecord>>;

    /// Read-modify-write a record atomically with respect to other writers.
    ///
    /// `update` runs against the current record; if it returns an error nothing
    /// is written. `updated_at` is refreshed on success.
    ///
    /// # Errors
    ///
    /// Returns the closure's error, or a store error converted into `E`
    /// ([`StoreError::NotFound`] if no record exists).
    fn update_environment<F, E>(
        &self,
        id: &EnvironmentId,
        update: F,
    ) -> std::result::Result<EnvironmentRecord, E>
    where
        F: FnOnce(&mut EnvironmentRecord) -> std::result::Result<(), E>,
        E: From<StoreError>;

    /// Delete an environment record and its index entries.
    ///
    /// Works even when the stored value is corrupted. Returns whether a
    /// record was present.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn delete_environment(&self, id: &EnvironmentId) -> Result<bool>;

    /// List all environments with a given status.
    ///
    /// Undecodable records are skipped; use [`Store::scan_environments`] to find them.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn list_environments_by_status(&self, status: EnvironmentStatus)
        -> Result<Vec<EnvironmentRecord>>;

    /// Count environments with a given status using only the index.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn count_environments_by_status(&self, status: EnvironmentStatus) -> Result<u32>;

    /// Read every record, separating decodable records from corrupted entries.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn scan_environments(&self) -> Result<EnvironmentScan>;

    /// Count environments that occupy a capacity slot.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn count_live_environments(&self) -> Result<u32> {
        let mut total = 0;
        for status in EnvironmentStatus::ALL {
            if status.counts_toward_capacity() {
                total += self.count_environments_by_status(status)?;
            }
        }
        Ok(total)
    }
}
