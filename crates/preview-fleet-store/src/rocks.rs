//! `RocksDB` storage implementation.
//!
//! This module provides the `RocksStore` implementation of the `Store` trait.

use std::path::Path;
use std::sync::Arc;

use chrono::Utc;
use parking_lot::Mutex;
use preview_fleet_core::EnvironmentId;
use rocksdb::{
    BoundColumnFamily, ColumnFamilyDescriptor, DBWithThreadMode, IteratorMode, MultiThreaded,
    Options, WriteBatch,
};

use crate::error::{Result, StoreError};
use crate::keys;
use crate::schema::{all_column_families, cf};
use crate::types::{EnvironmentRecord, EnvironmentStatus};
use crate::{CorruptedEntry, EnvironmentScan, Store};

/// RocksDB-backed storage implementation.
pub struct RocksStore {
    db: Arc<DBWithThreadMode<MultiThreaded>>,
    /// Serializes writers so read-modify-write and index maintenance stay consistent.
    write_lock: Mutex<()>,
}

impl RocksStore {
    /// Open or create a `RocksDB` database at the given path.
    ///
    /// # Errors
    ///
    /// Returns an error if the database cannot be opened or created.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let mut opts = Options::default();
        opts.create_if_missing(true);
        opts.create_missing_column_families(true);

        let cf_descriptors: Vec<_> = all_column_families()
            .into_iter()
            .map(|name| ColumnFamilyDescriptor::new(name, Options::default()))
            .collect();

        let db = DBWithThreadMode::open_cf_descriptors(&opts, path, cf_descriptors)
            .map_err(|e| StoreError::Database(e.to_string()))?;

        Ok(Self {
            db: Arc::new(db),
            write_lock: Mutex::new(()),
        })
    }

    /// Get a column family handle.
    fn cf(&self, name: &str) -> Result<Arc<BoundColumnFamily<'_>>> {
        self.db
            .cf_handle(name)
            .ok_or_else(|| StoreError::Database(format!("column family not found: {name}")))
    }

    /// Serialize a value using CBOR.
    fn serialize<T: serde::Serialize>(value: &T) -> Result<Vec<u8>> {
        let mut buf = Vec::new();
        ciborium::into_writer(value, &mut buf)
            .map_err(|e| StoreError::Serialization(e.to_string()))?;
        Ok(buf)
    }

    /// Decode a stored record, reporting failures as corruption of `key`.
    fn decode(key: &[u8], data: &[u8]) -> Result<EnvironmentRecord> {
        ciborium::from_reader(data).map_err(|e| StoreError::Corruption {
            key: keys::display_key(key),
            reason: e.to_string(),
        })
    }

    fn read(&self, id: &EnvironmentId) -> Result<Option<EnvironmentRecord>> {
        let cf = self.cf(cf::ENVIRONMENTS)?;
        let key = keys::environment_key(id);

        self.db
            .get_cf(&cf, &key)
            .map_err(|e| StoreError::Database(e.to_string()))?
            .map(|data| Self::decode(&key, &data))
            .transpose()
    }

    /// Store undecodable bytes under `id`, indexed as active.
    #[cfg(any(test, feature = "test-utils"))]
    pub fn write_garbage(&self, id: &EnvironmentId) -> Result<()> {
        let _guard = self.write_lock.lock();
        let cf_environments = self.cf(cf::ENVIRONMENTS)?;
        let cf_by_status = self.cf(cf::ENVIRONMENTS_BY_STATUS)?;

        let mut batch = WriteBatch::default();
        batch.put_cf(&cf_environments, keys::environment_key(id), b"\xff\x00not cbor");
        batch.put_cf(
            &cf_by_status,
            keys::status_environment_key(EnvironmentStatus::Active.as_u8(), id),
            [],
        );
        self.db
            .write(batch)
            .map_err(|e| StoreError::Database(e.to_string()))
    }

    /// Write a record and its status index entry. Caller must hold `write_lock`.
    fn write_locked(&self, record: &EnvironmentRecord) -> Result<()> {
        let cf_environments = self.cf(cf::ENVIRONMENTS)?;
        let cf_by_status = self.cf(cf::ENVIRONMENTS_BY_STATUS)?;

        let value = Self::serialize(record)?;
        let mut batch = WriteBatch::default();
        batch.put_cf(&cf_environments, keys::environment_key(&record.id), &value);

        // The previous status may be unreadable, so clear every other index slot.
        for status in EnvironmentStatus::ALL {
            let key = keys::status_environment_key(status.as_u8(), &record.id);
            if status == record.status {
                batch.put_cf(&cf_by_status, key, []);
            } else {
                batch.delete_cf(&cf_by_status, key);
            }
        }

        self.db
            .write(batch)
            .map_err(|e| StoreError::Database(e.to_string()))
    }
}

impl Store for RocksStore {
    fn put_environment(&self, record: &EnvironmentRecord) -> Result<()> {
        let _guard = self.write_lock.lock();
        self.write_locked(record)
    }

    fn get_environment(&self, id: &EnvironmentId) -> Result<Option<EnvironmentRecord>> {
        self.read(id)
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
        let _guard = self.write_lock.lock();

        let mut record = self.read(id)?.ok_or(StoreError::NotFound)?;
        update(&mut record)?;
        record.id = id.clone();
        record.updated_at = Utc::now();
        self.write_locked(&record)?;

        Ok(record)
    }

    fn delete_environment(&self, id: &EnvironmentId) -> Result<bool> {
        let cf_environments = self.cf(cf::ENVIRONMENTS)?;
        let cf_by_status = self.cf(cf::ENVIRONMENTS_BY_STATUS)?;
        let key = keys::environment_key(id);

        let _guard = self.write_lock.lock();

        let existed = self
            .db
            .get_pinned_cf(&cf_environments, &key)
            .map_err(|e| StoreError::Database(e.to_string()))?
            .is_some();

        let mut batch = WriteBatch::default();
        batch.delete_cf(&cf_environments, &key);
        for status in EnvironmentStatus::ALL {
            batch.delete_cf(&cf_by_status, keys::status_environment_key(status.as_u8(), id));
        }

        self.db
            .write(batch)
            .map_err(|e| StoreError::Database(e.to_string()))?;

        Ok(existed)
    }

    fn list_environments_by_status(
        &self,
        status: EnvironmentStatus,
    ) -> Result<Vec<EnvironmentRecord>> {
        let cf_by_status = self.cf(cf::ENVIRONMENTS_BY_STATUS)?;
        let prefix = keys::status_prefix(status.as_u8());

        let mut records = Vec::new();
        let iter = self.db.iterator_cf(
            &cf_by_status,
            IteratorMode::From(&prefix, rocksdb::Direction::Forward),
        );

        for item in iter {
            let (key, _) = item.map_err(|e| StoreError::Database(e.to_string()))?;

            if !key.starts_with(&prefix) {
                break;
            }

            let Some(id) = keys::extract_environment_id_from_status_key(&key) else {
                tracing::warn!(key = %keys::display_key(&key), "Skipping malformed status index key");
                continue;
            };

            match self.read(&id) {
                Ok(Some(record)) => records.push(record),
                Ok(None) => {}
                Err(StoreError::Corruption { key, reason }) => {
                    tracing::warn!(%key, %reason, "Skipping corrupted environment record");
                }
                Err(e) => return Err(e),
            }
        }

        Ok(records)
    }

    fn count_environments_by_status(&self, status: EnvironmentStatus) -> Result<u32> {
        let cf_by_status = self.cf(cf::ENVIRONMENTS_BY_STATUS)?;
        let prefix = keys::status_prefix(status.as_u8());

        let mut count = 0u32;
        let iter = self.db.iterator_cf(
            &cf_by_status,
            IteratorMode::From(&prefix, rocksdb::Direction::Forward),
        );

        for item in iter {
            let (key, _) = item.map_err(|e| StoreError::Database(e.to_string()))?;

            if !key.starts_with(&prefix) {
                break;
            }

            count += 1;
        }

        Ok(count)
    }

    fn scan_environments(&self) -> Result<EnvironmentScan> {
        let cf = self.cf(cf::ENVIRONMENTS)?;

        let mut scan = EnvironmentScan::default();
        let iter = self.db.iterator_cf(&cf, IteratorMode::Start);

        for item in iter {
            let (key, value) = item.map_err(|e| StoreError::Database(e.to_string()))?;
            match Self::decode(&key, &value) {
                Ok(record) => scan.records.push(record),
                Err(StoreError::Corruption { key: display, reason }) => {
                    let environment_id = std::str::from_utf8(&key)
                        .ok()
                        .and_then(|s| EnvironmentId::parse(s).ok());
                    scan.corrupted.push(CorruptedEntry {
                        key: display,
                        environment_id,
                        reason,
                    });
                }
                Err(e) => return Err(e),
            }
        }

        Ok(scan)
    }
}
