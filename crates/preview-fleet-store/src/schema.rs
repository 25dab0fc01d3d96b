//! Database schema definitions and column families.
//!
//! This module defines the column families used in `RocksDB` storage.

/// Column family names for the `RocksDB` database.
pub mod cf {
    /// Primary environment records, keyed by environment id.
    pub const ENVIRONMENTS: &str = "environments";

    /// Index: environments by status, keyed by `status || environment_id`.
    pub const ENVIRONMENTS_BY_STATUS: &str = "environments_by_status";
}

/// Returns all column family names for database initialization.
#[must_use]
pub fn all_column_families() -> Vec<&'static str> {
    vec![cf::ENVIRONMENTS, cf::ENVIRONMENTS_BY_STATUS]
}
