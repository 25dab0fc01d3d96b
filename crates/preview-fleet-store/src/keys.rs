//! Key encoding utilities for `RocksDB`.
//!
//! Environment ids are ASCII, so keys are the id bytes themselves; the status
//! index prepends a single status byte to support prefix scans.

use preview_fleet_core::EnvironmentId;

/// Encode an environment key (just the id bytes).
#[must_use]
pub fn environment_key(id: &EnvironmentId) -> Vec<u8> {
    id.as_bytes().to_vec()
}

/// Encode a status-environment index key: `status || environment_id`.
#[must_use]
pub fn status_environment_key(status: u8, id: &EnvironmentId) -> Vec<u8> {
    let mut key = Vec::with_capacity(1 + id.as_bytes().len());
    key.push(status);
    key.extend_from_slice(id.as_bytes());
    key
}

/// Encode a status prefix for scanning all environments by status.
#[must_use]
pub fn status_prefix(status: u8) -> Vec<u8> {
    vec![status]
}

/// Extract the environment id from a status-environment key.
///
/// Returns `None` if the key is empty or the id part is not a valid environment id.
#[must_use]
pub fn extract_environment_id_from_status_key(key: &[u8]) -> Option<EnvironmentId> {
    let id = std::str::from_utf8(key.get(1..)?).ok()?;
    EnvironmentId::parse(id).ok()
}

/// Render a raw key for diagnostics.
#[must_use]
pub fn display_key(key: &[u8]) -> String {
    String::from_utf8_lossy(key).into_owned()
}
