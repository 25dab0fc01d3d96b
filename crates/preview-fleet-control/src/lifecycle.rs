//! Environment lifecycle state machine.
//!
//! This module defines the valid status transitions for preview environments
//! and provides validation logic to ensure state machine invariants are maintained.
//!
//! # State Machine
//!
//! ```text
//!                    ┌─────────────────┐
//!          ┌────────▶│  Provisioning   │─────────────────┐
//!          │         └────────┬────────┘                 │
//!          │ (retry)          │ (all critical steps ok)  │
//!          │                  ▼                          │
//!          │         ┌─────────────────┐                 │
//!          │         │     Active      │──────────┐      │
//!          │         └────────┬────────┘          │      │
//!          │                  │ (age ≥ TTL)       │      │
//!          │                  ▼                   │      │
//!          │         ┌─────────────────┐          │      │
//!          │         │     Expired     │          │      │
//!          │         └────────┬────────┘          │      │
//!          │                  │                   ▼      ▼
//!     ┌─────────┐             │            ┌──────────────────┐
//!     │  Error  │◀────────────┴────────────│     Deleting     │
//!     └────┬────┘   (any live state fails) └────────┬─────────┘
//!          │                                        │
//!          └───────────────────────────────────────▶│ (record removed)
//!                                                   ▼
//!                                                 Gone
//! ```

use chrono::{DateTime, Duration, Utc};
use preview_fleet_core::EnvironmentId;
use preview_fleet_store::{EnvironmentRecord, EnvironmentStatus};

use crate::error::{ControlError, Result};

/// Validates a state transition and returns the target state if valid.
///
/// # Errors
///
/// Returns `ControlError::InvalidState` if the transition is not allowed.
pub fn validate_transition(
    environment_id: &EnvironmentId,
    from: EnvironmentStatus,
    to: EnvironmentStatus,
) -> Result<EnvironmentStatus> {
    if is_valid_transition(from, to) {
        Ok(to)
    } else {
        Err(ControlError::InvalidState {
            environment_id: environment_id.clone(),
            from,
            to,
        })
    }
}

/// Check if a state transition is valid according to the state machine.
#[must_use]
pub const fn is_valid_transition(from: EnvironmentStatus, to: EnvironmentStatus) -> bool {
    use EnvironmentStatus::{Active, Deleting, Error, Expired, Provisioning};

    matches!(
        (from, to),
        (Provisioning, Active)
            | (Provisioning | Active | Expired, Error)
            | (Active, Expired)
            | (Provisioning | Active | Expired | Error, Deleting)
            | (Error, Provisioning)
    )
}

/// Returns the list of valid target states from the given state.
#[must_use]
pub fn valid_transitions_from(state: EnvironmentStatus) -> Vec<EnvironmentStatus> {
    use EnvironmentStatus::{Active, Deleting, Error, Expired, Provisioning};

    match state {
        Provisioning => vec![Active, Error, Deleting],
        Active => vec![Expired, Deleting, Error],
        Expired => vec![Deleting, Error],
        Error => vec![Deleting, Provisioning],
        Deleting => vec![],
    }
}

/// Apply a validated transition to a record in place.
///
/// # Errors
///
/// Returns `ControlError::InvalidState` if the transition is not allowed.
pub fn transition(record: &mut EnvironmentRecord, to: EnvironmentStatus) -> Result<()> {
    record.status = validate_transition(&record.id, record.status, to)?;
    Ok(())
}

/// Returns true if the record belongs to a create that may still be running.
///
/// Such environments, and every resource named after them, must not be touched
/// by reconciliation.
#[must_use]
pub fn is_in_flight(record: &EnvironmentRecord, grace: Duration, now: DateTime<Utc>) -> bool {
    record.status == EnvironmentStatus::Provisioning && !record.is_older_than(grace, now)
}

/// Returns true if the environment should be serving traffic.
#[must_use]
pub const fn is_serving(state: EnvironmentStatus) -> bool {
    matches!(state, EnvironmentStatus::Active)
}
