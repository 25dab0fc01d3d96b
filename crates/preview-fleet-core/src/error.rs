//! Common error types for preview-fleet.
//!
//! Identifier errors are shared by every crate that turns user input or provider
//! resource names into an [`EnvironmentId`](crate::EnvironmentId).

use thiserror::Error;

/// A result type using `IdError`.
pub type Result<T> = std::result::Result<T, IdError>;

/// Errors that can occur when deriving or parsing identifiers.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum IdError {
    /// Pull request numbers start at 1.
    #[error("invalid pull request number: {0}")]
    InvalidPrNumber(u32),

    /// The string does not follow the `pr-<number>[-<slug>]` convention.
    #[error("invalid environment id {0:?}: expected pr-<number>[-<slug>]")]
    InvalidFormat(String),
}
