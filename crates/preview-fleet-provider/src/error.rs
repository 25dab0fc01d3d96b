//! Error types for the provider crate.

use thiserror::Error;

/// Errors that can occur while talking to a resource provider.
#[derive(Error, Debug)]
pub enum ProviderError {
    /// Transport-level HTTP failure.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// The provider API rejected the request.
    #[error("API error (status {status}): {message}")]
    Api {
        /// HTTP status code.
        status: u16,
        /// Error messages returned by the API.
        message: String,
    },

    /// The resource does not exist.
    #[error("Resource not found: {0}")]
    NotFound(String),

    /// The operation did not finish in time.
    #[error("Timed out: {0}")]
    Timeout(String),

    /// Required credentials are not configured.
    #[error("Missing credentials: {0}")]
    MissingCredentials(String),

    /// Invalid configuration.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Local I/O failure, such as reading the worker bundle.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Database branching is not configured.
    #[error("Database branching is not configured")]
    DatabaseBranchingDisabled,
}

impl ProviderError {
    /// Check if this error is retriable.
    #[must_use]
    pub fn is_retriable(&self) -> bool {
        match self {
            Self::Http(e) => e.is_timeout() || e.is_connect(),
            Self::Api { status, .. } => *status == 429 || *status >= 500,
            Self::Timeout(_) => true,
            Self::NotFound(_)
            | Self::MissingCredentials(_)
            | Self::Config(_)
            | Self::Io(_)
            | Self::DatabaseBranchingDisabled => false,
        }
    }
}

/// A specialized Result type for provider operations.
pub type Result<T> = std::result::Result<T, ProviderError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retriable_classification() {
        assert!(ProviderError::Timeout("deploy".into()).is_retriable());
        assert!(ProviderError::Api {
            status: 503,
            message: "unavailable".into()
        }
        .is_retriable());
        assert!(ProviderError::Api {
            status: 429,
            message: "slow down".into()
        }
        .is_retriable());
        assert!(!ProviderError::Api {
            status: 400,
            message: "bad".into()
        }
        .is_retriable());
        assert!(!ProviderError::DatabaseBranchingDisabled.is_retriable());
        assert!(!ProviderError::MissingCredentials("CLOUDFLARE_API_TOKEN".into()).is_retriable());
    }
}
