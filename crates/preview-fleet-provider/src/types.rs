//! Types for the provider crate.

use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{ProviderError, Result};

/// Default Cloudflare API v4 base URL.
pub const CLOUDFLARE_API_BASE: &str = "https://api.cloudflare.com/client/v4";

/// Default Turso Platform API base URL.
pub const TURSO_API_BASE: &str = "https://api.turso.tech/v1";

/// A KV namespace as reported by the provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KvNamespace {
    /// Provider-assigned id.
    pub id: String,
    /// Namespace title.
    pub title: String,
}

/// A freshly created or fetched database branch.
#[derive(Clone, PartialEq, Eq)]
pub struct DatabaseBranch {
    /// Database name.
    pub name: String,
    /// Connection URL (`libsql://<hostname>`).
    pub url: String,
    /// Access token scoped to this database.
    pub token: String,
}

impl fmt::Debug for DatabaseBranch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DatabaseBranch")
            .field("name", &self.name)
            .field("url", &self.url)
            .field("token", &"<redacted>")
            .finish()
    }
}

/// Per-environment configuration injected into a worker deployment.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct WorkerConfig {
    /// KV bindings: binding name to namespace id.
    pub kv_bindings: BTreeMap<String, String>,
    /// Plain-text variables.
    pub vars: BTreeMap<String, String>,
    /// Secret variables.
    pub secrets: BTreeMap<String, String>,
}

impl fmt::Debug for WorkerConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkerConfig")
            .field("kv_bindings", &self.kv_bindings)
            .field("vars", &self.vars)
            .field("secrets", &self.secrets.keys().collect::<Vec<_>>())
            .finish()
    }
}

/// Outcome of an idempotent delete.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeleteOutcome {
    /// The resource existed and was removed.
    Deleted,
    /// The resource was already gone.
    NotFound,
}

/// Result of probing a preview URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HealthStatus {
    /// The endpoint answered 200.
    Healthy,
    /// The endpoint answered otherwise, or not at all.
    Unhealthy {
        /// What went wrong.
        reason: String,
    },
}

impl HealthStatus {
    /// Whether the probe succeeded.
    #[must_use]
    pub const fn is_healthy(&self) -> bool {
        matches!(self, Self::Healthy)
    }
}

/// Cloudflare account settings.
#[derive(Clone)]
pub struct CloudflareConfig {
    /// API base URL.
    pub api_base: String,
    /// Bearer token.
    pub api_token: String,
    /// Account id.
    pub account_id: String,
    /// Path to the built worker module.
    pub script_path: PathBuf,
    /// Worker compatibility date.
    pub compatibility_date: String,
}

impl fmt::Debug for CloudflareConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CloudflareConfig")
            .field("api_base", &self.api_base)
            .field("api_token", &"<redacted>")
            .field("account_id", &self.account_id)
            .field("script_path", &self.script_path)
            .field("compatibility_date", &self.compatibility_date)
            .finish()
    }
}

/// Turso organization settings for database branching.
#[derive(Clone)]
pub struct TursoConfig {
    /// API base URL.
    pub api_base: String,
    /// Bearer token.
    pub api_token: String,
    /// Organization slug.
    pub organization: String,
    /// Database every branch is seeded from.
    pub parent_database: String,
    /// Placement group for new branches.
    pub group: String,
    /// Lifetime of branch access tokens, e.g. `7d`.
    pub token_expiration: String,
}

impl fmt::Debug for TursoConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TursoConfig")
            .field("api_base", &self.api_base)
            .field("api_token", &"<redacted>")
            .field("organization", &self.organization)
            .field("parent_database", &self.parent_database)
            .field("group", &self.group)
            .field("token_expiration", &self.token_expiration)
            .finish()
    }
}

/// Configuration for the platform provider.
#[derive(Debug, Clone)]
pub struct ProviderConfig {
    /// Cloudflare account settings.
    pub cloudflare: CloudflareConfig,
    /// Turso settings; `None` disables database branching.
    pub turso: Option<TursoConfig>,
    /// Timeout applied to every provider API request.
    pub request_timeout: Duration,
    /// Timeout applied to health probes.
    pub health_timeout: Duration,
}

impl ProviderConfig {
    /// Load configuration from the process environment.
    ///
    /// # Errors
    ///
    /// See [`ProviderConfig::from_lookup`].
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration through a variable lookup function.
    ///
    /// Supported variables:
    /// - `CLOUDFLARE_API_TOKEN`, `CLOUDFLARE_ACCOUNT_ID`: required
    /// - `CLOUDFLARE_API_BASE`: API override
    /// - `WORKER_SCRIPT_PATH`: worker bundle (default `dist/worker.js`)
    /// - `WORKER_COMPATIBILITY_DATE`: default `2024-09-23`
    /// - `TURSO_API_TOKEN`, `TURSO_ORGANIZATION`, `TURSO_PARENT_DATABASE`: all
    ///   three enable database branching
    /// - `TURSO_GROUP` (default `default`), `TURSO_TOKEN_EXPIRATION` (default `7d`),
    ///   `TURSO_API_BASE`
    /// - `PREVIEW_OPERATION_TIMEOUT_SECS` (default 30), `PREVIEW_HEALTH_TIMEOUT_SECS`
    ///   (default 10)
    ///
    /// # Errors
    ///
    /// Returns [`ProviderError::MissingCredentials`] if the Cloudflare token or
    /// account id is missing, or [`ProviderError::Config`] for malformed values.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let api_token = get("CLOUDFLARE_API_TOKEN")
            .ok_or_else(|| ProviderError::MissingCredentials("CLOUDFLARE_API_TOKEN".into()))?;
        let account_id = get("CLOUDFLARE_ACCOUNT_ID")
            .ok_or_else(|| ProviderError::MissingCredentials("CLOUDFLARE_ACCOUNT_ID".into()))?;

        let cloudflare = CloudflareConfig {
            api_base: get("CLOUDFLARE_API_BASE").unwrap_or_else(|| CLOUDFLARE_API_BASE.into()),
            api_token,
            account_id,
            script_path: get("WORKER_SCRIPT_PATH")
                .map_or_else(|| PathBuf::from("dist/worker.js"), PathBuf::from),
            compatibility_date: get("WORKER_COMPATIBILITY_DATE")
                .unwrap_or_else(|| "2024-09-23".into()),
        };

        let turso = match (
            get("TURSO_API_TOKEN"),
            get("TURSO_ORGANIZATION"),
            get("TURSO_PARENT_DATABASE"),
        ) {
            (Some(api_token), Some(organization), Some(parent_database)) => Some(TursoConfig {
                api_base: get("TURSO_API_BASE").unwrap_or_else(|| TURSO_API_BASE.into()),
                api_token,
                organization,
                parent_database,
                group: get("TURSO_GROUP").unwrap_or_else(|| "default".into()),
                token_expiration: get("TURSO_TOKEN_EXPIRATION").unwrap_or_else(|| "7d".into()),
            }),
            _ => None,
        };

        Ok(Self {
            cloudflare,
            turso,
            request_timeout: parse_secs(&get, "PREVIEW_OPERATION_TIMEOUT_SECS", 30)?,
            health_timeout: parse_secs(&get, "PREVIEW_HEALTH_TIMEOUT_SECS", 10)?,
        })
    }
}

fn parse_secs<G>(get: &G, key: &str, default: u64) -> Result<Duration>
where
    G: Fn(&str) -> Option<String>,
{
    match get(key) {
        None => Ok(Duration::from_secs(default)),
        Some(raw) => match raw.trim().parse::<u64>() {
            Ok(secs) if secs > 0 => Ok(Duration::from_secs(secs)),
            _ => Err(ProviderError::Config(format!(
                "{key} must be a positive number of seconds, got {raw:?}"
            ))),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn missing_cloudflare_credentials() {
        let err = ProviderConfig::from_lookup(lookup(&[])).unwrap_err();
        assert!(matches!(err, ProviderError::MissingCredentials(ref v) if v == "CLOUDFLARE_API_TOKEN"));

        let err =
            ProviderConfig::from_lookup(lookup(&[("CLOUDFLARE_API_TOKEN", "t")])).unwrap_err();
        assert!(matches!(err, ProviderError::MissingCredentials(ref v) if v == "CLOUDFLARE_ACCOUNT_ID"));
    }

    #[test]
    fn defaults() {
        let config = ProviderConfig::from_lookup(lookup(&[
            ("CLOUDFLARE_API_TOKEN", "t"),
            ("CLOUDFLARE_ACCOUNT_ID", "acct"),
        ]))
        .unwrap();

        assert_eq!(config.cloudflare.api_base, CLOUDFLARE_API_BASE);
        assert_eq!(config.cloudflare.script_path, PathBuf::from("dist/worker.js"));
        assert_eq!(config.cloudflare.compatibility_date, "2024-09-23");
        assert!(config.turso.is_none());
        assert_eq!(config.request_timeout, Duration::from_secs(30));
        assert_eq!(config.health_timeout, Duration::from_secs(10));
    }

    #[test]
    fn turso_requires_all_three_settings() {
        let partial = ProviderConfig::from_lookup(lookup(&[
            ("CLOUDFLARE_API_TOKEN", "t"),
            ("CLOUDFLARE_ACCOUNT_ID", "acct"),
            ("TURSO_API_TOKEN", "tt"),
            ("TURSO_ORGANIZATION", "acme"),
        ]))
        .unwrap();
        assert!(partial.turso.is_none());

        let full = ProviderConfig::from_lookup(lookup(&[
            ("CLOUDFLARE_API_TOKEN", "t"),
            ("CLOUDFLARE_ACCOUNT_ID", "acct"),
            ("TURSO_API_TOKEN", "tt"),
            ("TURSO_ORGANIZATION", "acme"),
            ("TURSO_PARENT_DATABASE", "app"),
        ]))
        .unwrap();
        let turso = full.turso.unwrap();
        assert_eq!(turso.group, "default");
        assert_eq!(turso.token_expiration, "7d");
        assert_eq!(turso.api_base, TURSO_API_BASE);
    }

    #[test]
    fn invalid_timeout_is_rejected() {
        let err = ProviderConfig::from_lookup(lookup(&[
            ("CLOUDFLARE_API_TOKEN", "t"),
            ("CLOUDFLARE_ACCOUNT_ID", "acct"),
            ("PREVIEW_OPERATION_TIMEOUT_SECS", "soon"),
        ]))
        .unwrap_err();
        assert!(matches!(err, ProviderError::Config(_)));
    }

    #[test]
    fn secrets_are_redacted() {
        let config = ProviderConfig::from_lookup(lookup(&[
            ("CLOUDFLARE_API_TOKEN", "cf-secret"),
            ("CLOUDFLARE_ACCOUNT_ID", "acct"),
        ]))
        .unwrap();
        assert!(!format!("{config:?}").contains("cf-secret"));

        let mut worker = WorkerConfig::default();
        worker
            .secrets
            .insert("DATABASE_AUTH_TOKEN".into(), "db-secret".into());
        let debug = format!("{worker:?}");
        assert!(debug.contains("DATABASE_AUTH_TOKEN"));
        assert!(!debug.contains("db-secret"));
    }
}
