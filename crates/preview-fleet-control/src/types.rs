//! Configuration and report types for control operations.

use std::fmt;
use std::time::Duration;

use preview_fleet_store::{CorruptedEntry, EnvironmentRecord};
use preview_fleet_provider::HealthStatus;

use crate::error::{ControlError, Result};

/// Configuration for the preview lifecycle.
#[derive(Debug, Clone)]
pub struct PreviewConfig {
    /// Days an environment lives before expiry.
    pub ttl_days: u32,
    /// Maximum environments in `provisioning` or `active`.
    pub max_environments: u32,
    /// Domain previews are served under: `https://<id>.<preview_domain>`.
    pub preview_domain: String,
    /// Environments processed in parallel during reconciliation.
    pub max_concurrency: usize,
    /// Timeout for each provider call.
    pub operation_timeout: Duration,
    /// Timeout for each health probe.
    pub health_timeout: Duration,
    /// How long a `provisioning` record is protected from reconciliation (minutes).
    pub provisioning_grace_minutes: u32,
    /// Webhook that receives notifications.
    pub notify_webhook_url: Option<String>,
    /// Cleanup errors needed before a notification is sent.
    pub notify_error_threshold: u32,
    /// Log mutations instead of performing them.
    pub dry_run: bool,
}

impl Default for PreviewConfig {
    fn default() -> Self {
        Self {
            ttl_days: 7,
            max_environments: 10,
            preview_domain: "preview.test".to_string(),
            max_concurrency: 4,
            operation_timeout: Duration::from_secs(30),
            health_timeout: Duration::from_secs(10),
            provisioning_grace_minutes: 30,
            notify_webhook_url: None,
            notify_error_threshold: 1,
            dry_run: false,
        }
    }
}

impl PreviewConfig {
    /// Environment time-to-live.
    #[must_use]
    pub fn ttl(&self) -> chrono::Duration {
        chrono::Duration::days(i64::from(self.ttl_days))
    }

    /// Protection window for in-flight creates.
    #[must_use]
    pub fn provisioning_grace(&self) -> chrono::Duration {
        chrono::Duration::minutes(i64::from(self.provisioning_grace_minutes))
    }

    /// Load configuration from the process environment.
    ///
    /// # Errors
    ///
    /// See [`PreviewConfig::from_lookup`].
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration through a variable lookup function.
    ///
    /// Supported variables:
    /// - `PREVIEW_TTL_DAYS` (default 7)
    /// - `MAX_PREVIEW_ENVIRONMENTS` (default 10)
    /// - `PREVIEW_DOMAIN`, falling back to `<CLOUDFLARE_WORKERS_SUBDOMAIN>.workers.dev`
    /// - `PREVIEW_MAX_CONCURRENCY` (default 4)
    /// - `PREVIEW_OPERATION_TIMEOUT_SECS` (default 30)
    /// - `PREVIEW_HEALTH_TIMEOUT_SECS` (default 10)
    /// - `PREVIEW_PROVISIONING_GRACE_MINUTES` (default 30)
    /// - `NOTIFY_WEBHOOK_URL`, `NOTIFY_ERROR_THRESHOLD` (default 1)
    /// - `DRY_RUN`: `1`, `true`, `yes` or `on` enables
    ///
    /// # Errors
    ///
    /// Returns `ControlError::Config` for malformed numbers or when no preview
    /// domain can be determined.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let defaults = Self::default();

        let preview_domain = match (get("PREVIEW_DOMAIN"), get("CLOUDFLARE_WORKERS_SUBDOMAIN")) {
            (Some(domain), _) => domain.trim().trim_matches('.').to_string(),
            (None, Some(subdomain)) => format!("{}.workers.dev", subdomain.trim()),
            (None, None) => {
                return Err(ControlError::Config(
                    "set PREVIEW_DOMAIN or CLOUDFLARE_WORKERS_SUBDOMAIN".into(),
                ))
            }
        };

        Ok(Self {
            ttl_days: parse_positive(&get, "PREVIEW_TTL_DAYS", defaults.ttl_days)?,
            max_environments: parse_positive(
                &get,
                "MAX_PREVIEW_ENVIRONMENTS",
                defaults.max_environments,
            )?,
            preview_domain,
            max_concurrency: parse_positive(
                &get,
                "PREVIEW_MAX_CONCURRENCY",
                defaults.max_concurrency,
            )?,
            operation_timeout: Duration::from_secs(parse_positive(
                &get,
                "PREVIEW_OPERATION_TIMEOUT_SECS",
                defaults.operation_timeout.as_secs(),
            )?),
            health_timeout: Duration::from_secs(parse_positive(
                &get,
                "PREVIEW_HEALTH_TIMEOUT_SECS",
                defaults.health_timeout.as_secs(),
            )?),
            provisioning_grace_minutes: parse_positive(
                &get,
                "PREVIEW_PROVISIONING_GRACE_MINUTES",
                defaults.provisioning_grace_minutes,
            )?,
            notify_webhook_url: get("NOTIFY_WEBHOOK_URL"),
            notify_error_threshold: parse_positive(
                &get,
                "NOTIFY_ERROR_THRESHOLD",
                defaults.notify_error_threshold,
            )?,
            dry_run: get("DRY_RUN").is_some_and(|v| is_truthy(&v)),
        })
    }
}

/// Parse a boolean flag the way CI systems spell it.
#[must_use]
pub fn is_truthy(value: &str) -> bool {
    matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}

fn parse_positive<G, T>(get: &G, key: &str, default: T) -> Result<T>
where
    G: Fn(&str) -> Option<String>,
    T: std::str::FromStr + PartialOrd + Default,
{
    match get(key) {
        None => Ok(default),
        Some(raw) => match raw.trim().parse::<T>() {
            Ok(n) if n > T::default() => Ok(n),
            _ => Err(ControlError::Config(format!(
                "{key} must be a positive integer, got {raw:?}"
            ))),
        },
    }
}

/// Slot usage against the environment cap.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Capacity {
    /// Environments in `provisioning` or `active`.
    pub in_use: u32,
    /// The configured maximum.
    pub limit: u32,
}

impl Capacity {
    /// Whether no slot is free.
    #[must_use]
    pub const fn is_full(&self) -> bool {
        self.in_use >= self.limit
    }

    /// Whether usage has reached 80% of the cap.
    #[must_use]
    pub const fn is_near_limit(&self) -> bool {
        u64::from(self.in_use) * 5 >= u64::from(self.limit) * 4
    }
}

impl fmt::Display for Capacity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.in_use, self.limit)
    }
}

/// One row of `list`.
#[derive(Debug, Clone)]
pub struct EnvironmentListing {
    /// The stored record.
    pub record: EnvironmentRecord,
    /// Health probe result; only active environments are probed.
    pub health: Option<HealthStatus>,
}

/// Everything in the store, for `list`.
#[derive(Debug, Clone, Default)]
pub struct EnvironmentList {
    /// Readable environments, ordered by PR number.
    pub environments: Vec<EnvironmentListing>,
    /// Records that could not be decoded.
    pub corrupted: Vec<CorruptedEntry>,
}
