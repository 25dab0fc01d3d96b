//! Provider resource naming.
//!
//! Resources are named after the environment that owns them:
//!
//! | Resource | Name |
//! |---|---|
//! | Worker script | `<id>` |
//! | KV namespace | `<id>-session`, `<id>-cache`, `<id>-rate-limit` |
//! | Database branch | `<id>` |
//!
//! The orphan detector relies on the inverse mapping, so every name produced here
//! must parse back to the same [`EnvironmentId`].

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::ids::EnvironmentId;

/// The purpose of one of an environment's KV namespaces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum KvRole {
    /// Session storage.
    Session,
    /// Response cache.
    Cache,
    /// Rate-limit counters.
    RateLimit,
}

impl KvRole {
    /// Every role, in provisioning order.
    pub const ALL: [Self; 3] = [Self::Session, Self::Cache, Self::RateLimit];

    /// Suffix appended to the environment id to form the namespace title.
    #[must_use]
    pub const fn suffix(self) -> &'static str {
        match self {
            Self::Session => "session",
            Self::Cache => "cache",
            Self::RateLimit => "rate-limit",
        }
    }

    /// Name of the binding the worker sees this namespace under.
    #[must_use]
    pub const fn binding(self) -> &'static str {
        match self {
            Self::Session => "SESSIONS",
            Self::Cache => "CACHE",
            Self::RateLimit => "RATE_LIMIT",
        }
    }
}

impl fmt::Display for KvRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.suffix())
    }
}

impl EnvironmentId {
    /// Name of the worker script serving this environment.
    #[must_use]
    pub fn worker_name(&self) -> &str {
        self.as_str()
    }

    /// Name of this environment's database branch.
    #[must_use]
    pub fn database_branch_name(&self) -> &str {
        self.as_str()
    }

    /// Title of the KV namespace with the given role.
    #[must_use]
    pub fn kv_namespace_title(&self, role: KvRole) -> String {
        format!("{self}-{}", role.suffix())
    }

    /// Host name the environment is routed under.
    #[must_use]
    pub fn route_host(&self, preview_domain: &str) -> String {
        format!("{self}.{preview_domain}")
    }

    /// Public preview URL.
    #[must_use]
    pub fn preview_url(&self, preview_domain: &str) -> String {
        format!("https://{}", self.route_host(preview_domain))
    }
}

/// Map a KV namespace title back to its environment and role.
///
/// Returns `None` for namespaces that do not follow the preview convention.
#[must_use]
pub fn parse_kv_namespace_title(title: &str) -> Option<(EnvironmentId, KvRole)> {
    KvRole::ALL.into_iter().find_map(|role| {
        let env = title.strip_suffix(role.suffix())?.strip_suffix('-')?;
        EnvironmentId::parse(env).ok().map(|id| (id, role))
    })
}
