//! Domain types stored in the database.
//!
//! These types represent the persisted state of preview environments and the
//! cloud resources that back them.

use std::fmt;

use chrono::{DateTime, Duration, Utc};
use preview_fleet_core::{EnvironmentId, KvRole};
use serde::{Deserialize, Serialize};

/// A preview environment record stored in the database.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnvironmentRecord {
    /// Environment identifier, `pr-<number>[-<slug>]`.
    #[serde(rename = "preview_name")]
    pub id: EnvironmentId,
    /// Pull request number the environment was created for.
    pub pr_number: u32,
    /// Raw branch name as supplied at creation.
    pub branch_name: String,
    /// Current lifecycle state.
    pub status: EnvironmentStatus,
    /// Provider identifiers of every resource created so far.
    pub resources: EnvironmentResources,
    /// Public URL of the preview.
    pub url: String,
    /// Creation timestamp. Expiry is measured from here.
    pub created_at: DateTime<Utc>,
    /// Last modification timestamp.
    pub updated_at: DateTime<Utc>,
    /// Error message when the environment is in the `Error` state.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

impl EnvironmentRecord {
    /// Create a fresh record in the `Provisioning` state with no resources.
    #[must_use]
    pub fn new(
        id: EnvironmentId,
        pr_number: u32,
        branch_name: impl Into<String>,
        url: impl Into<String>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            pr_number,
            branch_name: branch_name.into(),
            status: EnvironmentStatus::Provisioning,
            resources: EnvironmentResources::default(),
            url: url.into(),
            created_at: now,
            updated_at: now,
            error_message: None,
        }
    }

    /// Time elapsed since creation.
    #[must_use]
    pub fn age(&self, now: DateTime<Utc>) -> Duration {
        now - self.created_at
    }

    /// Whether the record has lived at least `ttl`.
    #[must_use]
    pub fn is_older_than(&self, ttl: Duration, now: DateTime<Utc>) -> bool {
        self.age(now) >= ttl
    }
}

/// Lifecycle state of a preview environment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum EnvironmentStatus {
    /// Resources are being created.
    Provisioning = 1,
    /// Fully provisioned and serving.
    Active = 2,
    /// Past its time-to-live, awaiting deletion.
    Expired = 3,
    /// Resource deletion is in progress.
    Deleting = 4,
    /// Provisioning or deletion failed; resources may remain.
    Error = 5,
}

impl EnvironmentStatus {
    /// Every status, in index order.
    pub const ALL: [Self; 5] = [
        Self::Provisioning,
        Self::Active,
        Self::Expired,
        Self::Deleting,
        Self::Error,
    ];

    /// Convert to u8 for index key encoding.
    #[must_use]
    pub const fn as_u8(self) -> u8 {
        self as u8
    }

    /// Convert from u8.
    #[must_use]
    pub const fn from_u8(value: u8) -> Option<Self> {
        match value {
            1 => Some(Self::Provisioning),
            2 => Some(Self::Active),
            3 => Some(Self::Expired),
            4 => Some(Self::Deleting),
            5 => Some(Self::Error),
            _ => None,
        }
    }

    /// Lowercase name as shown to operators.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Provisioning => "provisioning",
            Self::Active => "active",
            Self::Expired => "expired",
            Self::Deleting => "deleting",
            Self::Error => "error",
        }
    }

    /// Whether environments in this state count against the capacity limit.
    #[must_use]
    pub const fn counts_toward_capacity(self) -> bool {
        matches!(self, Self::Provisioning | Self::Active)
    }
}

impl fmt::Display for EnvironmentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Provider identifiers of the resources belonging to one environment.
///
/// Populated incrementally as provisioning progresses, so a partially
/// provisioned environment still records what needs cleaning up.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnvironmentResources {
    /// Deployed worker script name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub worker: Option<String>,
    /// KV namespaces, one per role.
    #[serde(default)]
    pub kv_namespaces: Vec<KvNamespaceRef>,
    /// Database branch, absent when branching is disabled or failed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub database: Option<DatabaseBranchRef>,
    /// Public route host.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub route: Option<String>,
    /// Whether the route answered after deployment.
    #[serde(default)]
    pub route_verified: bool,
}

impl EnvironmentResources {
    /// Whether no resource has been recorded.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.worker.is_none() && self.kv_namespaces.is_empty() && self.database.is_none()
    }

    /// The namespace recorded for `role`, if any.
    #[must_use]
    pub fn kv_namespace(&self, role: KvRole) -> Option<&KvNamespaceRef> {
        self.kv_namespaces.iter().find(|ns| ns.role == role)
    }

    /// Human-readable labels for every recorded resource.
    #[must_use]
    pub fn labels(&self) -> Vec<String> {
        let mut labels = Vec::new();
        if let Some(worker) = &self.worker {
            labels.push(format!("worker {worker}"));
        }
        for ns in &self.kv_namespaces {
            labels.push(format!("kv namespace {} ({})", ns.title, ns.id));
        }
        if let Some(db) = &self.database {
            labels.push(format!("database branch {}", db.name));
        }
        labels
    }
}

/// A KV namespace created for an environment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KvNamespaceRef {
    /// What the namespace is used for.
    pub role: KvRole,
    /// Provider-assigned namespace id.
    pub id: String,
    /// Namespace title, `<env-id>-<role>`.
    pub title: String,
}

/// A database branch created for an environment.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatabaseBranchRef {
    /// Branch database name, equal to the environment id.
    pub name: String,
    /// Connection URL.
    pub url: String,
    /// Access token handed to the worker as a secret.
    pub token: String,
}

impl fmt::Debug for DatabaseBranchRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DatabaseBranchRef")
            .field("name", &self.name)
            .field("url", &self.url)
            .field("token", &"<redacted>")
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_u8_roundtrip() {
        for status in EnvironmentStatus::ALL {
            assert_eq!(EnvironmentStatus::from_u8(status.as_u8()), Some(status));
        }
        assert_eq!(EnvironmentStatus::from_u8(0), None);
        assert_eq!(EnvironmentStatus::from_u8(6), None);
    }

    #[test]
    fn capacity_counts_live_states_only() {
        assert!(EnvironmentStatus::Provisioning.counts_toward_capacity());
        assert!(EnvironmentStatus::Active.counts_toward_capacity());
        assert!(!EnvironmentStatus::Expired.counts_toward_capacity());
        assert!(!EnvironmentStatus::Deleting.counts_toward_capacity());
        assert!(!EnvironmentStatus::Error.counts_toward_capacity());
    }

    #[test]
    fn age_and_ttl() {
        let created = Utc::now() - Duration::days(8);
        let id = EnvironmentId::derive(1, "main").unwrap();
        let record = EnvironmentRecord::new(id, 1, "main", "https://pr-1-main.example.dev", created);

        assert!(record.is_older_than(Duration::days(7), Utc::now()));
        assert!(!record.is_older_than(Duration::days(9), Utc::now()));
        assert_eq!(record.status, EnvironmentStatus::Provisioning);
        assert!(record.resources.is_empty());
    }

    #[test]
    fn database_token_is_redacted() {
        let db = DatabaseBranchRef {
            name: "pr-1-main".into(),
            url: "libsql://pr-1-main-acme.turso.io".into(),
            token: "secret-token".into(),
        };
        let debug = format!("{db:?}");
        assert!(!debug.contains("secret-token"));
        assert!(debug.contains("pr-1-main"));
    }

    #[test]
    fn resource_labels() {
        let resources = EnvironmentResources {
            worker: Some("pr-1-main".into()),
            kv_namespaces: vec![KvNamespaceRef {
                role: KvRole::Cache,
                id: "ns1".into(),
                title: "pr-1-main-cache".into(),
            }],
            database: None,
            route: None,
            route_verified: false,
        };
        assert_eq!(
            resources.labels(),
            vec!["worker pr-1-main", "kv namespace pr-1-main-cache (ns1)"]
        );
        assert!(resources.kv_namespace(KvRole::Cache).is_some());
        assert!(resources.kv_namespace(KvRole::Session).is_none());
    }
}
