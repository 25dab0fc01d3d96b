//! Human-readable output for command results.

use std::fmt::Write as _;

use chrono::{DateTime, Utc};
use preview_fleet_control::{
    Capacity, CleanupReport, DeletionResult, EnvironmentList, EnvironmentListing,
    EnvironmentRecord, HealthReport,
};
use preview_fleet_provider::HealthStatus;

/// Compact age such as `3d 4h`, `2h 5m` or `12m`.
pub fn format_age(created_at: DateTime<Utc>, now: DateTime<Utc>) -> String {
    let minutes = (now - created_at).num_minutes().max(0);
    let (days, hours, mins) = (minutes / 1440, (minutes % 1440) / 60, minutes % 60);

    if days > 0 {
        format!("{days}d {hours}h")
    } else if hours > 0 {
        format!("{hours}h {mins}m")
    } else {
        format!("{mins}m")
    }
}

fn health_label(listing: &EnvironmentListing) -> &str {
    match &listing.health {
        None => "-",
        Some(HealthStatus::Healthy) => "healthy",
        Some(HealthStatus::Unhealthy { .. }) => "unhealthy",
    }
}

/// The `create` summary.
pub fn created(record: &EnvironmentRecord) -> String {
    let database = if record.resources.database.is_some() {
        "branch"
    } else {
        "shared"
    };
    let mut out = String::new();
    let _ = writeln!(out, "Preview environment {} is {}", record.id, record.status);
    let _ = writeln!(out, "  url:      {}", record.url);
    let _ = writeln!(out, "  branch:   {}", record.branch_name);
    let _ = writeln!(out, "  database: {database}");
    if !record.resources.route_verified {
        let _ = writeln!(out, "  note:     route not verified yet");
    }
    out
}

/// The `delete` summary.
pub fn deletion(result: &DeletionResult) -> String {
    if result.was_noop() {
        return format!("Nothing to delete for {}\n", result.environment_id);
    }

    let mut out = String::new();
    let _ = writeln!(
        out,
        "Deleted {}: {} removed, {} already gone, {} failed",
        result.environment_id,
        result.deleted.len(),
        result.absent.len(),
        result.failed.len()
    );
    for failure in &result.failed {
        let _ = writeln!(out, "  failed: {failure}");
    }
    out
}

/// The `list` table.
pub fn list(list: &EnvironmentList, capacity: Capacity, detailed: bool, now: DateTime<Utc>) -> String {
    let mut out = String::new();

    if list.environments.is_empty() {
        out.push_str("No preview environments\n");
    } else {
        let _ = writeln!(
            out,
            "{:<32} {:>6} {:<13} {:>8} {:<10} URL",
            "NAME", "PR", "STATUS", "AGE", "HEALTH"
        );
        for listing in &list.environments {
            let record = &listing.record;
            let _ = writeln!(
                out,
                "{:<32} {:>6} {:<13} {:>8} {:<10} {}",
                record.id.as_str(),
                record.pr_number,
                record.status.as_str(),
                format_age(record.created_at, now),
                health_label(listing),
                record.url
            );
            if detailed {
                let _ = writeln!(out, "    branch: {}", record.branch_name);
                for label in record.resources.labels() {
                    let _ = writeln!(out, "    - {label}");
                }
                if let Some(HealthStatus::Unhealthy { reason }) = &listing.health {
                    let _ = writeln!(out, "    health: {reason}");
                }
                if let Some(message) = &record.error_message {
                    let _ = writeln!(out, "    error: {message}");
                }
            }
        }
    }

    for entry in &list.corrupted {
        let _ = writeln!(out, "CORRUPTED {}: {}", entry.key, entry.reason);
    }
    if detailed {
        let _ = writeln!(out, "Capacity: {capacity}");
    }
    out
}

/// The `cleanup` summary.
pub fn cleanup(report: &CleanupReport) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "Expiry:  {}", report.expiry);
    let _ = writeln!(out, "Orphans: {}", report.orphans);
    for failure in report.failures() {
        let _ = writeln!(out, "  error: {failure}");
    }
    out
}

/// The `monitor` summary.
pub fn health(report: &HealthReport) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "Health: {report}");
    for unhealthy in &report.unhealthy {
        let _ = writeln!(
            out,
            "  {} ({}): {}",
            unhealthy.environment_id, unhealthy.url, unhealthy.reason
        );
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use preview_fleet_control::{EnvironmentId, EnvironmentStatus};

    fn record(pr: u32, status: EnvironmentStatus, age: Duration, now: DateTime<Utc>) -> EnvironmentRecord {
        let id = EnvironmentId::derive(pr, "main").unwrap();
        let url = id.preview_url("preview.test");
        let mut record = EnvironmentRecord::new(id, pr, "main", url, now - age);
        record.status = status;
        record
    }

    #[test]
    fn ages() {
        let now = Utc::now();
        assert_eq!(format_age(now - Duration::minutes(12), now), "12m");
        assert_eq!(format_age(now - Duration::minutes(125), now), "2h 5m");
        assert_eq!(format_age(now - Duration::hours(76), now), "3d 4h");
        assert_eq!(format_age(now + Duration::minutes(5), now), "0m");
    }

    #[test]
    fn list_rows_and_details() {
        let now = Utc::now();
        let mut failed = record(2, EnvironmentStatus::Error, Duration::hours(1), now);
        failed.error_message = Some("worker deployment failed".into());
        let envs = EnvironmentList {
            environments: vec![
                EnvironmentListing {
                    record: record(1, EnvironmentStatus::Active, Duration::days(2), now),
                    health: Some(HealthStatus::Unhealthy {
                        reason: "status 502".into(),
                    }),
                },
                EnvironmentListing {
                    record: failed,
                    health: None,
                },
            ],
            corrupted: Vec::new(),
        };
        let capacity = Capacity { in_use: 1, limit: 10 };

        let plain = list(&envs, capacity, false, now);
        assert!(plain.starts_with("NAME"));
        assert!(plain.contains("pr-1-main"));
        assert!(plain.contains("unhealthy"));
        assert!(!plain.contains("Capacity"));

        let detailed = list(&envs, capacity, true, now);
        assert!(detailed.contains("health: status 502"));
        assert!(detailed.contains("error: worker deployment failed"));
        assert!(detailed.contains("Capacity: 1/10"));
    }

    #[test]
    fn empty_list() {
        let out = list(
            &EnvironmentList::default(),
            Capacity { in_use: 0, limit: 10 },
            false,
            Utc::now(),
        );
        assert_eq!(out, "No preview environments\n");
    }

    #[test]
    fn created_mentions_shared_database() {
        let now = Utc::now();
        let out = created(&record(3, EnvironmentStatus::Active, Duration::zero(), now));
        assert!(out.contains("pr-3-main is active"));
        assert!(out.contains("database: shared"));
        assert!(out.contains("https://pr-3-main.preview.test"));
    }
}
