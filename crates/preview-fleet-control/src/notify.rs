//! Webhook notifications.
//!
//! Notifications are advisory: a failed delivery is logged and never fails the
//! operation that triggered it.

use std::time::Duration;

use serde::Serialize;
use serde_json::Value;

use crate::error::{ControlError, Result};
use crate::types::{Capacity, PreviewConfig};

/// What a notification is about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationEvent {
    /// A cleanup pass hit errors.
    CleanupErrors,
    /// Active environments failed their health probe.
    UnhealthyEnvironments,
    /// Usage crossed 80% of the cap.
    CapacityWarning,
    /// A create was refused at the cap.
    CapacityExceeded,
}

#[derive(Debug, Serialize)]
struct Payload<'a> {
    event: NotificationEvent,
    text: &'a str,
    details: &'a Value,
}

/// Sends operator notifications to an optional webhook.
#[derive(Debug, Clone)]
pub struct Notifier {
    client: reqwest::Client,
    webhook_url: Option<String>,
    error_threshold: u32,
    dry_run: bool,
}

impl Notifier {
    /// Build a notifier from configuration.
    ///
    /// # Errors
    ///
    /// Returns `ControlError::Config` if the HTTP client cannot be built.
    pub fn new(config: &PreviewConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| ControlError::Config(format!("notification client: {e}")))?;
        Ok(Self {
            client,
            webhook_url: config.notify_webhook_url.clone(),
            error_threshold: config.notify_error_threshold,
            dry_run: config.dry_run,
        })
    }

    /// Whether a webhook is configured.
    #[must_use]
    pub fn is_enabled(&self) -> bool {
        self.webhook_url.is_some()
    }

    /// Post one notification. Returns whether it was delivered.
    pub async fn send(&self, event: NotificationEvent, text: &str, details: Value) -> bool {
        let Some(url) = &self.webhook_url else {
            tracing::debug!(?event, "No notification webhook configured");
            return false;
        };
        if self.dry_run {
            tracing::info!(?event, %text, "[dry run] Would send notification");
            return false;
        }

        let payload = Payload {
            event,
            text,
            details: &details,
        };
        match self.client.post(url).json(&payload).send().await {
            Ok(response) if response.status().is_success() => {
                tracing::debug!(?event, "Notification sent");
                true
            }
            Ok(response) => {
                tracing::warn!(?event, status = response.status().as_u16(), "Notification rejected");
                false
            }
            Err(e) => {
                tracing::warn!(?event, error = %e, "Failed to send notification");
                false
            }
        }
    }

    /// Report cleanup errors once they reach the threshold.
    pub async fn cleanup_errors(&self, errors: u32, summary: &str, failures: &[String]) -> bool {
        if errors == 0 || errors < self.error_threshold {
            return false;
        }
        self.send(
            NotificationEvent::CleanupErrors,
            &format!("Preview cleanup finished with {errors} error(s): {summary}"),
            serde_json::json!({ "errors": errors, "failures": failures }),
        )
        .await
    }

    /// Report unhealthy environments.
    pub async fn unhealthy(&self, environments: &[(String, String)]) -> bool {
        if environments.is_empty() {
            return false;
        }
        let details: Vec<Value> = environments
            .iter()
            .map(|(name, reason)| serde_json::json!({ "preview_name": name, "reason": reason }))
            .collect();
        self.send(
            NotificationEvent::UnhealthyEnvironments,
            &format!("{} preview environment(s) failed health checks", environments.len()),
            Value::Array(details),
        )
        .await
    }

    /// Warn that usage is close to the cap.
    pub async fn capacity_warning(&self, capacity: Capacity) -> bool {
        self.send(
            NotificationEvent::CapacityWarning,
            &format!("Preview environments at {capacity} of capacity"),
            serde_json::json!({ "in_use": capacity.in_use, "limit": capacity.limit }),
        )
        .await
    }

    /// Report a refused create.
    pub async fn capacity_exceeded(&self, capacity: Capacity, pr_number: u32) -> bool {
        self.send(
            NotificationEvent::CapacityExceeded,
            &format!("Preview for PR #{pr_number} refused: capacity {capacity} reached"),
            serde_json::json!({
                "in_use": capacity.in_use,
                "limit": capacity.limit,
                "pr_number": pr_number,
            }),
        )
        .await
    }
}
