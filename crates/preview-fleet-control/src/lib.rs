//! Lifecycle control for preview-fleet environments.
//!
//! This crate holds the business logic: provisioning with rollback, the
//! status state machine, capacity policy, and the reconcilers that converge
//! the metadata store with the cloud account.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                       preview-fleet CLI                      │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      LifecycleManager                        │
//! │  ┌─────────────┐ ┌─────────────┐ ┌─────────────┐ ┌────────┐ │
//! │  │ Resource    │ │   Expiry    │ │   Orphan    │ │ Health │ │
//! │  │ Provisioner │ │ Reconciler  │ │  Detector   │ │Monitor │ │
//! │  └─────────────┘ └─────────────┘ └─────────────┘ └────────┘ │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!               ┌──────────────┼──────────────┐
//!               ▼              ▼              ▼
//!        ┌──────────┐   ┌────────────┐  ┌──────────┐
//!        │  Store   │   │ Cloudflare │  │  Turso   │
//!        │ (RocksDB)│   │ Workers/KV │  │ branches │
//!        └──────────┘   └────────────┘  └──────────┘
//! ```
//!
//! # Usage
//!
//! ```no_run
//! use std::sync::Arc;
//! use preview_fleet_control::{LifecycleManager, PreviewConfig, PreviewLifecycle};
//! use preview_fleet_provider::{PlatformProvider, ProviderConfig};
//! use preview_fleet_store::RocksStore;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let store = Arc::new(RocksStore::open(".preview-fleet")?);
//! let provider = Arc::new(PlatformProvider::new(ProviderConfig::from_env()?)?);
//! let manager = LifecycleManager::new(provider, store, PreviewConfig::from_env()?)?;
//!
//! let record = manager.create(42, "feature/login").await?;
//! println!("Preview ready at {}", record.url);
//! # Ok(())
//! # }
//! ```
//!
//! # State Machine
//!
//! - `Provisioning` → `Active`, `Error` or `Deleting`
//! - `Active` → `Expired`, `Deleting` or `Error`
//! - `Expired` → `Deleting` or `Error`
//! - `Error` → `Deleting` or `Provisioning` (retry)
//! - `Deleting` is terminal; the record is removed afterwards
//!
//! See the [`lifecycle`] module for transition validation helpers.

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod error;
pub mod expiry;
pub mod health;
pub mod lifecycle;
pub mod notify;
pub mod orphan;
pub mod pool;
pub mod provisioner;
pub mod rollback;
pub mod service;
pub mod types;

pub use error::{ControlError, ProvisioningStep, Result};
pub use expiry::{CleanupSummary, ExpiryReconciler};
pub use health::{HealthMonitor, HealthReport, UnhealthyEnvironment};
pub use notify::{NotificationEvent, Notifier};
pub use orphan::{OrphanDetector, OrphanReport};
pub use provisioner::{worker_config, DeletionResult, ResourceProvisioner};
pub use service::{is_listing_healthy, CleanupReport, LifecycleManager, PreviewLifecycle};
pub use types::{Capacity, EnvironmentList, EnvironmentListing, PreviewConfig};

// Re-export commonly used types from dependencies for convenience
pub use preview_fleet_core::EnvironmentId;
pub use preview_fleet_store::{EnvironmentRecord, EnvironmentStatus};
