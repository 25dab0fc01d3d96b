//! Cloud resource providers for preview-fleet.
//!
//! This crate provides the [`ResourceProvider`] trait and its implementations
//! for the cloud resources behind a preview environment:
//!
//! - KV namespaces and Workers scripts on Cloudflare ([`CloudflareClient`])
//! - Database branches on Turso ([`TursoClient`])
//! - HTTP health probes of deployed previews
//!
//! [`PlatformProvider`] composes these into the production provider and
//! [`DryRunProvider`] wraps any provider so mutations are only logged.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                    Lifecycle (control)                       │
//! └─────────────────────────────────────────────────────────────┘
//!                              │  ResourceProvider
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                     PlatformProvider                         │
//! │  ┌──────────────────┐ ┌──────────────┐ ┌────────────────┐   │
//! │  │ CloudflareClient │ │ TursoClient  │ │ health probe   │   │
//! │  │ KV + Workers     │ │ (optional)   │ │ GET /api/health│   │
//! │  └──────────────────┘ └──────────────┘ └────────────────┘   │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Example
//!
//! ```no_run
//! use preview_fleet_provider::{PlatformProvider, ProviderConfig, ResourceProvider};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let provider = PlatformProvider::new(ProviderConfig::from_env()?)?;
//! let workers = provider.list_workers().await?;
//! println!("{} workers deployed", workers.len());
//! # Ok(())
//! # }
//! ```
//!
//! # Testing
//!
//! For testing without real accounts, enable the `test-utils` feature and use
//! the mock provider:
//!
//! ```ignore
//! use preview_fleet_provider::{MockProvider, Operation, ResourceProvider};
//!
//! # async fn example() {
//! let provider = MockProvider::new();
//! provider.fail_on(Operation::DeployWorker);
//! assert!(provider.create_kv_namespace("pr-1-main-cache").await.is_ok());
//! # }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod cloudflare;
pub mod dry_run;
pub mod error;
pub mod platform;
pub mod provider;
pub mod turso;
pub mod types;

pub use cloudflare::CloudflareClient;
pub use dry_run::DryRunProvider;
pub use error::{ProviderError, Result};
pub use platform::PlatformProvider;
pub use provider::ResourceProvider;
pub use turso::TursoClient;
pub use types::{
    CloudflareConfig, DatabaseBranch, DeleteOutcome, HealthStatus, KvNamespace, ProviderConfig,
    TursoConfig, WorkerConfig,
};

#[cfg(any(test, feature = "test-utils"))]
pub use provider::mock::{MockProvider, Operation};
