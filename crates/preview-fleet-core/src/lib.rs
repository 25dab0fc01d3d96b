//! Core types and utilities for preview-fleet.
//!
//! This crate provides the foundational types used throughout the preview-fleet tooling:
//!
//! - **Identifiers**: the [`EnvironmentId`] derived from a pull request number and branch
//! - **Naming**: how every provider resource of an environment is named, and how a live
//!   resource name maps back to the environment that owns it
//! - **Error types**: identifier parsing errors shared across crates
//!
//! # Example
//!
//! ```
//! use preview_fleet_core::{EnvironmentId, KvRole};
//!
//! let id = EnvironmentId::derive(42, "feature/x").unwrap();
//! assert_eq!(id.as_str(), "pr-42-feature-x");
//! assert_eq!(id.kv_namespace_title(KvRole::Session), "pr-42-feature-x-session");
//! assert_eq!(id.preview_url("preview.example.dev"), "https://pr-42-feature-x.preview.example.dev");
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod error;
pub mod ids;
pub mod names;

pub use error::{IdError, Result};
pub use ids::{sanitize_branch, EnvironmentId, MAX_SLUG_LEN};
pub use names::{parse_kv_namespace_title, KvRole};
