//! Environment identifiers.
//!
//! Every preview environment is keyed by an [`EnvironmentId`] of the form
//! `pr-<number>-<slug>`, where the slug is a sanitized form of the branch name.
//! The same string names the worker script and the database branch, and prefixes
//! the KV namespace titles, so the id is recoverable from any live resource.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::IdError;

/// Maximum length of the branch slug inside an environment id.
pub const MAX_SLUG_LEN: usize = 30;

/// Slug characters kept when a long branch name is truncated.
const TRUNCATED_SLUG_LEN: usize = 23;

/// Hex characters of the branch hash appended to truncated slugs.
const HASH_SUFFIX_LEN: usize = 6;

const PREFIX: &str = "pr-";

/// Identifier of one preview environment, e.g. `pr-42-feature-x`.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct EnvironmentId(String);

impl EnvironmentId {
    /// Derive the environment id for a pull request and its branch.
    ///
    /// An empty (or entirely non-alphanumeric) branch yields `pr-<number>`.
    ///
    /// # Errors
    ///
    /// Returns `IdError::InvalidPrNumber` if `pr_number` is zero.
    pub fn derive(pr_number: u32, branch: &str) -> Result<Self, IdError> {
        if pr_number == 0 {
            return Err(IdError::InvalidPrNumber(pr_number));
        }

        let slug = sanitize_branch(branch);
        if slug.is_empty() {
            Ok(Self(format!("{PREFIX}{pr_number}")))
        } else {
            Ok(Self(format!("{PREFIX}{pr_number}-{slug}")))
        }
    }

    /// Parse an environment id, validating the naming convention.
    ///
    /// # Errors
    ///
    /// Returns `IdError::InvalidFormat` if the string is not `pr-<number>[-<slug>]`
    /// with a canonical number and a valid slug.
    pub fn parse(s: &str) -> Result<Self, IdError> {
        let invalid = || IdError::InvalidFormat(s.to_string());

        let rest = s.strip_prefix(PREFIX).ok_or_else(invalid)?;
        let (number, slug) = match rest.split_once('-') {
            Some((number, slug)) => (number, Some(slug)),
            None => (rest, None),
        };

        if number.is_empty() || !number.bytes().all(|b| b.is_ascii_digit()) {
            return Err(invalid());
        }
        let parsed: u32 = number.parse().map_err(|_| invalid())?;
        if parsed == 0 || parsed.to_string() != number {
            return Err(invalid());
        }

        if let Some(slug) = slug {
            if !is_valid_slug(slug) {
                return Err(invalid());
            }
        }

        Ok(Self(s.to_string()))
    }

    /// The pull request number encoded in the id.
    #[must_use]
    pub fn pr_number(&self) -> u32 {
        self.0[PREFIX.len()..]
            .split('-')
            .next()
            .and_then(|n| n.parse().ok())
            .unwrap_or_default()
    }

    /// The branch slug, if the id carries one.
    #[must_use]
    pub fn slug(&self) -> Option<&str> {
        self.0[PREFIX.len()..].split_once('-').map(|(_, slug)| slug)
    }

    /// Return the id as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Return the raw bytes used as the storage key.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        self.0.as_bytes()
    }
}

/// Sanitize a branch name into an id slug.
///
/// Lowercases ASCII alphanumerics, collapses every other run of characters into a
/// single hyphen, and trims hyphens at both ends. Slugs longer than
/// [`MAX_SLUG_LEN`] are truncated and suffixed with a short hash of the raw branch
/// name, so distinct long branches keep distinct ids.
#[must_use]
pub fn sanitize_branch(branch: &str) -> String {
    let mut slug = String::with_capacity(branch.len());
    let mut pending_hyphen = false;

    for c in branch.chars() {
        if c.is_ascii_alphanumeric() {
            if pending_hyphen && !slug.is_empty() {
                slug.push('-');
            }
            pending_hyphen = false;
            slug.push(c.to_ascii_lowercase());
        } else {
            pending_hyphen = true;
        }
    }

    if slug.len() > MAX_SLUG_LEN {
        let digest = hex::encode(blake3::hash(branch.as_bytes()).as_bytes());
        // The slug is pure ASCII here, so byte slicing is safe.
        let head = slug[..TRUNCATED_SLUG_LEN].trim_end_matches('-');
        slug = format!("{head}-{}", &digest[..HASH_SUFFIX_LEN]);
    }

    slug
}

fn is_valid_slug(slug: &str) -> bool {
    !slug.is_empty()
        && slug.len() <= MAX_SLUG_LEN
        && !slug.starts_with('-')
        && !slug.ends_with('-')
        && !slug.contains("--")
        && slug
            .bytes()
            .all(|b| b.is_ascii_lowercase() || b.is_ascii_digit() || b == b'-')
}

impl fmt::Debug for EnvironmentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "EnvironmentId({})", self.0)
    }
}

impl fmt::Display for EnvironmentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for EnvironmentId {
    type Err = IdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for EnvironmentId {
    type Error = IdError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<EnvironmentId> for String {
    fn from(id: EnvironmentId) -> Self {
        id.0
    }
}

impl AsRef<str> for EnvironmentId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn derive_from_branch_with_slash() {
        let id = EnvironmentId::derive(42, "feature/x").unwrap();
        assert_eq!(id.as_str(), "pr-42-feature-x");
        assert_eq!(id.pr_number(), 42);
        assert_eq!(id.slug(), Some("feature-x"));
    }

    #[test]
    fn derive_lowercases_and_collapses_separators() {
        let id = EnvironmentId::derive(7, "  Fix__Login--Bug!! ").unwrap();
        assert_eq!(id.as_str(), "pr-7-fix-login-bug");
    }

    #[test]
    fn derive_without_branch() {
        let id = EnvironmentId::derive(9, "").unwrap();
        assert_eq!(id.as_str(), "pr-9");
        assert_eq!(id.slug(), None);

        let id = EnvironmentId::derive(9, "///").unwrap();
        assert_eq!(id.as_str(), "pr-9");
    }

    #[test]
    fn derive_rejects_zero() {
        assert_eq!(
            EnvironmentId::derive(0, "main"),
            Err(IdError::InvalidPrNumber(0))
        );
    }

    #[test]
    fn long_branches_are_capped_and_stay_distinct() {
        let a = sanitize_branch("feature/a-very-long-branch-name-that-keeps-going-one");
        let b = sanitize_branch("feature/a-very-long-branch-name-that-keeps-going-two");

        assert_eq!(a.len(), MAX_SLUG_LEN);
        assert_ne!(a, b);
        assert!(a.starts_with("feature-a-very-long-bra"));
    }

    #[test]
    fn truncation_never_leaves_double_hyphen() {
        // The 23rd slug character is a hyphen.
        let slug = sanitize_branch("abcdefghij-abcdefghijk-bcdefghijklmnopqrstuvwxyz");
        assert!(!slug.contains("--"));
        assert!(EnvironmentId::parse(&format!("pr-1-{slug}")).is_ok());
    }

    #[test]
    fn parse_accepts_derived_ids() {
        for branch in ["feature/x", "", "UPPER_case", "a/b/c/d"] {
            let id = EnvironmentId::derive(123, branch).unwrap();
            assert_eq!(EnvironmentId::parse(id.as_str()).unwrap(), id);
        }
    }

    #[test]
    fn parse_rejects_foreign_names() {
        for name in [
            "production",
            "pr-",
            "pr-abc",
            "pr-0",
            "pr-007-x",
            "pr-1-",
            "pr-1--x",
            "pr-1-Upper",
            "pr-1-under_score",
            "PR-1-x",
        ] {
            assert!(EnvironmentId::parse(name).is_err(), "{name} should be rejected");
        }
    }

    #[test]
    fn serde_json_uses_plain_string() {
        let id = EnvironmentId::derive(5, "main").unwrap();
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, "\"pr-5-main\"");
        let parsed: EnvironmentId = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, id);

        assert!(serde_json::from_str::<EnvironmentId>("\"not-an-id\"").is_err());
    }
}
