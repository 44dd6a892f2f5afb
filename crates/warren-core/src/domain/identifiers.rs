//! Semantic newtypes for domain identifiers
//!
//! # Parse-at-Boundaries Pattern
//!
//! Each identifier type validates its input on construction, trims surrounding
//! whitespace first, and deserializes through the same validation. Once a value
//! exists it is known to be well-formed.

#![cfg_attr(not(test), deny(clippy::unwrap_used))]
#![cfg_attr(not(test), deny(clippy::expect_used))]
#![cfg_attr(not(test), deny(clippy::panic))]

use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::activity::Source;
use crate::Error;

// ============================================================================
// IDENTIFIER ERROR
// ============================================================================

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum IdentifierError {
    #[error("identifier cannot be empty")]
    Empty,

    #[error("identifier too short: {actual} characters (min {min})")]
    TooShort { min: usize, actual: usize },

    #[error("identifier too long: {actual} characters (max {max})")]
    TooLong { max: usize, actual: usize },

    #[error("identifier contains invalid characters: {details}")]
    InvalidCharacters { details: String },

    #[error("invalid identifier format: {details}")]
    InvalidFormat { details: String },
}

impl From<IdentifierError> for Error {
    fn from(err: IdentifierError) -> Self {
        Self::validation(err.to_string())
    }
}

const AGENT_ID_MIN: usize = 3;
const AGENT_ID_MAX: usize = 50;
const DERIVED_STEM_MAX: usize = 40;
const BRANCH_MAX: usize = 100;
const PROJECT_ID_MAX: usize = 64;

fn short_suffix(len: usize) -> String {
    uuid::Uuid::new_v4().simple().to_string()[..len].to_string()
}

// ============================================================================
// PROJECT ID
// ============================================================================

/// Project identifier, `proj-` plus eight hex characters when generated.
///
/// Ids written by other tooling are accepted as long as they are short and
/// contain only letters, digits, `-` or `_`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ProjectId(String);

impl ProjectId {
    pub fn parse(s: impl Into<String>) -> Result<Self, IdentifierError> {
        let s = s.into().trim().to_string();
        if s.is_empty() {
            return Err(IdentifierError::Empty);
        }
        if s.len() > PROJECT_ID_MAX {
            return Err(IdentifierError::TooLong {
                max: PROJECT_ID_MAX,
                actual: s.len(),
            });
        }
        if !s
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
        {
            return Err(IdentifierError::InvalidCharacters {
                details: format!("project id '{s}' may only contain letters, digits, '-' or '_'"),
            });
        }
        Ok(Self(s))
    }

    #[must_use]
    pub fn generate() -> Self {
        Self(format!("proj-{}", short_suffix(8)))
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

// ============================================================================
// AGENT ID
// ============================================================================

/// Agent identifier.
///
/// # Guarantees
///
/// - 3-50 characters
/// - Lowercase ASCII letters, digits and `-` only
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct AgentId(String);

impl AgentId {
    pub fn parse(s: impl Into<String>) -> Result<Self, IdentifierError> {
        let s = s.into().trim().to_string();
        if s.is_empty() {
            return Err(IdentifierError::Empty);
        }
        if s.len() < AGENT_ID_MIN {
            return Err(IdentifierError::TooShort {
                min: AGENT_ID_MIN,
                actual: s.len(),
            });
        }
        if s.len() > AGENT_ID_MAX {
            return Err(IdentifierError::TooLong {
                max: AGENT_ID_MAX,
                actual: s.len(),
            });
        }
        if !s
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-')
        {
            return Err(IdentifierError::InvalidCharacters {
                details: format!(
                    "agent id '{s}' may only contain lowercase letters, digits or '-'"
                ),
            });
        }
        Ok(Self(s))
    }

    /// Derive an id from a branch name plus a random six character suffix.
    ///
    /// `feature/Login_Page` becomes something like `feature-login-page-3f9a1c`.
    #[must_use]
    pub fn derive_from_branch(branch: &BranchName) -> Self {
        let mut stem = String::with_capacity(branch.as_str().len());
        for c in branch.as_str().chars() {
            if c.is_ascii_alphanumeric() {
                stem.push(c.to_ascii_lowercase());
            } else if !stem.ends_with('-') {
                stem.push('-');
            }
        }
        let stem: String = stem.trim_matches('-').chars().take(DERIVED_STEM_MAX).collect();
        let stem = stem.trim_end_matches('-');
        let stem = if stem.is_empty() { "agent" } else { stem };
        Self(format!("{stem}-{}", short_suffix(6)))
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

// ============================================================================
// BRANCH NAME
// ============================================================================

/// Git branch name accepted for agent worktrees.
///
/// # Guarantees
///
/// - 1-100 characters
/// - Letters, digits, `/`, `_` and `-` only
/// - Does not start with `-` or `/`, does not end with `/`, no `//`
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct BranchName(String);

impl BranchName {
    pub fn parse(s: impl Into<String>) -> Result<Self, IdentifierError> {
        let s = s.into().trim().to_string();
        if s.is_empty() {
            return Err(IdentifierError::Empty);
        }
        if s.len() > BRANCH_MAX {
            return Err(IdentifierError::TooLong {
                max: BRANCH_MAX,
                actual: s.len(),
            });
        }
        if !s
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '/' | '_' | '-'))
        {
            return Err(IdentifierError::InvalidCharacters {
                details: format!("branch '{s}' may only contain letters, digits, '/', '_' or '-'"),
            });
        }
        if s.starts_with('-') || s.starts_with('/') || s.ends_with('/') || s.contains("//") {
            return Err(IdentifierError::InvalidFormat {
                details: format!("branch '{s}' is not a valid ref name"),
            });
        }
        Ok(Self(s))
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

// ============================================================================
// SESSION ID
// ============================================================================

/// Client session identifier, namespaced by control surface: `cli:...` or
/// `gui:...`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct SessionId(String);

impl SessionId {
    pub fn parse(s: impl Into<String>) -> Result<Self, IdentifierError> {
        let s = s.into().trim().to_string();
        if s.is_empty() {
            return Err(IdentifierError::Empty);
        }
        let valid = s
            .split_once(':')
            .is_some_and(|(ns, rest)| matches!(ns, "cli" | "gui") && !rest.is_empty());
        if !valid {
            return Err(IdentifierError::InvalidFormat {
                details: format!("session id '{s}' must look like 'cli:<id>' or 'gui:<id>'"),
            });
        }
        Ok(Self(s))
    }

    #[must_use]
    pub fn cli(suffix: impl std::fmt::Display) -> Self {
        Self(format!("cli:{suffix}"))
    }

    #[must_use]
    pub fn gui(suffix: impl std::fmt::Display) -> Self {
        Self(format!("gui:{suffix}"))
    }

    /// Control surface this session belongs to.
    #[must_use]
    pub fn source(&self) -> Source {
        if self.0.starts_with("gui:") {
            Source::Gui
        } else {
            Source::Cli
        }
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

// ============================================================================
// SHARED TRAIT IMPLS
// ============================================================================

macro_rules! string_newtype_impls {
    ($($ty:ident),+) => {
        $(
            impl TryFrom<String> for $ty {
                type Error = IdentifierError;

                fn try_from(s: String) -> Result<Self, Self::Error> {
                    Self::parse(s)
                }
            }

            impl TryFrom<&str> for $ty {
                type Error = IdentifierError;

                fn try_from(s: &str) -> Result<Self, Self::Error> {
                    Self::parse(s)
                }
            }

            impl From<$ty> for String {
                fn from(id: $ty) -> Self {
                    id.0
                }
            }

            impl std::fmt::Display for $ty {
                fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                    f.write_str(&self.0)
                }
            }

            impl AsRef<str> for $ty {
                fn as_ref(&self) -> &str {
                    &self.0
                }
            }
        )+
    };
}

string_newtype_impls!(ProjectId, AgentId, BranchName, SessionId);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generated_project_id_shape() {
        let id = ProjectId::generate();
        assert!(id.as_str().starts_with("proj-"));
        assert_eq!(id.as_str().len(), 13);
        assert!(ProjectId::parse(id.as_str()).is_ok());
    }

    #[test]
    fn test_agent_id_rules() {
        assert!(AgentId::parse("feature-x").is_ok());
        assert_eq!(AgentId::parse("ab"), Err(IdentifierError::TooShort { min: 3, actual: 2 }));
        assert!(matches!(
            AgentId::parse("Feature_X"),
            Err(IdentifierError::InvalidCharacters { .. })
        ));
        assert!(matches!(
            AgentId::parse("a".repeat(51)),
            Err(IdentifierError::TooLong { max: 50, .. })
        ));
    }

    #[test]
    fn test_derived_agent_id_is_valid_and_readable() {
        let branch = BranchName::parse("feature/Login_Page").unwrap();
        let id = AgentId::derive_from_branch(&branch);
        assert!(id.as_str().starts_with("feature-login-page-"));
        assert_eq!(id.as_str().len(), "feature-login-page-".len() + 6);
        assert!(AgentId::parse(id.as_str()).is_ok());
    }

    #[test]
    fn test_derived_ids_differ() {
        let branch = BranchName::parse("main").unwrap();
        assert_ne!(
            AgentId::derive_from_branch(&branch),
            AgentId::derive_from_branch(&branch)
        );
    }

    #[test]
    fn test_long_branch_is_truncated() {
        let branch = BranchName::parse("x".repeat(100)).unwrap();
        let id = AgentId::derive_from_branch(&branch);
        assert!(id.as_str().len() <= 50);
        assert!(AgentId::parse(id.as_str()).is_ok());
    }

    #[test]
    fn test_branch_rules() {
        assert!(BranchName::parse("feature/x").is_ok());
        assert!(BranchName::parse("bug_12-fix").is_ok());
        assert!(BranchName::parse("").is_err());
        assert!(BranchName::parse("has space").is_err());
        assert!(BranchName::parse("/leading").is_err());
        assert!(BranchName::parse("trailing/").is_err());
        assert!(BranchName::parse("a//b").is_err());
    }

    #[test]
    fn test_session_namespace() {
        let cli = SessionId::parse("cli:4242").unwrap();
        assert_eq!(cli.source(), Source::Cli);
        let gui = SessionId::parse("gui:tab-1").unwrap();
        assert_eq!(gui.source(), Source::Gui);
        assert!(SessionId::parse("tui:1").is_err());
        assert!(SessionId::parse("cli:").is_err());
        assert!(SessionId::parse("4242").is_err());
    }

    #[test]
    fn test_serde_validates() {
        let ok: Result<AgentId, _> = serde_json::from_str("\"good-id\"");
        assert!(ok.is_ok());
        let bad: Result<AgentId, _> = serde_json::from_str("\"NO\"");
        assert!(bad.is_err());
    }
}
