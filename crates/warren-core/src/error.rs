//! Error types for warren with categorization:
//!
//! - **Validation errors**: bad input, ceilings, configuration (exit code 1)
//! - **Process errors**: worktree/session/container side effects, IO (exit code 2)
//! - **Not found**: unknown project, agent or conflict ids (exit code 3)
//! - **State errors**: conflicts, dependencies, storage (exit code 4)
//! - **Timeouts**: bounded operations that exceeded their deadline (exit code 5)
//! - **Cancellation**: work interrupted by a signal (exit code 130)
//!
//! Every error also maps onto a caller-facing [`ErrorKind`] and a stable
//! machine-readable code, which is what both control surfaces see.

use std::{fmt, time::Duration};

use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

/// Kind of resource an error refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, EnumString, Serialize, Deserialize)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum ResourceKind {
    Project,
    Agent,
    Conflict,
}

/// Caller-facing error taxonomy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, EnumString, Serialize, Deserialize)]
pub enum ErrorKind {
    ValidationError,
    NotFoundError,
    ConflictError,
    DependencyError,
    ProcessError,
    TimeoutError,
    InternalError,
}

/// A failed `ProcessController` operation, with the sub-steps that had
/// already succeeded when it failed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessFailure {
    pub operation: String,
    pub cause: String,
    pub completed_steps: Vec<String>,
}

impl ProcessFailure {
    pub fn new(operation: impl Into<String>, cause: impl Into<String>) -> Self {
        Self {
            operation: operation.into(),
            cause: cause.into(),
            completed_steps: Vec::new(),
        }
    }

    #[must_use]
    pub fn with_completed_steps(mut self, steps: Vec<String>) -> Self {
        self.completed_steps = steps;
        self
    }
}

impl fmt::Display for ProcessFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} failed: {}", self.operation, self.cause)?;
        if !self.completed_steps.is_empty() {
            write!(
                f,
                " (completed before failure: {})",
                self.completed_steps.join(", ")
            )?;
        }
        Ok(())
    }
}

/// Top-level error type for the core.
#[derive(Debug, Clone, thiserror::Error)]
pub enum Error {
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Maximum number of agents reached for {scope} (limit {limit})")]
    MaxAgentsReached { scope: String, limit: usize },

    #[error("{kind} not found: {id}")]
    NotFound { kind: ResourceKind, id: String },

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Port unavailable: {0}")]
    PortUnavailable(String),

    #[error("Dependency error: {0}")]
    Dependency(String),

    #[error("Process error: {0}")]
    Process(ProcessFailure),

    #[error("{operation} timed out after {}ms", .after.as_millis())]
    Timeout { operation: String, after: Duration },

    #[error("{operation} was interrupted")]
    Cancelled { operation: String },

    #[error("Database error: {0}")]
    Database(String),

    #[error("IO error: {0}")]
    Io(String),

    #[error("Parse error: {0}")]
    Parse(String),
}

/// Result alias used throughout the core.
pub type Result<T> = std::result::Result<T, Error>;

// Convenience constructors
impl Error {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn invalid_config(msg: impl Into<String>) -> Self {
        Self::InvalidConfig(msg.into())
    }

    pub fn project_not_found(id: impl Into<String>) -> Self {
        Self::NotFound {
            kind: ResourceKind::Project,
            id: id.into(),
        }
    }

    pub fn agent_not_found(id: impl Into<String>) -> Self {
        Self::NotFound {
            kind: ResourceKind::Agent,
            id: id.into(),
        }
    }

    pub fn conflict_not_found(id: impl Into<String>) -> Self {
        Self::NotFound {
            kind: ResourceKind::Conflict,
            id: id.into(),
        }
    }

    pub fn conflict(msg: impl Into<String>) -> Self {
        Self::Conflict(msg.into())
    }

    pub fn port_unavailable(msg: impl Into<String>) -> Self {
        Self::PortUnavailable(msg.into())
    }

    pub fn dependency(msg: impl Into<String>) -> Self {
        Self::Dependency(msg.into())
    }

    pub fn process(operation: impl Into<String>, cause: impl Into<String>) -> Self {
        Self::Process(ProcessFailure::new(operation, cause))
    }

    pub fn timeout(operation: impl Into<String>, after: Duration) -> Self {
        Self::Timeout {
            operation: operation.into(),
            after,
        }
    }

    pub fn cancelled(operation: impl Into<String>) -> Self {
        Self::Cancelled {
            operation: operation.into(),
        }
    }

    pub fn database(msg: impl Into<String>) -> Self {
        Self::Database(msg.into())
    }

    pub fn io(msg: impl Into<String>) -> Self {
        Self::Io(msg.into())
    }

    pub fn parse(msg: impl Into<String>) -> Self {
        Self::Parse(msg.into())
    }
}

impl Error {
    /// The caller-facing kind of this error.
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::Validation(_) | Self::InvalidConfig(_) | Self::MaxAgentsReached { .. } => {
                ErrorKind::ValidationError
            }
            Self::NotFound { .. } => ErrorKind::NotFoundError,
            Self::Conflict(_) | Self::PortUnavailable(_) => ErrorKind::ConflictError,
            Self::Dependency(_) => ErrorKind::DependencyError,
            Self::Process(_) => ErrorKind::ProcessError,
            Self::Timeout { .. } => ErrorKind::TimeoutError,
            Self::Cancelled { .. } | Self::Database(_) | Self::Io(_) | Self::Parse(_) => ErrorKind::InternalError,
        }
    }

    /// Stable machine-readable code.
    pub const fn code(&self) -> &'static str {
        match self {
            Self::Validation(_) => "VALIDATION_ERROR",
            Self::InvalidConfig(_) => "INVALID_CONFIG",
            Self::MaxAgentsReached { .. } => "MAX_AGENTS_REACHED",
            Self::NotFound {
                kind: ResourceKind::Project,
                ..
            } => "PROJECT_NOT_FOUND",
            Self::NotFound {
                kind: ResourceKind::Agent,
                ..
            } => "AGENT_NOT_FOUND",
            Self::NotFound {
                kind: ResourceKind::Conflict,
                ..
            } => "CONFLICT_NOT_FOUND",
            Self::Conflict(_) => "CONFLICT",
            Self::PortUnavailable(_) => "PORT_UNAVAILABLE",
            Self::Dependency(_) => "DEPENDENCY_ERROR",
            Self::Process(_) => "PROCESS_ERROR",
            Self::Timeout { .. } => "TIMEOUT",
            Self::Cancelled { .. } => "CANCELLED",
            Self::Database(_) => "DATABASE_ERROR",
            Self::Io(_) => "IO_ERROR",
            Self::Parse(_) => "PARSE_ERROR",
        }
    }

    /// Returns the appropriate exit code for this error type.
    ///
    /// Exit code scheme:
    /// - 1: User error (validation, ceilings, bad configuration)
    /// - 2: System error (process side effects, IO)
    /// - 3: Not found
    /// - 4: Invalid state (conflicts, dependencies, storage)
    /// - 5: Timeout
    /// - 130: Interrupted by a signal
    pub const fn exit_code(&self) -> i32 {
        match self {
            Self::Validation(_)
            | Self::InvalidConfig(_)
            | Self::MaxAgentsReached { .. }
            | Self::Parse(_) => 1,
            Self::Process(_) | Self::Io(_) => 2,
            Self::NotFound { .. } => 3,
            Self::Conflict(_)
            | Self::PortUnavailable(_)
            | Self::Dependency(_)
            | Self::Database(_) => 4,
            Self::Timeout { .. } => 5,
            Self::Cancelled { .. } => 130,
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Self::io(err.to_string())
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Self::parse(err.to_string())
    }
}

impl From<toml::de::Error> for Error {
    fn from(err: toml::de::Error) -> Self {
        Self::parse(format!("Failed to parse config: {err}"))
    }
}

impl From<sqlx::Error> for Error {
    fn from(err: sqlx::Error) -> Self {
        Self::database(err.to_string())
    }
}
