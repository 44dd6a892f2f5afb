//! Activity log entries and conflict records owned by the sync bridge.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

use super::SessionId;
use crate::ErrorKind;

/// Control surface a command came from.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Display, EnumString, Serialize, Deserialize,
)]
#[strum(serialize_all = "UPPERCASE", ascii_case_insensitive)]
#[serde(rename_all = "UPPERCASE")]
pub enum Source {
    Cli,
    Gui,
}

/// Outcome of a logged command. `Pending` while the command is executing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum Outcome {
    Pending,
    Success {
        message: String,
    },
    Failure {
        kind: ErrorKind,
        code: String,
        message: String,
    },
}

impl Outcome {
    pub const fn is_pending(&self) -> bool {
        matches!(self, Self::Pending)
    }

    pub const fn is_success(&self) -> bool {
        matches!(self, Self::Success { .. })
    }

    pub fn message(&self) -> Option<&str> {
        match self {
            Self::Pending => None,
            Self::Success { message } | Self::Failure { message, .. } => Some(message),
        }
    }
}

/// A log entry about to be appended; the store assigns the id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewActivity {
    pub session_id: SessionId,
    pub source: Source,
    pub command: String,
    pub params: serde_json::Value,
    pub resource_id: Option<String>,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActivityLogEntry {
    /// Store-assigned sequence number, increasing in append order.
    pub id: i64,
    pub session_id: SessionId,
    pub source: Source,
    pub command: String,
    pub params: serde_json::Value,
    pub resource_id: Option<String>,
    pub timestamp: DateTime<Utc>,
    pub outcome: Outcome,
}

/// Filters for activity queries. `limit` caps the total number of entries.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ActivityFilter {
    pub command: Option<String>,
    pub source: Option<Source>,
    pub session_id: Option<SessionId>,
    pub since: Option<DateTime<Utc>>,
    pub limit: Option<usize>,
}

impl ActivityFilter {
    pub fn matches(&self, entry: &ActivityLogEntry) -> bool {
        self.command.as_ref().map_or(true, |c| *c == entry.command)
            && self.source.map_or(true, |s| s == entry.source)
            && self
                .session_id
                .as_ref()
                .map_or(true, |s| *s == entry.session_id)
            && self.since.map_or(true, |t| entry.timestamp >= t)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActivityStats {
    pub total: usize,
    pub by_source: BTreeMap<Source, usize>,
    pub by_command: BTreeMap<String, usize>,
    pub failures: usize,
}

// ═══════════════════════════════════════════════════════════════════════════
// CONFLICTS
// ═══════════════════════════════════════════════════════════════════════════

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Display, EnumString, Serialize, Deserialize,
)]
#[strum(serialize_all = "UPPERCASE", ascii_case_insensitive)]
#[serde(rename_all = "UPPERCASE")]
pub enum Severity {
    Low,
    High,
}

/// One side of a conflict: the logged command that took part in it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OperationRef {
    pub log_id: i64,
    pub command: String,
    pub source: Source,
    pub session_id: SessionId,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConflictInfo {
    pub id: String,
    pub resource_id: String,
    /// The earlier operation.
    pub operation_a: OperationRef,
    /// The operation whose arrival raised the conflict.
    pub operation_b: OperationRef,
    pub severity: Severity,
    pub resolved: bool,
    pub resolution: Option<String>,
    pub detected_at: DateTime<Utc>,
    pub resolved_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ConflictFilter {
    pub resolved: Option<bool>,
    pub severity: Option<Severity>,
    pub since: Option<DateTime<Utc>>,
    pub resource_id: Option<String>,
}

impl ConflictFilter {
    pub fn matches(&self, conflict: &ConflictInfo) -> bool {
        self.resolved.map_or(true, |r| r == conflict.resolved)
            && self.severity.map_or(true, |s| s == conflict.severity)
            && self.since.map_or(true, |t| conflict.detected_at >= t)
            && self
                .resource_id
                .as_ref()
                .map_or(true, |r| *r == conflict.resource_id)
    }
}
