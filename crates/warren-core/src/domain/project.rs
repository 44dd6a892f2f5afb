//! Project entity: a registered repository owning agents and a port range.

use std::{collections::BTreeSet, path::PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

use super::{AgentId, ExtraMetadata, ProjectId};
use crate::{Error, Result};

pub const PROJECT_NAME_MAX: usize = 50;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, Serialize, Deserialize)]
#[strum(serialize_all = "UPPERCASE", ascii_case_insensitive)]
#[serde(rename_all = "UPPERCASE")]
pub enum ProjectStatus {
    Active,
    Stopped,
    Error,
}

/// Inclusive port range, serialized as `[start, end]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "[u16; 2]", into = "[u16; 2]")]
pub struct PortRange {
    start: u16,
    end: u16,
}

impl PortRange {
    pub fn new(start: u16, end: u16) -> Result<Self> {
        if start > end {
            return Err(Error::validation(format!(
                "port range start {start} is above its end {end}"
            )));
        }
        Ok(Self { start, end })
    }

    pub const fn start(self) -> u16 {
        self.start
    }

    pub const fn end(self) -> u16 {
        self.end
    }

    /// Number of ports in the range.
    pub fn len(self) -> u32 {
        u32::from(self.end) - u32::from(self.start) + 1
    }

    pub const fn is_empty(self) -> bool {
        false
    }

    pub const fn contains(self, port: u16) -> bool {
        port >= self.start && port <= self.end
    }

    pub fn ports(self) -> std::ops::RangeInclusive<u16> {
        self.start..=self.end
    }
}

impl std::fmt::Display for PortRange {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}-{}", self.start, self.end)
    }
}

impl TryFrom<[u16; 2]> for PortRange {
    type Error = Error;

    fn try_from([start, end]: [u16; 2]) -> Result<Self> {
        Self::new(start, end)
    }
}

impl From<PortRange> for [u16; 2] {
    fn from(range: PortRange) -> Self {
        [range.start, range.end]
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Project {
    pub id: ProjectId,
    pub path: PathBuf,
    pub name: String,
    pub agent_ids: BTreeSet<AgentId>,
    pub port_range: PortRange,
    pub status: ProjectStatus,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub metadata: ExtraMetadata,
}

impl Project {
    pub fn has_agents(&self) -> bool {
        !self.agent_ids.is_empty()
    }
}

/// Validate a project display name.
pub fn validate_project_name(name: &str) -> Result<String> {
    let name = name.trim();
    if name.is_empty() {
        return Err(Error::validation("project name cannot be empty"));
    }
    if name.chars().count() > PROJECT_NAME_MAX {
        return Err(Error::validation(format!(
            "project name '{name}' exceeds {PROJECT_NAME_MAX} characters"
        )));
    }
    if name.chars().any(char::is_control) {
        return Err(Error::validation("project name contains control characters"));
    }
    Ok(name.to_string())
}
