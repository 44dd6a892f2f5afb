//! Agent entity: one worktree plus a multiplexer session and optional
//! container, bound to a single branch.

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

use super::{AgentId, BranchName, ExtraMetadata, ProjectId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, Serialize, Deserialize)]
#[strum(serialize_all = "UPPERCASE", ascii_case_insensitive)]
#[serde(rename_all = "UPPERCASE")]
pub enum AgentStatus {
    Created,
    Running,
    Stopped,
    Error,
    Removed,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Agent {
    pub id: AgentId,
    pub project_id: Option<ProjectId>,
    pub branch: BranchName,
    pub worktree_path: PathBuf,
    pub session_name: String,
    pub container_id: Option<String>,
    pub assigned_ports: Vec<u16>,
    pub status: AgentStatus,
    pub auto_accept: bool,
    pub use_container: bool,
    pub created_at: DateTime<Utc>,
    pub last_accessed_at: DateTime<Utc>,
    #[serde(default)]
    pub metadata: ExtraMetadata,
}

impl Agent {
    pub fn belongs_to(&self, project_id: &ProjectId) -> bool {
        self.project_id.as_ref() == Some(project_id)
    }
}

/// Selects agents. An empty filter matches everything.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AgentFilter {
    pub project_id: Option<ProjectId>,
    pub status: Option<AgentStatus>,
}

impl AgentFilter {
    pub fn project(project_id: &ProjectId) -> Self {
        Self {
            project_id: Some(project_id.clone()),
            status: None,
        }
    }

    pub fn matches(&self, agent: &Agent) -> bool {
        self.project_id
            .as_ref()
            .map_or(true, |id| agent.belongs_to(id))
            && self.status.map_or(true, |s| s == agent.status)
    }
}
