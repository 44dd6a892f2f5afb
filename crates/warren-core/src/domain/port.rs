//! Port allocation record and the filter used to select allocations.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{AgentId, ProjectId};

/// Service label of ports reserved as part of a project range.
pub const RANGE_SERVICE: &str = "range";

/// Service label of an agent's dedicated port.
pub fn agent_service(agent_id: &AgentId) -> String {
    format!("agent:{agent_id}")
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PortAllocation {
    pub project_id: ProjectId,
    pub agent_id: Option<AgentId>,
    pub port: u16,
    pub service: String,
    pub allocated_at: DateTime<Utc>,
}

/// Selects allocations. An empty filter matches everything.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AllocationFilter {
    pub project_id: Option<ProjectId>,
    pub agent_id: Option<AgentId>,
}

impl AllocationFilter {
    pub fn project(project_id: &ProjectId) -> Self {
        Self {
            project_id: Some(project_id.clone()),
            agent_id: None,
        }
    }

    pub fn agent(agent_id: &AgentId) -> Self {
        Self {
            project_id: None,
            agent_id: Some(agent_id.clone()),
        }
    }

    pub fn matches(&self, allocation: &PortAllocation) -> bool {
        self.project_id
            .as_ref()
            .map_or(true, |id| *id == allocation.project_id)
            && self
                .agent_id
                .as_ref()
                .map_or(true, |id| allocation.agent_id.as_ref() == Some(id))
    }
}
