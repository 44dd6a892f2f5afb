//! In-memory store backed by ordered maps behind one `RwLock`.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

use super::{
    ActivityRepository, AgentRepository, ConflictCursor, ConflictRepository, PortRepository,
    ProjectRepository,
};
use crate::{
    domain::{
        ActivityFilter, ActivityLogEntry, Agent, AgentFilter, AgentId, AllocationFilter,
        ConflictFilter, ConflictInfo, NewActivity, Outcome, PortAllocation, Project, ProjectId,
    },
    Error, Result,
};

#[derive(Debug, Default)]
struct State {
    projects: BTreeMap<ProjectId, Project>,
    agents: BTreeMap<AgentId, Agent>,
    ports: BTreeMap<u16, PortAllocation>,
    activity: Vec<ActivityLogEntry>,
    conflicts: Vec<ConflictInfo>,
}

#[derive(Debug, Default)]
pub struct MemoryStore {
    state: RwLock<State>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait::async_trait]
impl ProjectRepository for MemoryStore {
    async fn get_project(&self, id: &ProjectId) -> Result<Option<Project>> {
        Ok(self.state.read().await.projects.get(id).cloned())
    }

    async fn list_projects(&self) -> Result<Vec<Project>> {
        let state = self.state.read().await;
        let mut projects: Vec<Project> = state.projects.values().cloned().collect();
        projects.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        Ok(projects)
    }

    async fn upsert_project(&self, project: &Project) -> Result<()> {
        let mut state = self.state.write().await;
        let path_taken = state
            .projects
            .values()
            .any(|p| p.id != project.id && p.path == project.path);
        if path_taken {
            return Err(Error::conflict(format!(
                "a project is already registered at {}",
                project.path.display()
            )));
        }
        state.projects.insert(project.id.clone(), project.clone());
        Ok(())
    }

    async fn delete_project(&self, id: &ProjectId) -> Result<bool> {
        Ok(self.state.write().await.projects.remove(id).is_some())
    }
}

#[async_trait::async_trait]
impl AgentRepository for MemoryStore {
    async fn get_agent(&self, id: &AgentId) -> Result<Option<Agent>> {
        Ok(self.state.read().await.agents.get(id).cloned())
    }

    async fn list_agents(&self, filter: &AgentFilter) -> Result<Vec<Agent>> {
        let state = self.state.read().await;
        let mut agents: Vec<Agent> = state
            .agents
            .values()
            .filter(|agent| filter.matches(agent))
            .cloned()
            .collect();
        agents.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        Ok(agents)
    }

    async fn upsert_agent(&self, agent: &Agent) -> Result<()> {
        self.state
            .write()
            .await
            .agents
            .insert(agent.id.clone(), agent.clone());
        Ok(())
    }

    async fn delete_agent(&self, id: &AgentId) -> Result<bool> {
        Ok(self.state.write().await.agents.remove(id).is_some())
    }
}

#[async_trait::async_trait]
impl PortRepository for MemoryStore {
    async fn list_allocations(&self, filter: &AllocationFilter) -> Result<Vec<PortAllocation>> {
        let state = self.state.read().await;
        Ok(state
            .ports
            .values()
            .filter(|allocation| filter.matches(allocation))
            .cloned()
            .collect())
    }

    async fn insert_allocations(&self, allocations: &[PortAllocation]) -> Result<()> {
        let mut state = self.state.write().await;
        let mut seen = std::collections::BTreeSet::new();
        for allocation in allocations {
            if state.ports.contains_key(&allocation.port) || !seen.insert(allocation.port) {
                return Err(Error::port_unavailable(format!(
                    "port {} is already allocated",
                    allocation.port
                )));
            }
        }
        for allocation in allocations {
            state.ports.insert(allocation.port, allocation.clone());
        }
        Ok(())
    }

    async fn delete_allocations(&self, filter: &AllocationFilter) -> Result<usize> {
        let mut state = self.state.write().await;
        let before = state.ports.len();
        state.ports.retain(|_, allocation| !filter.matches(allocation));
        Ok(before - state.ports.len())
    }

    async fn is_port_allocated(&self, port: u16) -> Result<bool> {
        Ok(self.state.read().await.ports.contains_key(&port))
    }
}

#[async_trait::async_trait]
impl ActivityRepository for MemoryStore {
    async fn append_activity(&self, entry: &NewActivity) -> Result<ActivityLogEntry> {
        let mut state = self.state.write().await;
        let id = state.activity.last().map_or(1, |last| last.id + 1);
        let stored = ActivityLogEntry {
            id,
            session_id: entry.session_id.clone(),
            source: entry.source,
            command: entry.command.clone(),
            params: entry.params.clone(),
            resource_id: entry.resource_id.clone(),
            timestamp: entry.timestamp,
            outcome: Outcome::Pending,
        };
        state.activity.push(stored.clone());
        Ok(stored)
    }

    async fn complete_activity(&self, id: i64, outcome: &Outcome) -> Result<()> {
        let mut state = self.state.write().await;
        let entry = state
            .activity
            .iter_mut()
            .find(|entry| entry.id == id && entry.outcome.is_pending())
            .ok_or_else(|| {
                Error::validation(format!("activity entry {id} is missing or already completed"))
            })?;
        entry.outcome = outcome.clone();
        Ok(())
    }

    async fn activity_page(
        &self,
        filter: &ActivityFilter,
        after: Option<i64>,
        page_size: usize,
    ) -> Result<Vec<ActivityLogEntry>> {
        let state = self.state.read().await;
        Ok(state
            .activity
            .iter()
            .filter(|entry| after.map_or(true, |cursor| entry.id > cursor))
            .filter(|entry| filter.matches(entry))
            .take(page_size)
            .cloned()
            .collect())
    }
}

#[async_trait::async_trait]
impl ConflictRepository for MemoryStore {
    async fn insert_conflict(&self, conflict: &ConflictInfo) -> Result<()> {
        let mut state = self.state.write().await;
        if state.conflicts.iter().any(|c| c.id == conflict.id) {
            return Err(Error::conflict(format!(
                "conflict {} already recorded",
                conflict.id
            )));
        }
        state.conflicts.push(conflict.clone());
        Ok(())
    }

    async fn get_conflict(&self, id: &str) -> Result<Option<ConflictInfo>> {
        let state = self.state.read().await;
        Ok(state.conflicts.iter().find(|c| c.id == id).cloned())
    }

    async fn resolve_conflict(
        &self,
        id: &str,
        resolution: Option<&str>,
        at: DateTime<Utc>,
    ) -> Result<Option<ConflictInfo>> {
        let mut state = self.state.write().await;
        Ok(state.conflicts.iter_mut().find(|c| c.id == id).map(|conflict| {
            if !conflict.resolved {
                conflict.resolved = true;
                conflict.resolution = resolution.map(str::to_string);
                conflict.resolved_at = Some(at);
            }
            conflict.clone()
        }))
    }

    async fn conflict_page(
        &self,
        filter: &ConflictFilter,
        after: Option<&ConflictCursor>,
        page_size: usize,
    ) -> Result<Vec<ConflictInfo>> {
        let state = self.state.read().await;
        let mut matching: Vec<&ConflictInfo> = state
            .conflicts
            .iter()
            .filter(|c| filter.matches(c))
            .filter(|c| {
                after.map_or(true, |(ts, id)| (c.detected_at, &c.id) > (*ts, id))
            })
            .collect();
        matching.sort_by(|a, b| (a.detected_at, &a.id).cmp(&(b.detected_at, &b.id)));
        Ok(matching.into_iter().take(page_size).cloned().collect())
    }
}
