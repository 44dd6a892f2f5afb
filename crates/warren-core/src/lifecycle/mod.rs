//! Resource lifecycle manager.
//!
//! Owns the Project and Agent state machines. Every mutating operation holds
//! the per-resource lock of each entity it touches (project before agent)
//! for its whole duration; reads go straight to the store.
//!
//! Agent creation is a sequence of side effects (worktree, session, port,
//! container). A failure, an expired deadline or an interrupt undoes the
//! completed steps in reverse order and nothing is persisted. Once an agent exists, a failing
//! side effect moves it to `ERROR` instead.

#![cfg_attr(not(test), deny(clippy::unwrap_used))]
#![cfg_attr(not(test), deny(clippy::expect_used))]
#![cfg_attr(not(test), deny(clippy::panic))]

mod agents;
mod projects;
mod provision;

#[cfg(test)]
mod test_fixture;
#[cfg(test)]
mod tests_agents;
#[cfg(test)]
mod tests_projects;

use std::{
    collections::BTreeMap,
    path::PathBuf,
    sync::{atomic::AtomicUsize, Arc},
    time::Duration,
};

use itertools::Itertools;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

use crate::{
    config::Config,
    domain::{
        Agent, AgentFilter, AgentId, AllocationFilter, BranchName, PortAllocation, PortRange,
        Project, ProjectId,
    },
    locks::{ResourceGuard, ResourceLocks},
    ports::PortAllocator,
    process::ProcessController,
    store::{AgentRepository, PersistenceStore, PortRepository, ProjectRepository},
    Error, Result,
};

/// Result envelope shared by every lifecycle operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandResult<T> {
    pub success: bool,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
}

impl<T> CommandResult<T> {
    pub fn ok(message: impl Into<String>, data: T) -> Self {
        Self {
            success: true,
            message: message.into(),
            data: Some(data),
        }
    }

    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> CommandResult<U> {
        CommandResult {
            success: self.success,
            message: self.message,
            data: self.data.map(f),
        }
    }
}

/// Parameters of `create_agent`. Unset options fall back to configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreateAgentRequest {
    pub branch: BranchName,
    pub agent_id: Option<AgentId>,
    pub project_id: Option<ProjectId>,
    pub auto_accept: Option<bool>,
    pub use_container: Option<bool>,
    /// Deadline for the whole creation, including rollback triggering.
    pub timeout: Option<Duration>,
}

impl CreateAgentRequest {
    pub const fn new(branch: BranchName) -> Self {
        Self {
            branch,
            agent_id: None,
            project_id: None,
            auto_accept: None,
            use_container: None,
            timeout: None,
        }
    }

    #[must_use]
    pub fn in_project(mut self, project_id: ProjectId) -> Self {
        self.project_id = Some(project_id);
        self
    }

    #[must_use]
    pub fn with_id(mut self, agent_id: AgentId) -> Self {
        self.agent_id = Some(agent_id);
        self
    }

    #[must_use]
    pub const fn with_container(mut self, use_container: bool) -> Self {
        self.use_container = Some(use_container);
        self
    }

    #[must_use]
    pub const fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

/// Counts across the whole system, as reported by `system_status`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SystemStatus {
    pub total_agents: usize,
    pub agents_by_status: BTreeMap<String, usize>,
    pub total_projects: usize,
    pub projects_by_status: BTreeMap<String, usize>,
    pub allocated_ports: usize,
    pub max_agents: usize,
    pub port_bounds: PortRange,
}

/// Configuration values the manager consults.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LifecycleSettings {
    pub default_range_size: u16,
    pub max_agents: usize,
    pub max_agents_per_project: usize,
    pub session_prefix: String,
    pub worktree_dir: PathBuf,
    pub standalone_root: PathBuf,
    /// Repository standalone agents check out from.
    pub standalone_repo: PathBuf,
    pub auto_accept: bool,
    pub use_container: bool,
    pub container_image: String,
    pub creation_timeout: Duration,
}

impl LifecycleSettings {
    pub fn from_config(config: &Config, standalone_repo: PathBuf) -> Result<Self> {
        Ok(Self {
            default_range_size: config.ports.default_range_size,
            max_agents: config.agents.max_agents,
            max_agents_per_project: config.agents.max_agents_per_project,
            session_prefix: config.agents.session_prefix.clone(),
            worktree_dir: config.agents.worktree_dir.clone(),
            standalone_root: config.standalone_root()?,
            standalone_repo,
            auto_accept: config.agents.auto_accept,
            use_container: config.container.enabled,
            container_image: config.container.image.clone(),
            creation_timeout: config.creation_timeout(),
        })
    }

    pub fn session_name(&self, agent_id: &AgentId) -> String {
        format!("{}-{agent_id}", self.session_prefix)
    }
}

pub struct ResourceLifecycleManager {
    store: Arc<dyn PersistenceStore>,
    ports: Arc<PortAllocator>,
    process: Arc<dyn ProcessController>,
    locks: ResourceLocks,
    /// Serializes agent admission (ceiling check plus reservation).
    admission: Mutex<()>,
    /// Agents whose creation is in flight; they count toward the ceilings.
    in_flight: AtomicUsize,
    /// Fired on shutdown; in-flight creations roll back and fail.
    interrupt: CancellationToken,
    settings: LifecycleSettings,
}

fn project_key(id: &ProjectId) -> String {
    format!("project:{id}")
}

fn agent_key(id: &AgentId) -> String {
    format!("agent:{id}")
}

impl ResourceLifecycleManager {
    pub fn new(
        store: Arc<dyn PersistenceStore>,
        ports: Arc<PortAllocator>,
        process: Arc<dyn ProcessController>,
        settings: LifecycleSettings,
    ) -> Self {
        Self {
            store,
            ports,
            process,
            locks: ResourceLocks::new(),
            admission: Mutex::new(()),
            in_flight: AtomicUsize::new(0),
            interrupt: CancellationToken::new(),
            settings,
        }
    }

    /// Abort every agent creation in flight, and every one started later,
    /// through the usual rollback. Other operations are unaffected.
    pub fn interrupt_creations(&self) {
        if !self.interrupt.is_cancelled() {
            tracing::info!("interrupting agent creations");
        }
        self.interrupt.cancel();
    }

    pub const fn settings(&self) -> &LifecycleSettings {
        &self.settings
    }

    pub fn ports(&self) -> &PortAllocator {
        &self.ports
    }

    async fn lock_project(&self, id: &ProjectId) -> ResourceGuard {
        self.locks.acquire(&project_key(id)).await
    }

    async fn lock_agent(&self, id: &AgentId) -> ResourceGuard {
        self.locks.acquire(&agent_key(id)).await
    }

    async fn require_project(&self, id: &ProjectId) -> Result<Project> {
        self.store
            .get_project(id)
            .await?
            .ok_or_else(|| Error::project_not_found(id.as_str()))
    }

    async fn require_agent(&self, id: &AgentId) -> Result<Agent> {
        self.store
            .get_agent(id)
            .await?
            .ok_or_else(|| Error::agent_not_found(id.as_str()))
    }

    // ═══════════════════════════════════════════════════════════════════════
    // READS
    // ═══════════════════════════════════════════════════════════════════════

    pub async fn get_project(&self, id: &ProjectId) -> Result<CommandResult<Project>> {
        let project = self.require_project(id).await?;
        Ok(CommandResult::ok(format!("project {id}"), project))
    }

    pub async fn get_all_projects(&self) -> Result<CommandResult<Vec<Project>>> {
        let projects = self.store.list_projects().await?;
        Ok(CommandResult::ok(
            format!("{} project(s)", projects.len()),
            projects,
        ))
    }

    pub async fn get_agent(&self, id: &AgentId) -> Result<CommandResult<Agent>> {
        let agent = self.require_agent(id).await?;
        Ok(CommandResult::ok(format!("agent {id}"), agent))
    }

    pub async fn get_all_agents(&self, filter: &AgentFilter) -> Result<CommandResult<Vec<Agent>>> {
        let agents = self.store.list_agents(filter).await?;
        Ok(CommandResult::ok(format!("{} agent(s)", agents.len()), agents))
    }

    pub async fn get_project_ports(
        &self,
        project_id: &ProjectId,
    ) -> Result<CommandResult<Vec<PortAllocation>>> {
        self.require_project(project_id).await?;
        let allocations = self.ports.project_ports(project_id).await?;
        Ok(CommandResult::ok(
            format!("{} port(s) allocated to {project_id}", allocations.len()),
            allocations,
        ))
    }

    pub async fn system_status(&self) -> Result<CommandResult<SystemStatus>> {
        let agents = self.store.list_agents(&AgentFilter::default()).await?;
        let projects = self.store.list_projects().await?;
        let allocated_ports = self
            .store
            .list_allocations(&AllocationFilter::default())
            .await?
            .len();

        let agents_by_status: BTreeMap<String, usize> = agents
            .iter()
            .counts_by(|a| a.status.to_string())
            .into_iter()
            .collect();
        let projects_by_status: BTreeMap<String, usize> = projects
            .iter()
            .counts_by(|p| p.status.to_string())
            .into_iter()
            .collect();

        let status = SystemStatus {
            total_agents: agents.len(),
            agents_by_status,
            total_projects: projects.len(),
            projects_by_status,
            allocated_ports,
            max_agents: self.settings.max_agents,
            port_bounds: self.ports.bounds(),
        };
        Ok(CommandResult::ok(
            format!(
                "{} agent(s), {} project(s), {} port(s) allocated",
                status.total_agents, status.total_projects, status.allocated_ports
            ),
            status,
        ))
    }
}
