//! Project operations and project-scoped port commands.

use std::path::{Path, PathBuf};

use super::{CommandResult, ResourceLifecycleManager};
use crate::{
    clock,
    domain::{
        validate_project_name, AgentId, ExtraMetadata, LifecycleState, PortAllocation, PortRange,
        Project, ProjectId, ProjectStatus,
    },
    ports::detect_project_ports,
    store::{AgentRepository, ProjectRepository},
    Error, Result,
};

/// Lock key serializing project registration and removal.
const REGISTRY_KEY: &str = "projects";

impl ResourceLifecycleManager {
    /// Register the repository at `path` as a project in status `ACTIVE`.
    ///
    /// # Errors
    ///
    /// - `Validation` if the path does not exist or the name is invalid
    /// - `Conflict` if the path or name is already registered
    /// - `PortUnavailable` if the requested (or a default) range cannot be reserved
    pub async fn create_project(
        &self,
        path: &Path,
        name: Option<&str>,
        port_range: Option<PortRange>,
    ) -> Result<CommandResult<Project>> {
        let path = canonical_project_dir(path).await?;
        let name = match name {
            Some(name) => validate_project_name(name)?,
            None => validate_project_name(&default_name(&path))?,
        };

        let _registry = self.locks.acquire(REGISTRY_KEY).await;
        let existing = self.store.list_projects().await?;
        if let Some(other) = existing.iter().find(|p| p.path == path) {
            return Err(Error::conflict(format!(
                "{} is already registered as project {}",
                path.display(),
                other.id
            )));
        }
        if let Some(other) = existing.iter().find(|p| p.name == name) {
            return Err(Error::conflict(format!(
                "project name '{name}' is already used by {}",
                other.id
            )));
        }

        let id = loop {
            let candidate = ProjectId::generate();
            if existing.iter().all(|p| p.id != candidate) {
                break candidate;
            }
        };

        let range = match port_range {
            Some(range) => self.ports.reserve_exact_range(&id, range).await?,
            None => {
                self.ports
                    .allocate_range(&id, self.settings.default_range_size, None)
                    .await?
            }
        };

        let project = Project {
            id: id.clone(),
            name,
            agent_ids: std::collections::BTreeSet::new(),
            port_range: range,
            status: ProjectStatus::Active,
            created_at: clock::now(),
            metadata: port_hints(&path),
            path,
        };

        if let Err(e) = self.store.upsert_project(&project).await {
            if let Err(undo) = self.ports.release_project_ports(&id).await {
                tracing::error!(project = %id, error = %undo, "could not release ports of unsaved project");
            }
            return Err(e);
        }

        tracing::info!(
            project = %project.id,
            name = %project.name,
            path = %project.path.display(),
            range = %project.port_range,
            "project created"
        );
        Ok(CommandResult::ok(
            format!(
                "project {} created with ports {}",
                project.name, project.port_range
            ),
            project,
        ))
    }

    /// Mark a project `STOPPED`. Member agents are not touched.
    pub async fn stop_project(&self, id: &ProjectId) -> Result<CommandResult<Project>> {
        let _guard = self.lock_project(id).await;
        let mut project = self.require_project(id).await?;
        if project.status == ProjectStatus::Stopped {
            return Ok(CommandResult::ok(format!("project {id} is already stopped"), project));
        }
        project.status = project.status.transition_to(ProjectStatus::Stopped)?;
        self.store.upsert_project(&project).await?;
        tracing::info!(project = %id, "project stopped");
        Ok(CommandResult::ok(format!("project {id} stopped"), project))
    }

    /// Delete a project with no member agents and release all of its ports.
    ///
    /// # Errors
    ///
    /// `Dependency` while any agent still belongs to the project.
    pub async fn remove_project(&self, id: &ProjectId) -> Result<CommandResult<Project>> {
        let _registry = self.locks.acquire(REGISTRY_KEY).await;
        let _guard = self.lock_project(id).await;
        let project = self.require_project(id).await?;
        if project.has_agents() {
            let members: Vec<&str> = project.agent_ids.iter().map(AgentId::as_str).collect();
            return Err(Error::dependency(format!(
                "project {id} still has {} agent(s): {}",
                members.len(),
                members.join(", ")
            )));
        }

        let released = self.ports.release_project_ports(id).await?;
        self.store.delete_project(id).await?;
        tracing::info!(project = %id, released, "project removed");
        Ok(CommandResult::ok(
            format!("project {id} removed, {released} port(s) released"),
            project,
        ))
    }

    // ═══════════════════════════════════════════════════════════════════════
    // MEMBERSHIP
    // ═══════════════════════════════════════════════════════════════════════

    /// Attach a standalone agent to a project.
    ///
    /// # Errors
    ///
    /// - `Conflict` if the agent belongs to another project
    /// - `MaxAgentsReached` if the project is full
    pub async fn add_agent_to_project(
        &self,
        project_id: &ProjectId,
        agent_id: &AgentId,
    ) -> Result<CommandResult<Project>> {
        let _project_guard = self.lock_project(project_id).await;
        let _agent_guard = self.lock_agent(agent_id).await;
        let mut project = self.require_project(project_id).await?;
        let mut agent = self.require_agent(agent_id).await?;

        match &agent.project_id {
            Some(current) if current == project_id => {
                if project.agent_ids.insert(agent_id.clone()) {
                    self.store.upsert_project(&project).await?;
                }
                return Ok(CommandResult::ok(
                    format!("agent {agent_id} already belongs to {project_id}"),
                    project,
                ));
            }
            Some(other) => {
                return Err(Error::conflict(format!(
                    "agent {agent_id} belongs to project {other}"
                )));
            }
            None => {}
        }

        if project.agent_ids.len() >= self.settings.max_agents_per_project {
            return Err(Error::MaxAgentsReached {
                scope: format!("project {project_id}"),
                limit: self.settings.max_agents_per_project,
            });
        }

        agent.project_id = Some(project_id.clone());
        agent.last_accessed_at = clock::now();
        self.store.upsert_agent(&agent).await?;
        project.agent_ids.insert(agent_id.clone());
        self.store.upsert_project(&project).await?;

        tracing::info!(project = %project_id, agent = %agent_id, "agent added to project");
        Ok(CommandResult::ok(
            format!("agent {agent_id} added to {project_id}"),
            project,
        ))
    }

    /// Detach an agent from a project; it becomes standalone and its
    /// dedicated ports are released. Detaching a non-member does nothing.
    pub async fn remove_agent_from_project(
        &self,
        project_id: &ProjectId,
        agent_id: &AgentId,
    ) -> Result<CommandResult<Project>> {
        let _project_guard = self.lock_project(project_id).await;
        let _agent_guard = self.lock_agent(agent_id).await;
        let mut project = self.require_project(project_id).await?;
        let agent = self.store.get_agent(agent_id).await?;

        let is_member = agent.as_ref().is_some_and(|a| a.belongs_to(project_id));
        let listed = project.agent_ids.remove(agent_id);
        if !is_member && !listed {
            return Ok(CommandResult::ok(
                format!("agent {agent_id} is not a member of {project_id}"),
                project,
            ));
        }

        if let Some(mut agent) = agent.filter(|a| a.belongs_to(project_id)) {
            self.ports.release_agent_ports(agent_id).await?;
            agent.project_id = None;
            agent.assigned_ports.clear();
            agent.last_accessed_at = clock::now();
            self.store.upsert_agent(&agent).await?;
        }
        self.store.upsert_project(&project).await?;

        tracing::info!(project = %project_id, agent = %agent_id, "agent removed from project");
        Ok(CommandResult::ok(
            format!("agent {agent_id} removed from {project_id}"),
            project,
        ))
    }

    // ═══════════════════════════════════════════════════════════════════════
    // PORTS
    // ═══════════════════════════════════════════════════════════════════════

    pub async fn allocate_port(
        &self,
        project_id: &ProjectId,
        service: Option<&str>,
        preferred: Option<u16>,
    ) -> Result<CommandResult<PortAllocation>> {
        let _guard = self.lock_project(project_id).await;
        self.require_project(project_id).await?;
        let port = self
            .ports
            .allocate_port(project_id, service, preferred)
            .await?;
        let allocation = self
            .ports
            .project_ports(project_id)
            .await?
            .into_iter()
            .find(|a| a.port == port)
            .ok_or_else(|| Error::database(format!("allocation of port {port} vanished")))?;
        Ok(CommandResult::ok(
            format!("port {port} allocated to {project_id}"),
            allocation,
        ))
    }

    /// Release every port of the project, its range included.
    pub async fn release_project_ports(&self, project_id: &ProjectId) -> Result<CommandResult<usize>> {
        let _guard = self.lock_project(project_id).await;
        self.require_project(project_id).await?;
        let released = self.ports.release_project_ports(project_id).await?;
        Ok(CommandResult::ok(
            format!("{released} port(s) released from {project_id}"),
            released,
        ))
    }
}

async fn canonical_project_dir(path: &Path) -> Result<PathBuf> {
    let canonical = tokio::fs::canonicalize(path).await.map_err(|e| {
        Error::validation(format!("project path {} is not usable: {e}", path.display()))
    })?;
    if !tokio::fs::metadata(&canonical).await?.is_dir() {
        return Err(Error::validation(format!(
            "project path {} is not a directory",
            canonical.display()
        )));
    }
    Ok(canonical)
}

fn default_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

/// Detected port hints as `port_hint.<name>` metadata. Detection problems
/// are logged and never fail project creation.
fn port_hints(path: &Path) -> ExtraMetadata {
    let mut metadata = ExtraMetadata::new();
    match detect_project_ports(path) {
        Ok(hints) => {
            for (name, port) in hints {
                if let Err(e) = metadata.insert(format!("port_hint.{name}"), port.to_string()) {
                    tracing::debug!(hint = %name, error = %e, "skipping port hint");
                }
            }
        }
        Err(e) => tracing::warn!(path = %path.display(), error = %e, "port hint detection failed"),
    }
    metadata
}
