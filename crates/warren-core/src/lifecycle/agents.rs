//! Agent operations: create, start, stop, remove.

use std::sync::atomic::{AtomicUsize, Ordering};

use super::{
    provision::{with_completed, AgentPlan},
    CommandResult, CreateAgentRequest, ResourceLifecycleManager,
};
use crate::{
    clock,
    domain::{Agent, AgentFilter, AgentId, AgentStatus, ExtraMetadata, LifecycleState, Project},
    locks::ResourceGuard,
    process::ContainerStatus,
    store::{AgentRepository, ProjectRepository},
    Error, Result,
};

const ID_ATTEMPTS: usize = 8;

/// Why provisioning stopped before finishing.
enum Cut {
    Deadline,
    Interrupted,
}

/// Holds one slot of the agent ceilings until dropped.
struct Reservation<'a>(&'a AtomicUsize);

impl Drop for Reservation<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

impl ResourceLifecycleManager {
    // ═══════════════════════════════════════════════════════════════════════
    // CREATE
    // ═══════════════════════════════════════════════════════════════════════

    /// Create an agent and bring it to `RUNNING`.
    ///
    /// # Errors
    ///
    /// - `MaxAgentsReached` when a ceiling is hit; nothing is touched
    /// - `Process` naming the failed step and the steps completed before it,
    ///   after those steps were rolled back
    /// - `Timeout` when the creation deadline expires, after the same rollback
    /// - `Cancelled` when creations are interrupted, after the same rollback
    pub async fn create_agent(&self, request: CreateAgentRequest) -> Result<CommandResult<Agent>> {
        let running = AgentStatus::Created.transition_to(AgentStatus::Running)?;
        if self.interrupt.is_cancelled() {
            return Err(Error::cancelled("create_agent"));
        }

        let _project_guard = match &request.project_id {
            Some(id) => Some(self.lock_project(id).await),
            None => None,
        };
        let project = match &request.project_id {
            Some(id) => Some(self.require_project(id).await?),
            None => None,
        };

        let _reservation = self.admit(project.as_ref()).await?;
        let (agent_id, _agent_guard) = self.claim_agent_id(&request).await?;
        let plan = self.plan(&request, agent_id, project.as_ref());

        let deadline = request.timeout.unwrap_or(self.settings.creation_timeout);
        let mut done = Vec::new();
        let outcome = tokio::select! {
            outcome = tokio::time::timeout(deadline, self.provision(&plan, &mut done)) => {
                outcome.map_err(|_| Cut::Deadline)
            }
            () = self.interrupt.cancelled() => Err(Cut::Interrupted),
        };
        let provisioned = match outcome {
            Ok(Ok(provisioned)) => provisioned,
            Ok(Err(e)) => {
                tracing::warn!(agent = %plan.agent_id, error = %e, "agent creation failed, rolling back");
                self.rollback(&plan.agent_id, &done).await;
                return Err(with_completed(e, &done));
            }
            Err(Cut::Deadline) => {
                tracing::warn!(agent = %plan.agent_id, ?deadline, "agent creation deadline expired, rolling back");
                self.rollback(&plan.agent_id, &done).await;
                return Err(Error::timeout("create_agent", deadline));
            }
            Err(Cut::Interrupted) => {
                tracing::warn!(agent = %plan.agent_id, "agent creation interrupted, rolling back");
                self.rollback(&plan.agent_id, &done).await;
                return Err(Error::cancelled("create_agent"));
            }
        };

        let now = clock::now();
        let agent = Agent {
            id: plan.agent_id.clone(),
            project_id: plan.project_id.clone(),
            branch: plan.branch.clone(),
            worktree_path: plan.worktree_path.clone(),
            session_name: plan.session_name.clone(),
            container_id: provisioned.container_id,
            assigned_ports: provisioned.ports,
            status: running,
            auto_accept: plan.auto_accept,
            use_container: plan.use_container,
            created_at: now,
            last_accessed_at: now,
            metadata: ExtraMetadata::new(),
        };

        if let Err(e) = self.commit_new_agent(&agent, project).await {
            tracing::warn!(agent = %agent.id, error = %e, "persisting new agent failed, rolling back");
            self.rollback(&agent.id, &done).await;
            return Err(e);
        }

        tracing::info!(
            agent = %agent.id,
            branch = %agent.branch,
            project = ?agent.project_id.as_ref().map(ToString::to_string),
            session = %agent.session_name,
            "agent created"
        );
        Ok(CommandResult::ok(
            format!("agent {} created on branch {}", agent.id, agent.branch),
            agent,
        ))
    }

    /// Check both ceilings and take a slot. In-flight creations count.
    async fn admit(&self, project: Option<&Project>) -> Result<Reservation<'_>> {
        let _admission = self.admission.lock().await;
        let existing = self.store.list_agents(&AgentFilter::default()).await?.len();
        let in_flight = self.in_flight.load(Ordering::SeqCst);
        if existing + in_flight >= self.settings.max_agents {
            return Err(Error::MaxAgentsReached {
                scope: "system".to_string(),
                limit: self.settings.max_agents,
            });
        }
        if let Some(project) = project {
            if project.agent_ids.len() >= self.settings.max_agents_per_project {
                return Err(Error::MaxAgentsReached {
                    scope: format!("project {}", project.id),
                    limit: self.settings.max_agents_per_project,
                });
            }
        }
        self.in_flight.fetch_add(1, Ordering::SeqCst);
        Ok(Reservation(&self.in_flight))
    }

    /// Pick the agent id and lock it. Explicit ids must be unused; derived
    /// ids are regenerated on collision.
    async fn claim_agent_id(&self, request: &CreateAgentRequest) -> Result<(AgentId, ResourceGuard)> {
        if let Some(id) = &request.agent_id {
            let guard = self.lock_agent(id).await;
            if self.store.get_agent(id).await?.is_some() {
                return Err(Error::conflict(format!("agent {id} already exists")));
            }
            return Ok((id.clone(), guard));
        }

        for _ in 0..ID_ATTEMPTS {
            let id = AgentId::derive_from_branch(&request.branch);
            let guard = self.lock_agent(&id).await;
            if self.store.get_agent(&id).await?.is_none() {
                return Ok((id, guard));
            }
        }
        Err(Error::conflict(format!(
            "could not derive an unused agent id from branch {}",
            request.branch
        )))
    }

    fn plan(
        &self,
        request: &CreateAgentRequest,
        agent_id: AgentId,
        project: Option<&Project>,
    ) -> AgentPlan {
        let (repo, worktree_path) = match project {
            Some(project) => (
                project.path.clone(),
                project
                    .path
                    .join(&self.settings.worktree_dir)
                    .join(agent_id.as_str()),
            ),
            None => (
                self.settings.standalone_repo.clone(),
                self.settings.standalone_root.join(agent_id.as_str()),
            ),
        };
        AgentPlan {
            session_name: self.settings.session_name(&agent_id),
            project_id: project.map(|p| p.id.clone()),
            branch: request.branch.clone(),
            repo,
            worktree_path,
            use_container: request.use_container.unwrap_or(self.settings.use_container),
            auto_accept: request.auto_accept.unwrap_or(self.settings.auto_accept),
            agent_id,
        }
    }

    async fn commit_new_agent(&self, agent: &Agent, project: Option<Project>) -> Result<()> {
        self.store.upsert_agent(agent).await?;
        if let Some(mut project) = project {
            project.agent_ids.insert(agent.id.clone());
            if let Err(e) = self.store.upsert_project(&project).await {
                if let Err(undo) = self.store.delete_agent(&agent.id).await {
                    tracing::error!(agent = %agent.id, error = %undo, "could not delete half-committed agent");
                }
                return Err(e);
            }
        }
        Ok(())
    }

    // ═══════════════════════════════════════════════════════════════════════
    // START / STOP
    // ═══════════════════════════════════════════════════════════════════════

    /// Bring a stopped agent back, recreating its session and container as
    /// needed. Already running agents are left alone.
    pub async fn start_agent(&self, id: &AgentId) -> Result<CommandResult<Agent>> {
        let _guard = self.lock_agent(id).await;
        let mut agent = self.require_agent(id).await?;
        if agent.status == AgentStatus::Running {
            return Ok(CommandResult::ok(format!("agent {id} is already running"), agent));
        }
        let next = agent.status.transition_to(AgentStatus::Running)?;

        if let Err(e) = self.reattach(&mut agent).await {
            return Err(self.mark_error(agent, e).await);
        }

        agent.status = next;
        agent.last_accessed_at = clock::now();
        self.store.upsert_agent(&agent).await?;
        tracing::info!(agent = %id, "agent started");
        Ok(CommandResult::ok(format!("agent {id} started"), agent))
    }

    async fn reattach(&self, agent: &mut Agent) -> Result<()> {
        if !tokio::fs::try_exists(&agent.worktree_path).await? {
            return Err(Error::process(
                "start_agent",
                format!("worktree {} no longer exists", agent.worktree_path.display()),
            ));
        }

        if !self.process.session_exists(&agent.session_name).await? {
            self.process
                .create_session(&agent.session_name, &agent.worktree_path)
                .await?;
        }

        if !agent.use_container {
            return Ok(());
        }
        let status = match &agent.container_id {
            Some(cid) => Some(self.process.container_status(cid).await?),
            None => None,
        };
        if status == Some(ContainerStatus::Running) {
            return Ok(());
        }
        if let (Some(cid), Some(status)) = (agent.container_id.clone(), status) {
            if status != ContainerStatus::Missing {
                self.process.remove_container(&cid).await?;
            }
            agent.container_id = None;
        }
        let plan = AgentPlan {
            agent_id: agent.id.clone(),
            project_id: agent.project_id.clone(),
            branch: agent.branch.clone(),
            repo: agent.worktree_path.clone(),
            worktree_path: agent.worktree_path.clone(),
            session_name: agent.session_name.clone(),
            use_container: true,
            auto_accept: agent.auto_accept,
        };
        let opts = self.container_options(&plan, &agent.assigned_ports);
        agent.container_id = Some(self.process.create_container(&opts).await?);
        Ok(())
    }

    /// Kill the agent's session and remove its container. Ports stay reserved.
    pub async fn stop_agent(&self, id: &AgentId) -> Result<CommandResult<Agent>> {
        let _guard = self.lock_agent(id).await;
        let mut agent = self.require_agent(id).await?;
        if agent.status == AgentStatus::Stopped {
            return Ok(CommandResult::ok(format!("agent {id} is already stopped"), agent));
        }
        let next = agent.status.transition_to(AgentStatus::Stopped)?;

        if let Err(e) = self.teardown_runtime(&mut agent).await {
            return Err(self.mark_error(agent, e).await);
        }

        agent.status = next;
        agent.last_accessed_at = clock::now();
        self.store.upsert_agent(&agent).await?;
        tracing::info!(agent = %id, "agent stopped");
        Ok(CommandResult::ok(format!("agent {id} stopped"), agent))
    }

    async fn teardown_runtime(&self, agent: &mut Agent) -> Result<()> {
        if self.process.session_exists(&agent.session_name).await? {
            self.process.kill_session(&agent.session_name).await?;
        }
        if let Some(cid) = agent.container_id.clone() {
            self.process.remove_container(&cid).await?;
            agent.container_id = None;
        }
        Ok(())
    }

    /// Persist the agent as `ERROR` after a failed side effect and hand the
    /// error back. Agents already in `ERROR` are left as they are.
    async fn mark_error(&self, mut agent: Agent, err: Error) -> Error {
        if let Ok(next) = agent.status.transition_to(AgentStatus::Error) {
            agent.status = next;
            agent.last_accessed_at = clock::now();
            match self.store.upsert_agent(&agent).await {
                Ok(()) => tracing::warn!(agent = %agent.id, error = %err, "agent moved to ERROR"),
                Err(e) => tracing::error!(agent = %agent.id, error = %e, "could not persist ERROR status"),
            }
        }
        err
    }

    // ═══════════════════════════════════════════════════════════════════════
    // REMOVE
    // ═══════════════════════════════════════════════════════════════════════

    /// Tear an agent down, release its ports and delete its record.
    ///
    /// A failing side effect leaves the record in `ERROR` so removal can be
    /// retried.
    pub async fn remove_agent(
        &self,
        id: &AgentId,
        remove_worktree: bool,
    ) -> Result<CommandResult<Agent>> {
        let (_project_guard, _agent_guard, mut agent) = self.lock_agent_with_project(id).await?;
        let removed = agent.status.transition_to(AgentStatus::Removed)?;

        if let Err(e) = self.dismantle(&mut agent, remove_worktree).await {
            return Err(self.mark_error(agent, e).await);
        }

        self.ports.release_agent_ports(id).await?;
        self.store.delete_agent(id).await?;
        if let Some(project_id) = &agent.project_id {
            if let Some(mut project) = self.store.get_project(project_id).await? {
                if project.agent_ids.remove(id) {
                    self.store.upsert_project(&project).await?;
                }
            }
        }

        agent.status = removed;
        agent.assigned_ports.clear();
        tracing::info!(agent = %id, remove_worktree, "agent removed");
        Ok(CommandResult::ok(format!("agent {id} removed"), agent))
    }

    async fn dismantle(&self, agent: &mut Agent, remove_worktree: bool) -> Result<()> {
        self.teardown_runtime(agent).await?;
        if remove_worktree && tokio::fs::try_exists(&agent.worktree_path).await? {
            self.process.remove_worktree(&agent.worktree_path).await?;
        }
        Ok(())
    }

    /// Lock the agent's project (if any) and then the agent, retrying if
    /// the agent changed project while we waited.
    pub(super) async fn lock_agent_with_project(
        &self,
        id: &AgentId,
    ) -> Result<(Option<ResourceGuard>, ResourceGuard, Agent)> {
        loop {
            let project_id = self.require_agent(id).await?.project_id;
            let project_guard = match &project_id {
                Some(pid) => Some(self.lock_project(pid).await),
                None => None,
            };
            let agent_guard = self.lock_agent(id).await;
            let agent = self.require_agent(id).await?;
            if agent.project_id == project_id {
                return Ok((project_guard, agent_guard, agent));
            }
            tracing::debug!(agent = %id, "agent moved between projects while locking, retrying");
        }
    }
}
