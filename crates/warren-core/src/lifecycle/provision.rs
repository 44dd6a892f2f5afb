//! Agent creation steps and their reverse-order rollback.

use std::{collections::BTreeMap, path::PathBuf};

use super::ResourceLifecycleManager;
use crate::{
    domain::{AgentId, BranchName, ProjectId},
    process::ContainerOptions,
    Error, Result,
};

/// Everything an agent creation will set up.
#[derive(Debug, Clone)]
pub(super) struct AgentPlan {
    pub agent_id: AgentId,
    pub project_id: Option<ProjectId>,
    pub branch: BranchName,
    pub repo: PathBuf,
    pub worktree_path: PathBuf,
    pub session_name: String,
    pub use_container: bool,
    pub auto_accept: bool,
}

/// A completed side effect that rollback knows how to undo.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(super) enum Step {
    Worktree(PathBuf),
    Session(String),
    Port(AgentId),
    Container(String),
}

impl Step {
    const fn name(&self) -> &'static str {
        match self {
            Self::Worktree(_) => "create_worktree",
            Self::Session(_) => "create_session",
            Self::Port(_) => "allocate_port",
            Self::Container(_) => "create_container",
        }
    }
}

pub(super) fn step_names(steps: &[Step]) -> Vec<String> {
    steps.iter().map(|s| s.name().to_string()).collect()
}

/// What a successful provisioning produced.
#[derive(Debug, Clone, Default)]
pub(super) struct Provisioned {
    pub ports: Vec<u16>,
    pub container_id: Option<String>,
}

impl ResourceLifecycleManager {
    /// Run the creation steps in order, recording each completed one in
    /// `done` so the caller can roll back even if this future is dropped.
    pub(super) async fn provision(&self, plan: &AgentPlan, done: &mut Vec<Step>) -> Result<Provisioned> {
        self.process
            .create_worktree(&plan.repo, &plan.worktree_path, plan.branch.as_str())
            .await?;
        done.push(Step::Worktree(plan.worktree_path.clone()));

        self.process
            .create_session(&plan.session_name, &plan.worktree_path)
            .await?;
        done.push(Step::Session(plan.session_name.clone()));

        let mut provisioned = Provisioned::default();
        if !plan.use_container {
            return Ok(provisioned);
        }

        if let Some(project_id) = &plan.project_id {
            let port = self
                .ports
                .allocate_agent_port(project_id, &plan.agent_id)
                .await?;
            done.push(Step::Port(plan.agent_id.clone()));
            provisioned.ports.push(port);
        }

        let opts = self.container_options(plan, &provisioned.ports);
        let container_id = self.process.create_container(&opts).await?;
        done.push(Step::Container(container_id.clone()));
        provisioned.container_id = Some(container_id);
        Ok(provisioned)
    }

    pub(super) fn container_options(&self, plan: &AgentPlan, ports: &[u16]) -> ContainerOptions {
        let mut env = BTreeMap::new();
        env.insert("WARREN_AGENT_ID".to_string(), plan.agent_id.to_string());
        env.insert("WARREN_BRANCH".to_string(), plan.branch.to_string());
        env.insert("WARREN_AUTO_ACCEPT".to_string(), plan.auto_accept.to_string());
        if let Some(port) = ports.first() {
            env.insert("PORT".to_string(), port.to_string());
        }
        ContainerOptions {
            name: plan.session_name.clone(),
            image: self.settings.container_image.clone(),
            workdir: plan.worktree_path.clone(),
            ports: ports.to_vec(),
            env,
        }
    }

    /// Undo `done` in reverse order. Failures are logged and do not stop the
    /// remaining steps from being undone.
    pub(super) async fn rollback(&self, agent_id: &AgentId, done: &[Step]) {
        for step in done.iter().rev() {
            let undone = match step {
                Step::Container(id) => self.process.remove_container(id).await,
                Step::Port(agent) => self.ports.release_agent_ports(agent).await.map(|_| ()),
                Step::Session(name) => self.process.kill_session(name).await,
                Step::Worktree(path) => self.process.remove_worktree(path).await,
            };
            match undone {
                Ok(()) => tracing::warn!(agent = %agent_id, step = step.name(), "rolled back"),
                Err(e) => tracing::error!(
                    agent = %agent_id,
                    step = step.name(),
                    error = %e,
                    "rollback step failed"
                ),
            }
        }
    }
}

/// Attach the completed step names to a process failure.
pub(super) fn with_completed(err: Error, done: &[Step]) -> Error {
    match err {
        Error::Process(failure) => Error::Process(failure.with_completed_steps(step_names(done))),
        other => other,
    }
}
