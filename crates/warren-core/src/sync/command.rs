//! The command surface shared by both control surfaces.
//!
//! A command arrives as a name plus a JSON object of parameters and is parsed
//! into a typed [`Command`] before anything runs.

use std::{path::PathBuf, time::Duration};

use serde::{de::DeserializeOwned, Deserialize};
use strum::{Display, EnumIter, EnumString, IntoStaticStr};

use crate::{
    domain::{AgentFilter, AgentId, BranchName, PortRange, ProjectId},
    lifecycle::CreateAgentRequest,
    Error, Result,
};

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, EnumIter, IntoStaticStr,
)]
#[strum(serialize_all = "camelCase")]
pub enum CommandName {
    CreateProject,
    StopProject,
    RemoveProject,
    AddAgentToProject,
    RemoveAgentFromProject,
    CreateAgent,
    StartAgent,
    StopAgent,
    RemoveAgent,
    GetProject,
    GetAllProjects,
    GetAgent,
    GetAllAgents,
    GetSystemStatus,
    AllocatePort,
    ReleaseProjectPorts,
    GetProjectPorts,
}

/// What a command does to its target, for conflict severity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display)]
#[strum(serialize_all = "lowercase")]
pub enum CommandClass {
    Create,
    Start,
    Stop,
    Remove,
    Read,
    Modify,
}

impl CommandClass {
    /// Whether two operations pull the same resource in opposite directions.
    pub const fn opposes(self, other: Self) -> bool {
        use CommandClass::{Create, Remove, Start, Stop};
        matches!(
            (self, other),
            (Start, Stop)
                | (Stop, Start)
                | (Start, Remove)
                | (Remove, Start)
                | (Create, Remove)
                | (Remove, Create)
        )
    }
}

impl CommandName {
    pub const fn class(self) -> CommandClass {
        match self {
            Self::CreateProject | Self::CreateAgent => CommandClass::Create,
            Self::StartAgent => CommandClass::Start,
            Self::StopProject | Self::StopAgent => CommandClass::Stop,
            Self::RemoveProject | Self::RemoveAgent => CommandClass::Remove,
            Self::GetProject
            | Self::GetAllProjects
            | Self::GetAgent
            | Self::GetAllAgents
            | Self::GetSystemStatus
            | Self::GetProjectPorts => CommandClass::Read,
            Self::AddAgentToProject
            | Self::RemoveAgentFromProject
            | Self::AllocatePort
            | Self::ReleaseProjectPorts => CommandClass::Modify,
        }
    }

    pub fn as_str(self) -> &'static str {
        self.into()
    }
}

/// A parsed, validated command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    CreateProject {
        path: PathBuf,
        name: Option<String>,
        port_range: Option<PortRange>,
    },
    StopProject(ProjectId),
    RemoveProject(ProjectId),
    AddAgentToProject {
        project_id: ProjectId,
        agent_id: AgentId,
    },
    RemoveAgentFromProject {
        project_id: ProjectId,
        agent_id: AgentId,
    },
    CreateAgent(CreateAgentRequest),
    StartAgent(AgentId),
    StopAgent(AgentId),
    RemoveAgent {
        id: AgentId,
        remove_worktree: bool,
    },
    GetProject(ProjectId),
    GetAllProjects,
    GetAgent(AgentId),
    GetAllAgents(AgentFilter),
    GetSystemStatus,
    AllocatePort {
        project_id: ProjectId,
        service: Option<String>,
        preferred: Option<u16>,
    },
    ReleaseProjectPorts(ProjectId),
    GetProjectPorts(ProjectId),
}

// ═══════════════════════════════════════════════════════════════════════════
// PARAMETERS
// ═══════════════════════════════════════════════════════════════════════════

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct CreateProjectParams {
    path: PathBuf,
    name: Option<String>,
    port_range: Option<PortRange>,
}

#[derive(Deserialize)]
struct ProjectRef {
    #[serde(alias = "projectId")]
    id: ProjectId,
}

#[derive(Deserialize)]
struct AgentRef {
    #[serde(alias = "agentId")]
    id: AgentId,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct MembershipParams {
    project_id: ProjectId,
    agent_id: AgentId,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct CreateAgentParams {
    branch: BranchName,
    agent_id: Option<AgentId>,
    project_id: Option<ProjectId>,
    auto_accept: Option<bool>,
    use_container: Option<bool>,
    timeout_secs: Option<u64>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RemoveAgentParams {
    #[serde(alias = "agentId")]
    id: AgentId,
    #[serde(default = "default_remove_worktree")]
    remove_worktree: bool,
}

const fn default_remove_worktree() -> bool {
    true
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct AllocatePortParams {
    #[serde(alias = "id")]
    project_id: ProjectId,
    service: Option<String>,
    preferred: Option<u16>,
}

fn params<T: DeserializeOwned>(name: CommandName, raw: serde_json::Value) -> Result<T> {
    let raw = if raw.is_null() {
        serde_json::Value::Object(serde_json::Map::new())
    } else {
        raw
    };
    serde_json::from_value(raw)
        .map_err(|e| Error::validation(format!("invalid params for {name}: {e}")))
}

impl Command {
    /// Parse `name` and its JSON parameters.
    ///
    /// # Errors
    ///
    /// `Validation` for an unknown command name, missing or mistyped
    /// parameters, or malformed identifiers.
    pub fn parse(name: &str, raw: serde_json::Value) -> Result<Self> {
        let name: CommandName = name
            .parse()
            .map_err(|_| Error::validation(format!("unknown command '{name}'")))?;

        let command = match name {
            CommandName::CreateProject => {
                let p: CreateProjectParams = params(name, raw)?;
                Self::CreateProject {
                    path: p.path,
                    name: p.name,
                    port_range: p.port_range,
                }
            }
            CommandName::StopProject => Self::StopProject(params::<ProjectRef>(name, raw)?.id),
            CommandName::RemoveProject => Self::RemoveProject(params::<ProjectRef>(name, raw)?.id),
            CommandName::AddAgentToProject => {
                let p: MembershipParams = params(name, raw)?;
                Self::AddAgentToProject {
                    project_id: p.project_id,
                    agent_id: p.agent_id,
                }
            }
            CommandName::RemoveAgentFromProject => {
                let p: MembershipParams = params(name, raw)?;
                Self::RemoveAgentFromProject {
                    project_id: p.project_id,
                    agent_id: p.agent_id,
                }
            }
            CommandName::CreateAgent => {
                let p: CreateAgentParams = params(name, raw)?;
                Self::CreateAgent(CreateAgentRequest {
                    branch: p.branch,
                    agent_id: p.agent_id,
                    project_id: p.project_id,
                    auto_accept: p.auto_accept,
                    use_container: p.use_container,
                    timeout: p.timeout_secs.map(Duration::from_secs),
                })
            }
            CommandName::StartAgent => Self::StartAgent(params::<AgentRef>(name, raw)?.id),
            CommandName::StopAgent => Self::StopAgent(params::<AgentRef>(name, raw)?.id),
            CommandName::RemoveAgent => {
                let p: RemoveAgentParams = params(name, raw)?;
                Self::RemoveAgent {
                    id: p.id,
                    remove_worktree: p.remove_worktree,
                }
            }
            CommandName::GetProject => Self::GetProject(params::<ProjectRef>(name, raw)?.id),
            CommandName::GetAllProjects => Self::GetAllProjects,
            CommandName::GetAgent => Self::GetAgent(params::<AgentRef>(name, raw)?.id),
            CommandName::GetAllAgents => Self::GetAllAgents(params(name, raw)?),
            CommandName::GetSystemStatus => Self::GetSystemStatus,
            CommandName::AllocatePort => {
                let p: AllocatePortParams = params(name, raw)?;
                Self::AllocatePort {
                    project_id: p.project_id,
                    service: p.service,
                    preferred: p.preferred,
                }
            }
            CommandName::ReleaseProjectPorts => {
                Self::ReleaseProjectPorts(params::<ProjectRef>(name, raw)?.id)
            }
            CommandName::GetProjectPorts => {
                Self::GetProjectPorts(params::<ProjectRef>(name, raw)?.id)
            }
        };
        Ok(command)
    }

    pub const fn name(&self) -> CommandName {
        match self {
            Self::CreateProject { .. } => CommandName::CreateProject,
            Self::StopProject(_) => CommandName::StopProject,
            Self::RemoveProject(_) => CommandName::RemoveProject,
            Self::AddAgentToProject { .. } => CommandName::AddAgentToProject,
            Self::RemoveAgentFromProject { .. } => CommandName::RemoveAgentFromProject,
            Self::CreateAgent(_) => CommandName::CreateAgent,
            Self::StartAgent(_) => CommandName::StartAgent,
            Self::StopAgent(_) => CommandName::StopAgent,
            Self::RemoveAgent { .. } => CommandName::RemoveAgent,
            Self::GetProject(_) => CommandName::GetProject,
            Self::GetAllProjects => CommandName::GetAllProjects,
            Self::GetAgent(_) => CommandName::GetAgent,
            Self::GetAllAgents(_) => CommandName::GetAllAgents,
            Self::GetSystemStatus => CommandName::GetSystemStatus,
            Self::AllocatePort { .. } => CommandName::AllocatePort,
            Self::ReleaseProjectPorts(_) => CommandName::ReleaseProjectPorts,
            Self::GetProjectPorts(_) => CommandName::GetProjectPorts,
        }
    }

    /// Resource the command acts on, used for conflict tracking and
    /// per-resource ordering. `None` for commands spanning all resources.
    pub fn target_resource(&self) -> Option<Target> {
        match self {
            Self::StartAgent(id) | Self::StopAgent(id) | Self::GetAgent(id) => {
                Some(Target::Agent(id.clone()))
            }
            Self::RemoveAgent { id, .. } => Some(Target::Agent(id.clone())),
            Self::CreateAgent(request) => request
                .agent_id
                .clone()
                .map(Target::Agent)
                .or_else(|| request.project_id.clone().map(Target::Project)),
            Self::StopProject(id)
            | Self::RemoveProject(id)
            | Self::GetProject(id)
            | Self::ReleaseProjectPorts(id)
            | Self::GetProjectPorts(id) => Some(Target::Project(id.clone())),
            Self::AddAgentToProject { project_id, .. }
            | Self::RemoveAgentFromProject { project_id, .. }
            | Self::AllocatePort { project_id, .. } => Some(Target::Project(project_id.clone())),
            Self::CreateProject { .. }
            | Self::GetAllProjects
            | Self::GetAllAgents(_)
            | Self::GetSystemStatus => None,
        }
    }
}

/// A project or agent a command is aimed at.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Target {
    Project(ProjectId),
    Agent(AgentId),
}

impl Target {
    /// The bare id, as logged and broadcast.
    pub fn id(&self) -> &str {
        match self {
            Self::Project(id) => id.as_str(),
            Self::Agent(id) => id.as_str(),
        }
    }

    /// Dispatch and conflict-window key. Agents and projects never share one,
    /// even when their ids are spelled the same.
    pub fn key(&self) -> String {
        match self {
            Self::Project(id) => format!("project:{id}"),
            Self::Agent(id) => format!("agent:{id}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;
    use strum::IntoEnumIterator;

    use super::*;
    use crate::domain::AgentStatus;

    #[test]
    fn test_every_name_round_trips() -> Result<()> {
        for name in CommandName::iter() {
            let parsed: CommandName = name
                .as_str()
                .parse()
                .map_err(|_| Error::validation(name.as_str()))?;
            assert_eq!(parsed, name);
        }
        assert_eq!(CommandName::AddAgentToProject.as_str(), "addAgentToProject");
        Ok(())
    }

    #[test]
    fn test_unknown_command() {
        let result = Command::parse("launchRockets", json!({}));
        assert!(matches!(result, Err(Error::Validation(msg)) if msg.contains("launchRockets")));
    }

    #[test]
    fn test_create_agent_params() -> Result<()> {
        let command = Command::parse(
            "createAgent",
            json!({"branch": "feature/x", "projectId": "proj-1234abcd", "timeoutSecs": 9}),
        )?;
        let Command::CreateAgent(request) = &command else {
            return Err(Error::validation("expected createAgent"));
        };
        assert_eq!(request.branch.as_str(), "feature/x");
        assert_eq!(request.timeout, Some(Duration::from_secs(9)));
        assert_eq!(
            command.target_resource().map(|t| t.key()).as_deref(),
            Some("project:proj-1234abcd")
        );

        let standalone = Command::parse("createAgent", json!({"branch": "solo"}))?;
        assert_eq!(standalone.target_resource(), None);
        Ok(())
    }

    #[test]
    fn test_id_aliases_and_defaults() -> Result<()> {
        assert_eq!(
            Command::parse("stopAgent", json!({"agentId": "agent-one"}))?,
            Command::StopAgent(AgentId::parse("agent-one")?)
        );
        assert_eq!(
            Command::parse("removeAgent", json!({"id": "agent-one"}))?,
            Command::RemoveAgent {
                id: AgentId::parse("agent-one")?,
                remove_worktree: true
            }
        );
        assert_eq!(
            Command::parse("getProjectPorts", json!({"projectId": "proj-1234abcd"}))?
                .target_resource()
                .map(|t| t.id().to_string())
                .as_deref(),
            Some("proj-1234abcd")
        );
        Ok(())
    }

    #[test]
    fn test_agent_and_project_with_same_id_have_separate_keys() -> Result<()> {
        let agent = Command::parse("getAgent", json!({"id": "proj-1234abcd"}))?.target_resource();
        let project = Command::parse("getProject", json!({"id": "proj-1234abcd"}))?.target_resource();
        assert_eq!(agent.as_ref().map(Target::id), project.as_ref().map(Target::id));
        assert_ne!(agent.map(|t| t.key()), project.map(|t| t.key()));
        Ok(())
    }

    #[test]
    fn test_list_commands_accept_null_params() -> Result<()> {
        assert_eq!(Command::parse("getAllProjects", serde_json::Value::Null)?, Command::GetAllProjects);
        let Command::GetAllAgents(filter) = Command::parse("getAllAgents", json!({"status": "STOPPED"}))?
        else {
            return Err(Error::validation("expected getAllAgents"));
        };
        assert_eq!(filter.status, Some(AgentStatus::Stopped));
        Ok(())
    }

    #[test]
    fn test_bad_params_are_validation_errors() {
        for (name, params) in [
            ("startAgent", json!({})),
            ("startAgent", json!({"id": "Not Valid!"})),
            ("createProject", json!({"path": "/tmp", "portRange": [9, 1]})),
            ("allocatePort", json!({"projectId": "proj-1234abcd", "preferred": "x"})),
        ] {
            let result = Command::parse(name, params);
            assert!(
                matches!(&result, Err(Error::Validation(msg)) if msg.contains(name)),
                "{name}: {result:?}"
            );
        }
    }

    #[test]
    fn test_opposing_classes() {
        use CommandClass::*;
        assert!(Start.opposes(Stop));
        assert!(Remove.opposes(Start));
        assert!(Create.opposes(Remove));
        assert!(!Stop.opposes(Stop));
        assert!(!Read.opposes(Remove));
        assert!(!Stop.opposes(Remove));
    }
}
