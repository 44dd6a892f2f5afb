//! Turns parsed arguments into bridge calls and prints the outcome.
//!
//! Every lifecycle command goes through `SyncBridge::execute_command` under a
//! `cli:<pid>` session, on the dashboard server when one is running, so CLI
//! actions land in the same activity log and event stream the dashboard sees.

use std::{path::PathBuf, str::FromStr, sync::Arc};

use anyhow::Context;
use chrono::{DateTime, Utc};
use clap::ArgMatches;
use serde::Deserialize;
use serde_json::{json, Map, Value};
use tokio_util::sync::CancellationToken;
use warren_core::{
    domain::{
        ActivityFilter, ActivityLogEntry, ActivityStats, Agent, ConflictFilter, ConflictInfo,
        PortAllocation, PortRange, Project, SessionId, Severity, Source,
    },
    lifecycle::SystemStatus,
    sync::CommandName,
    CoreCommandResult, Error, Result, Services,
};

use super::{backend::Backend, error::CommandFailed};
use crate::{process_controller::CommandProcessController, server};

/// What the command line asked for.
#[derive(Debug, Clone, PartialEq)]
pub enum Invocation {
    Command { name: CommandName, params: Value },
    Activity { filter: ActivityFilter, stats: bool },
    Conflicts(ConflictFilter),
    ResolveConflict { id: String, note: Option<String> },
    Serve { bind: Option<String> },
}

fn required<'a>(matches: &'a ArgMatches, name: &str) -> Result<&'a str> {
    matches
        .get_one::<String>(name)
        .map(String::as_str)
        .ok_or_else(|| Error::validation(format!("missing argument <{name}>")))
}

fn optional(matches: &ArgMatches, name: &str) -> Option<String> {
    matches.get_one::<String>(name).cloned()
}

fn parse_since(raw: Option<&String>) -> Result<Option<DateTime<Utc>>> {
    raw.map(|s| {
        DateTime::parse_from_rfc3339(s)
            .map(|t| t.with_timezone(&Utc))
            .map_err(|e| Error::validation(format!("--since '{s}': {e}")))
    })
    .transpose()
}

/// `START-END`, both ends inclusive.
pub fn parse_port_range(raw: &str) -> Result<PortRange> {
    let (start, end) = raw
        .split_once('-')
        .ok_or_else(|| Error::validation(format!("port range '{raw}' must look like START-END")))?;
    let port = |s: &str| {
        s.trim()
            .parse::<u16>()
            .map_err(|e| Error::validation(format!("port range '{raw}': {e}")))
    };
    PortRange::new(port(start)?, port(end)?)
}

fn command(name: CommandName, params: Value) -> Invocation {
    Invocation::Command { name, params }
}

/// Map parsed arguments onto an [`Invocation`] without touching any state.
pub fn invocation(matches: &ArgMatches) -> Result<Invocation> {
    match matches.subcommand() {
        Some(("project", sub)) => project_invocation(sub),
        Some(("agent", sub)) => agent_invocation(sub),
        Some(("ports", sub)) => ports_invocation(sub),
        Some(("status", _)) => Ok(command(CommandName::GetSystemStatus, json!({}))),
        Some(("activity", sub)) => {
            let source = optional(sub, "source")
                .map(|s| {
                    Source::from_str(&s)
                        .map_err(|_| Error::validation(format!("--source '{s}': expected CLI or GUI")))
                })
                .transpose()?;
            let session_id = optional(sub, "session").map(SessionId::parse).transpose()?;
            Ok(Invocation::Activity {
                filter: ActivityFilter {
                    command: optional(sub, "command"),
                    source,
                    session_id,
                    since: parse_since(sub.get_one::<String>("since"))?,
                    limit: sub.get_one::<usize>("limit").copied(),
                },
                stats: sub.get_flag("stats"),
            })
        }
        Some(("conflicts", sub)) => match sub.subcommand() {
            Some(("resolve", resolve)) => Ok(Invocation::ResolveConflict {
                id: required(resolve, "id")?.to_string(),
                note: optional(resolve, "note"),
            }),
            _ => {
                let severity = optional(sub, "severity")
                    .map(|s| {
                        Severity::from_str(&s).map_err(|_| {
                            Error::validation(format!("--severity '{s}': expected LOW or HIGH"))
                        })
                    })
                    .transpose()?;
                Ok(Invocation::Conflicts(ConflictFilter {
                    resolved: sub.get_flag("unresolved").then_some(false),
                    severity,
                    since: parse_since(sub.get_one::<String>("since"))?,
                    resource_id: None,
                }))
            }
        },
        Some(("serve", sub)) => Ok(Invocation::Serve {
            bind: optional(sub, "bind"),
        }),
        Some((other, _)) => Err(Error::validation(format!("unknown command '{other}'"))),
        None => Err(Error::validation("no command given")),
    }
}

fn project_invocation(matches: &ArgMatches) -> Result<Invocation> {
    let by_id = |name: CommandName, sub: &ArgMatches| -> Result<Invocation> {
        Ok(command(name, json!({ "id": required(sub, "id")? })))
    };
    let membership = |name: CommandName, sub: &ArgMatches| -> Result<Invocation> {
        Ok(command(
            name,
            json!({
                "projectId": required(sub, "project")?,
                "agentId": required(sub, "agent")?,
            }),
        ))
    };

    match matches.subcommand() {
        Some(("create", sub)) => {
            let mut params = Map::new();
            params.insert("path".into(), json!(required(sub, "path")?));
            if let Some(name) = optional(sub, "name") {
                params.insert("name".into(), json!(name));
            }
            if let Some(raw) = optional(sub, "ports") {
                params.insert("portRange".into(), serde_json::to_value(parse_port_range(&raw)?)?);
            }
            Ok(command(CommandName::CreateProject, Value::Object(params)))
        }
        Some(("list", _)) => Ok(command(CommandName::GetAllProjects, json!({}))),
        Some(("show", sub)) => by_id(CommandName::GetProject, sub),
        Some(("stop", sub)) => by_id(CommandName::StopProject, sub),
        Some(("rm", sub)) => by_id(CommandName::RemoveProject, sub),
        Some(("add-agent", sub)) => membership(CommandName::AddAgentToProject, sub),
        Some(("remove-agent", sub)) => membership(CommandName::RemoveAgentFromProject, sub),
        _ => Err(Error::validation("unknown project command")),
    }
}

fn agent_invocation(matches: &ArgMatches) -> Result<Invocation> {
    let by_id = |name: CommandName, sub: &ArgMatches| -> Result<Invocation> {
        Ok(command(name, json!({ "id": required(sub, "id")? })))
    };

    match matches.subcommand() {
        Some(("create", sub)) => {
            let mut params = Map::new();
            params.insert("branch".into(), json!(required(sub, "branch")?));
            if let Some(id) = optional(sub, "id") {
                params.insert("agentId".into(), json!(id));
            }
            if let Some(project) = optional(sub, "project") {
                params.insert("projectId".into(), json!(project));
            }
            if sub.get_flag("no-auto-accept") {
                params.insert("autoAccept".into(), json!(false));
            }
            if sub.get_flag("container") {
                params.insert("useContainer".into(), json!(true));
            }
            if let Some(secs) = sub.get_one::<u64>("timeout") {
                params.insert("timeoutSecs".into(), json!(secs));
            }
            Ok(command(CommandName::CreateAgent, Value::Object(params)))
        }
        Some(("list", sub)) => {
            let mut params = Map::new();
            if let Some(project) = optional(sub, "project") {
                params.insert("projectId".into(), json!(project));
            }
            if let Some(status) = optional(sub, "status") {
                params.insert("status".into(), json!(status.to_uppercase()));
            }
            Ok(command(CommandName::GetAllAgents, Value::Object(params)))
        }
        Some(("show", sub)) => by_id(CommandName::GetAgent, sub),
        Some(("start", sub)) => by_id(CommandName::StartAgent, sub),
        Some(("stop", sub)) => by_id(CommandName::StopAgent, sub),
        Some(("rm", sub)) => Ok(command(
            CommandName::RemoveAgent,
            json!({
                "id": required(sub, "id")?,
                "removeWorktree": !sub.get_flag("keep-worktree"),
            }),
        )),
        _ => Err(Error::validation("unknown agent command")),
    }
}

fn ports_invocation(matches: &ArgMatches) -> Result<Invocation> {
    match matches.subcommand() {
        Some(("allocate", sub)) => {
            let mut params = Map::new();
            params.insert("projectId".into(), json!(required(sub, "project")?));
            if let Some(service) = optional(sub, "service") {
                params.insert("service".into(), json!(service));
            }
            if let Some(port) = sub.get_one::<u16>("preferred") {
                params.insert("preferred".into(), json!(port));
            }
            Ok(command(CommandName::AllocatePort, Value::Object(params)))
        }
        Some(("release", sub)) => Ok(command(
            CommandName::ReleaseProjectPorts,
            json!({ "id": required(sub, "project")? }),
        )),
        Some(("list", sub)) => Ok(command(
            CommandName::GetProjectPorts,
            json!({ "id": required(sub, "project")? }),
        )),
        _ => Err(Error::validation("unknown ports command")),
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// OUTPUT
// ═══════════════════════════════════════════════════════════════════════════

fn project_line(project: &Project) -> String {
    format!(
        "{}  {:<20} {:<8} ports {}  agents {}  {}",
        project.id,
        project.name,
        project.status,
        project.port_range,
        project.agent_ids.len(),
        project.path.display()
    )
}

fn agent_line(agent: &Agent) -> String {
    let ports = agent
        .assigned_ports
        .iter()
        .map(u16::to_string)
        .collect::<Vec<_>>()
        .join(",");
    format!(
        "{:<24} {:<8} {:<24} session {}{}{}",
        agent.id,
        agent.status,
        agent.branch,
        agent.session_name,
        agent
            .project_id
            .as_ref()
            .map_or_else(String::new, |p| format!("  project {p}")),
        if ports.is_empty() {
            String::new()
        } else {
            format!("  ports {ports}")
        }
    )
}

fn status_lines(status: &SystemStatus) -> Vec<String> {
    let counts = |by: &std::collections::BTreeMap<String, usize>| {
        by.iter()
            .map(|(k, v)| format!("{k}={v}"))
            .collect::<Vec<_>>()
            .join(" ")
    };
    vec![
        format!(
            "agents:   {}/{} {}",
            status.total_agents,
            status.max_agents,
            counts(&status.agents_by_status)
        ),
        format!(
            "projects: {} {}",
            status.total_projects,
            counts(&status.projects_by_status)
        ),
        format!(
            "ports:    {} allocated in {}",
            status.allocated_ports, status.port_bounds
        ),
    ]
}

/// Human-readable lines for the data of a successful command.
pub fn render(name: CommandName, data: &Value) -> std::result::Result<Vec<String>, serde_json::Error> {
    use CommandName as C;

    Ok(match name {
        C::CreateProject
        | C::StopProject
        | C::RemoveProject
        | C::GetProject
        | C::AddAgentToProject
        | C::RemoveAgentFromProject => vec![project_line(&Project::deserialize(data)?)],
        C::GetAllProjects => Vec::<Project>::deserialize(data)?
            .iter()
            .map(project_line)
            .collect(),
        C::CreateAgent | C::StartAgent | C::StopAgent | C::RemoveAgent | C::GetAgent => {
            vec![agent_line(&Agent::deserialize(data)?)]
        }
        C::GetAllAgents => Vec::<Agent>::deserialize(data)?
            .iter()
            .map(agent_line)
            .collect(),
        C::GetProjectPorts => Vec::<PortAllocation>::deserialize(data)?
            .iter()
            .map(|a| {
                let agent = a
                    .agent_id
                    .as_ref()
                    .map_or_else(String::new, |id| format!("  agent {id}"));
                format!("{:<6} {}{agent}", a.port, a.service)
            })
            .collect(),
        C::GetSystemStatus => status_lines(&SystemStatus::deserialize(data)?),
        C::AllocatePort | C::ReleaseProjectPorts => Vec::new(),
    })
}

fn print_json<T: serde::Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn report(name: CommandName, result: CoreCommandResult, json: bool) -> anyhow::Result<()> {
    if json {
        print_json(&result)?;
    } else if result.success {
        println!("{}", result.message);
        if let Some(data) = &result.data {
            for line in render(name, data).context("unexpected command data")? {
                println!("  {line}");
            }
        }
    }
    if let Some(conflict) = &result.conflict {
        tracing::warn!(
            conflict = %conflict.id,
            severity = %conflict.severity,
            other = %conflict.operation_a.session_id,
            "another session touched {} moments ago",
            conflict.resource_id
        );
    }

    match result.error {
        Some(error) => Err(CommandFailed(error).into()),
        None => Ok(()),
    }
}

fn activity_line(entry: &ActivityLogEntry) -> String {
    let status = if entry.outcome.is_success() {
        "ok"
    } else if entry.outcome.is_pending() {
        "pending"
    } else {
        "failed"
    };
    format!(
        "{:>6} {} {:<3} {:<14} {:<22} {:<7} {}",
        entry.id,
        entry.timestamp.format("%Y-%m-%d %H:%M:%S%.3f"),
        entry.source,
        entry.session_id,
        entry.command,
        status,
        entry.resource_id.as_deref().unwrap_or("-")
    )
}

fn stats_lines(stats: &ActivityStats) -> Vec<String> {
    let mut lines = vec![format!("total {}  failures {}", stats.total, stats.failures)];
    lines.extend(stats.by_source.iter().map(|(s, n)| format!("  {s:<4} {n}")));
    lines.extend(stats.by_command.iter().map(|(c, n)| format!("  {c:<22} {n}")));
    lines
}

fn conflict_line(conflict: &ConflictInfo) -> String {
    format!(
        "{}  {:<4} {:<24} {} ({}) vs {} ({})  {}",
        conflict.id,
        conflict.severity,
        conflict.resource_id,
        conflict.operation_a.command,
        conflict.operation_a.source,
        conflict.operation_b.command,
        conflict.operation_b.source,
        if conflict.resolved { "resolved" } else { "open" }
    )
}

// ═══════════════════════════════════════════════════════════════════════════
// ENTRY POINT
// ═══════════════════════════════════════════════════════════════════════════

/// Run the parsed command line.
///
/// `interrupt` fires on SIGINT/SIGTERM. Agent creations running in this
/// process roll back and the command completes with a failure; a command
/// forwarded to the dashboard server is left to the server.
pub async fn run_cli(matches: ArgMatches, interrupt: CancellationToken) -> anyhow::Result<()> {
    let json = matches.get_flag("json");
    let invocation = invocation(&matches)?;

    let mut config = warren_core::config::load_config()?;
    if let Some(path) = matches.get_one::<String>("state-db") {
        config.state_db = Some(PathBuf::from(path));
    }

    if let Invocation::Serve { bind } = invocation {
        let bind = match bind {
            Some(bind) => bind.parse()?,
            None => config.bind_addr()?,
        };
        let metrics_interval = config.metrics_interval();
        let cwd = std::env::current_dir().context("Failed to get current directory")?;
        let services =
            Services::open(config, Arc::new(CommandProcessController::new()), cwd).await?;
        return server::serve(services.bridge, bind, metrics_interval).await;
    }

    let backend = Backend::connect(config, &interrupt).await?;
    let session = SessionId::cli(std::process::id());
    tracing::debug!(session = %session, "cli session");

    match invocation {
        Invocation::Command { name, params } => {
            let result = backend
                .execute_command(name.as_str(), params, &session, &interrupt)
                .await?;
            report(name, result, json)
        }
        Invocation::Activity { filter, stats } => {
            if stats {
                let stats = backend.activity_stats(filter).await?;
                if json {
                    return print_json(&stats);
                }
                stats_lines(&stats).iter().for_each(|l| println!("{l}"));
            } else {
                let entries = backend.activity(filter).await?;
                if json {
                    return print_json(&entries);
                }
                entries.iter().for_each(|e| println!("{}", activity_line(e)));
            }
            Ok(())
        }
        Invocation::Conflicts(filter) => {
            let conflicts = backend.conflicts(filter).await?;
            if json {
                return print_json(&conflicts);
            }
            conflicts.iter().for_each(|c| println!("{}", conflict_line(c)));
            Ok(())
        }
        Invocation::ResolveConflict { id, note } => {
            let resolved = backend.resolve_conflict(&id, note.as_deref()).await?;
            if json {
                return print_json(&resolved);
            }
            println!("Resolved {}", conflict_line(&resolved));
            Ok(())
        }
        // Returned early above.
        Invocation::Serve { .. } => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cli::commands::build_cli;

    fn parse(args: &[&str]) -> anyhow::Result<Invocation> {
        let matches = build_cli().try_get_matches_from(std::iter::once("warren").chain(args.iter().copied()))?;
        Ok(invocation(&matches)?)
    }

    #[test]
    fn test_agent_create_params() -> anyhow::Result<()> {
        let parsed = parse(&[
            "agent",
            "create",
            "feature/login",
            "--project",
            "1f3a9c2e",
            "--container",
            "--timeout",
            "60",
        ])?;
        assert_eq!(
            parsed,
            Invocation::Command {
                name: CommandName::CreateAgent,
                params: json!({
                    "branch": "feature/login",
                    "projectId": "1f3a9c2e",
                    "useContainer": true,
                    "timeoutSecs": 60,
                }),
            }
        );
        Ok(())
    }

    #[test]
    fn test_agent_rm_keeps_worktree_on_request() -> anyhow::Result<()> {
        let parsed = parse(&["agent", "rm", "login-7d2c", "--keep-worktree"])?;
        assert_eq!(
            parsed,
            Invocation::Command {
                name: CommandName::RemoveAgent,
                params: json!({"id": "login-7d2c", "removeWorktree": false}),
            }
        );
        Ok(())
    }

    #[test]
    fn test_project_create_with_range() -> anyhow::Result<()> {
        let parsed = parse(&["project", "create", "/src/shop", "--ports", "4000-4009"])?;
        assert_eq!(
            parsed,
            Invocation::Command {
                name: CommandName::CreateProject,
                params: json!({"path": "/src/shop", "portRange": [4000, 4009]}),
            }
        );
        Ok(())
    }

    #[test]
    fn test_bad_port_range_is_validation_error() {
        assert!(matches!(parse_port_range("4000"), Err(Error::Validation(_))));
        assert!(matches!(parse_port_range("4009-4000"), Err(Error::Validation(_))));
    }

    #[test]
    fn test_global_json_flag_after_subcommand() -> anyhow::Result<()> {
        let matches = build_cli().try_get_matches_from(["warren", "status", "--json"])?;
        assert!(matches.get_flag("json"));
        assert_eq!(
            invocation(&matches)?,
            Invocation::Command {
                name: CommandName::GetSystemStatus,
                params: json!({}),
            }
        );
        Ok(())
    }

    #[test]
    fn test_activity_filter() -> anyhow::Result<()> {
        let parsed = parse(&[
            "activity",
            "--source",
            "gui",
            "--since",
            "2026-03-01T10:00:00Z",
            "--limit",
            "20",
        ])?;
        let Invocation::Activity { filter, stats } = parsed else {
            anyhow::bail!("expected an activity invocation");
        };
        assert!(!stats);
        assert_eq!(filter.source, Some(Source::Gui));
        assert_eq!(filter.limit, Some(20));
        assert_eq!(
            filter.since.map(|t| t.to_rfc3339()),
            Some("2026-03-01T10:00:00+00:00".to_string())
        );
        Ok(())
    }

    #[test]
    fn test_unresolved_conflicts_and_resolve() -> anyhow::Result<()> {
        let Invocation::Conflicts(filter) = parse(&["conflicts", "--unresolved", "--severity", "high"])?
        else {
            anyhow::bail!("expected a conflicts invocation");
        };
        assert_eq!(filter.resolved, Some(false));
        assert_eq!(filter.severity, Some(Severity::High));

        assert_eq!(
            parse(&["conflicts", "resolve", "c-1", "--note", "kept cli"])?,
            Invocation::ResolveConflict {
                id: "c-1".to_string(),
                note: Some("kept cli".to_string()),
            }
        );
        Ok(())
    }

    #[test]
    fn test_render_status() -> anyhow::Result<()> {
        let status = json!({
            "totalAgents": 2,
            "agentsByStatus": {"RUNNING": 1, "STOPPED": 1},
            "totalProjects": 1,
            "projectsByStatus": {"ACTIVE": 1},
            "allocatedPorts": 12,
            "maxAgents": 10,
            "portBounds": [3000, 9999],
        });
        let lines = render(CommandName::GetSystemStatus, &status)?;
        assert_eq!(lines[0], "agents:   2/10 RUNNING=1 STOPPED=1");
        assert_eq!(lines[2], "ports:    12 allocated in 3000-9999");
        Ok(())
    }
}
