//! The single command entry point for both control surfaces.
//!
//! `execute_command` runs every command through the same pipeline:
//!
//! 1. wait for the target resource's dispatch slot (FIFO per resource)
//! 2. append a pending activity entry
//! 3. check the conflict window and record a conflict if there is one
//! 4. dispatch to the lifecycle manager
//! 5. complete the activity entry with the outcome
//! 6. publish the state-change event and `command.executed`
//!
//! Steps 2-6 happen while the dispatch slot is held, so commands on one
//! resource are logged, applied and broadcast in the same order.

use std::{sync::Arc, time::Duration};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::{sync::Mutex, time::Instant};

use super::{
    activity::{ActivityQuery, ConflictQuery},
    command::{Command, CommandName, Target},
    conflicts::{ConflictDetector, Overlap},
    events::{Channel, Event, EventHub, Subscription},
};
use crate::{
    clock::{self, MonotonicClock},
    config::SyncConfig,
    domain::{
        ActivityFilter, ActivityLogEntry, ActivityStats, ConflictFilter, ConflictInfo, NewActivity,
        OperationRef, Outcome, SessionId, Source,
    },
    lifecycle::{CommandResult, ResourceLifecycleManager},
    locks::ResourceLocks,
    store::{ActivityRepository, ConflictRepository, PersistenceStore},
    Error, ErrorKind, Result,
};

/// Error details carried by a failed [`CoreCommandResult`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandError {
    pub kind: ErrorKind,
    pub code: String,
    pub message: String,
}

impl From<&Error> for CommandError {
    fn from(err: &Error) -> Self {
        Self {
            kind: err.kind(),
            code: err.code().to_string(),
            message: err.to_string(),
        }
    }
}

/// What a control surface gets back from `execute_command`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CoreCommandResult {
    pub success: bool,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<CommandError>,
    /// Id of the activity log entry recording this command.
    pub command_id: i64,
    pub command: String,
    pub source: Source,
    pub session_id: SessionId,
    pub execution_time_ms: u64,
    pub timestamp: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub conflict: Option<ConflictInfo>,
}

/// Outcome of a dispatched command before it is wrapped for the caller.
struct Dispatched {
    message: String,
    data: Option<Value>,
    event: Option<Event>,
}

fn dispatched<T: Serialize>(
    result: CommandResult<T>,
    event: impl FnOnce(&Value) -> Option<Event>,
) -> Result<Dispatched> {
    let data = result.data.map(|d| serde_json::to_value(&d)).transpose()?;
    let event = data.as_ref().and_then(event);
    Ok(Dispatched {
        message: result.message,
        data,
        event,
    })
}

fn state_event(channel: Channel, kind: &str, resource: impl ToString) -> impl FnOnce(&Value) -> Option<Event> {
    let kind = kind.to_string();
    let resource = resource.to_string();
    move |data| Some(Event::new(channel, kind, data.clone()).for_resource(resource))
}

fn no_event(_: &Value) -> Option<Event> {
    None
}

/// Marks a tracked operation finished even if the command future is dropped.
struct InFlight<'a> {
    detector: &'a ConflictDetector,
    resource: String,
    log_id: i64,
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.detector.finish(&self.resource, self.log_id);
    }
}

pub struct SyncBridge {
    lifecycle: Arc<ResourceLifecycleManager>,
    store: Arc<dyn PersistenceStore>,
    hub: Arc<EventHub>,
    detector: ConflictDetector,
    dispatch: ResourceLocks,
    /// Serializes appends so ids and timestamps grow together.
    append: Mutex<()>,
    resolve: Mutex<()>,
    clock: MonotonicClock,
    page_size: usize,
}

impl SyncBridge {
    pub fn new(
        lifecycle: Arc<ResourceLifecycleManager>,
        store: Arc<dyn PersistenceStore>,
        config: &SyncConfig,
    ) -> Self {
        Self {
            lifecycle,
            store,
            hub: Arc::new(EventHub::new(config.event_buffer)),
            detector: ConflictDetector::new(Duration::from_secs(config.conflict_window_secs)),
            dispatch: ResourceLocks::new(),
            append: Mutex::new(()),
            resolve: Mutex::new(()),
            clock: MonotonicClock::new(),
            page_size: config.page_size,
        }
    }

    pub fn lifecycle(&self) -> &ResourceLifecycleManager {
        &self.lifecycle
    }

    pub fn events(&self) -> Arc<EventHub> {
        Arc::clone(&self.hub)
    }

    pub fn subscribe(&self, channel: Channel) -> Subscription {
        self.hub.subscribe(channel)
    }

    /// Run `name` with `params` on behalf of `session_id`.
    ///
    /// Command failures come back as `Ok` with `success == false` and are
    /// logged like any other outcome.
    ///
    /// # Errors
    ///
    /// - `Validation` if `session_id` is not `cli:*` or `gui:*` (nothing is logged)
    /// - storage errors while writing the activity log
    pub async fn execute_command(
        &self,
        name: &str,
        params: Value,
        session_id: &str,
    ) -> Result<CoreCommandResult> {
        let session = SessionId::parse(session_id)?;
        let source = session.source();
        let parsed = Command::parse(name, params.clone());
        let target = parsed.as_ref().ok().and_then(Command::target_resource);

        let _slot = match &target {
            Some(target) => Some(self.dispatch.acquire(&target.key()).await),
            None => None,
        };
        let started = Instant::now();

        let entry = self
            .append_pending(NewActivity {
                session_id: session.clone(),
                source,
                command: name.to_string(),
                params,
                resource_id: target.as_ref().map(|t| t.id().to_string()),
                timestamp: clock::now(),
            })
            .await?;

        let (conflict, _in_flight) = match (&target, &parsed) {
            (Some(target), Ok(command)) => {
                let conflict = self.check_conflict(target, &entry, command.name()).await;
                let guard = InFlight {
                    detector: &self.detector,
                    resource: target.key(),
                    log_id: entry.id,
                };
                (conflict, Some(guard))
            }
            _ => (None, None),
        };

        let outcome = match parsed {
            Ok(command) => self.dispatch(&command).await,
            Err(e) => Err(e),
        };

        let (result_outcome, result) = match outcome {
            Ok(done) => {
                let stored = Outcome::Success {
                    message: done.message.clone(),
                };
                (stored, Ok(done))
            }
            Err(e) => {
                let stored = Outcome::Failure {
                    kind: e.kind(),
                    code: e.code().to_string(),
                    message: e.to_string(),
                };
                (stored, Err(e))
            }
        };
        self.store
            .complete_activity(entry.id, &result_outcome)
            .await?;

        let execution_time_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);
        let core = match result {
            Ok(done) => {
                if let Some(event) = done.event {
                    self.hub.publish(event);
                }
                tracing::info!(
                    command = %name,
                    session = %session,
                    log_id = entry.id,
                    elapsed_ms = execution_time_ms,
                    "command succeeded"
                );
                CoreCommandResult {
                    success: true,
                    message: done.message,
                    data: done.data,
                    error: None,
                    command_id: entry.id,
                    command: name.to_string(),
                    source,
                    session_id: session,
                    execution_time_ms,
                    timestamp: entry.timestamp,
                    conflict,
                }
            }
            Err(e) => {
                tracing::info!(
                    command = %name,
                    session = %session,
                    log_id = entry.id,
                    code = e.code(),
                    error = %e,
                    "command failed"
                );
                CoreCommandResult {
                    success: false,
                    message: e.to_string(),
                    data: None,
                    error: Some(CommandError::from(&e)),
                    command_id: entry.id,
                    command: name.to_string(),
                    source,
                    session_id: session,
                    execution_time_ms,
                    timestamp: entry.timestamp,
                    conflict,
                }
            }
        };

        let executed = ActivityLogEntry {
            outcome: result_outcome,
            ..entry
        };
        self.hub.publish(
            Event::new(Channel::Activity, "command.executed", serde_json::to_value(&executed)?)
                .for_resource(executed.id.to_string()),
        );
        Ok(core)
    }

    async fn append_pending(&self, mut entry: NewActivity) -> Result<ActivityLogEntry> {
        let _append = self.append.lock().await;
        entry.timestamp = self.clock.now();
        self.store.append_activity(&entry).await
    }

    /// Record a conflict if `entry` overlaps an operation still in the
    /// window. Conflicts are advisory; failing to store one only logs.
    async fn check_conflict(
        &self,
        target: &Target,
        entry: &ActivityLogEntry,
        name: CommandName,
    ) -> Option<ConflictInfo> {
        let resource = target.id();
        let operation = OperationRef {
            log_id: entry.id,
            command: entry.command.clone(),
            source: entry.source,
            session_id: entry.session_id.clone(),
        };
        let Overlap { earlier, severity } =
            self.detector.begin(&target.key(), operation.clone(), name.class())?;

        let conflict = ConflictInfo {
            id: uuid::Uuid::new_v4().to_string(),
            resource_id: resource.to_string(),
            operation_a: earlier,
            operation_b: operation,
            severity,
            resolved: false,
            resolution: None,
            detected_at: entry.timestamp,
            resolved_at: None,
        };
        if let Err(e) = self.store.insert_conflict(&conflict).await {
            tracing::error!(resource, error = %e, "could not record conflict");
            return None;
        }

        tracing::warn!(
            resource,
            severity = %conflict.severity,
            first = %conflict.operation_a.command,
            first_source = %conflict.operation_a.source,
            second = %conflict.operation_b.command,
            second_source = %conflict.operation_b.source,
            "conflicting operations on resource"
        );
        match serde_json::to_value(&conflict) {
            Ok(data) => {
                self.hub
                    .publish(Event::new(Channel::Sync, "sync.conflict", data).for_resource(resource));
            }
            Err(e) => tracing::warn!(error = %e, "could not serialize conflict event"),
        }
        Some(conflict)
    }

    async fn dispatch(&self, command: &Command) -> Result<Dispatched> {
        let lifecycle = &self.lifecycle;
        match command {
            Command::CreateProject {
                path,
                name,
                port_range,
            } => {
                let result = lifecycle
                    .create_project(path, name.as_deref(), *port_range)
                    .await?;
                let id = result.data.as_ref().map(|p| p.id.to_string());
                dispatched(result, |data| {
                    id.map(|id| {
                        Event::new(Channel::Projects, "project.created", data.clone()).for_resource(id)
                    })
                })
            }
            Command::StopProject(id) => dispatched(
                lifecycle.stop_project(id).await?,
                state_event(Channel::Projects, "project.stopped", id),
            ),
            Command::RemoveProject(id) => dispatched(
                lifecycle.remove_project(id).await?,
                state_event(Channel::Projects, "project.removed", id),
            ),
            Command::AddAgentToProject {
                project_id,
                agent_id,
            } => dispatched(
                lifecycle.add_agent_to_project(project_id, agent_id).await?,
                membership_event("project.agent_added", project_id.as_str(), agent_id.as_str()),
            ),
            Command::RemoveAgentFromProject {
                project_id,
                agent_id,
            } => dispatched(
                lifecycle
                    .remove_agent_from_project(project_id, agent_id)
                    .await?,
                membership_event("project.agent_removed", project_id.as_str(), agent_id.as_str()),
            ),
            Command::CreateAgent(request) => {
                let result = lifecycle.create_agent(request.clone()).await?;
                let id = result.data.as_ref().map(|a| a.id.to_string());
                dispatched(result, |data| {
                    id.map(|id| {
                        Event::new(Channel::Agents, "agent.created", data.clone()).for_resource(id)
                    })
                })
            }
            Command::StartAgent(id) => dispatched(
                lifecycle.start_agent(id).await?,
                state_event(Channel::Agents, "agent.started", id),
            ),
            Command::StopAgent(id) => dispatched(
                lifecycle.stop_agent(id).await?,
                state_event(Channel::Agents, "agent.stopped", id),
            ),
            Command::RemoveAgent {
                id,
                remove_worktree,
            } => dispatched(
                lifecycle.remove_agent(id, *remove_worktree).await?,
                state_event(Channel::Agents, "agent.removed", id),
            ),
            Command::GetProject(id) => dispatched(lifecycle.get_project(id).await?, no_event),
            Command::GetAllProjects => dispatched(lifecycle.get_all_projects().await?, no_event),
            Command::GetAgent(id) => dispatched(lifecycle.get_agent(id).await?, no_event),
            Command::GetAllAgents(filter) => {
                dispatched(lifecycle.get_all_agents(filter).await?, no_event)
            }
            Command::GetSystemStatus => dispatched(lifecycle.system_status().await?, no_event),
            Command::AllocatePort {
                project_id,
                service,
                preferred,
            } => dispatched(
                lifecycle
                    .allocate_port(project_id, service.as_deref(), *preferred)
                    .await?,
                state_event(Channel::Projects, "ports.allocated", project_id),
            ),
            Command::ReleaseProjectPorts(id) => {
                let result = lifecycle.release_project_ports(id).await?;
                let project = id.to_string();
                dispatched(result, move |released| {
                    Some(
                        Event::new(
                            Channel::Projects,
                            "ports.released",
                            json!({"projectId": project, "released": released}),
                        )
                        .for_resource(project),
                    )
                })
            }
            Command::GetProjectPorts(id) => {
                dispatched(lifecycle.get_project_ports(id).await?, no_event)
            }
        }
    }

    // ═══════════════════════════════════════════════════════════════════════
    // QUERIES
    // ═══════════════════════════════════════════════════════════════════════

    /// Lazy, restartable view of the activity log. Reading it never writes.
    pub fn get_activity_logs(&self, filter: ActivityFilter) -> ActivityQuery {
        ActivityQuery::new(Arc::clone(&self.store), filter, self.page_size)
    }

    pub fn get_sync_conflicts(&self, filter: ConflictFilter) -> ConflictQuery {
        ConflictQuery::new(Arc::clone(&self.store), filter, self.page_size)
    }

    pub async fn activity_stats(&self, filter: ActivityFilter) -> Result<ActivityStats> {
        self.get_activity_logs(filter).stats().await
    }

    /// Mark a conflict resolved. Resolving an already resolved conflict
    /// returns the stored record and broadcasts nothing.
    ///
    /// # Errors
    ///
    /// `NotFound` for an unknown conflict id.
    pub async fn resolve_conflict(&self, id: &str, resolution: Option<&str>) -> Result<ConflictInfo> {
        let _resolve = self.resolve.lock().await;
        let current = self
            .store
            .get_conflict(id)
            .await?
            .ok_or_else(|| Error::conflict_not_found(id))?;
        if current.resolved {
            return Ok(current);
        }

        let resolved = self
            .store
            .resolve_conflict(id, resolution, clock::now())
            .await?
            .ok_or_else(|| Error::conflict_not_found(id))?;
        tracing::info!(conflict = %id, resource = %resolved.resource_id, "conflict resolved");
        self.hub.publish(
            Event::new(
                Channel::Sync,
                "sync.conflict_resolved",
                serde_json::to_value(&resolved)?,
            )
            .for_resource(resolved.resource_id.clone()),
        );
        Ok(resolved)
    }
}

fn membership_event(
    kind: &'static str,
    project_id: &str,
    agent_id: &str,
) -> impl FnOnce(&Value) -> Option<Event> {
    let project_id = project_id.to_string();
    let agent_id = agent_id.to_string();
    move |project| {
        Some(
            Event::new(
                Channel::Projects,
                kind,
                json!({"projectId": project_id, "agentId": agent_id, "project": project}),
            )
            .for_resource(project_id),
        )
    }
}
