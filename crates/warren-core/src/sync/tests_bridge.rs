//! Bridge pipeline: logging, conflicts, broadcast.

use std::{sync::Arc, time::Duration};

use serde_json::{json, Value};

use super::{Channel, SyncBridge};
use crate::{
    config::Config,
    domain::{ActivityFilter, ConflictFilter, Outcome, Severity, Source},
    store::MemoryStore,
    testing::{FakeProcessController, FixedProbe},
    Error, ErrorKind, Result, Services,
};

struct Harness {
    services: Services,
    fake: Arc<FakeProcessController>,
    dir: tempfile::TempDir,
}

impl Harness {
    fn new() -> Result<Self> {
        let dir = tempfile::tempdir()?;
        let mut config = Config::default();
        config.agents.standalone_root = Some(dir.path().join("standalone"));
        let fake = Arc::new(FakeProcessController::new());
        let services = Services::build(
            config,
            Arc::new(MemoryStore::new()),
            fake.clone(),
            Arc::new(FixedProbe::default()),
            dir.path().to_path_buf(),
        )?;
        Ok(Self {
            services,
            fake,
            dir,
        })
    }

    fn bridge(&self) -> &SyncBridge {
        &self.services.bridge
    }

    async fn run(&self, name: &str, params: Value) -> Result<super::CoreCommandResult> {
        self.bridge().execute_command(name, params, "cli:test").await
    }

    async fn create_project(&self, name: &str) -> Result<String> {
        let path = self.dir.path().join(name);
        std::fs::create_dir_all(&path)?;
        let result = self
            .run("createProject", json!({"path": path, "name": name}))
            .await?;
        id_of(&result)
    }

    async fn create_standalone_agent(&self, branch: &str) -> Result<String> {
        let result = self.run("createAgent", json!({"branch": branch})).await?;
        id_of(&result)
    }
}

fn id_of(result: &super::CoreCommandResult) -> Result<String> {
    result
        .data
        .as_ref()
        .and_then(|d| d["id"].as_str())
        .map(str::to_string)
        .ok_or_else(|| Error::validation(format!("no id in result: {}", result.message)))
}

#[tokio::test]
async fn test_invalid_session_is_rejected_unlogged() -> Result<()> {
    let h = Harness::new()?;
    let result = h
        .bridge()
        .execute_command("getAllProjects", json!({}), "ssh:someone")
        .await;
    assert!(matches!(&result, Err(e) if e.kind() == ErrorKind::ValidationError));
    assert!(h
        .bridge()
        .get_activity_logs(ActivityFilter::default())
        .collect()
        .await?
        .is_empty());
    Ok(())
}

#[tokio::test]
async fn test_failures_are_logged_not_raised() -> Result<()> {
    let h = Harness::new()?;
    let unknown = h.run("launchRockets", json!({})).await?;
    assert!(!unknown.success);
    let error = unknown.error.as_ref().map(|e| (e.kind, e.code.as_str()));
    assert_eq!(error, Some((ErrorKind::ValidationError, "VALIDATION_ERROR")));

    let missing = h.run("stopAgent", json!({"id": "ghost-agent"})).await?;
    assert_eq!(
        missing.error.map(|e| e.code),
        Some("AGENT_NOT_FOUND".to_string())
    );

    let logs = h
        .bridge()
        .get_activity_logs(ActivityFilter::default())
        .collect()
        .await?;
    assert_eq!(logs.len(), 2);
    assert_eq!(logs[0].command, "launchRockets");
    assert_eq!(logs[0].id, unknown.command_id);
    assert!(matches!(
        &logs[1].outcome,
        Outcome::Failure { kind: ErrorKind::NotFoundError, .. }
    ));
    assert_eq!(logs[1].resource_id.as_deref(), Some("ghost-agent"));
    Ok(())
}

#[tokio::test]
async fn test_source_follows_session_namespace() -> Result<()> {
    let h = Harness::new()?;
    let cli = h
        .bridge()
        .execute_command("getAllProjects", json!({}), "cli:4242")
        .await?;
    let gui = h
        .bridge()
        .execute_command("getAllProjects", Value::Null, "gui:tab-1")
        .await?;
    assert_eq!((cli.source, gui.source), (Source::Cli, Source::Gui));

    let stats = h.bridge().activity_stats(ActivityFilter::default()).await?;
    assert_eq!(stats.total, 2);
    assert_eq!(stats.by_command.get("getAllProjects"), Some(&2));
    Ok(())
}

#[tokio::test]
async fn test_lifecycle_events_in_commit_order() -> Result<()> {
    let h = Harness::new()?;
    let mut agents = h.bridge().subscribe(Channel::Agents);
    let mut activity = h.bridge().subscribe(Channel::Activity);

    let project = h.create_project("demo").await?;
    let created = h
        .run("createAgent", json!({"branch": "feature/x", "projectId": project}))
        .await?;
    let agent = id_of(&created)?;
    assert_eq!(created.data.as_ref().map(|d| d["status"].clone()), Some(json!("RUNNING")));

    h.run("stopAgent", json!({"id": agent})).await?;
    h.run("startAgent", json!({"id": agent})).await?;
    h.run("removeAgent", json!({"id": agent})).await?;

    let mut kinds = Vec::new();
    for _ in 0..4 {
        let event = agents
            .recv()
            .await
            .ok_or_else(|| Error::validation("hub closed"))?;
        assert_eq!(event.resource_id.as_deref(), Some(agent.as_str()));
        kinds.push(event.kind);
    }
    assert_eq!(
        kinds,
        ["agent.created", "agent.stopped", "agent.started", "agent.removed"]
    );

    let first = activity
        .recv()
        .await
        .ok_or_else(|| Error::validation("hub closed"))?;
    assert_eq!(first.kind, "command.executed");
    assert_eq!(first.data["command"], "createProject");
    assert_eq!(first.data["outcome"]["status"], "success");

    assert!(h.fake.is_clean());
    Ok(())
}

#[tokio::test]
async fn test_failed_commands_publish_no_state_event() -> Result<()> {
    let h = Harness::new()?;
    let mut agents = h.bridge().subscribe(Channel::Agents);
    h.run("stopAgent", json!({"id": "ghost-agent"})).await?;
    let agent = h.create_standalone_agent("solo").await?;

    let event = agents
        .recv()
        .await
        .ok_or_else(|| Error::validation("hub closed"))?;
    assert_eq!(event.kind, "agent.created");
    assert_eq!(event.resource_id, Some(agent));
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_interrupted_creation_is_logged_as_failure() -> Result<()> {
    let h = Harness::new()?;
    h.fake.stall("create_session", Duration::from_secs(60));

    let creating = h.run("createAgent", json!({"branch": "interrupted"}));
    let interrupt = async {
        tokio::time::sleep(Duration::from_secs(1)).await;
        h.services.lifecycle.interrupt_creations();
    };
    let (result, ()) = tokio::join!(creating, interrupt);
    let result = result?;

    assert!(!result.success);
    assert_eq!(
        result.error.map(|e| e.code),
        Some("CANCELLED".to_string())
    );
    assert!(h.fake.is_clean());

    let logs = h
        .bridge()
        .get_activity_logs(ActivityFilter::default())
        .collect()
        .await?;
    assert_eq!(logs.len(), 1);
    assert!(!logs[0].outcome.is_pending());
    assert!(matches!(
        &logs[0].outcome,
        Outcome::Failure { code, .. } if code == "CANCELLED"
    ));
    Ok(())
}

#[tokio::test]
async fn test_port_commands_broadcast_on_projects() -> Result<()> {
    let h = Harness::new()?;
    let project = h.create_project("demo").await?;
    let mut projects = h.bridge().subscribe(Channel::Projects).for_resource(project.clone());

    let allocated = h
        .run("allocatePort", json!({"projectId": project, "service": "api"}))
        .await?;
    assert_eq!(allocated.data.as_ref().map(|d| d["port"].clone()), Some(json!(3010)));
    h.run("releaseProjectPorts", json!({"projectId": project}))
        .await?;

    let first = projects.recv().await.map(|e| e.kind);
    let second = projects.recv().await.map(|e| (e.kind, e.data["released"].clone()));
    assert_eq!(first.as_deref(), Some("ports.allocated"));
    assert_eq!(second, Some(("ports.released".to_string(), json!(11))));
    Ok(())
}

// ═══════════════════════════════════════════════════════════════════════════
// CONFLICTS
// ═══════════════════════════════════════════════════════════════════════════

#[tokio::test]
async fn test_opposing_commands_in_window_raise_high_conflict() -> Result<()> {
    let h = Harness::new()?;
    let agent = h.create_standalone_agent("solo").await?;
    let mut sync = h.bridge().subscribe(Channel::Sync);

    let stop = h.run("stopAgent", json!({"id": agent})).await?;
    assert!(stop.conflict.is_none());
    let start = h
        .bridge()
        .execute_command("startAgent", json!({"id": agent}), "gui:tab")
        .await?;
    assert!(start.success);

    let conflict = start
        .conflict
        .ok_or_else(|| Error::validation("expected a conflict"))?;
    assert_eq!(conflict.severity, Severity::High);
    assert_eq!(conflict.resource_id, agent);
    assert_eq!(conflict.operation_a.log_id, stop.command_id);
    assert_eq!(conflict.operation_b.log_id, start.command_id);
    assert_eq!(conflict.operation_b.source, Source::Gui);

    let event = sync.recv().await.map(|e| e.kind);
    assert_eq!(event.as_deref(), Some("sync.conflict"));

    let read = h.run("getAgent", json!({"id": agent})).await?;
    assert_eq!(read.conflict.map(|c| c.severity), Some(Severity::Low));
    Ok(())
}

#[tokio::test]
async fn test_agent_named_like_project_does_not_share_its_window() -> Result<()> {
    let h = Harness::new()?;
    let project = h.create_project("shop").await?;

    let read = h.run("getProject", json!({"id": project})).await?;
    assert!(read.success);
    let lookalike = h
        .bridge()
        .execute_command("getAgent", json!({"id": project}), "gui:tab")
        .await?;
    assert_eq!(
        lookalike.error.map(|e| e.code),
        Some("AGENT_NOT_FOUND".to_string())
    );
    assert!(lookalike.conflict.is_none());

    let again = h.run("getProject", json!({"id": project})).await?;
    assert_eq!(again.conflict.map(|c| c.resource_id), Some(project));
    Ok(())
}

#[tokio::test]
async fn test_resolve_conflict_once() -> Result<()> {
    let h = Harness::new()?;
    let agent = h.create_standalone_agent("solo").await?;
    h.run("stopAgent", json!({"id": agent})).await?;
    let start = h.run("startAgent", json!({"id": agent})).await?;
    let conflict_id = start
        .conflict
        .map(|c| c.id)
        .ok_or_else(|| Error::validation("expected a conflict"))?;

    let mut sync = h.bridge().subscribe(Channel::Sync);
    let resolved = h
        .bridge()
        .resolve_conflict(&conflict_id, Some("start wins"))
        .await?;
    assert!(resolved.resolved);
    assert_eq!(resolved.resolution.as_deref(), Some("start wins"));

    let again = h.bridge().resolve_conflict(&conflict_id, Some("other")).await?;
    assert_eq!(again, resolved);
    assert_eq!(
        sync.recv().await.map(|e| e.kind).as_deref(),
        Some("sync.conflict_resolved")
    );
    assert_eq!(h.bridge().events().subscriber_count(Channel::Sync), 1);

    let unresolved = h
        .bridge()
        .get_sync_conflicts(ConflictFilter {
            resolved: Some(false),
            ..ConflictFilter::default()
        })
        .collect()
        .await?;
    assert!(unresolved.is_empty());

    let unknown = h.bridge().resolve_conflict("nope", None).await;
    assert!(matches!(&unknown, Err(e) if e.code() == "CONFLICT_NOT_FOUND"));
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_stop_and_start_conflict_once() -> Result<()> {
    let h = Arc::new(Harness::new()?);
    let agent = h.create_standalone_agent("race").await?;

    let stop = {
        let h = Arc::clone(&h);
        let agent = agent.clone();
        tokio::spawn(async move {
            h.bridge()
                .execute_command("stopAgent", json!({"id": agent}), "cli:1")
                .await
        })
    };
    let start = {
        let h = Arc::clone(&h);
        let agent = agent.clone();
        tokio::spawn(async move {
            h.bridge()
                .execute_command("startAgent", json!({"id": agent}), "gui:1")
                .await
        })
    };
    let stop = stop.await.map_err(|e| Error::validation(e.to_string()))??;
    let start = start.await.map_err(|e| Error::validation(e.to_string()))??;
    assert!(stop.success && start.success);

    let conflicts = h
        .bridge()
        .get_sync_conflicts(ConflictFilter::default())
        .collect()
        .await?;
    assert_eq!(conflicts.len(), 1);
    assert_eq!(conflicts[0].severity, Severity::High);

    // whichever command was logged last decided the final state
    let status = h.run("getAgent", json!({"id": agent})).await?;
    let expected = if stop.command_id < start.command_id {
        "RUNNING"
    } else {
        "STOPPED"
    };
    assert_eq!(status.data.map(|d| d["status"].clone()), Some(json!(expected)));
    Ok(())
}

#[tokio::test]
async fn test_queries_never_write() -> Result<()> {
    let h = Harness::new()?;
    h.run("getSystemStatus", json!({})).await?;
    let before = h
        .bridge()
        .get_activity_logs(ActivityFilter::default())
        .collect()
        .await?;
    h.bridge()
        .get_sync_conflicts(ConflictFilter::default())
        .collect()
        .await?;
    let after = h
        .bridge()
        .get_activity_logs(ActivityFilter::default())
        .collect()
        .await?;
    assert_eq!(before, after);
    assert!(after.iter().all(|e| !e.outcome.is_pending()));
    Ok(())
}
