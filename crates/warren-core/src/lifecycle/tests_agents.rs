//! Agent creation, rollback, ceilings and the running/stopped state machine.

use std::time::Duration;

use super::{
    test_fixture::{data, Fixture},
    CreateAgentRequest,
};
use crate::{
    domain::{AgentFilter, AgentId, AgentStatus, BranchName},
    store::AgentRepository,
    Error, Result,
};

fn branch(name: &str) -> Result<BranchName> {
    Ok(BranchName::parse(name)?)
}

#[tokio::test]
async fn test_agent_end_to_end() -> Result<()> {
    let fx = Fixture::new()?;
    let project = fx.project("demo").await?;

    let agent = data(
        fx.manager
            .create_agent(CreateAgentRequest::new(branch("feature/x")?).in_project(project.id.clone()))
            .await?,
    )?;
    assert_eq!(agent.status, AgentStatus::Running);
    assert!(agent.id.as_str().starts_with("feature-x-"));
    assert!(agent.worktree_path.starts_with(&project.path));
    assert!(agent.worktree_path.exists());
    assert_eq!(agent.session_name, format!("warren-{}", agent.id));
    assert!(fx.fake.sessions().contains(&agent.session_name));
    assert!(fx.reload_project(&project.id).await?.agent_ids.contains(&agent.id));

    let stopped = data(fx.manager.stop_agent(&agent.id).await?)?;
    assert_eq!(stopped.status, AgentStatus::Stopped);
    assert!(fx.fake.sessions().is_empty());
    assert_eq!(fx.manager.ports().project_ports(&project.id).await?.len(), 10);

    let removed = data(fx.manager.remove_agent(&agent.id, true).await?)?;
    assert_eq!(removed.status, AgentStatus::Removed);
    assert!(!agent.worktree_path.exists());
    assert!(fx.store.get_agent(&agent.id).await?.is_none());
    assert!(fx.reload_project(&project.id).await?.agent_ids.is_empty());
    assert!(fx.fake.is_clean());
    Ok(())
}

#[tokio::test]
async fn test_container_agent_gets_dedicated_port() -> Result<()> {
    let fx = Fixture::new()?;
    let project = fx.project("demo").await?;

    let agent = data(
        fx.manager
            .create_agent(
                CreateAgentRequest::new(branch("boxed")?)
                    .in_project(project.id.clone())
                    .with_container(true),
            )
            .await?,
    )?;
    assert_eq!(agent.assigned_ports, vec![3010]);
    let containers = fx.fake.containers();
    let opts = containers
        .get(agent.container_id.as_deref().unwrap_or_default())
        .cloned();
    assert_eq!(opts.as_ref().map(|o| o.ports.clone()), Some(vec![3010]));
    assert_eq!(
        opts.as_ref().and_then(|o| o.env.get("PORT").cloned()),
        Some("3010".to_string())
    );

    // stop removes the container but keeps the port reserved
    let stopped = data(fx.manager.stop_agent(&agent.id).await?)?;
    assert_eq!(stopped.container_id, None);
    assert!(fx.fake.containers().is_empty());
    assert_eq!(fx.manager.ports().project_ports(&project.id).await?.len(), 11);

    let started = data(fx.manager.start_agent(&agent.id).await?)?;
    assert!(started.container_id.is_some());
    assert_eq!(fx.fake.containers().len(), 1);

    fx.manager.remove_agent(&agent.id, true).await?;
    assert_eq!(fx.manager.ports().project_ports(&project.id).await?.len(), 10);
    assert!(fx.fake.is_clean());
    Ok(())
}

#[tokio::test]
async fn test_standalone_agent_lives_under_standalone_root() -> Result<()> {
    let fx = Fixture::new()?;
    let agent = data(
        fx.manager
            .create_agent(
                CreateAgentRequest::new(branch("solo")?).with_id(AgentId::parse("solo-agent")?),
            )
            .await?,
    )?;
    assert_eq!(agent.id.as_str(), "solo-agent");
    assert_eq!(
        agent.worktree_path,
        fx.dir.path().join("standalone").join("solo-agent")
    );
    assert!(agent.assigned_ports.is_empty());

    let duplicate = fx
        .manager
        .create_agent(CreateAgentRequest::new(branch("solo")?).with_id(AgentId::parse("solo-agent")?))
        .await;
    assert!(matches!(duplicate, Err(Error::Conflict(_))));
    Ok(())
}

// ═══════════════════════════════════════════════════════════════════════════
// CEILINGS
// ═══════════════════════════════════════════════════════════════════════════

#[tokio::test]
async fn test_global_ceiling_leaves_no_trace() -> Result<()> {
    let fx = Fixture::with_config(|c| c.agents.max_agents = 2)?;
    let project = fx.project("demo").await?;
    for name in ["one", "two"] {
        fx.manager
            .create_agent(
                CreateAgentRequest::new(branch(name)?)
                    .in_project(project.id.clone())
                    .with_container(true),
            )
            .await?;
    }
    let allocations_before = fx.manager.ports().all_allocations().await?;

    let third = fx
        .manager
        .create_agent(
            CreateAgentRequest::new(branch("three")?)
                .in_project(project.id.clone())
                .with_container(true),
        )
        .await;
    assert!(matches!(third, Err(Error::MaxAgentsReached { limit: 2, .. })));
    assert_eq!(fx.store.list_agents(&AgentFilter::default()).await?.len(), 2);
    assert_eq!(fx.manager.ports().all_allocations().await?, allocations_before);
    assert_eq!(fx.fake.call_count("create_worktree"), 2);
    Ok(())
}

#[tokio::test]
async fn test_project_ceiling() -> Result<()> {
    let fx = Fixture::with_config(|c| c.agents.max_agents_per_project = 1)?;
    let project = fx.project("demo").await?;
    fx.manager
        .create_agent(CreateAgentRequest::new(branch("one")?).in_project(project.id.clone()))
        .await?;
    let second = fx
        .manager
        .create_agent(CreateAgentRequest::new(branch("two")?).in_project(project.id.clone()))
        .await;
    assert!(matches!(second, Err(Error::MaxAgentsReached { limit: 1, .. })));

    // standalone agents are only bound by the global ceiling
    fx.manager
        .create_agent(CreateAgentRequest::new(branch("three")?))
        .await?;
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_creations_respect_ceiling() -> Result<()> {
    let fx = Fixture::with_config(|c| c.agents.max_agents = 3)?;
    fx.fake.stall("create_session", Duration::from_millis(50));

    let mut tasks = tokio::task::JoinSet::new();
    for i in 0..6 {
        let manager = fx.manager.clone();
        tasks.spawn(async move {
            let request = CreateAgentRequest::new(branch(&format!("race-{i}"))?);
            manager.create_agent(request).await
        });
    }

    let mut created = 0;
    let mut refused = 0;
    while let Some(joined) = tasks.join_next().await {
        match joined.map_err(|e| Error::io(e.to_string()))? {
            Ok(_) => created += 1,
            Err(Error::MaxAgentsReached { .. }) => refused += 1,
            Err(other) => return Err(other),
        }
    }
    assert_eq!((created, refused), (3, 3));
    assert_eq!(fx.store.list_agents(&AgentFilter::default()).await?.len(), 3);
    Ok(())
}

// ═══════════════════════════════════════════════════════════════════════════
// ROLLBACK
// ═══════════════════════════════════════════════════════════════════════════

#[tokio::test]
async fn test_session_failure_rolls_back_worktree() -> Result<()> {
    let fx = Fixture::new()?;
    let project = fx.project("demo").await?;
    fx.fake.fail("create_session");

    let result = fx
        .manager
        .create_agent(CreateAgentRequest::new(branch("feature/x")?).in_project(project.id.clone()))
        .await;
    match result {
        Err(Error::Process(failure)) => {
            assert_eq!(failure.operation, "create_session");
            assert_eq!(failure.completed_steps, vec!["create_worktree".to_string()]);
        }
        other => return Err(Error::validation(format!("expected process error, got {other:?}"))),
    }

    assert!(fx.fake.is_clean());
    assert_eq!(fx.fake.call_count("remove_worktree"), 1);
    assert!(fx.store.list_agents(&AgentFilter::default()).await?.is_empty());
    assert!(fx.reload_project(&project.id).await?.agent_ids.is_empty());
    Ok(())
}

#[tokio::test]
async fn test_container_failure_rolls_back_in_reverse() -> Result<()> {
    let fx = Fixture::new()?;
    let project = fx.project("demo").await?;
    fx.fake.fail("create_container");

    let result = fx
        .manager
        .create_agent(
            CreateAgentRequest::new(branch("boxed")?)
                .in_project(project.id.clone())
                .with_container(true),
        )
        .await;
    match result {
        Err(Error::Process(failure)) => assert_eq!(
            failure.completed_steps,
            vec!["create_worktree", "create_session", "allocate_port"]
        ),
        other => return Err(Error::validation(format!("expected process error, got {other:?}"))),
    }

    let undo: Vec<String> = fx
        .fake
        .calls()
        .into_iter()
        .filter(|c| c.starts_with("kill_session") || c.starts_with("remove_worktree"))
        .collect();
    assert_eq!(undo.len(), 2);
    assert!(undo[0].starts_with("kill_session"));
    assert!(fx.fake.is_clean());
    assert_eq!(fx.manager.ports().project_ports(&project.id).await?.len(), 10);
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_creation_deadline_rolls_back() -> Result<()> {
    let fx = Fixture::new()?;
    fx.fake.stall("create_session", Duration::from_secs(60));

    let result = fx
        .manager
        .create_agent(CreateAgentRequest::new(branch("slow")?).with_timeout(Duration::from_secs(5)))
        .await;
    assert!(matches!(
        result,
        Err(Error::Timeout { ref operation, .. }) if operation == "create_agent"
    ));
    assert!(fx.fake.is_clean());
    assert!(fx.store.list_agents(&AgentFilter::default()).await?.is_empty());
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_interrupt_rolls_back_creation_in_flight() -> Result<()> {
    let fx = Fixture::new()?;
    let project = fx.project("demo").await?;
    fx.fake.stall("create_session", Duration::from_secs(60));

    let creating = fx.manager.create_agent(
        CreateAgentRequest::new(branch("interrupted")?).in_project(project.id.clone()),
    );
    let interrupt = async {
        tokio::time::sleep(Duration::from_secs(1)).await;
        fx.manager.interrupt_creations();
    };
    let (result, ()) = tokio::join!(creating, interrupt);

    assert!(matches!(
        result,
        Err(Error::Cancelled { ref operation }) if operation == "create_agent"
    ));
    assert_eq!(fx.fake.call_count("create_session"), 1);
    assert!(fx.fake.is_clean());
    assert!(fx.store.list_agents(&AgentFilter::default()).await?.is_empty());
    assert!(fx.reload_project(&project.id).await?.agent_ids.is_empty());

    let later = fx
        .manager
        .create_agent(CreateAgentRequest::new(branch("after")?))
        .await;
    assert!(matches!(later, Err(Error::Cancelled { .. })));
    assert_eq!(fx.fake.call_count("create_worktree"), 1);
    Ok(())
}

// ═══════════════════════════════════════════════════════════════════════════
// START / STOP / REMOVE
// ═══════════════════════════════════════════════════════════════════════════

#[tokio::test]
async fn test_start_and_stop_are_idempotent() -> Result<()> {
    let fx = Fixture::new()?;
    let agent = data(
        fx.manager
            .create_agent(CreateAgentRequest::new(branch("main")?))
            .await?,
    )?;
    let calls = fx.fake.calls().len();

    let again = fx.manager.start_agent(&agent.id).await?;
    assert!(again.message.contains("already running"));
    assert_eq!(fx.fake.calls().len(), calls);

    fx.manager.stop_agent(&agent.id).await?;
    let calls = fx.fake.calls().len();
    let again = fx.manager.stop_agent(&agent.id).await?;
    assert!(again.message.contains("already stopped"));
    assert_eq!(fx.fake.calls().len(), calls);

    let restarted = data(fx.manager.start_agent(&agent.id).await?)?;
    assert_eq!(restarted.status, AgentStatus::Running);
    assert!(fx.fake.sessions().contains(&agent.session_name));
    Ok(())
}

#[tokio::test]
async fn test_missing_worktree_moves_agent_to_error() -> Result<()> {
    let fx = Fixture::new()?;
    let agent = data(
        fx.manager
            .create_agent(CreateAgentRequest::new(branch("main")?))
            .await?,
    )?;
    fx.manager.stop_agent(&agent.id).await?;
    std::fs::remove_dir_all(&agent.worktree_path)?;

    let start = fx.manager.start_agent(&agent.id).await;
    assert!(matches!(start, Err(Error::Process(_))));
    let stored = data(fx.manager.get_agent(&agent.id).await?)?;
    assert_eq!(stored.status, AgentStatus::Error);

    // ERROR agents can only be removed
    assert!(matches!(
        fx.manager.start_agent(&agent.id).await,
        Err(Error::Validation(_))
    ));
    assert!(matches!(
        fx.manager.stop_agent(&agent.id).await,
        Err(Error::Validation(_))
    ));
    fx.manager.remove_agent(&agent.id, true).await?;
    assert!(fx.store.get_agent(&agent.id).await?.is_none());
    Ok(())
}

#[tokio::test]
async fn test_failed_removal_keeps_record_in_error() -> Result<()> {
    let fx = Fixture::new()?;
    let agent = data(
        fx.manager
            .create_agent(CreateAgentRequest::new(branch("main")?))
            .await?,
    )?;
    fx.fake.fail("remove_worktree");

    let result = fx.manager.remove_agent(&agent.id, true).await;
    assert!(matches!(result, Err(Error::Process(_))));
    let stored = data(fx.manager.get_agent(&agent.id).await?)?;
    assert_eq!(stored.status, AgentStatus::Error);

    fx.fake.clear_failures();
    fx.manager.remove_agent(&agent.id, true).await?;
    assert!(fx.store.get_agent(&agent.id).await?.is_none());
    assert!(fx.fake.is_clean());
    Ok(())
}

#[tokio::test]
async fn test_remove_can_keep_worktree() -> Result<()> {
    let fx = Fixture::new()?;
    let agent = data(
        fx.manager
            .create_agent(CreateAgentRequest::new(branch("keep")?))
            .await?,
    )?;
    fx.manager.remove_agent(&agent.id, false).await?;
    assert!(agent.worktree_path.exists());
    assert_eq!(fx.fake.call_count("remove_worktree"), 0);
    Ok(())
}

#[tokio::test]
async fn test_unknown_agent_is_not_found() -> Result<()> {
    let fx = Fixture::new()?;
    let id = AgentId::parse("ghost")?;
    assert!(matches!(
        fx.manager.start_agent(&id).await,
        Err(Error::NotFound { .. })
    ));
    assert!(matches!(
        fx.manager.remove_agent(&id, true).await,
        Err(Error::NotFound { .. })
    ));
    Ok(())
}
