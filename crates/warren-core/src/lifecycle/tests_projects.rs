//! Project lifecycle, membership and project-scoped ports.

use super::{
    test_fixture::{data, Fixture},
    CreateAgentRequest,
};
use crate::{
    domain::{AgentId, BranchName, PortRange, ProjectId, ProjectStatus},
    store::{AgentRepository, ProjectRepository},
    Error, ErrorKind, Result,
};

#[tokio::test]
async fn test_create_project_gets_default_range() -> Result<()> {
    let fx = Fixture::new()?;
    let path = fx.repo_dir("demo")?;
    std::fs::write(
        path.join("package.json"),
        r#"{"scripts": {"dev": "next dev --port 3100"}}"#,
    )?;

    let project = data(fx.manager.create_project(&path, None, None).await?)?;
    assert_eq!(project.name, "demo");
    assert_eq!(project.status, ProjectStatus::Active);
    assert_eq!(project.port_range, PortRange::new(3000, 3009)?);
    assert_eq!(project.metadata.get("port_hint.dev"), Some("3100"));
    assert!(project.id.as_str().starts_with("proj-"));

    let ports = data(fx.manager.get_project_ports(&project.id).await?)?;
    assert_eq!(ports.len(), 10);
    assert!(ports.iter().all(|a| a.service == "range"));
    Ok(())
}

#[tokio::test]
async fn test_duplicate_path_or_name_conflicts() -> Result<()> {
    let fx = Fixture::new()?;
    let first = fx.project("demo").await?;

    let same_path = fx.manager.create_project(&first.path, Some("other"), None).await;
    assert!(matches!(same_path, Err(Error::Conflict(_))));

    let other_dir = fx.repo_dir("elsewhere")?;
    let same_name = fx.manager.create_project(&other_dir, Some("demo"), None).await;
    assert!(matches!(same_name, Err(Error::Conflict(_))));

    assert_eq!(data(fx.manager.get_all_projects().await?)?.len(), 1);
    Ok(())
}

#[tokio::test]
async fn test_missing_path_is_rejected() -> Result<()> {
    let fx = Fixture::new()?;
    let missing = fx.dir.path().join("nope");
    let result = fx.manager.create_project(&missing, None, None).await;
    assert!(matches!(&result, Err(e) if e.kind() == ErrorKind::ValidationError));
    Ok(())
}

#[tokio::test]
async fn test_explicit_range_must_be_free() -> Result<()> {
    let fx = Fixture::new()?;
    let a = fx.repo_dir("a")?;
    let b = fx.repo_dir("b")?;

    let first = data(
        fx.manager
            .create_project(&a, None, Some(PortRange::new(4000, 4004)?))
            .await?,
    )?;
    assert_eq!(first.port_range, PortRange::new(4000, 4004)?);

    let overlap = fx
        .manager
        .create_project(&b, None, Some(PortRange::new(4003, 4010)?))
        .await;
    assert!(matches!(overlap, Err(Error::PortUnavailable(_))));
    assert_eq!(fx.store.list_projects().await?.len(), 1);
    Ok(())
}

#[tokio::test]
async fn test_remove_project_waits_for_agents() -> Result<()> {
    let fx = Fixture::new()?;
    let project = fx.project("demo").await?;
    let agent = data(
        fx.manager
            .create_agent(
                CreateAgentRequest::new(BranchName::parse("feature/x")?)
                    .in_project(project.id.clone()),
            )
            .await?,
    )?;

    let blocked = fx.manager.remove_project(&project.id).await;
    assert!(matches!(&blocked, Err(e) if e.kind() == ErrorKind::DependencyError));
    assert!(fx.store.get_project(&project.id).await?.is_some());

    fx.manager.remove_agent(&agent.id, true).await?;
    let removed = fx.manager.remove_project(&project.id).await?;
    assert!(removed.success);
    assert!(fx.store.get_project(&project.id).await?.is_none());
    assert!(fx.manager.ports().all_allocations().await?.is_empty());
    Ok(())
}

#[tokio::test]
async fn test_stop_project_leaves_agents_running() -> Result<()> {
    let fx = Fixture::new()?;
    let project = fx.project("demo").await?;
    let agent = data(
        fx.manager
            .create_agent(
                CreateAgentRequest::new(BranchName::parse("main")?).in_project(project.id.clone()),
            )
            .await?,
    )?;

    let stopped = data(fx.manager.stop_project(&project.id).await?)?;
    assert_eq!(stopped.status, ProjectStatus::Stopped);
    let again = fx.manager.stop_project(&project.id).await?;
    assert!(again.message.contains("already stopped"));

    let agent = data(fx.manager.get_agent(&agent.id).await?)?;
    assert_eq!(agent.status, crate::domain::AgentStatus::Running);
    Ok(())
}

#[tokio::test]
async fn test_unknown_project_is_not_found() -> Result<()> {
    let fx = Fixture::new()?;
    let id = ProjectId::parse("proj-deadbeef")?;
    for result in [
        fx.manager.stop_project(&id).await.map(|_| ()),
        fx.manager.remove_project(&id).await.map(|_| ()),
        fx.manager.allocate_port(&id, None, None).await.map(|_| ()),
        fx.manager.get_project_ports(&id).await.map(|_| ()),
    ] {
        assert!(matches!(&result, Err(e) if e.code() == "PROJECT_NOT_FOUND"));
    }
    Ok(())
}

// ═══════════════════════════════════════════════════════════════════════════
// MEMBERSHIP
// ═══════════════════════════════════════════════════════════════════════════

#[tokio::test]
async fn test_add_and_remove_membership() -> Result<()> {
    let fx = Fixture::new()?;
    let demo = fx.project("demo").await?;
    let other = fx.project("other").await?;
    let agent = data(
        fx.manager
            .create_agent(CreateAgentRequest::new(BranchName::parse("solo")?))
            .await?,
    )?;
    assert_eq!(agent.project_id, None);

    let demo_after = data(fx.manager.add_agent_to_project(&demo.id, &agent.id).await?)?;
    assert!(demo_after.agent_ids.contains(&agent.id));
    let stored = fx.store.get_agent(&agent.id).await?;
    assert_eq!(stored.and_then(|a| a.project_id), Some(demo.id.clone()));

    let readd = fx.manager.add_agent_to_project(&demo.id, &agent.id).await?;
    assert!(readd.success);

    let elsewhere = fx.manager.add_agent_to_project(&other.id, &agent.id).await;
    assert!(matches!(elsewhere, Err(Error::Conflict(_))));

    let detached = data(
        fx.manager
            .remove_agent_from_project(&demo.id, &agent.id)
            .await?,
    )?;
    assert!(detached.agent_ids.is_empty());
    let stored = fx.store.get_agent(&agent.id).await?;
    assert_eq!(stored.and_then(|a| a.project_id), None);

    let noop = fx
        .manager
        .remove_agent_from_project(&demo.id, &agent.id)
        .await?;
    assert!(noop.message.contains("not a member"));
    Ok(())
}

#[tokio::test]
async fn test_detaching_releases_dedicated_ports() -> Result<()> {
    let fx = Fixture::new()?;
    let project = fx.project("demo").await?;
    let agent = data(
        fx.manager
            .create_agent(
                CreateAgentRequest::new(BranchName::parse("boxed")?)
                    .in_project(project.id.clone())
                    .with_container(true),
            )
            .await?,
    )?;
    assert_eq!(agent.assigned_ports, vec![3010]);

    fx.manager
        .remove_agent_from_project(&project.id, &agent.id)
        .await?;
    let ports = data(fx.manager.get_project_ports(&project.id).await?)?;
    assert_eq!(ports.len(), 10);
    let agent = data(fx.manager.get_agent(&agent.id).await?)?;
    assert!(agent.assigned_ports.is_empty());
    Ok(())
}

#[tokio::test]
async fn test_add_to_full_project_hits_ceiling() -> Result<()> {
    let fx = Fixture::with_config(|c| c.agents.max_agents_per_project = 1)?;
    let project = fx.project("demo").await?;
    fx.manager
        .create_agent(
            CreateAgentRequest::new(BranchName::parse("one")?).in_project(project.id.clone()),
        )
        .await?;
    let solo = data(
        fx.manager
            .create_agent(CreateAgentRequest::new(BranchName::parse("two")?))
            .await?,
    )?;

    let full = fx.manager.add_agent_to_project(&project.id, &solo.id).await;
    assert!(matches!(full, Err(Error::MaxAgentsReached { limit: 1, .. })));
    assert_eq!(fx.reload_project(&project.id).await?.agent_ids.len(), 1);
    Ok(())
}

#[tokio::test]
async fn test_add_unknown_agent_is_not_found() -> Result<()> {
    let fx = Fixture::new()?;
    let project = fx.project("demo").await?;
    let result = fx
        .manager
        .add_agent_to_project(&project.id, &AgentId::parse("ghost")?)
        .await;
    assert!(matches!(&result, Err(e) if e.code() == "AGENT_NOT_FOUND"));
    Ok(())
}

// ═══════════════════════════════════════════════════════════════════════════
// PORTS
// ═══════════════════════════════════════════════════════════════════════════

#[tokio::test]
async fn test_project_port_commands() -> Result<()> {
    let fx = Fixture::new()?;
    let project = fx.project("demo").await?;

    let allocation = data(
        fx.manager
            .allocate_port(&project.id, Some("api"), None)
            .await?,
    )?;
    assert_eq!(allocation.port, 3010);
    assert_eq!(allocation.service, "api");

    let preferred = data(
        fx.manager
            .allocate_port(&project.id, None, Some(5000))
            .await?,
    )?;
    assert_eq!(preferred.port, 5000);

    let released = data(fx.manager.release_project_ports(&project.id).await?)?;
    assert_eq!(released, 12);
    assert!(data(fx.manager.get_project_ports(&project.id).await?)?.is_empty());
    Ok(())
}

#[tokio::test]
async fn test_system_status_counts() -> Result<()> {
    let fx = Fixture::new()?;
    let project = fx.project("demo").await?;
    let agent = data(
        fx.manager
            .create_agent(
                CreateAgentRequest::new(BranchName::parse("alpha")?).in_project(project.id.clone()),
            )
            .await?,
    )?;
    fx.manager
        .create_agent(CreateAgentRequest::new(BranchName::parse("beta")?))
        .await?;
    fx.manager.stop_agent(&agent.id).await?;

    let status = data(fx.manager.system_status().await?)?;
    assert_eq!(status.total_agents, 2);
    assert_eq!(status.agents_by_status.get("RUNNING"), Some(&1));
    assert_eq!(status.agents_by_status.get("STOPPED"), Some(&1));
    assert_eq!(status.total_projects, 1);
    assert_eq!(status.projects_by_status.get("ACTIVE"), Some(&1));
    assert_eq!(status.allocated_ports, 10);
    assert_eq!(status.max_agents, 10);
    Ok(())
}
