//! Allocator behaviour against the in-memory store.

use std::{collections::HashSet, sync::Arc};

use proptest::prelude::*;

use super::PortAllocator;
use crate::{
    config::PortsConfig,
    domain::{AgentId, PortRange, ProjectId},
    store::MemoryStore,
    testing::FixedProbe,
    Error, ErrorKind, Result,
};

fn allocator(min: u16, max: u16, bound: &[u16]) -> Result<PortAllocator> {
    let config = PortsConfig {
        min,
        max,
        ..PortsConfig::default()
    };
    PortAllocator::new(
        Arc::new(MemoryStore::new()),
        Arc::new(FixedProbe::new(bound.iter().copied())),
        &config,
    )
}

fn project(n: u32) -> Result<ProjectId> {
    Ok(ProjectId::parse(format!("proj-{n:08x}"))?)
}

#[tokio::test]
async fn test_scan_starts_at_minimum() -> Result<()> {
    let ports = allocator(3000, 3100, &[])?;
    let pid = project(1)?;
    assert_eq!(ports.allocate_port(&pid, None, None).await?, 3000);
    assert_eq!(ports.allocate_port(&pid, Some("api"), None).await?, 3001);

    let allocations = ports.project_ports(&pid).await?;
    assert_eq!(allocations[0].service, "web");
    assert_eq!(allocations[1].service, "api");
    Ok(())
}

#[tokio::test]
async fn test_preferred_port_used_when_free() -> Result<()> {
    let ports = allocator(3000, 3100, &[])?;
    let pid = project(1)?;
    assert_eq!(ports.allocate_port(&pid, None, Some(3050)).await?, 3050);
    // taken preferred port falls back to the scan from the minimum
    assert_eq!(ports.allocate_port(&pid, None, Some(3050)).await?, 3000);
    Ok(())
}

#[tokio::test]
async fn test_preferred_port_out_of_bounds_rejected() -> Result<()> {
    let ports = allocator(3000, 3100, &[])?;
    let result = ports.allocate_port(&project(1)?, None, Some(80)).await;
    assert!(matches!(result, Err(Error::Validation(_))));
    assert!(ports.all_allocations().await?.is_empty());
    Ok(())
}

#[tokio::test]
async fn test_externally_bound_ports_are_skipped() -> Result<()> {
    let ports = allocator(3000, 3100, &[3000, 3001])?;
    assert_eq!(ports.allocate_port(&project(1)?, None, Some(3000)).await?, 3002);
    assert!(ports.is_port_in_use(3000).await?);
    assert!(ports.is_port_in_use(3002).await?);
    assert!(!ports.is_port_in_use(3003).await?);
    Ok(())
}

#[tokio::test]
async fn test_range_after_allocated_ports() -> Result<()> {
    let ports = allocator(3000, 9999, &[])?;
    let pid = project(1)?;
    ports.allocate_port(&pid, None, Some(3000)).await?;
    ports.allocate_port(&pid, None, Some(3001)).await?;

    let range = ports.allocate_range(&pid, 3, Some(3000)).await?;
    assert_eq!(range, PortRange::new(3002, 3004)?);
    Ok(())
}

#[tokio::test]
async fn test_range_skips_gaps_that_are_too_small() -> Result<()> {
    let ports = allocator(3000, 3100, &[3003])?;
    let pid = project(1)?;
    assert_eq!(ports.allocate_range(&pid, 3, None).await?, PortRange::new(3000, 3002)?);
    assert_eq!(ports.allocate_range(&pid, 3, None).await?, PortRange::new(3004, 3006)?);
    Ok(())
}

#[tokio::test]
async fn test_exhaustion_reports_port_unavailable() -> Result<()> {
    let ports = allocator(3000, 3002, &[])?;
    let pid = project(1)?;
    for _ in 0..3 {
        ports.allocate_port(&pid, None, None).await?;
    }
    let err = ports.allocate_port(&pid, None, None).await;
    assert!(matches!(err, Err(Error::PortUnavailable(_))));

    let err = ports.allocate_range(&project(2)?, 2, None).await;
    assert!(matches!(&err, Err(e) if e.kind() == ErrorKind::ConflictError));
    Ok(())
}

#[tokio::test]
async fn test_range_size_limits() -> Result<()> {
    let ports = allocator(3000, 9999, &[])?;
    let pid = project(1)?;
    assert!(matches!(
        ports.allocate_range(&pid, 0, None).await,
        Err(Error::Validation(_))
    ));
    assert!(matches!(
        ports.allocate_range(&pid, 1001, None).await,
        Err(Error::Validation(_))
    ));
    Ok(())
}

#[tokio::test]
async fn test_released_ports_are_reused() -> Result<()> {
    let ports = allocator(3000, 3100, &[])?;
    let a = project(1)?;
    let b = project(2)?;
    ports.allocate_range(&a, 5, None).await?;

    assert_eq!(ports.release_project_ports(&a).await?, 5);
    assert!(ports.project_ports(&a).await?.is_empty());
    assert_eq!(ports.allocate_port(&b, None, None).await?, 3000);
    Ok(())
}

#[tokio::test]
async fn test_release_agent_ports_keeps_project_range() -> Result<()> {
    let ports = allocator(3000, 3100, &[])?;
    let pid = project(1)?;
    let agent = AgentId::parse("agent-one")?;
    ports.allocate_range(&pid, 2, None).await?;
    let dedicated = ports.allocate_agent_port(&pid, &agent).await?;
    assert_eq!(dedicated, 3002);

    assert_eq!(ports.release_agent_ports(&agent).await?, 1);
    let left: Vec<u16> = ports.project_ports(&pid).await?.iter().map(|a| a.port).collect();
    assert_eq!(left, vec![3000, 3001]);
    Ok(())
}

#[tokio::test]
async fn test_exact_range_must_be_entirely_free() -> Result<()> {
    let ports = allocator(3000, 3100, &[])?;
    let pid = project(1)?;
    ports.allocate_port(&pid, None, Some(3012)).await?;

    let clash = ports
        .reserve_exact_range(&project(2)?, PortRange::new(3010, 3019)?)
        .await;
    assert!(matches!(clash, Err(Error::PortUnavailable(_))));
    assert_eq!(ports.all_allocations().await?.len(), 1);

    let ok = ports
        .reserve_exact_range(&project(2)?, PortRange::new(3020, 3029)?)
        .await?;
    assert_eq!(ok.len(), 10);
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_allocations_never_collide() -> Result<()> {
    let ports = Arc::new(allocator(3000, 3199, &[])?);
    let mut tasks = tokio::task::JoinSet::new();
    for i in 0..64u32 {
        let ports = Arc::clone(&ports);
        tasks.spawn(async move {
            let pid = project(i % 4)?;
            if i % 8 == 0 {
                ports
                    .allocate_range(&pid, 3, None)
                    .await
                    .map(|r| r.ports().collect::<Vec<_>>())
            } else {
                ports.allocate_port(&pid, None, Some(3000)).await.map(|p| vec![p])
            }
        });
    }

    let mut seen = HashSet::new();
    while let Some(joined) = tasks.join_next().await {
        let granted = joined.map_err(|e| Error::io(e.to_string()))??;
        for port in granted {
            assert!((3000..=3199).contains(&port));
            assert!(seen.insert(port), "port {port} handed out twice");
        }
    }
    assert_eq!(seen.len(), 8 * 3 + 56);
    assert_eq!(ports.all_allocations().await?.len(), seen.len());
    Ok(())
}

proptest! {
    #[test]
    fn prop_allocations_stay_in_bounds_and_unique(
        preferred in proptest::collection::vec(proptest::option::of(3000u16..3060), 1..40)
    ) {
        let granted = tokio_test::block_on(async {
            let ports = allocator(3000, 3049, &[])?;
            let pid = project(7)?;
            let mut granted = Vec::new();
            for p in &preferred {
                let p = p.filter(|p| *p <= 3049);
                granted.push(ports.allocate_port(&pid, None, p).await?);
            }
            Ok::<_, Error>(granted)
        }).map_err(|e| TestCaseError::fail(e.to_string()))?;

        let unique: HashSet<u16> = granted.iter().copied().collect();
        prop_assert_eq!(unique.len(), granted.len());
        prop_assert!(granted.iter().all(|p| (3000..=3049).contains(p)));
    }
}
