//! Port allocator.
//!
//! Every reservation runs read-check-write under one allocator-wide lock, so
//! two concurrent calls can never hand out the same port. The store's
//! uniqueness constraint on `port` is the storage-level backstop.

#![cfg_attr(not(test), deny(clippy::unwrap_used))]
#![cfg_attr(not(test), deny(clippy::expect_used))]
#![cfg_attr(not(test), deny(clippy::panic))]

use std::{collections::HashSet, sync::Arc};

use tokio::sync::Mutex;

use super::PortProbe;
use crate::{
    clock,
    config::PortsConfig,
    domain::{
        agent_service, AgentId, AllocationFilter, PortAllocation, PortRange, ProjectId,
        RANGE_SERVICE,
    },
    store::{PersistenceStore, PortRepository},
    Error, Result,
};

/// Service label used when the caller names none.
pub const DEFAULT_SERVICE: &str = "web";

pub struct PortAllocator {
    store: Arc<dyn PersistenceStore>,
    probe: Arc<dyn PortProbe>,
    bounds: PortRange,
    max_range_size: u16,
    lock: Mutex<()>,
}

impl PortAllocator {
    pub fn new(
        store: Arc<dyn PersistenceStore>,
        probe: Arc<dyn PortProbe>,
        config: &PortsConfig,
    ) -> Result<Self> {
        let bounds = PortRange::new(config.min, config.max)
            .map_err(|e| Error::invalid_config(e.to_string()))?;
        Ok(Self {
            store,
            probe,
            bounds,
            max_range_size: config.max_range_size,
            lock: Mutex::new(()),
        })
    }

    /// Process-wide `[min, max]` bounds.
    pub const fn bounds(&self) -> PortRange {
        self.bounds
    }

    // ═══════════════════════════════════════════════════════════════════════
    // SINGLE PORTS
    // ═══════════════════════════════════════════════════════════════════════

    /// Reserve one port for `project_id`.
    ///
    /// A free `preferred` port is taken as is; otherwise the lowest free port
    /// at or above the minimum bound is reserved.
    ///
    /// # Errors
    ///
    /// - `Validation` if `preferred` lies outside the bounds
    /// - `PortUnavailable` if every port in the bounds is taken
    pub async fn allocate_port(
        &self,
        project_id: &ProjectId,
        service: Option<&str>,
        preferred: Option<u16>,
    ) -> Result<u16> {
        let service = service
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .unwrap_or(DEFAULT_SERVICE);
        self.reserve_one(project_id, None, service, preferred).await
    }

    /// Reserve a dedicated port for an agent, labelled `agent:<id>`.
    pub async fn allocate_agent_port(
        &self,
        project_id: &ProjectId,
        agent_id: &AgentId,
    ) -> Result<u16> {
        self.reserve_one(project_id, Some(agent_id), &agent_service(agent_id), None)
            .await
    }

    async fn reserve_one(
        &self,
        project_id: &ProjectId,
        agent_id: Option<&AgentId>,
        service: &str,
        preferred: Option<u16>,
    ) -> Result<u16> {
        if let Some(port) = preferred {
            if !self.bounds.contains(port) {
                return Err(Error::validation(format!(
                    "preferred port {port} is outside {}",
                    self.bounds
                )));
            }
        }

        let _guard = self.lock.lock().await;
        let taken = self.allocated_ports().await?;

        let port = preferred
            .filter(|&p| self.is_free(p, &taken))
            .or_else(|| self.bounds.ports().find(|&p| self.is_free(p, &taken)))
            .ok_or_else(|| {
                Error::port_unavailable(format!("no free port left in {}", self.bounds))
            })?;

        self.store
            .insert_allocations(&[PortAllocation {
                project_id: project_id.clone(),
                agent_id: agent_id.cloned(),
                port,
                service: service.to_string(),
                allocated_at: clock::now(),
            }])
            .await?;

        tracing::info!(project = %project_id, port, service, "port allocated");
        Ok(port)
    }

    // ═══════════════════════════════════════════════════════════════════════
    // RANGES
    // ═══════════════════════════════════════════════════════════════════════

    /// Reserve the lowest contiguous run of `count` free ports at or above
    /// `start` (default: the minimum bound).
    ///
    /// # Errors
    ///
    /// - `Validation` for a zero or oversized `count`, or a `start` out of bounds
    /// - `PortUnavailable` if no such run exists within the bounds
    pub async fn allocate_range(
        &self,
        project_id: &ProjectId,
        count: u16,
        start: Option<u16>,
    ) -> Result<PortRange> {
        self.check_range_size(u32::from(count))?;
        let start = start.unwrap_or(self.bounds.start());
        if !self.bounds.contains(start) {
            return Err(Error::validation(format!(
                "range start {start} is outside {}",
                self.bounds
            )));
        }

        let _guard = self.lock.lock().await;
        let taken = self.allocated_ports().await?;

        let mut run_start = start;
        let mut run_len: u16 = 0;
        let mut found = None;
        for port in start..=self.bounds.end() {
            if self.is_free(port, &taken) {
                if run_len == 0 {
                    run_start = port;
                }
                run_len += 1;
                if run_len == count {
                    found = Some(PortRange::new(run_start, port)?);
                    break;
                }
            } else {
                run_len = 0;
            }
        }

        let range = found.ok_or_else(|| {
            Error::port_unavailable(format!(
                "no run of {count} free ports between {start} and {}",
                self.bounds.end()
            ))
        })?;

        tracing::debug!(project = %project_id, %range, "contiguous range found");
        self.insert_range(project_id, range).await?;
        Ok(range)
    }

    /// Reserve exactly `range`. Every port in it must be free.
    pub async fn reserve_exact_range(
        &self,
        project_id: &ProjectId,
        range: PortRange,
    ) -> Result<PortRange> {
        self.check_range_size(range.len())?;
        if !self.bounds.contains(range.start()) || !self.bounds.contains(range.end()) {
            return Err(Error::validation(format!(
                "port range {range} is outside {}",
                self.bounds
            )));
        }

        let _guard = self.lock.lock().await;
        let taken = self.allocated_ports().await?;
        if let Some(busy) = range.ports().find(|&p| !self.is_free(p, &taken)) {
            return Err(Error::port_unavailable(format!(
                "port {busy} in requested range {range} is already in use"
            )));
        }

        self.insert_range(project_id, range).await?;
        Ok(range)
    }

    fn check_range_size(&self, len: u32) -> Result<()> {
        if len == 0 || len > u32::from(self.max_range_size) {
            return Err(Error::validation(format!(
                "range size {len} must be between 1 and {}",
                self.max_range_size
            )));
        }
        Ok(())
    }

    async fn insert_range(&self, project_id: &ProjectId, range: PortRange) -> Result<()> {
        let now = clock::now();
        let allocations: Vec<PortAllocation> = range
            .ports()
            .map(|port| PortAllocation {
                project_id: project_id.clone(),
                agent_id: None,
                port,
                service: RANGE_SERVICE.to_string(),
                allocated_at: now,
            })
            .collect();
        self.store.insert_allocations(&allocations).await?;
        tracing::info!(project = %project_id, %range, "port range allocated");
        Ok(())
    }

    // ═══════════════════════════════════════════════════════════════════════
    // RELEASE AND QUERIES
    // ═══════════════════════════════════════════════════════════════════════

    /// Release every allocation of a project. Returns how many were released.
    pub async fn release_project_ports(&self, project_id: &ProjectId) -> Result<usize> {
        let _guard = self.lock.lock().await;
        let released = self
            .store
            .delete_allocations(&AllocationFilter::project(project_id))
            .await?;
        tracing::info!(project = %project_id, released, "project ports released");
        Ok(released)
    }

    pub async fn release_agent_ports(&self, agent_id: &AgentId) -> Result<usize> {
        let _guard = self.lock.lock().await;
        let released = self
            .store
            .delete_allocations(&AllocationFilter::agent(agent_id))
            .await?;
        if released > 0 {
            tracing::info!(agent = %agent_id, released, "agent ports released");
        }
        Ok(released)
    }

    /// True if the port is allocated here or bound by anything else.
    pub async fn is_port_in_use(&self, port: u16) -> Result<bool> {
        if self.store.is_port_allocated(port).await? {
            return Ok(true);
        }
        Ok(self.probe.is_bound(port))
    }

    pub async fn project_ports(&self, project_id: &ProjectId) -> Result<Vec<PortAllocation>> {
        self.store
            .list_allocations(&AllocationFilter::project(project_id))
            .await
    }

    pub async fn all_allocations(&self) -> Result<Vec<PortAllocation>> {
        self.store.list_allocations(&AllocationFilter::default()).await
    }

    async fn allocated_ports(&self) -> Result<HashSet<u16>> {
        Ok(self
            .all_allocations()
            .await?
            .into_iter()
            .map(|a| a.port)
            .collect())
    }

    fn is_free(&self, port: u16, taken: &HashSet<u16>) -> bool {
        if taken.contains(&port) {
            return false;
        }
        let bound = self.probe.is_bound(port);
        if bound {
            tracing::debug!(port, "skipping externally bound port");
        }
        !bound
    }
}
