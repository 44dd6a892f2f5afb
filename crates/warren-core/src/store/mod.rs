//! Persistence boundary.
//!
//! One repository trait per entity, with interchangeable backends:
//!
//! - [`SqliteStore`]: durable `sqlx` SQLite store used by the binary
//! - [`MemoryStore`]: in-process maps, used by tests
//!
//! Writes are expected to be durable when the returned future resolves. The
//! stores keep no cross-entity transactions; consistency between entities is
//! the lifecycle manager's job.

use chrono::{DateTime, Utc};

use crate::{
    domain::{
        ActivityFilter, ActivityLogEntry, Agent, AgentFilter, AgentId, AllocationFilter,
        ConflictFilter, ConflictInfo, NewActivity, Outcome, PortAllocation, Project, ProjectId,
    },
    Result,
};

mod memory;
mod sqlite;

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

/// Position after which a conflict page starts: `(detected_at, id)` of the
/// last conflict already returned.
pub type ConflictCursor = (DateTime<Utc>, String);

#[async_trait::async_trait]
pub trait ProjectRepository: Send + Sync {
    async fn get_project(&self, id: &ProjectId) -> Result<Option<Project>>;

    /// All projects ordered by creation time.
    async fn list_projects(&self) -> Result<Vec<Project>>;

    /// Insert or replace. A second project with the same path is a conflict.
    async fn upsert_project(&self, project: &Project) -> Result<()>;

    /// Returns `true` if a record was deleted.
    async fn delete_project(&self, id: &ProjectId) -> Result<bool>;
}

#[async_trait::async_trait]
pub trait AgentRepository: Send + Sync {
    async fn get_agent(&self, id: &AgentId) -> Result<Option<Agent>>;

    /// Agents matching `filter`, ordered by creation time.
    async fn list_agents(&self, filter: &AgentFilter) -> Result<Vec<Agent>>;

    async fn upsert_agent(&self, agent: &Agent) -> Result<()>;

    async fn delete_agent(&self, id: &AgentId) -> Result<bool>;
}

#[async_trait::async_trait]
pub trait PortRepository: Send + Sync {
    /// Allocations matching `filter`, ordered by port.
    async fn list_allocations(&self, filter: &AllocationFilter) -> Result<Vec<PortAllocation>>;

    /// Insert all allocations or none. A port that already has a live
    /// allocation fails the whole batch with `PortUnavailable`.
    async fn insert_allocations(&self, allocations: &[PortAllocation]) -> Result<()>;

    /// Delete matching allocations and return how many were removed.
    async fn delete_allocations(&self, filter: &AllocationFilter) -> Result<usize>;

    async fn is_port_allocated(&self, port: u16) -> Result<bool>;
}

#[async_trait::async_trait]
pub trait ActivityRepository: Send + Sync {
    /// Append a pending entry and return it with its assigned id.
    async fn append_activity(&self, entry: &NewActivity) -> Result<ActivityLogEntry>;

    /// Record the outcome of a pending entry. Completed entries are immutable.
    async fn complete_activity(&self, id: i64, outcome: &Outcome) -> Result<()>;

    /// Up to `page_size` entries matching `filter` with an id above `after`,
    /// in append order. `filter.limit` is not applied here.
    async fn activity_page(
        &self,
        filter: &ActivityFilter,
        after: Option<i64>,
        page_size: usize,
    ) -> Result<Vec<ActivityLogEntry>>;
}

#[async_trait::async_trait]
pub trait ConflictRepository: Send + Sync {
    async fn insert_conflict(&self, conflict: &ConflictInfo) -> Result<()>;

    async fn get_conflict(&self, id: &str) -> Result<Option<ConflictInfo>>;

    /// Flip `resolved`. Resolving an already resolved conflict leaves the
    /// stored record untouched. Returns `None` for an unknown id.
    async fn resolve_conflict(
        &self,
        id: &str,
        resolution: Option<&str>,
        at: DateTime<Utc>,
    ) -> Result<Option<ConflictInfo>>;

    /// Up to `page_size` conflicts matching `filter` after `after`, ordered
    /// by `(detected_at, id)`.
    async fn conflict_page(
        &self,
        filter: &ConflictFilter,
        after: Option<&ConflictCursor>,
        page_size: usize,
    ) -> Result<Vec<ConflictInfo>>;
}

/// Everything the core persists.
pub trait PersistenceStore:
    ProjectRepository + AgentRepository + PortRepository + ActivityRepository + ConflictRepository
{
}

impl<T> PersistenceStore for T where
    T: ProjectRepository
        + AgentRepository
        + PortRepository
        + ActivityRepository
        + ConflictRepository
{
}
