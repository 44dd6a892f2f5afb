//! SQLite store using `sqlx`.
//!
//! - Connection pooling, WAL journal, `synchronous = FULL`
//! - Simple embedded schema (no migration files)
//! - Timestamps as fixed-width RFC 3339 TEXT, lists and maps as JSON TEXT
//! - `port` is the primary key of `port_allocations`, so the database itself
//!   refuses a second live allocation of the same port

#![cfg_attr(not(test), deny(clippy::unwrap_used))]
#![cfg_attr(not(test), deny(clippy::expect_used))]
#![cfg_attr(not(test), deny(clippy::panic))]

use std::{path::Path, str::FromStr, time::Duration};

use chrono::{DateTime, Utc};
use sqlx::{
    sqlite::{
        SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteRow, SqliteSynchronous,
    },
    QueryBuilder, Row, Sqlite, SqlitePool,
};

use super::{
    ActivityRepository, AgentRepository, ConflictCursor, ConflictRepository, PortRepository,
    ProjectRepository,
};
use crate::{
    clock::{from_storage, to_storage},
    domain::{
        ActivityFilter, ActivityLogEntry, Agent, AgentFilter, AgentId, AllocationFilter,
        ConflictFilter, ConflictInfo, NewActivity, Outcome, PortAllocation, PortRange, Project,
        ProjectId,
    },
    Error, Result,
};

const CURRENT_SCHEMA_VERSION: i64 = 1;

/// Database schema as SQL string - executed once on open
const SCHEMA: &str = r"
CREATE TABLE IF NOT EXISTS schema_version (
    version INTEGER PRIMARY KEY
);

CREATE TABLE IF NOT EXISTS projects (
    id TEXT PRIMARY KEY,
    path TEXT NOT NULL UNIQUE,
    name TEXT NOT NULL,
    agent_ids TEXT NOT NULL,
    port_start INTEGER NOT NULL,
    port_end INTEGER NOT NULL,
    status TEXT NOT NULL CHECK(status IN ('ACTIVE', 'STOPPED', 'ERROR')),
    created_at TEXT NOT NULL,
    metadata TEXT NOT NULL DEFAULT '{}'
);

CREATE TABLE IF NOT EXISTS agents (
    id TEXT PRIMARY KEY,
    project_id TEXT,
    branch TEXT NOT NULL,
    worktree_path TEXT NOT NULL,
    session_name TEXT NOT NULL,
    container_id TEXT,
    assigned_ports TEXT NOT NULL,
    status TEXT NOT NULL CHECK(status IN ('CREATED', 'RUNNING', 'STOPPED', 'ERROR', 'REMOVED')),
    auto_accept INTEGER NOT NULL,
    use_container INTEGER NOT NULL,
    created_at TEXT NOT NULL,
    last_accessed_at TEXT NOT NULL,
    metadata TEXT NOT NULL DEFAULT '{}'
);

CREATE INDEX IF NOT EXISTS idx_agents_project ON agents(project_id);

CREATE TABLE IF NOT EXISTS port_allocations (
    port INTEGER PRIMARY KEY CHECK(port BETWEEN 1 AND 65535),
    project_id TEXT NOT NULL,
    agent_id TEXT,
    service TEXT NOT NULL,
    allocated_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_ports_project ON port_allocations(project_id);
CREATE INDEX IF NOT EXISTS idx_ports_agent ON port_allocations(agent_id);

CREATE TABLE IF NOT EXISTS activity_log (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    session_id TEXT NOT NULL,
    source TEXT NOT NULL CHECK(source IN ('CLI', 'GUI')),
    command TEXT NOT NULL,
    params TEXT NOT NULL,
    resource_id TEXT,
    timestamp TEXT NOT NULL,
    outcome TEXT NOT NULL,
    completed INTEGER NOT NULL DEFAULT 0
);

CREATE INDEX IF NOT EXISTS idx_activity_timestamp ON activity_log(timestamp);
CREATE INDEX IF NOT EXISTS idx_activity_command ON activity_log(command);

CREATE TABLE IF NOT EXISTS conflicts (
    id TEXT PRIMARY KEY,
    resource_id TEXT NOT NULL,
    operation_a TEXT NOT NULL,
    operation_b TEXT NOT NULL,
    severity TEXT NOT NULL CHECK(severity IN ('LOW', 'HIGH')),
    resolved INTEGER NOT NULL DEFAULT 0,
    resolution TEXT,
    detected_at TEXT NOT NULL,
    resolved_at TEXT
);

CREATE INDEX IF NOT EXISTS idx_conflicts_detected ON conflicts(detected_at, id);
";

/// SQLite-backed [`PersistenceStore`](super::PersistenceStore)
#[derive(Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Open or create the database at `path`, creating parent directories.
    ///
    /// # Errors
    ///
    /// Returns `Error::Database` if the file cannot be opened, the schema
    /// cannot be initialized or the schema version is newer than supported.
    pub async fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| {
                Error::io(format!(
                    "Failed to create database directory {}: {e}",
                    parent.display()
                ))
            })?;
        }

        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Full)
            .busy_timeout(Duration::from_secs(5));

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await
            .map_err(|e| {
                Error::database(format!("Failed to open database {}: {e}", path.display()))
            })?;

        Self::initialize(pool).await
    }

    /// Private in-memory database, for tests.
    pub async fn open_in_memory() -> Result<Self> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")
            .map_err(|e| Error::database(format!("Invalid in-memory URL: {e}")))?;

        // A single connection that is never recycled keeps the database alive.
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await
            .map_err(|e| Error::database(format!("Failed to open in-memory database: {e}")))?;

        Self::initialize(pool).await
    }

    async fn initialize(pool: SqlitePool) -> Result<Self> {
        init_schema(&pool).await?;
        check_schema_version(&pool).await?;
        Ok(Self { pool })
    }

    pub const fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

async fn init_schema(pool: &SqlitePool) -> Result<()> {
    sqlx::query(SCHEMA)
        .execute(pool)
        .await
        .map_err(|e| Error::database(format!("Failed to initialize schema: {e}")))?;
    Ok(())
}

async fn check_schema_version(pool: &SqlitePool) -> Result<()> {
    let version: Option<i64> = sqlx::query_scalar("SELECT MAX(version) FROM schema_version")
        .fetch_one(pool)
        .await
        .map_err(|e| Error::database(format!("Failed to read schema version: {e}")))?;

    match version {
        None => {
            sqlx::query("INSERT INTO schema_version (version) VALUES (?)")
                .bind(CURRENT_SCHEMA_VERSION)
                .execute(pool)
                .await
                .map_err(|e| Error::database(format!("Failed to record schema version: {e}")))?;
            Ok(())
        }
        Some(v) if v == CURRENT_SCHEMA_VERSION => Ok(()),
        Some(v) => Err(Error::database(format!(
            "Database schema version {v} is not supported (expected {CURRENT_SCHEMA_VERSION})"
        ))),
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// ROW MAPPING
// ═══════════════════════════════════════════════════════════════════════════

fn get<'r, T>(row: &'r SqliteRow, column: &str) -> Result<T>
where
    T: sqlx::Decode<'r, Sqlite> + sqlx::Type<Sqlite>,
{
    row.try_get(column)
        .map_err(|e| Error::database(format!("Failed to read column '{column}': {e}")))
}

fn parse_enum<T: FromStr>(raw: &str, what: &str) -> Result<T> {
    raw.parse()
        .map_err(|_| Error::parse(format!("invalid {what} '{raw}' in database")))
}

fn port_from_db(raw: i64) -> Result<u16> {
    u16::try_from(raw).map_err(|_| Error::parse(format!("invalid port {raw} in database")))
}

fn row_to_project(row: &SqliteRow) -> Result<Project> {
    let id: String = get(row, "id")?;
    let path: String = get(row, "path")?;
    let agent_ids: String = get(row, "agent_ids")?;
    let status: String = get(row, "status")?;
    let created_at: String = get(row, "created_at")?;
    let metadata: String = get(row, "metadata")?;

    Ok(Project {
        id: ProjectId::parse(id)?,
        path: path.into(),
        name: get(row, "name")?,
        agent_ids: serde_json::from_str(&agent_ids)?,
        port_range: PortRange::new(
            port_from_db(get(row, "port_start")?)?,
            port_from_db(get(row, "port_end")?)?,
        )?,
        status: parse_enum(&status, "project status")?,
        created_at: from_storage(&created_at)?,
        metadata: serde_json::from_str(&metadata)?,
    })
}

fn row_to_agent(row: &SqliteRow) -> Result<Agent> {
    let id: String = get(row, "id")?;
    let project_id: Option<String> = get(row, "project_id")?;
    let branch: String = get(row, "branch")?;
    let worktree_path: String = get(row, "worktree_path")?;
    let assigned_ports: String = get(row, "assigned_ports")?;
    let status: String = get(row, "status")?;
    let created_at: String = get(row, "created_at")?;
    let last_accessed_at: String = get(row, "last_accessed_at")?;
    let metadata: String = get(row, "metadata")?;

    Ok(Agent {
        id: AgentId::parse(id)?,
        project_id: project_id.map(ProjectId::parse).transpose()?,
        branch: crate::domain::BranchName::parse(branch)?,
        worktree_path: worktree_path.into(),
        session_name: get(row, "session_name")?,
        container_id: get(row, "container_id")?,
        assigned_ports: serde_json::from_str(&assigned_ports)?,
        status: parse_enum(&status, "agent status")?,
        auto_accept: get(row, "auto_accept")?,
        use_container: get(row, "use_container")?,
        created_at: from_storage(&created_at)?,
        last_accessed_at: from_storage(&last_accessed_at)?,
        metadata: serde_json::from_str(&metadata)?,
    })
}

fn row_to_allocation(row: &SqliteRow) -> Result<PortAllocation> {
    let project_id: String = get(row, "project_id")?;
    let agent_id: Option<String> = get(row, "agent_id")?;
    let allocated_at: String = get(row, "allocated_at")?;

    Ok(PortAllocation {
        project_id: ProjectId::parse(project_id)?,
        agent_id: agent_id.map(AgentId::parse).transpose()?,
        port: port_from_db(get(row, "port")?)?,
        service: get(row, "service")?,
        allocated_at: from_storage(&allocated_at)?,
    })
}

fn row_to_activity(row: &SqliteRow) -> Result<ActivityLogEntry> {
    let session_id: String = get(row, "session_id")?;
    let source: String = get(row, "source")?;
    let params: String = get(row, "params")?;
    let timestamp: String = get(row, "timestamp")?;
    let outcome: String = get(row, "outcome")?;

    Ok(ActivityLogEntry {
        id: get(row, "id")?,
        session_id: crate::domain::SessionId::parse(session_id)?,
        source: parse_enum(&source, "source")?,
        command: get(row, "command")?,
        params: serde_json::from_str(&params)?,
        resource_id: get(row, "resource_id")?,
        timestamp: from_storage(&timestamp)?,
        outcome: serde_json::from_str(&outcome)?,
    })
}

fn row_to_conflict(row: &SqliteRow) -> Result<ConflictInfo> {
    let operation_a: String = get(row, "operation_a")?;
    let operation_b: String = get(row, "operation_b")?;
    let severity: String = get(row, "severity")?;
    let detected_at: String = get(row, "detected_at")?;
    let resolved_at: Option<String> = get(row, "resolved_at")?;

    Ok(ConflictInfo {
        id: get(row, "id")?,
        resource_id: get(row, "resource_id")?,
        operation_a: serde_json::from_str(&operation_a)?,
        operation_b: serde_json::from_str(&operation_b)?,
        severity: parse_enum(&severity, "severity")?,
        resolved: get(row, "resolved")?,
        resolution: get(row, "resolution")?,
        detected_at: from_storage(&detected_at)?,
        resolved_at: resolved_at.as_deref().map(from_storage).transpose()?,
    })
}

fn is_unique_violation(err: &sqlx::Error) -> bool {
    matches!(err, sqlx::Error::Database(db) if db.is_unique_violation())
}

fn page_limit(page_size: usize) -> i64 {
    i64::try_from(page_size).unwrap_or(i64::MAX)
}

fn push_allocation_filter(builder: &mut QueryBuilder<'_, Sqlite>, filter: &AllocationFilter) {
    if let Some(project_id) = &filter.project_id {
        builder
            .push(" AND project_id = ")
            .push_bind(project_id.to_string());
    }
    if let Some(agent_id) = &filter.agent_id {
        builder.push(" AND agent_id = ").push_bind(agent_id.to_string());
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// PROJECTS
// ═══════════════════════════════════════════════════════════════════════════

#[async_trait::async_trait]
impl ProjectRepository for SqliteStore {
    async fn get_project(&self, id: &ProjectId) -> Result<Option<Project>> {
        sqlx::query("SELECT * FROM projects WHERE id = ?")
            .bind(id.as_str())
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| Error::database(format!("Failed to load project {id}: {e}")))?
            .as_ref()
            .map(row_to_project)
            .transpose()
    }

    async fn list_projects(&self) -> Result<Vec<Project>> {
        sqlx::query("SELECT * FROM projects ORDER BY created_at, id")
            .fetch_all(&self.pool)
            .await
            .map_err(|e| Error::database(format!("Failed to list projects: {e}")))?
            .iter()
            .map(row_to_project)
            .collect()
    }

    async fn upsert_project(&self, project: &Project) -> Result<()> {
        sqlx::query(
            "INSERT INTO projects
                (id, path, name, agent_ids, port_start, port_end, status, created_at, metadata)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT(id) DO UPDATE SET
                path = excluded.path,
                name = excluded.name,
                agent_ids = excluded.agent_ids,
                port_start = excluded.port_start,
                port_end = excluded.port_end,
                status = excluded.status,
                metadata = excluded.metadata",
        )
        .bind(project.id.as_str())
        .bind(project.path.to_string_lossy().into_owned())
        .bind(&project.name)
        .bind(serde_json::to_string(&project.agent_ids)?)
        .bind(i64::from(project.port_range.start()))
        .bind(i64::from(project.port_range.end()))
        .bind(project.status.to_string())
        .bind(to_storage(&project.created_at))
        .bind(serde_json::to_string(&project.metadata)?)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            if is_unique_violation(&e) {
                Error::conflict(format!(
                    "a project is already registered at {}",
                    project.path.display()
                ))
            } else {
                Error::database(format!("Failed to save project {}: {e}", project.id))
            }
        })?;
        Ok(())
    }

    async fn delete_project(&self, id: &ProjectId) -> Result<bool> {
        let result = sqlx::query("DELETE FROM projects WHERE id = ?")
            .bind(id.as_str())
            .execute(&self.pool)
            .await
            .map_err(|e| Error::database(format!("Failed to delete project {id}: {e}")))?;
        Ok(result.rows_affected() > 0)
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// AGENTS
// ═══════════════════════════════════════════════════════════════════════════

#[async_trait::async_trait]
impl AgentRepository for SqliteStore {
    async fn get_agent(&self, id: &AgentId) -> Result<Option<Agent>> {
        sqlx::query("SELECT * FROM agents WHERE id = ?")
            .bind(id.as_str())
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| Error::database(format!("Failed to load agent {id}: {e}")))?
            .as_ref()
            .map(row_to_agent)
            .transpose()
    }

    async fn list_agents(&self, filter: &AgentFilter) -> Result<Vec<Agent>> {
        let mut builder = QueryBuilder::<Sqlite>::new("SELECT * FROM agents WHERE 1 = 1");
        if let Some(project_id) = &filter.project_id {
            builder
                .push(" AND project_id = ")
                .push_bind(project_id.to_string());
        }
        if let Some(status) = filter.status {
            builder.push(" AND status = ").push_bind(status.to_string());
        }
        builder.push(" ORDER BY created_at, id");

        builder
            .build()
            .fetch_all(&self.pool)
            .await
            .map_err(|e| Error::database(format!("Failed to list agents: {e}")))?
            .iter()
            .map(row_to_agent)
            .collect()
    }

    async fn upsert_agent(&self, agent: &Agent) -> Result<()> {
        sqlx::query(
            "INSERT INTO agents
                (id, project_id, branch, worktree_path, session_name, container_id,
                 assigned_ports, status, auto_accept, use_container, created_at,
                 last_accessed_at, metadata)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT(id) DO UPDATE SET
                project_id = excluded.project_id,
                branch = excluded.branch,
                worktree_path = excluded.worktree_path,
                session_name = excluded.session_name,
                container_id = excluded.container_id,
                assigned_ports = excluded.assigned_ports,
                status = excluded.status,
                auto_accept = excluded.auto_accept,
                use_container = excluded.use_container,
                last_accessed_at = excluded.last_accessed_at,
                metadata = excluded.metadata",
        )
        .bind(agent.id.as_str())
        .bind(agent.project_id.as_ref().map(ToString::to_string))
        .bind(agent.branch.as_str())
        .bind(agent.worktree_path.to_string_lossy().into_owned())
        .bind(&agent.session_name)
        .bind(agent.container_id.as_deref())
        .bind(serde_json::to_string(&agent.assigned_ports)?)
        .bind(agent.status.to_string())
        .bind(agent.auto_accept)
        .bind(agent.use_container)
        .bind(to_storage(&agent.created_at))
        .bind(to_storage(&agent.last_accessed_at))
        .bind(serde_json::to_string(&agent.metadata)?)
        .execute(&self.pool)
        .await
        .map_err(|e| Error::database(format!("Failed to save agent {}: {e}", agent.id)))?;
        Ok(())
    }

    async fn delete_agent(&self, id: &AgentId) -> Result<bool> {
        let result = sqlx::query("DELETE FROM agents WHERE id = ?")
            .bind(id.as_str())
            .execute(&self.pool)
            .await
            .map_err(|e| Error::database(format!("Failed to delete agent {id}: {e}")))?;
        Ok(result.rows_affected() > 0)
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// PORT ALLOCATIONS
// ═══════════════════════════════════════════════════════════════════════════

#[async_trait::async_trait]
impl PortRepository for SqliteStore {
    async fn list_allocations(&self, filter: &AllocationFilter) -> Result<Vec<PortAllocation>> {
        let mut builder =
            QueryBuilder::<Sqlite>::new("SELECT * FROM port_allocations WHERE 1 = 1");
        push_allocation_filter(&mut builder, filter);
        builder.push(" ORDER BY port");

        builder
            .build()
            .fetch_all(&self.pool)
            .await
            .map_err(|e| Error::database(format!("Failed to list port allocations: {e}")))?
            .iter()
            .map(row_to_allocation)
            .collect()
    }

    async fn insert_allocations(&self, allocations: &[PortAllocation]) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        for allocation in allocations {
            sqlx::query(
                "INSERT INTO port_allocations (port, project_id, agent_id, service, allocated_at)
                 VALUES (?, ?, ?, ?, ?)",
            )
            .bind(i64::from(allocation.port))
            .bind(allocation.project_id.as_str())
            .bind(allocation.agent_id.as_ref().map(ToString::to_string))
            .bind(&allocation.service)
            .bind(to_storage(&allocation.allocated_at))
            .execute(&mut *tx)
            .await
            .map_err(|e| {
                if is_unique_violation(&e) {
                    Error::port_unavailable(format!(
                        "port {} is already allocated",
                        allocation.port
                    ))
                } else {
                    Error::database(format!(
                        "Failed to allocate port {}: {e}",
                        allocation.port
                    ))
                }
            })?;
        }
        tx.commit().await?;
        Ok(())
    }

    async fn delete_allocations(&self, filter: &AllocationFilter) -> Result<usize> {
        let mut builder = QueryBuilder::<Sqlite>::new("DELETE FROM port_allocations WHERE 1 = 1");
        push_allocation_filter(&mut builder, filter);

        let result = builder
            .build()
            .execute(&self.pool)
            .await
            .map_err(|e| Error::database(format!("Failed to release ports: {e}")))?;
        Ok(usize::try_from(result.rows_affected()).unwrap_or(usize::MAX))
    }

    async fn is_port_allocated(&self, port: u16) -> Result<bool> {
        let found: Option<i64> =
            sqlx::query_scalar("SELECT port FROM port_allocations WHERE port = ?")
                .bind(i64::from(port))
                .fetch_optional(&self.pool)
                .await
                .map_err(|e| Error::database(format!("Failed to check port {port}: {e}")))?;
        Ok(found.is_some())
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// ACTIVITY LOG
// ═══════════════════════════════════════════════════════════════════════════

#[async_trait::async_trait]
impl ActivityRepository for SqliteStore {
    async fn append_activity(&self, entry: &NewActivity) -> Result<ActivityLogEntry> {
        let outcome = Outcome::Pending;
        let result = sqlx::query(
            "INSERT INTO activity_log
                (session_id, source, command, params, resource_id, timestamp, outcome)
             VALUES (?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(entry.session_id.as_str())
        .bind(entry.source.to_string())
        .bind(&entry.command)
        .bind(serde_json::to_string(&entry.params)?)
        .bind(entry.resource_id.as_deref())
        .bind(to_storage(&entry.timestamp))
        .bind(serde_json::to_string(&outcome)?)
        .execute(&self.pool)
        .await
        .map_err(|e| Error::database(format!("Failed to append activity: {e}")))?;

        Ok(ActivityLogEntry {
            id: result.last_insert_rowid(),
            session_id: entry.session_id.clone(),
            source: entry.source,
            command: entry.command.clone(),
            params: entry.params.clone(),
            resource_id: entry.resource_id.clone(),
            timestamp: entry.timestamp,
            outcome,
        })
    }

    async fn complete_activity(&self, id: i64, outcome: &Outcome) -> Result<()> {
        let result = sqlx::query(
            "UPDATE activity_log SET outcome = ?, completed = 1 WHERE id = ? AND completed = 0",
        )
        .bind(serde_json::to_string(outcome)?)
        .bind(id)
        .execute(&self.pool)
        .await
        .map_err(|e| Error::database(format!("Failed to complete activity {id}: {e}")))?;

        if result.rows_affected() == 0 {
            return Err(Error::validation(format!(
                "activity entry {id} is missing or already completed"
            )));
        }
        Ok(())
    }

    async fn activity_page(
        &self,
        filter: &ActivityFilter,
        after: Option<i64>,
        page_size: usize,
    ) -> Result<Vec<ActivityLogEntry>> {
        let mut builder = QueryBuilder::<Sqlite>::new("SELECT * FROM activity_log WHERE 1 = 1");
        if let Some(cursor) = after {
            builder.push(" AND id > ").push_bind(cursor);
        }
        if let Some(command) = &filter.command {
            builder.push(" AND command = ").push_bind(command.clone());
        }
        if let Some(source) = filter.source {
            builder.push(" AND source = ").push_bind(source.to_string());
        }
        if let Some(session_id) = &filter.session_id {
            builder
                .push(" AND session_id = ")
                .push_bind(session_id.to_string());
        }
        if let Some(since) = &filter.since {
            builder.push(" AND timestamp >= ").push_bind(to_storage(since));
        }
        builder
            .push(" ORDER BY id LIMIT ")
            .push_bind(page_limit(page_size));

        builder
            .build()
            .fetch_all(&self.pool)
            .await
            .map_err(|e| Error::database(format!("Failed to query activity: {e}")))?
            .iter()
            .map(row_to_activity)
            .collect()
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// CONFLICTS
// ═══════════════════════════════════════════════════════════════════════════

#[async_trait::async_trait]
impl ConflictRepository for SqliteStore {
    async fn insert_conflict(&self, conflict: &ConflictInfo) -> Result<()> {
        sqlx::query(
            "INSERT INTO conflicts
                (id, resource_id, operation_a, operation_b, severity, resolved, resolution,
                 detected_at, resolved_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&conflict.id)
        .bind(&conflict.resource_id)
        .bind(serde_json::to_string(&conflict.operation_a)?)
        .bind(serde_json::to_string(&conflict.operation_b)?)
        .bind(conflict.severity.to_string())
        .bind(conflict.resolved)
        .bind(conflict.resolution.as_deref())
        .bind(to_storage(&conflict.detected_at))
        .bind(conflict.resolved_at.as_ref().map(to_storage))
        .execute(&self.pool)
        .await
        .map_err(|e| {
            if is_unique_violation(&e) {
                Error::conflict(format!("conflict {} already recorded", conflict.id))
            } else {
                Error::database(format!("Failed to record conflict {}: {e}", conflict.id))
            }
        })?;
        Ok(())
    }

    async fn get_conflict(&self, id: &str) -> Result<Option<ConflictInfo>> {
        sqlx::query("SELECT * FROM conflicts WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| Error::database(format!("Failed to load conflict {id}: {e}")))?
            .as_ref()
            .map(row_to_conflict)
            .transpose()
    }

    async fn resolve_conflict(
        &self,
        id: &str,
        resolution: Option<&str>,
        at: DateTime<Utc>,
    ) -> Result<Option<ConflictInfo>> {
        sqlx::query(
            "UPDATE conflicts SET resolved = 1, resolution = ?, resolved_at = ?
             WHERE id = ? AND resolved = 0",
        )
        .bind(resolution)
        .bind(to_storage(&at))
        .bind(id)
        .execute(&self.pool)
        .await
        .map_err(|e| Error::database(format!("Failed to resolve conflict {id}: {e}")))?;

        self.get_conflict(id).await
    }

    async fn conflict_page(
        &self,
        filter: &ConflictFilter,
        after: Option<&ConflictCursor>,
        page_size: usize,
    ) -> Result<Vec<ConflictInfo>> {
        let mut builder = QueryBuilder::<Sqlite>::new("SELECT * FROM conflicts WHERE 1 = 1");
        if let Some((detected_at, id)) = after {
            let ts = to_storage(detected_at);
            builder
                .push(" AND (detected_at > ")
                .push_bind(ts.clone())
                .push(" OR (detected_at = ")
                .push_bind(ts)
                .push(" AND id > ")
                .push_bind(id.clone())
                .push("))");
        }
        if let Some(resolved) = filter.resolved {
            builder.push(" AND resolved = ").push_bind(resolved);
        }
        if let Some(severity) = filter.severity {
            builder.push(" AND severity = ").push_bind(severity.to_string());
        }
        if let Some(since) = &filter.since {
            builder.push(" AND detected_at >= ").push_bind(to_storage(since));
        }
        if let Some(resource_id) = &filter.resource_id {
            builder.push(" AND resource_id = ").push_bind(resource_id.clone());
        }
        builder
            .push(" ORDER BY detected_at, id LIMIT ")
            .push_bind(page_limit(page_size));

        builder
            .build()
            .fetch_all(&self.pool)
            .await
            .map_err(|e| Error::database(format!("Failed to query conflicts: {e}")))?
            .iter()
            .map(row_to_conflict)
            .collect()
    }
}
