//! Domain entities, identifiers and state machines.

pub mod activity;
pub mod agent;
pub mod identifiers;
pub mod lifecycle;
pub mod metadata;
pub mod port;
pub mod project;

pub use activity::{
    ActivityFilter, ActivityLogEntry, ActivityStats, ConflictFilter, ConflictInfo, NewActivity,
    OperationRef, Outcome, Severity, Source,
};
pub use agent::{Agent, AgentFilter, AgentStatus};
pub use identifiers::{AgentId, BranchName, IdentifierError, ProjectId, SessionId};
pub use lifecycle::LifecycleState;
pub use metadata::ExtraMetadata;
pub use port::{agent_service, AllocationFilter, PortAllocation, RANGE_SERVICE};
pub use project::{validate_project_name, PortRange, Project, ProjectStatus};
