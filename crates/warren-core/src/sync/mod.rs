//! Sync bridge: command entry point, activity log, conflict detection and
//! event broadcast shared by the CLI and the dashboard.

#![cfg_attr(not(test), deny(clippy::unwrap_used))]
#![cfg_attr(not(test), deny(clippy::expect_used))]
#![cfg_attr(not(test), deny(clippy::panic))]

mod activity;
mod bridge;
pub mod command;
pub mod conflicts;
pub mod events;

#[cfg(test)]
mod tests_bridge;

pub use activity::{ActivityQuery, ConflictQuery};
pub use bridge::{CommandError, CoreCommandResult, SyncBridge};
pub use command::{Command, CommandClass, CommandName};
pub use conflicts::ConflictDetector;
pub use events::{Channel, Event, EventHub, Subscription};
