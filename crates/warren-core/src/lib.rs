//! # Warren Core
//!
//! Orchestration core for agent sandboxes: a git worktree plus a multiplexer
//! session and/or container, grouped under projects and driven from two
//! control surfaces at once (CLI and browser dashboard).
//!
//! ## Components
//!
//! - [`ports::PortAllocator`]: non-conflicting port reservations under concurrent demand
//! - [`lifecycle::ResourceLifecycleManager`]: project and agent state machines with rollback
//! - [`sync::SyncBridge`]: the single command entry point; logs, detects conflicts, broadcasts
//!
//! Side effects go through [`process::ProcessController`] and state through
//! [`store::PersistenceStore`]. Both are traits so the binary and the tests can
//! supply their own implementations.
//!
//! ## Laws (Compiler Enforced)
//!
//! - No `unwrap()` - returns `Result` instead
//! - No `expect()` - returns `Result` instead
//! - No `panic!()` - returns `Result` instead
//! - No `unsafe` - safe Rust only

#![cfg_attr(not(test), deny(clippy::unwrap_used))]
#![cfg_attr(not(test), deny(clippy::expect_used))]
#![cfg_attr(not(test), deny(clippy::panic))]

pub mod clock;
pub mod config;
pub mod domain;
mod error;
pub mod lifecycle;
pub mod locks;
pub mod metrics;
pub mod ports;
pub mod process;
pub mod services;
pub mod store;
pub mod sync;
pub mod testing;

pub use config::Config;
pub use error::{Error, ErrorKind, ProcessFailure, ResourceKind, Result};
pub use lifecycle::{CommandResult, ResourceLifecycleManager};
pub use ports::PortAllocator;
pub use services::Services;
pub use sync::{CoreCommandResult, SyncBridge};
