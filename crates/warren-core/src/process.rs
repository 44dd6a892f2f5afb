//! Capability interface for worktree, session and container side effects.
//!
//! The core never spawns processes itself. The binary provides an
//! implementation that shells out to `git`, `tmux` and `docker`; tests use
//! [`crate::testing::FakeProcessController`].

use std::{
    collections::BTreeMap,
    future::Future,
    path::{Path, PathBuf},
    sync::Arc,
    time::Duration,
};

use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

use crate::{Error, Result};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContainerOptions {
    pub name: String,
    pub image: String,
    pub workdir: PathBuf,
    /// Host ports published 1:1 into the container.
    pub ports: Vec<u16>,
    pub env: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, EnumString, Serialize, Deserialize)]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
#[serde(rename_all = "lowercase")]
pub enum ContainerStatus {
    Created,
    Running,
    Paused,
    Restarting,
    Exited,
    Dead,
    Missing,
}

/// Side-effect capability consumed by the lifecycle manager.
///
/// Every method fails with `Error::Process` carrying the underlying cause.
#[async_trait::async_trait]
pub trait ProcessController: Send + Sync {
    /// Check out `branch` into a new worktree at `path` of the repository at
    /// `repo`, creating the branch when it does not exist yet.
    async fn create_worktree(&self, repo: &Path, path: &Path, branch: &str) -> Result<()>;

    async fn remove_worktree(&self, path: &Path) -> Result<()>;

    async fn create_session(&self, name: &str, cwd: &Path) -> Result<()>;

    async fn kill_session(&self, name: &str) -> Result<()>;

    async fn session_exists(&self, name: &str) -> Result<bool>;

    /// Start a detached container and return its id.
    async fn create_container(&self, opts: &ContainerOptions) -> Result<String>;

    async fn remove_container(&self, id: &str) -> Result<()>;

    async fn container_status(&self, id: &str) -> Result<ContainerStatus>;
}

/// Wraps a controller so that every call is bounded by `timeout`.
///
/// An expired call surfaces as `Error::Timeout`; it is never retried.
pub struct TimedProcessController {
    inner: Arc<dyn ProcessController>,
    timeout: Duration,
}

impl TimedProcessController {
    pub fn new(inner: Arc<dyn ProcessController>, timeout: Duration) -> Self {
        Self { inner, timeout }
    }

    async fn bounded<T, F>(&self, operation: &str, fut: F) -> Result<T>
    where
        F: Future<Output = Result<T>> + Send,
    {
        tokio::time::timeout(self.timeout, fut)
            .await
            .unwrap_or_else(|_| {
                tracing::warn!(operation, timeout = ?self.timeout, "process call timed out");
                Err(Error::timeout(operation, self.timeout))
            })
    }
}

#[async_trait::async_trait]
impl ProcessController for TimedProcessController {
    async fn create_worktree(&self, repo: &Path, path: &Path, branch: &str) -> Result<()> {
        self.bounded("create_worktree", self.inner.create_worktree(repo, path, branch))
            .await
    }

    async fn remove_worktree(&self, path: &Path) -> Result<()> {
        self.bounded("remove_worktree", self.inner.remove_worktree(path))
            .await
    }

    async fn create_session(&self, name: &str, cwd: &Path) -> Result<()> {
        self.bounded("create_session", self.inner.create_session(name, cwd))
            .await
    }

    async fn kill_session(&self, name: &str) -> Result<()> {
        self.bounded("kill_session", self.inner.kill_session(name))
            .await
    }

    async fn session_exists(&self, name: &str) -> Result<bool> {
        self.bounded("session_exists", self.inner.session_exists(name))
            .await
    }

    async fn create_container(&self, opts: &ContainerOptions) -> Result<String> {
        self.bounded("create_container", self.inner.create_container(opts))
            .await
    }

    async fn remove_container(&self, id: &str) -> Result<()> {
        self.bounded("remove_container", self.inner.remove_container(id))
            .await
    }

    async fn container_status(&self, id: &str) -> Result<ContainerStatus> {
        self.bounded("container_status", self.inner.container_status(id))
            .await
    }
}
