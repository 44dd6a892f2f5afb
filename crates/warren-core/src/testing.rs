//! Test doubles shared by unit and integration tests.
//!
//! [`FakeProcessController`] keeps the worktrees, sessions and containers it
//! "owns" in memory (worktree directories are also created on disk so path
//! checks behave), records every call, and can be told to fail or stall any
//! operation by name.

use std::{
    collections::{BTreeMap, BTreeSet, HashSet},
    path::{Path, PathBuf},
    sync::{Mutex, MutexGuard, PoisonError},
    time::Duration,
};

use crate::{
    ports::PortProbe,
    process::{ContainerOptions, ContainerStatus, ProcessController},
    Error, Result,
};

#[derive(Debug, Default)]
struct FakeState {
    worktrees: BTreeSet<PathBuf>,
    sessions: BTreeSet<String>,
    containers: BTreeMap<String, ContainerOptions>,
    calls: Vec<String>,
    failing: BTreeMap<String, Option<usize>>,
    stalls: BTreeMap<String, Duration>,
    next_container: u64,
}

#[derive(Debug, Default)]
pub struct FakeProcessController {
    state: Mutex<FakeState>,
}

impl FakeProcessController {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, FakeState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Make every future call to `operation` fail.
    pub fn fail(&self, operation: &str) {
        self.lock().failing.insert(operation.to_string(), None);
    }

    /// Make the next `times` calls to `operation` fail.
    pub fn fail_times(&self, operation: &str, times: usize) {
        self.lock()
            .failing
            .insert(operation.to_string(), Some(times));
    }

    pub fn clear_failures(&self) {
        self.lock().failing.clear();
    }

    /// Delay every call to `operation` by `delay` before it takes effect.
    pub fn stall(&self, operation: &str, delay: Duration) {
        self.lock().stalls.insert(operation.to_string(), delay);
    }

    pub fn worktrees(&self) -> BTreeSet<PathBuf> {
        self.lock().worktrees.clone()
    }

    pub fn sessions(&self) -> BTreeSet<String> {
        self.lock().sessions.clone()
    }

    pub fn containers(&self) -> BTreeMap<String, ContainerOptions> {
        self.lock().containers.clone()
    }

    /// Every call made so far, as `operation:argument`.
    pub fn calls(&self) -> Vec<String> {
        self.lock().calls.clone()
    }

    pub fn call_count(&self, operation: &str) -> usize {
        let prefix = format!("{operation}:");
        self.lock()
            .calls
            .iter()
            .filter(|call| call.starts_with(&prefix))
            .count()
    }

    /// Drop a session behind the lifecycle manager's back.
    pub fn forget_session(&self, name: &str) {
        self.lock().sessions.remove(name);
    }

    /// Returns true when nothing is left running or checked out.
    pub fn is_clean(&self) -> bool {
        let state = self.lock();
        state.worktrees.is_empty() && state.sessions.is_empty() && state.containers.is_empty()
    }

    /// Record the call, honour a configured stall, then apply failure injection.
    async fn enter(&self, operation: &str, argument: &str) -> Result<()> {
        let stall = {
            let mut state = self.lock();
            state.calls.push(format!("{operation}:{argument}"));
            state.stalls.get(operation).copied()
        };
        if let Some(delay) = stall {
            tokio::time::sleep(delay).await;
        }

        let mut state = self.lock();
        let fail = match state.failing.get_mut(operation) {
            Some(None) => true,
            Some(Some(remaining)) if *remaining > 0 => {
                *remaining -= 1;
                true
            }
            _ => false,
        };
        drop(state);

        if fail {
            Err(Error::process(operation, "injected failure"))
        } else {
            Ok(())
        }
    }
}

#[async_trait::async_trait]
impl ProcessController for FakeProcessController {
    async fn create_worktree(&self, _repo: &Path, path: &Path, branch: &str) -> Result<()> {
        self.enter("create_worktree", &format!("{}@{branch}", path.display()))
            .await?;
        if self.lock().worktrees.contains(path) {
            return Err(Error::process(
                "create_worktree",
                format!("{} already exists", path.display()),
            ));
        }
        std::fs::create_dir_all(path)
            .map_err(|e| Error::process("create_worktree", e.to_string()))?;
        self.lock().worktrees.insert(path.to_path_buf());
        Ok(())
    }

    async fn remove_worktree(&self, path: &Path) -> Result<()> {
        self.enter("remove_worktree", &path.display().to_string())
            .await?;
        if !self.lock().worktrees.remove(path) {
            return Err(Error::process(
                "remove_worktree",
                format!("{} is not a worktree", path.display()),
            ));
        }
        if path.exists() {
            std::fs::remove_dir_all(path)
                .map_err(|e| Error::process("remove_worktree", e.to_string()))?;
        }
        Ok(())
    }

    async fn create_session(&self, name: &str, _cwd: &Path) -> Result<()> {
        self.enter("create_session", name).await?;
        if !self.lock().sessions.insert(name.to_string()) {
            return Err(Error::process(
                "create_session",
                format!("duplicate session: {name}"),
            ));
        }
        Ok(())
    }

    async fn kill_session(&self, name: &str) -> Result<()> {
        self.enter("kill_session", name).await?;
        if !self.lock().sessions.remove(name) {
            return Err(Error::process(
                "kill_session",
                format!("can't find session: {name}"),
            ));
        }
        Ok(())
    }

    async fn session_exists(&self, name: &str) -> Result<bool> {
        self.enter("session_exists", name).await?;
        Ok(self.lock().sessions.contains(name))
    }

    async fn create_container(&self, opts: &ContainerOptions) -> Result<String> {
        self.enter("create_container", &opts.name).await?;
        let mut state = self.lock();
        state.next_container += 1;
        let id = format!("fake-{:04}", state.next_container);
        state.containers.insert(id.clone(), opts.clone());
        Ok(id)
    }

    async fn remove_container(&self, id: &str) -> Result<()> {
        self.enter("remove_container", id).await?;
        if self.lock().containers.remove(id).is_none() {
            return Err(Error::process(
                "remove_container",
                format!("no such container: {id}"),
            ));
        }
        Ok(())
    }

    async fn container_status(&self, id: &str) -> Result<ContainerStatus> {
        self.enter("container_status", id).await?;
        Ok(if self.lock().containers.contains_key(id) {
            ContainerStatus::Running
        } else {
            ContainerStatus::Missing
        })
    }
}

/// Port probe reporting a fixed set of ports as bound by other processes.
#[derive(Debug, Default)]
pub struct FixedProbe {
    bound: Mutex<HashSet<u16>>,
}

impl FixedProbe {
    pub fn new(bound: impl IntoIterator<Item = u16>) -> Self {
        Self {
            bound: Mutex::new(bound.into_iter().collect()),
        }
    }

    pub fn bind(&self, port: u16) {
        self.bound
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(port);
    }
}

impl PortProbe for FixedProbe {
    fn is_bound(&self, port: u16) -> bool {
        self.bound
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(&port)
    }
}
