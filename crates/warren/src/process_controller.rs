//! `ProcessController` backed by `git`, `tmux` and `docker`.
//!
//! Each tool is looked up in `PATH` on first use. A missing tool only fails
//! the operations that need it, so a host without docker can still run
//! session-only agents.

use std::{
    ffi::{OsStr, OsString},
    path::{Path, PathBuf},
    process::Output,
};

use tokio::process::Command;
use warren_core::{
    process::{ContainerOptions, ContainerStatus, ProcessController},
    Error, Result,
};

/// Mount point of the agent worktree inside its container.
const CONTAINER_WORKDIR: &str = "/workspace";

#[derive(Debug, Default)]
pub struct CommandProcessController;

impl CommandProcessController {
    pub const fn new() -> Self {
        Self
    }
}

fn tool(operation: &str, name: &str) -> Result<PathBuf> {
    which::which(name)
        .map_err(|e| Error::process(operation, format!("{name} not found in PATH: {e}")))
}

async fn run<I, S>(operation: &str, program: &str, args: I) -> Result<Output>
where
    I: IntoIterator<Item = S>,
    S: AsRef<OsStr>,
{
    let binary = tool(operation, program)?;
    let args: Vec<_> = args
        .into_iter()
        .map(|a| a.as_ref().to_os_string())
        .collect();
    tracing::debug!(operation, program, ?args, "spawning");
    Command::new(binary)
        .args(&args)
        .kill_on_drop(true)
        .output()
        .await
        .map_err(|e| Error::process(operation, format!("failed to run {program}: {e}")))
}

/// Run and require a zero exit status; returns trimmed stdout.
async fn run_ok<I, S>(operation: &str, program: &str, args: I) -> Result<String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<OsStr>,
{
    let output = run(operation, program, args).await?;
    if output.status.success() {
        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    } else {
        let stderr = String::from_utf8_lossy(&output.stderr);
        Err(Error::process(
            operation,
            format!("{program} exited with {}: {}", output.status, stderr.trim()),
        ))
    }
}

/// Main working tree of the repository `worktree` belongs to.
async fn repo_root_of(worktree: &Path) -> Result<PathBuf> {
    let common = run_ok(
        "remove_worktree",
        "git",
        [
            OsStr::new("-C"),
            worktree.as_os_str(),
            OsStr::new("rev-parse"),
            OsStr::new("--path-format=absolute"),
            OsStr::new("--git-common-dir"),
        ],
    )
    .await?;
    PathBuf::from(common)
        .parent()
        .map(Path::to_path_buf)
        .ok_or_else(|| {
            Error::process(
                "remove_worktree",
                format!("no repository found for {}", worktree.display()),
            )
        })
}

pub fn docker_run_args(opts: &ContainerOptions) -> Vec<String> {
    let mut args = vec![
        "run".to_string(),
        "-d".to_string(),
        "--name".to_string(),
        opts.name.clone(),
        "-v".to_string(),
        format!("{}:{CONTAINER_WORKDIR}", opts.workdir.display()),
        "-w".to_string(),
        CONTAINER_WORKDIR.to_string(),
    ];
    for port in &opts.ports {
        args.push("-p".to_string());
        args.push(format!("{port}:{port}"));
    }
    for (key, value) in &opts.env {
        args.push("-e".to_string());
        args.push(format!("{key}={value}"));
    }
    args.extend([
        opts.image.clone(),
        "tail".to_string(),
        "-f".to_string(),
        "/dev/null".to_string(),
    ]);
    args
}

pub fn parse_container_status(raw: &str) -> ContainerStatus {
    raw.trim().parse().unwrap_or(ContainerStatus::Missing)
}

#[async_trait::async_trait]
impl ProcessController for CommandProcessController {
    async fn create_worktree(&self, repo: &Path, path: &Path, branch: &str) -> Result<()> {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await.map_err(|e| {
                Error::process("create_worktree", format!("{}: {e}", parent.display()))
            })?;
        }

        let branch_ref = format!("refs/heads/{branch}");
        let exists = run(
            "create_worktree",
            "git",
            [
                OsStr::new("-C"),
                repo.as_os_str(),
                OsStr::new("rev-parse"),
                OsStr::new("--verify"),
                OsStr::new("--quiet"),
                OsStr::new(&branch_ref),
            ],
        )
        .await?
        .status
        .success();

        let mut args: Vec<OsString> = vec![
            "-C".into(),
            repo.into(),
            "worktree".into(),
            "add".into(),
        ];
        if exists {
            args.extend([path.into(), branch.into()]);
        } else {
            args.extend(["-b".into(), branch.into(), path.into()]);
        }
        run_ok("create_worktree", "git", args).await?;
        tracing::debug!(path = %path.display(), branch, created_branch = !exists, "worktree added");
        Ok(())
    }

    async fn remove_worktree(&self, path: &Path) -> Result<()> {
        let root = repo_root_of(path).await?;
        run_ok(
            "remove_worktree",
            "git",
            [
                OsStr::new("-C"),
                root.as_os_str(),
                OsStr::new("worktree"),
                OsStr::new("remove"),
                OsStr::new("--force"),
                path.as_os_str(),
            ],
        )
        .await
        .map(|_| ())
    }

    async fn create_session(&self, name: &str, cwd: &Path) -> Result<()> {
        run_ok(
            "create_session",
            "tmux",
            [
                OsStr::new("new-session"),
                OsStr::new("-d"),
                OsStr::new("-s"),
                OsStr::new(name),
                OsStr::new("-c"),
                cwd.as_os_str(),
            ],
        )
        .await
        .map(|_| ())
    }

    async fn kill_session(&self, name: &str) -> Result<()> {
        run_ok("kill_session", "tmux", ["kill-session", "-t", name])
            .await
            .map(|_| ())
    }

    async fn session_exists(&self, name: &str) -> Result<bool> {
        let output = run("session_exists", "tmux", ["has-session", "-t", name]).await?;
        Ok(output.status.success())
    }

    async fn create_container(&self, opts: &ContainerOptions) -> Result<String> {
        let id = run_ok("create_container", "docker", docker_run_args(opts)).await?;
        if id.is_empty() {
            return Err(Error::process(
                "create_container",
                "docker run printed no container id",
            ));
        }
        Ok(id)
    }

    async fn remove_container(&self, id: &str) -> Result<()> {
        run_ok("remove_container", "docker", ["rm", "-f", id])
            .await
            .map(|_| ())
    }

    async fn container_status(&self, id: &str) -> Result<ContainerStatus> {
        let output = run(
            "container_status",
            "docker",
            ["inspect", "-f", "{{.State.Status}}", id],
        )
        .await?;
        if output.status.success() {
            Ok(parse_container_status(&String::from_utf8_lossy(&output.stdout)))
        } else {
            Ok(ContainerStatus::Missing)
        }
    }
}
