//! Where CLI commands run.
//!
//! When a dashboard server answers on `server.bind`, every command is sent
//! to it so both control surfaces share one bridge: one lock table, one
//! conflict window, one event hub. Without a server the CLI wires its own
//! services over the state database.

use std::{
    net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr},
    path::PathBuf,
    sync::Arc,
    time::Duration,
};

use anyhow::Context;
use reqwest::{Client, Response, StatusCode};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;
use warren_core::{
    config::Config,
    domain::{ActivityFilter, ActivityLogEntry, ActivityStats, ConflictFilter, ConflictInfo, SessionId},
    sync::CommandError,
    CoreCommandResult, Services, SyncBridge,
};

use super::error::CommandFailed;
use crate::{process_controller::CommandProcessController, server::SESSION_HEADER};

const CONNECT_TIMEOUT: Duration = Duration::from_millis(300);
const HEALTH_TIMEOUT: Duration = Duration::from_secs(1);

/// Body of a request the server rejected before running anything.
#[derive(Debug, Deserialize)]
struct Rejection {
    error: CommandError,
}

/// Client for a running dashboard server.
pub struct RemoteBridge {
    client: Client,
    base: String,
}

impl RemoteBridge {
    /// Returns a client if a warren server answers its health check at
    /// `addr`. Wildcard listen addresses are reached over loopback.
    pub async fn discover(addr: SocketAddr) -> Option<Self> {
        let ip = match addr.ip() {
            IpAddr::V4(ip) if ip.is_unspecified() => IpAddr::V4(Ipv4Addr::LOCALHOST),
            IpAddr::V6(ip) if ip.is_unspecified() => IpAddr::V6(Ipv6Addr::LOCALHOST),
            ip => ip,
        };
        let base = format!("http://{}", SocketAddr::new(ip, addr.port()));

        let client = match Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .no_proxy()
            .build()
        {
            Ok(client) => client,
            Err(e) => {
                tracing::warn!(error = %e, "http client unavailable, running locally");
                return None;
            }
        };
        let health = client
            .get(format!("{base}/api/health"))
            .timeout(HEALTH_TIMEOUT)
            .send()
            .await;
        let body: Value = match health {
            Ok(response) if response.status().is_success() => response.json().await.ok()?,
            Ok(response) => {
                tracing::debug!(%base, status = %response.status(), "not a warren server");
                return None;
            }
            Err(e) => {
                tracing::debug!(%base, error = %e, "no dashboard server");
                return None;
            }
        };
        if body["status"] != "ok" {
            return None;
        }
        tracing::debug!(%base, version = %body["version"], "forwarding to dashboard server");
        Some(Self { client, base })
    }

    pub async fn execute_command(
        &self,
        name: &str,
        params: Value,
        session: &SessionId,
    ) -> anyhow::Result<CoreCommandResult> {
        let response = self
            .client
            .post(format!("{}/api/commands/{name}", self.base))
            .header(SESSION_HEADER, session.as_str())
            .json(&params)
            .send()
            .await
            .context("dashboard server did not answer")?;
        let status = response.status();
        let body = response.bytes().await?;
        // Failed commands come back with an error status and a full result.
        match serde_json::from_slice::<CoreCommandResult>(&body) {
            Ok(result) => Ok(result),
            Err(_) => Err(rejection(status, &body)),
        }
    }

    async fn get<T, Q>(&self, path: &str, query: &Q) -> anyhow::Result<T>
    where
        T: DeserializeOwned,
        Q: Serialize + ?Sized,
    {
        let response = self
            .client
            .get(format!("{}{path}", self.base))
            .query(query)
            .send()
            .await
            .context("dashboard server did not answer")?;
        decode(response).await
    }

    pub async fn activity(&self, filter: &ActivityFilter) -> anyhow::Result<Vec<ActivityLogEntry>> {
        self.get("/api/activity", filter).await
    }

    pub async fn activity_stats(&self, filter: &ActivityFilter) -> anyhow::Result<ActivityStats> {
        self.get("/api/activity/stats", filter).await
    }

    pub async fn conflicts(&self, filter: &ConflictFilter) -> anyhow::Result<Vec<ConflictInfo>> {
        self.get("/api/conflicts", filter).await
    }

    pub async fn resolve_conflict(&self, id: &str, note: Option<&str>) -> anyhow::Result<ConflictInfo> {
        let response = self
            .client
            .post(format!("{}/api/conflicts/{id}/resolve", self.base))
            .json(&json!({ "resolution": note }))
            .send()
            .await
            .context("dashboard server did not answer")?;
        decode(response).await
    }
}

async fn decode<T: DeserializeOwned>(response: Response) -> anyhow::Result<T> {
    let status = response.status();
    let body = response.bytes().await?;
    if status.is_success() {
        Ok(serde_json::from_slice(&body)?)
    } else {
        Err(rejection(status, &body))
    }
}

fn rejection(status: StatusCode, body: &[u8]) -> anyhow::Error {
    match serde_json::from_slice::<Rejection>(body) {
        Ok(rejected) => CommandFailed(rejected.error).into(),
        Err(_) => anyhow::anyhow!(
            "dashboard server answered {status}: {}",
            String::from_utf8_lossy(body)
        ),
    }
}

/// The bridge this invocation talks to.
pub enum Backend {
    Local(Arc<SyncBridge>),
    Remote(RemoteBridge),
}

impl Backend {
    /// Forward to the server at `config.server.bind` if one is running,
    /// otherwise open the state database in this process.
    ///
    /// A local bridge interrupts its agent creations when `interrupt` fires,
    /// so they roll back before the process exits.
    pub async fn connect(config: Config, interrupt: &CancellationToken) -> anyhow::Result<Self> {
        if let Some(remote) = RemoteBridge::discover(config.bind_addr()?).await {
            return Ok(Self::Remote(remote));
        }

        let cwd: PathBuf = std::env::current_dir().context("Failed to get current directory")?;
        let services = Services::open(config, Arc::new(CommandProcessController::new()), cwd).await?;
        let lifecycle = Arc::clone(&services.lifecycle);
        let interrupt = interrupt.clone();
        tokio::spawn(async move {
            interrupt.cancelled().await;
            lifecycle.interrupt_creations();
        });
        Ok(Self::Local(services.bridge))
    }

    /// Run one command. A forwarded command keeps running on the server if
    /// this process is interrupted; the server rolls it back or finishes it.
    pub async fn execute_command(
        &self,
        name: &str,
        params: Value,
        session: &SessionId,
        interrupt: &CancellationToken,
    ) -> anyhow::Result<CoreCommandResult> {
        match self {
            Self::Local(bridge) => Ok(bridge.execute_command(name, params, session.as_str()).await?),
            Self::Remote(remote) => tokio::select! {
                result = remote.execute_command(name, params, session) => result,
                () = interrupt.cancelled() => {
                    anyhow::bail!("interrupted; {name} continues on the dashboard server")
                }
            },
        }
    }

    pub async fn activity(&self, filter: ActivityFilter) -> anyhow::Result<Vec<ActivityLogEntry>> {
        match self {
            Self::Local(bridge) => Ok(bridge.get_activity_logs(filter).collect().await?),
            Self::Remote(remote) => remote.activity(&filter).await,
        }
    }

    pub async fn activity_stats(&self, filter: ActivityFilter) -> anyhow::Result<ActivityStats> {
        match self {
            Self::Local(bridge) => Ok(bridge.activity_stats(filter).await?),
            Self::Remote(remote) => remote.activity_stats(&filter).await,
        }
    }

    pub async fn conflicts(&self, filter: ConflictFilter) -> anyhow::Result<Vec<ConflictInfo>> {
        match self {
            Self::Local(bridge) => Ok(bridge.get_sync_conflicts(filter).collect().await?),
            Self::Remote(remote) => remote.conflicts(&filter).await,
        }
    }

    pub async fn resolve_conflict(&self, id: &str, note: Option<&str>) -> anyhow::Result<ConflictInfo> {
        match self {
            Self::Local(bridge) => Ok(bridge.resolve_conflict(id, note).await?),
            Self::Remote(remote) => remote.resolve_conflict(id, note).await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rejection_maps_to_command_failure() {
        let body = br#"{"error":{"kind":"NotFoundError","code":"CONFLICT_NOT_FOUND","message":"conflict not found: c-1"}}"#;
        let err = rejection(StatusCode::NOT_FOUND, body);
        let failed = err.downcast_ref::<CommandFailed>().map(|f| f.0.code.as_str());
        assert_eq!(failed, Some("CONFLICT_NOT_FOUND"));
        assert_eq!(crate::cli::get_exit_code(&err), 3);
    }

    #[test]
    fn test_unexpected_body_keeps_status() {
        let err = rejection(StatusCode::BAD_GATEWAY, b"upstream down");
        assert!(err.to_string().contains("502"));
        assert!(err.to_string().contains("upstream down"));
    }

    #[tokio::test]
    async fn test_closed_port_means_no_server() -> anyhow::Result<()> {
        let listener = std::net::TcpListener::bind("127.0.0.1:0")?;
        let addr = listener.local_addr()?;
        drop(listener);
        assert!(RemoteBridge::discover(addr).await.is_none());
        Ok(())
    }
}
