//! Dashboard server: HTTP command API, activity and conflict queries, a
//! WebSocket event feed and an SSE metrics stream.

mod routes;
mod ws;


use std::{net::SocketAddr, sync::Arc, time::Duration};

use axum::{
    routing::{get, post},
    Router,
};
use futures::StreamExt;
use tokio::sync::watch;
use tokio_util::task::TaskTracker;
use tower_http::trace::TraceLayer;
use warren_core::{metrics::SystemMetrics, SyncBridge};

pub use routes::SESSION_HEADER;

use crate::shutdown::{self, ShutdownCoordinator, ShutdownSignal};

#[derive(Clone)]
pub struct AppState {
    pub bridge: Arc<SyncBridge>,
    pub metrics: watch::Receiver<Option<SystemMetrics>>,
    pub shutdown: Arc<ShutdownCoordinator>,
    /// Commands run here, detached from the connection that asked for them,
    /// so a client going away never drops one halfway.
    pub commands: TaskTracker,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/api/health", get(routes::health))
        .route("/api/commands/:name", post(routes::execute_command))
        .route("/api/activity", get(routes::activity))
        .route("/api/activity/stats", get(routes::activity_stats))
        .route("/api/conflicts", get(routes::conflicts))
        .route("/api/conflicts/:id/resolve", post(routes::resolve_conflict))
        .route("/api/metrics/current", get(routes::current_metrics))
        .route("/api/metrics", get(routes::metrics_sse))
        .route("/ws", get(ws::upgrade))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// How long a stopping server waits for commands it already accepted.
const COMMAND_DRAIN: Duration = Duration::from_secs(30);

/// Publish a fresh sample on `tx` every `interval` until shutdown.
async fn sample_metrics(
    interval: Duration,
    tx: watch::Sender<Option<SystemMetrics>>,
    mut shutdown: tokio::sync::broadcast::Receiver<ShutdownSignal>,
) {
    let mut samples = warren_core::metrics::metrics_stream(interval);
    loop {
        tokio::select! {
            sample = samples.next() => match sample {
                Some(sample) => {
                    tx.send_replace(Some(sample));
                }
                None => break,
            },
            _ = shutdown.recv() => break,
        }
    }
    tracing::debug!("metrics sampler stopped");
}

/// Serve the dashboard on `addr` until SIGINT/SIGTERM.
pub async fn serve(bridge: Arc<SyncBridge>, addr: SocketAddr, metrics_interval: Duration) -> anyhow::Result<()> {
    let coordinator = Arc::new(ShutdownCoordinator::default());
    let (metrics_tx, metrics_rx) = watch::channel(None);
    let sampler = tokio::spawn(sample_metrics(
        metrics_interval,
        metrics_tx,
        coordinator.subscribe(),
    ));
    coordinator.register_task(sampler).await;

    let commands = TaskTracker::new();
    let app = router(AppState {
        bridge: Arc::clone(&bridge),
        metrics: metrics_rx,
        shutdown: Arc::clone(&coordinator),
        commands: commands.clone(),
    });

    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!(addr = %listener.local_addr()?, "dashboard listening");

    let on_signal = {
        let coordinator = Arc::clone(&coordinator);
        async move {
            if let Err(e) = shutdown::termination_signal().await {
                tracing::error!(error = %e, "signal handler failed, shutting down");
            }
            bridge.lifecycle().interrupt_creations();
            coordinator.shutdown().await;
        }
    };
    axum::serve(listener, app)
        .with_graceful_shutdown(on_signal)
        .await?;

    commands.close();
    if tokio::time::timeout(COMMAND_DRAIN, commands.wait()).await.is_err() {
        tracing::warn!(running = commands.len(), "commands still running at exit");
    }
    tracing::info!("dashboard stopped");
    Ok(())
}
