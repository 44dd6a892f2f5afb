//! Graceful shutdown for the dashboard server.
//!
//! On SIGINT/SIGTERM the coordinator tells every subscriber to wind down,
//! waits for registered background tasks, and aborts whatever is still
//! running once the timeout expires.

use std::time::Duration;

use tokio::{
    sync::{broadcast, Mutex},
    task::JoinHandle,
};

/// Shutdown signal that can be sent to all active operations
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownSignal {
    /// Graceful shutdown requested (SIGINT/SIGTERM)
    Graceful,
    /// Force shutdown requested (timeout exceeded)
    Force,
}

pub struct ShutdownCoordinator {
    shutdown_tx: broadcast::Sender<ShutdownSignal>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    shutdown_timeout: Duration,
}

impl ShutdownCoordinator {
    pub fn new(shutdown_timeout: Duration) -> Self {
        let (shutdown_tx, _) = broadcast::channel(16);
        Self {
            shutdown_tx,
            tasks: Mutex::new(Vec::new()),
            shutdown_timeout,
        }
    }

    /// Components call this and stop their loops when a signal arrives.
    pub fn subscribe(&self) -> broadcast::Receiver<ShutdownSignal> {
        self.shutdown_tx.subscribe()
    }

    /// Register a background task to await (or abort) on shutdown.
    pub async fn register_task(&self, task: JoinHandle<()>) {
        self.tasks.lock().await.push(task);
    }

    pub async fn shutdown(&self) {
        tracing::info!("initiating graceful shutdown");
        let _ = self.shutdown_tx.send(ShutdownSignal::Graceful);

        let tasks: Vec<JoinHandle<()>> = self.tasks.lock().await.drain(..).collect();
        let aborts: Vec<_> = tasks.iter().map(JoinHandle::abort_handle).collect();
        let drained = tokio::time::timeout(
            self.shutdown_timeout,
            futures::future::join_all(tasks),
        )
        .await;

        if drained.is_ok() {
            tracing::info!("graceful shutdown completed");
        } else {
            tracing::warn!(timeout = ?self.shutdown_timeout, "shutdown timeout exceeded, forcing");
            let _ = self.shutdown_tx.send(ShutdownSignal::Force);
            for handle in aborts {
                handle.abort();
            }
        }
    }
}

impl Default for ShutdownCoordinator {
    fn default() -> Self {
        Self::new(Duration::from_secs(10))
    }
}

/// Resolves on the first SIGINT or SIGTERM.
pub async fn termination_signal() -> anyhow::Result<()> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        let mut sigint = signal(SignalKind::interrupt())?;
        let mut sigterm = signal(SignalKind::terminate())?;
        tokio::select! {
            _ = sigint.recv() => tracing::info!("received SIGINT"),
            _ = sigterm.recv() => tracing::info!("received SIGTERM"),
        }
        Ok(())
    }

    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c().await?;
        tracing::info!("received Ctrl+C");
        Ok(())
    }
}
