//! Service wiring.
//!
//! Everything the core needs is constructed once here and handed out as
//! `Arc`s. Nothing in the crate reaches for a global.

use std::{path::PathBuf, sync::Arc};

use crate::{
    config::Config,
    lifecycle::{LifecycleSettings, ResourceLifecycleManager},
    ports::{PortAllocator, PortProbe, TcpBindProbe},
    process::{ProcessController, TimedProcessController},
    store::{PersistenceStore, SqliteStore},
    sync::SyncBridge,
    Result,
};

pub struct Services {
    pub config: Config,
    pub store: Arc<dyn PersistenceStore>,
    pub ports: Arc<PortAllocator>,
    pub lifecycle: Arc<ResourceLifecycleManager>,
    pub bridge: Arc<SyncBridge>,
}

impl Services {
    /// Wire the components on top of the given store, process controller
    /// and port probe. Every process call is bounded by `process.timeout_secs`.
    ///
    /// `standalone_repo` is the repository standalone agents check out from.
    pub fn build(
        config: Config,
        store: Arc<dyn PersistenceStore>,
        process: Arc<dyn ProcessController>,
        probe: Arc<dyn PortProbe>,
        standalone_repo: PathBuf,
    ) -> Result<Self> {
        let process: Arc<dyn ProcessController> =
            Arc::new(TimedProcessController::new(process, config.process_timeout()));
        let ports = Arc::new(PortAllocator::new(Arc::clone(&store), probe, &config.ports)?);
        let settings = LifecycleSettings::from_config(&config, standalone_repo)?;
        let lifecycle = Arc::new(ResourceLifecycleManager::new(
            Arc::clone(&store),
            Arc::clone(&ports),
            process,
            settings,
        ));
        let bridge = Arc::new(SyncBridge::new(
            Arc::clone(&lifecycle),
            Arc::clone(&store),
            &config.sync,
        ));

        tracing::debug!(
            ports = %ports.bounds(),
            max_agents = config.agents.max_agents,
            conflict_window_secs = config.sync.conflict_window_secs,
            "services ready"
        );
        Ok(Self {
            config,
            store,
            ports,
            lifecycle,
            bridge,
        })
    }

    /// Production wiring: the SQLite state database and the OS bind probe.
    pub async fn open(
        config: Config,
        process: Arc<dyn ProcessController>,
        standalone_repo: PathBuf,
    ) -> Result<Self> {
        let path = config.state_db_path()?;
        let store = SqliteStore::open(&path).await?;
        tracing::debug!(db = %path.display(), "state database opened");
        Self::build(
            config,
            Arc::new(store),
            process,
            Arc::new(TcpBindProbe),
            standalone_repo,
        )
    }
}
