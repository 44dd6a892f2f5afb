//! Manager wired to the in-memory store and the fake process controller.

use std::{path::PathBuf, sync::Arc};

use super::{CommandResult, LifecycleSettings, ResourceLifecycleManager};
use crate::{
    config::Config,
    domain::{Project, ProjectId},
    ports::PortAllocator,
    store::MemoryStore,
    testing::{FakeProcessController, FixedProbe},
    Error, Result,
};

pub struct Fixture {
    pub manager: Arc<ResourceLifecycleManager>,
    pub fake: Arc<FakeProcessController>,
    pub store: Arc<MemoryStore>,
    pub dir: tempfile::TempDir,
}

impl Fixture {
    pub fn new() -> Result<Self> {
        Self::with_config(|_| {})
    }

    pub fn with_config(adjust: impl FnOnce(&mut Config)) -> Result<Self> {
        let dir = tempfile::tempdir()?;
        let mut config = Config::default();
        config.agents.standalone_root = Some(dir.path().join("standalone"));
        adjust(&mut config);

        let store = Arc::new(MemoryStore::new());
        let fake = Arc::new(FakeProcessController::new());
        let ports = Arc::new(PortAllocator::new(
            store.clone(),
            Arc::new(FixedProbe::default()),
            &config.ports,
        )?);
        let settings = LifecycleSettings::from_config(&config, dir.path().to_path_buf())?;
        let manager = Arc::new(ResourceLifecycleManager::new(
            store.clone(),
            ports,
            fake.clone(),
            settings,
        ));
        Ok(Self {
            manager,
            fake,
            store,
            dir,
        })
    }

    pub fn repo_dir(&self, name: &str) -> Result<PathBuf> {
        let path = self.dir.path().join("repos").join(name);
        std::fs::create_dir_all(&path)?;
        Ok(path)
    }

    pub async fn project(&self, name: &str) -> Result<Project> {
        let path = self.repo_dir(name)?;
        data(self.manager.create_project(&path, Some(name), None).await?)
    }

    pub async fn reload_project(&self, id: &ProjectId) -> Result<Project> {
        data(self.manager.get_project(id).await?)
    }
}

pub fn data<T>(result: CommandResult<T>) -> Result<T> {
    result
        .data
        .ok_or_else(|| Error::validation(format!("no data in result: {}", result.message)))
}
