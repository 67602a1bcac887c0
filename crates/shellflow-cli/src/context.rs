use anyhow::Context as _;
use shellflow_core::{
    config::EngineConfig,
    paths,
    store::{legacy, StoreGateway},
};
use std::path::{Path, PathBuf};
use tokio::task::JoinHandle;

/// Everything a command needs: the data directory, its config, and the one
/// store handle for this process.
pub struct Context {
    pub home: PathBuf,
    pub config: EngineConfig,
    pub gateway: StoreGateway,
    reaper: JoinHandle<()>,
}

impl Context {
    /// Resolve the home directory, load config, and import legacy workflows
    /// into an empty store.
    pub async fn open(explicit_home: Option<&Path>) -> anyhow::Result<Self> {
        let home = paths::shellflow_home(explicit_home)?;
        let config = EngineConfig::load(&home)
            .with_context(|| format!("failed to load {}", paths::config_path(&home).display()))?;
        let gateway = StoreGateway::from_config(&config, &home);

        let legacy_path = config.legacy_db_path(&home);
        legacy::import_if_empty(&gateway.workflows(), &legacy_path).await;

        let reaper = gateway.spawn_idle_reaper();
        Ok(Self {
            home,
            config,
            gateway,
            reaper,
        })
    }

    pub async fn close(self) {
        self.reaper.abort();
        if let Err(e) = self.gateway.shutdown().await {
            tracing::warn!(error = %e, "failed to close store");
        }
    }
}
