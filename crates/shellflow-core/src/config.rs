use crate::error::Result;
use crate::paths;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

// ---------------------------------------------------------------------------
// EngineConfig
// ---------------------------------------------------------------------------

/// Engine settings loaded from `<home>/config.yaml`.
///
/// Every field has a default, so a missing or partial file is valid.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Directory holding the database. Relative paths are resolved against home.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data_dir: Option<PathBuf>,
    #[serde(default = "default_db_file")]
    pub db_file: String,
    #[serde(default = "default_store_timeout_ms")]
    pub store_timeout_ms: u64,
    #[serde(default = "default_idle_close_secs")]
    pub idle_close_secs: u64,
    /// Flat key-value database imported once into an empty store.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub legacy_db: Option<PathBuf>,
    #[serde(default = "default_history_limit")]
    pub history_limit: usize,
}

fn default_db_file() -> String {
    paths::DB_FILE.to_string()
}

fn default_store_timeout_ms() -> u64 {
    5_000
}

fn default_idle_close_secs() -> u64 {
    300
}

fn default_history_limit() -> usize {
    20
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            data_dir: None,
            db_file: default_db_file(),
            store_timeout_ms: default_store_timeout_ms(),
            idle_close_secs: default_idle_close_secs(),
            legacy_db: None,
            history_limit: default_history_limit(),
        }
    }
}

impl EngineConfig {
    /// Load from `home`, falling back to defaults when no config file exists.
    pub fn load(home: &Path) -> Result<Self> {
        let path = paths::config_path(home);
        if !path.exists() {
            return Ok(Self::default());
        }
        let data = std::fs::read_to_string(&path)?;
        let cfg: EngineConfig = serde_yaml::from_str(&data)?;
        Ok(cfg)
    }

    pub fn db_path(&self, home: &Path) -> PathBuf {
        let dir = match &self.data_dir {
            Some(d) if d.is_absolute() => d.clone(),
            Some(d) => home.join(d),
            None => home.to_path_buf(),
        };
        dir.join(&self.db_file)
    }

    pub fn legacy_db_path(&self, home: &Path) -> PathBuf {
        match &self.legacy_db {
            Some(p) if p.is_absolute() => p.clone(),
            Some(p) => home.join(p),
            None => home.join(paths::LEGACY_DB_FILE),
        }
    }

    pub fn store_timeout(&self) -> Duration {
        Duration::from_millis(self.store_timeout_ms)
    }

    pub fn idle_close(&self) -> Duration {
        Duration::from_secs(self.idle_close_secs)
    }
}
