use crate::error::{Error, Result};
use std::path::{Path, PathBuf};

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

pub const HOME_ENV: &str = "SHELLFLOW_HOME";
pub const HOME_DIR: &str = ".shellflow";
pub const CONFIG_FILE: &str = "config.yaml";
pub const DB_FILE: &str = "shellflow.redb";
pub const LEGACY_DB_FILE: &str = "legacy.redb";

pub const ENV_DIR: &str = "env";
pub const ENV_SUFFIX: &str = ".env";

// ---------------------------------------------------------------------------
// Path helpers
// ---------------------------------------------------------------------------

/// Base directory for config and data.
///
/// Priority: explicit argument, `SHELLFLOW_HOME`, then `~/.shellflow`.
pub fn shellflow_home(explicit: Option<&Path>) -> Result<PathBuf> {
    if let Some(p) = explicit {
        return Ok(p.to_path_buf());
    }
    if let Some(p) = std::env::var_os(HOME_ENV).filter(|v| !v.is_empty()) {
        return Ok(PathBuf::from(p));
    }
    home::home_dir()
        .map(|h| h.join(HOME_DIR))
        .ok_or(Error::HomeNotFound)
}

pub fn config_path(home: &Path) -> PathBuf {
    home.join(CONFIG_FILE)
}

/// Environment files consulted when a workflow does not use the vault,
/// in lookup order. Only the first one that exists is read.
pub fn env_file_candidates(base: &Path, workflow_id: &str) -> [PathBuf; 4] {
    [
        base.join(ENV_DIR).join(format!("{workflow_id}{ENV_SUFFIX}")),
        base.join(ENV_SUFFIX),
        base.join(ENV_DIR).join(ENV_SUFFIX),
        base.join(format!("{workflow_id}{ENV_SUFFIX}")),
    ]
}
