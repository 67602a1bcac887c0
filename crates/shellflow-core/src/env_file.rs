//! `KEY=VALUE` environment files.

use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use crate::paths;
use crate::template::Variables;

/// Parse env-file content.
///
/// Blank lines and `#` comments are skipped, as are lines without `=`.
/// Keys and values are trimmed and surrounding quotes are stripped from values.
/// A later definition of the same key wins.
pub fn parse(content: &str) -> Variables {
    let mut vars = Variables::new();
    for line in content.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let Some((key, value)) = line.split_once('=') else {
            continue;
        };
        let key = key.trim();
        if key.is_empty() {
            continue;
        }
        let value = value.trim().trim_matches(|c| c == '"' || c == '\'');
        vars.insert(key.to_string(), value.to_string());
    }
    vars
}

/// The first candidate env file for `workflow_id` that exists under `base`.
pub fn locate(base: &Path, workflow_id: &str) -> Option<PathBuf> {
    paths::env_file_candidates(base, workflow_id)
        .into_iter()
        .find(|p| p.is_file())
}

/// Load variables from the first env file found. Later candidates are never
/// merged in. An unreadable file yields no variables.
pub fn load(base: &Path, workflow_id: &str) -> Variables {
    let Some(path) = locate(base, workflow_id) else {
        return Variables::new();
    };
    match std::fs::read_to_string(&path) {
        Ok(content) => {
            let vars = parse(&content);
            debug!(path = %path.display(), count = vars.len(), "loaded env file");
            vars
        }
        Err(e) => {
            warn!(path = %path.display(), error = %e, "cannot read env file");
            Variables::new()
        }
    }
}
