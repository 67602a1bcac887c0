//! One-time import of workflows from the legacy flat key-value database.
//!
//! The legacy file holds a single `kv` table. Workflow records live under the
//! `workflows:` key prefix as JSON with the pre-vault shape: atoms at the top
//! level and `config.variables` mapping a name to a list of transform names.
//!
//! Import is best effort. Nothing here returns an error; problems are logged
//! and counted in the [`ImportReport`].

use std::collections::BTreeMap;
use std::path::Path;

use redb::{Database, TableDefinition};
use serde::Deserialize;
use tracing::{info, warn};

use crate::error::{Result, StoreError};
use crate::workflow::{Atom, Transform, VariableRule, Workflow, WorkflowConfig, WorkflowMetadata};

use super::WorkflowStore;

pub(crate) const LEGACY_KV: TableDefinition<&str, &[u8]> = TableDefinition::new("kv");
pub const WORKFLOW_PREFIX: &str = "workflows:";

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ImportReport {
    /// Workflow records found under the legacy prefix.
    pub found: usize,
    pub imported: usize,
    /// Records that could not be decoded or stored.
    pub skipped: usize,
}

#[derive(Debug, Deserialize)]
struct LegacyWorkflow {
    #[serde(default)]
    name: String,
    #[serde(default)]
    pre_checks: Vec<Atom>,
    #[serde(default)]
    steps: Vec<Atom>,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    actions: BTreeMap<String, Atom>,
    #[serde(default)]
    config: LegacyConfig,
    #[serde(default)]
    uses_sudo: bool,
}

#[derive(Debug, Default, Deserialize)]
struct LegacyConfig {
    #[serde(default)]
    variables: BTreeMap<String, serde_json::Value>,
    #[serde(default)]
    store_variables: bool,
}

/// Copy legacy workflows into `store` when it has none yet.
///
/// Does nothing if the store already holds workflows or `legacy_path` does
/// not exist.
pub async fn import_if_empty(store: &WorkflowStore, legacy_path: &Path) -> ImportReport {
    let mut report = ImportReport::default();
    if !legacy_path.exists() {
        return report;
    }
    match store.is_empty().await {
        Ok(true) => {}
        Ok(false) => return report,
        Err(e) => {
            warn!(error = %e, "legacy import skipped: cannot inspect workflow store");
            return report;
        }
    }

    let path = legacy_path.to_path_buf();
    let records = match tokio::task::spawn_blocking(move || read_legacy(&path)).await {
        Ok(Ok(records)) => records,
        Ok(Err(e)) => {
            warn!(path = %legacy_path.display(), error = %e, "legacy import skipped");
            return report;
        }
        Err(e) => {
            warn!(error = %e, "legacy import task failed");
            return report;
        }
    };

    report.found = records.len();
    for (id, bytes) in records {
        let workflow = match convert(&id, &bytes) {
            Ok(wf) => wf,
            Err(e) => {
                warn!(id = %id, error = %e, "skipping undecodable legacy workflow");
                report.skipped += 1;
                continue;
            }
        };
        match store.create(&workflow).await {
            Ok(()) => report.imported += 1,
            Err(e) => {
                warn!(id = %id, error = %e, "failed to import legacy workflow");
                report.skipped += 1;
            }
        }
    }
    if report.found > 0 {
        info!(
            imported = report.imported,
            skipped = report.skipped,
            "imported legacy workflows"
        );
    }
    report
}

/// Raw `(id, json)` pairs for every key under the workflow prefix.
fn read_legacy(path: &Path) -> Result<Vec<(String, Vec<u8>)>> {
    let db = Database::open(path).map_err(StoreError::backend)?;
    let rt = db.begin_read().map_err(StoreError::backend)?;
    let table = rt.open_table(LEGACY_KV).map_err(StoreError::backend)?;
    let mut out = Vec::new();
    for entry in table.range(WORKFLOW_PREFIX..).map_err(StoreError::backend)? {
        let (k, v) = entry.map_err(StoreError::backend)?;
        let Some(id) = k.value().strip_prefix(WORKFLOW_PREFIX) else {
            break;
        };
        out.push((id.to_string(), v.value().to_vec()));
    }
    Ok(out)
}

fn convert(id: &str, bytes: &[u8]) -> Result<Workflow> {
    let legacy: LegacyWorkflow = serde_json::from_slice(bytes)?;
    let name = if legacy.name.trim().is_empty() {
        id.to_string()
    } else {
        legacy.name
    };

    let mut variables = BTreeMap::new();
    for (var, value) in legacy.config.variables {
        let rules = legacy_rules(id, &var, value);
        if !rules.is_empty() {
            variables.insert(var, rules);
        }
    }

    let mut wf = Workflow::new(id, name);
    wf.metadata = WorkflowMetadata {
        description: legacy.description,
        pre_checks: legacy.pre_checks,
        steps: legacy.steps,
        actions: legacy.actions,
        config: WorkflowConfig {
            variables,
            store_variables: legacy.config.store_variables,
        },
        uses_sudo: legacy.uses_sudo,
    };
    Ok(wf)
}

/// Legacy variable entries are a transform name or a list of them.
fn legacy_rules(id: &str, var: &str, value: serde_json::Value) -> Vec<VariableRule> {
    let names: Vec<serde_json::Value> = match value {
        serde_json::Value::Array(items) => items,
        serde_json::Value::Null => Vec::new(),
        other => vec![other],
    };
    names
        .into_iter()
        .filter_map(|item| {
            let transform = item
                .as_str()
                .and_then(|s| serde_json::from_value::<Transform>(s.into()).ok());
            if transform.is_none() {
                warn!(workflow = %id, variable = %var, rule = %item, "ignoring unknown legacy variable rule");
            }
            transform.map(|transform| VariableRule::Transform { transform })
        })
        .collect()
}
