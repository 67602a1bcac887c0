//! Scoped variable storage.
//!
//! Entries are unique on `(key, scope, workflow_id)` and the composite redb
//! key encodes exactly that triple, so setting an existing triple updates the
//! entry in place. `workflow_id` is present iff `scope == Workflow`.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use redb::{ReadableTable, Table};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{Error, Result, StoreError};
use crate::types::Scope;
use crate::workflow::validate_id;

use super::{StoreGateway, VAULT};

const KIND: &str = "variable";
const SEP: char = '\u{1f}';

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VaultEntry {
    pub id: Uuid,
    pub key: String,
    pub value: String,
    pub scope: Scope,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workflow_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Rejects triples the composite key could not tell apart.
fn check_entry(key: &str, scope: Scope, workflow_id: Option<&str>) -> Result<()> {
    if key.is_empty() || key.contains(SEP) {
        return Err(Error::Validation(format!("invalid variable key {key:?}")));
    }
    match (scope, workflow_id) {
        (Scope::Workflow, Some(id)) if !id.is_empty() => validate_id(id),
        (Scope::Workflow, _) => Err(Error::Validation(
            "workflow-scoped variables need a workflow id".into(),
        )),
        (_, None) => Ok(()),
        (other, Some(_)) => Err(Error::Validation(format!(
            "{other}-scoped variables cannot name a workflow"
        ))),
    }
}

fn entry_key(scope: Scope, workflow_id: Option<&str>, key: &str) -> String {
    format!("{scope}{SEP}{}{SEP}{key}", workflow_id.unwrap_or(""))
}

fn describe(scope: Scope, workflow_id: Option<&str>, key: &str) -> String {
    match workflow_id {
        Some(id) => format!("{key} ({scope}:{id})"),
        None => format!("{key} ({scope})"),
    }
}

fn read_entry(
    table: &impl ReadableTable<&'static str, &'static [u8]>,
    scope: Scope,
    workflow_id: Option<&str>,
    key: &str,
) -> Result<Option<VaultEntry>> {
    let k = entry_key(scope, workflow_id, key);
    match table.get(k.as_str()).map_err(StoreError::backend)? {
        Some(guard) => Ok(Some(serde_json::from_slice(guard.value())?)),
        None => Ok(None),
    }
}

fn all_entries(table: &impl ReadableTable<&'static str, &'static [u8]>) -> Result<Vec<VaultEntry>> {
    let mut result = Vec::new();
    for entry in table.iter().map_err(StoreError::backend)? {
        let (_, v) = entry.map_err(StoreError::backend)?;
        result.push(serde_json::from_slice(v.value())?);
    }
    Ok(result)
}

fn write_entry(table: &mut Table<'_, &'static str, &'static [u8]>, entry: &VaultEntry) -> Result<()> {
    let k = entry_key(entry.scope, entry.workflow_id.as_deref(), &entry.key);
    let value = serde_json::to_vec(entry)?;
    table
        .insert(k.as_str(), value.as_slice())
        .map_err(StoreError::backend)?;
    Ok(())
}

/// Scoped key/value variables.
#[derive(Clone)]
pub struct VaultStore {
    gateway: StoreGateway,
}

impl VaultStore {
    pub(crate) fn new(gateway: StoreGateway) -> Self {
        Self { gateway }
    }

    /// Create the entry, or update its value in place if it already exists.
    pub async fn set(
        &self,
        key: &str,
        value: &str,
        scope: Scope,
        workflow_id: Option<&str>,
    ) -> Result<VaultEntry> {
        check_entry(key, scope, workflow_id)?;
        if key.trim().is_empty() {
            return Err(Error::Validation("variable key cannot be empty".into()));
        }
        let (key, value) = (key.to_string(), value.to_string());
        let workflow_id = workflow_id.map(str::to_string);
        self.gateway
            .with_db(move |db| {
                let wt = db.begin_write().map_err(StoreError::backend)?;
                let entry = {
                    let mut table = wt.open_table(VAULT).map_err(StoreError::backend)?;
                    let now = Utc::now();
                    let entry = match read_entry(&table, scope, workflow_id.as_deref(), &key)? {
                        Some(mut existing) => {
                            existing.value = value;
                            existing.updated_at = now;
                            existing
                        }
                        None => VaultEntry {
                            id: Uuid::new_v4(),
                            key,
                            value,
                            scope,
                            workflow_id,
                            created_at: now,
                            updated_at: now,
                        },
                    };
                    write_entry(&mut table, &entry)?;
                    entry
                };
                wt.commit().map_err(StoreError::backend)?;
                Ok(entry)
            })
            .await
    }

    /// Exact lookup in one scope.
    pub async fn get(&self, key: &str, scope: Scope, workflow_id: Option<&str>) -> Result<VaultEntry> {
        check_entry(key, scope, workflow_id)?;
        let key = key.to_string();
        let workflow_id = workflow_id.map(str::to_string);
        self.gateway
            .with_db(move |db| {
                let rt = db.begin_read().map_err(StoreError::backend)?;
                let table = rt.open_table(VAULT).map_err(StoreError::backend)?;
                read_entry(&table, scope, workflow_id.as_deref(), &key)?.ok_or_else(|| {
                    StoreError::NotFound {
                        kind: KIND,
                        key: describe(scope, workflow_id.as_deref(), &key),
                    }
                    .into()
                })
            })
            .await
    }

    /// First match in workflow, then project, then global scope.
    ///
    /// With no workflow id, the workflow scope is skipped.
    pub async fn get_with_fallback(&self, key: &str, workflow_id: Option<&str>) -> Result<VaultEntry> {
        let key = key.to_string();
        let workflow_id = workflow_id.map(str::to_string);
        self.gateway
            .with_db(move |db| {
                let rt = db.begin_read().map_err(StoreError::backend)?;
                let table = rt.open_table(VAULT).map_err(StoreError::backend)?;
                for &scope in Scope::fallback_order() {
                    let wf = match scope {
                        Scope::Workflow => match workflow_id.as_deref() {
                            Some(id) => Some(id),
                            None => continue,
                        },
                        _ => None,
                    };
                    if let Some(entry) = read_entry(&table, scope, wf, &key)? {
                        return Ok(entry);
                    }
                }
                Err(StoreError::NotFound { kind: KIND, key }.into())
            })
            .await
    }

    /// Entries filtered by scope and/or workflow, sorted by scope, workflow, key.
    pub async fn list(&self, scope: Option<Scope>, workflow_id: Option<&str>) -> Result<Vec<VaultEntry>> {
        let workflow_id = workflow_id.map(str::to_string);
        self.gateway
            .with_db(move |db| {
                let rt = db.begin_read().map_err(StoreError::backend)?;
                let table = rt.open_table(VAULT).map_err(StoreError::backend)?;
                let mut entries: Vec<VaultEntry> = all_entries(&table)?
                    .into_iter()
                    .filter(|e| scope.map_or(true, |s| e.scope == s))
                    .filter(|e| {
                        workflow_id
                            .as_deref()
                            .map_or(true, |id| e.workflow_id.as_deref() == Some(id))
                    })
                    .collect();
                entries.sort_by(|a, b| {
                    (a.scope, &a.workflow_id, &a.key).cmp(&(b.scope, &b.workflow_id, &b.key))
                });
                Ok(entries)
            })
            .await
    }

    pub async fn delete(&self, key: &str, scope: Scope, workflow_id: Option<&str>) -> Result<()> {
        check_entry(key, scope, workflow_id)?;
        let k = entry_key(scope, workflow_id, key);
        let label = describe(scope, workflow_id, key);
        self.gateway
            .with_db(move |db| {
                let wt = db.begin_write().map_err(StoreError::backend)?;
                {
                    let mut table = wt.open_table(VAULT).map_err(StoreError::backend)?;
                    let removed = table
                        .remove(k.as_str())
                        .map_err(StoreError::backend)?
                        .is_some();
                    if !removed {
                        return Err(StoreError::NotFound { kind: KIND, key: label }.into());
                    }
                }
                wt.commit().map_err(StoreError::backend)?;
                Ok(())
            })
            .await
    }

    /// Every variable visible to `workflow_id`, more specific scopes winning.
    pub async fn all_for_workflow(&self, workflow_id: &str) -> Result<BTreeMap<String, String>> {
        let workflow_id = workflow_id.to_string();
        self.gateway
            .with_db(move |db| {
                let rt = db.begin_read().map_err(StoreError::backend)?;
                let table = rt.open_table(VAULT).map_err(StoreError::backend)?;
                let mut merged: BTreeMap<String, (Scope, String)> = BTreeMap::new();
                for entry in all_entries(&table)? {
                    let applies = match entry.scope {
                        Scope::Workflow => entry.workflow_id.as_deref() == Some(workflow_id.as_str()),
                        Scope::Project | Scope::Global => true,
                    };
                    if !applies {
                        continue;
                    }
                    let wins = merged
                        .get(&entry.key)
                        .map_or(true, |(held, _)| entry.scope > *held);
                    if wins {
                        merged.insert(entry.key, (entry.scope, entry.value));
                    }
                }
                Ok(merged.into_iter().map(|(k, (_, v))| (k, v)).collect())
            })
            .await
    }
}
