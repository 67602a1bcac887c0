use chrono::Utc;
use redb::ReadableTable;

use crate::error::{Result, StoreError};
use crate::workflow::Workflow;

use super::{StoreGateway, WORKFLOWS};

const KIND: &str = "workflow";

/// Workflow definitions keyed by id.
#[derive(Clone)]
pub struct WorkflowStore {
    gateway: StoreGateway,
}

impl WorkflowStore {
    pub(crate) fn new(gateway: StoreGateway) -> Self {
        Self { gateway }
    }

    /// Insert a new workflow. Fails if the id is already taken.
    pub async fn create(&self, workflow: &Workflow) -> Result<()> {
        workflow.validate()?;
        let workflow = workflow.clone();
        self.gateway
            .with_db(move |db| {
                let value = serde_json::to_vec(&workflow)?;
                let wt = db.begin_write().map_err(StoreError::backend)?;
                {
                    let mut table = wt.open_table(WORKFLOWS).map_err(StoreError::backend)?;
                    if table
                        .get(workflow.id.as_str())
                        .map_err(StoreError::backend)?
                        .is_some()
                    {
                        return Err(StoreError::AlreadyExists {
                            kind: KIND,
                            key: workflow.id.clone(),
                        }
                        .into());
                    }
                    table
                        .insert(workflow.id.as_str(), value.as_slice())
                        .map_err(StoreError::backend)?;
                }
                wt.commit().map_err(StoreError::backend)?;
                Ok(())
            })
            .await
    }

    /// Insert or replace a workflow, keeping the original `created_at`.
    pub async fn upsert(&self, workflow: &Workflow) -> Result<Workflow> {
        workflow.validate()?;
        self.write(workflow.clone(), false).await
    }

    /// Replace an existing workflow. Fails if it does not exist.
    pub async fn update(&self, workflow: &Workflow) -> Result<Workflow> {
        workflow.validate()?;
        self.write(workflow.clone(), true).await
    }

    pub async fn get(&self, id: &str) -> Result<Workflow> {
        let id = id.to_string();
        self.gateway
            .with_db(move |db| {
                let rt = db.begin_read().map_err(StoreError::backend)?;
                let table = rt.open_table(WORKFLOWS).map_err(StoreError::backend)?;
                let guard = table
                    .get(id.as_str())
                    .map_err(StoreError::backend)?
                    .ok_or_else(|| StoreError::NotFound {
                        kind: KIND,
                        key: id.clone(),
                    })?;
                Ok(serde_json::from_slice(guard.value())?)
            })
            .await
    }

    pub async fn delete(&self, id: &str) -> Result<()> {
        let id = id.to_string();
        self.gateway
            .with_db(move |db| {
                let wt = db.begin_write().map_err(StoreError::backend)?;
                {
                    let mut table = wt.open_table(WORKFLOWS).map_err(StoreError::backend)?;
                    let removed = table
                        .remove(id.as_str())
                        .map_err(StoreError::backend)?
                        .is_some();
                    if !removed {
                        return Err(StoreError::NotFound { kind: KIND, key: id }.into());
                    }
                }
                wt.commit().map_err(StoreError::backend)?;
                Ok(())
            })
            .await
    }

    /// All workflows sorted by name, then id.
    pub async fn list(&self) -> Result<Vec<Workflow>> {
        self.gateway
            .with_db(|db| {
                let rt = db.begin_read().map_err(StoreError::backend)?;
                let table = rt.open_table(WORKFLOWS).map_err(StoreError::backend)?;
                let mut result = Vec::new();
                for entry in table.iter().map_err(StoreError::backend)? {
                    let (_, v) = entry.map_err(StoreError::backend)?;
                    let wf: Workflow = serde_json::from_slice(v.value())?;
                    result.push(wf);
                }
                result.sort_by(|a, b| a.name.cmp(&b.name).then_with(|| a.id.cmp(&b.id)));
                Ok(result)
            })
            .await
    }

    pub async fn is_empty(&self) -> Result<bool> {
        self.gateway
            .with_db(|db| {
                let rt = db.begin_read().map_err(StoreError::backend)?;
                let table = rt.open_table(WORKFLOWS).map_err(StoreError::backend)?;
                let first = table.first().map_err(StoreError::backend)?;
                Ok(first.is_none())
            })
            .await
    }

    async fn write(&self, mut workflow: Workflow, must_exist: bool) -> Result<Workflow> {
        self.gateway
            .with_db(move |db| {
                let wt = db.begin_write().map_err(StoreError::backend)?;
                {
                    let mut table = wt.open_table(WORKFLOWS).map_err(StoreError::backend)?;
                    let existing: Option<Workflow> = match table
                        .get(workflow.id.as_str())
                        .map_err(StoreError::backend)?
                    {
                        Some(guard) => Some(serde_json::from_slice(guard.value())?),
                        None => None,
                    };
                    match existing {
                        Some(prev) => workflow.created_at = prev.created_at,
                        None if must_exist => {
                            return Err(StoreError::NotFound {
                                kind: KIND,
                                key: workflow.id.clone(),
                            }
                            .into())
                        }
                        None => {}
                    }
                    workflow.updated_at = Utc::now();
                    let value = serde_json::to_vec(&workflow)?;
                    table
                        .insert(workflow.id.as_str(), value.as_slice())
                        .map_err(StoreError::backend)?;
                }
                wt.commit().map_err(StoreError::backend)?;
                Ok(workflow)
            })
            .await
    }
}
