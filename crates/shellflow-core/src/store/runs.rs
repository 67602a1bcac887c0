use chrono::{DateTime, Utc};
use redb::ReadableTable;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result, StoreError};
use crate::types::RunStatus;

use super::{StoreGateway, META, RUNS};

const KIND: &str = "run";
const NEXT_RUN_ID: &str = "next_run_id";

/// One execution of a workflow. Append-only: after creation only the
/// completion fields (`status`, `completed_at`, `logs`) change, and only once.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Run {
    pub id: u64,
    pub workflow_id: String,
    pub status: RunStatus,
    pub started_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub logs: Option<String>,
}

/// Run history, keyed by a monotonically increasing id.
#[derive(Clone)]
pub struct RunStore {
    gateway: StoreGateway,
}

impl RunStore {
    pub(crate) fn new(gateway: StoreGateway) -> Self {
        Self { gateway }
    }

    /// Append a `Running` record for `workflow_id` and return it with its id.
    pub async fn start(&self, workflow_id: &str) -> Result<Run> {
        let workflow_id = workflow_id.to_string();
        self.gateway
            .with_db(move |db| {
                let wt = db.begin_write().map_err(StoreError::backend)?;
                let run = {
                    let mut meta = wt.open_table(META).map_err(StoreError::backend)?;
                    let id = meta
                        .get(NEXT_RUN_ID)
                        .map_err(StoreError::backend)?
                        .map(|g| g.value())
                        .unwrap_or(1);
                    meta.insert(NEXT_RUN_ID, id + 1)
                        .map_err(StoreError::backend)?;

                    let run = Run {
                        id,
                        workflow_id,
                        status: RunStatus::Running,
                        started_at: Utc::now(),
                        completed_at: None,
                        logs: None,
                    };
                    let value = serde_json::to_vec(&run)?;
                    let mut runs = wt.open_table(RUNS).map_err(StoreError::backend)?;
                    runs.insert(id, value.as_slice())
                        .map_err(StoreError::backend)?;
                    run
                };
                wt.commit().map_err(StoreError::backend)?;
                Ok(run)
            })
            .await
    }

    /// Record the outcome of run `id`. Fails if the run is already complete.
    pub async fn complete(&self, id: u64, status: RunStatus, logs: Option<String>) -> Result<Run> {
        if status == RunStatus::Running {
            return Err(Error::Validation(
                "a run cannot be completed with status 'running'".into(),
            ));
        }
        self.gateway
            .with_db(move |db| {
                let wt = db.begin_write().map_err(StoreError::backend)?;
                let run = {
                    let mut runs = wt.open_table(RUNS).map_err(StoreError::backend)?;
                    let mut run: Run = match runs.get(id).map_err(StoreError::backend)? {
                        Some(guard) => serde_json::from_slice(guard.value())?,
                        None => {
                            return Err(StoreError::NotFound {
                                kind: KIND,
                                key: id.to_string(),
                            }
                            .into())
                        }
                    };
                    if run.completed_at.is_some() {
                        return Err(Error::Validation(format!("run {id} is already complete")));
                    }
                    run.status = status;
                    run.completed_at = Some(Utc::now());
                    run.logs = logs;
                    let value = serde_json::to_vec(&run)?;
                    runs.insert(id, value.as_slice())
                        .map_err(StoreError::backend)?;
                    run
                };
                wt.commit().map_err(StoreError::backend)?;
                Ok(run)
            })
            .await
    }

    pub async fn get(&self, id: u64) -> Result<Run> {
        self.gateway
            .with_db(move |db| {
                let rt = db.begin_read().map_err(StoreError::backend)?;
                let runs = rt.open_table(RUNS).map_err(StoreError::backend)?;
                let guard = runs
                    .get(id)
                    .map_err(StoreError::backend)?
                    .ok_or_else(|| StoreError::NotFound {
                        kind: KIND,
                        key: id.to_string(),
                    })?;
                Ok(serde_json::from_slice(guard.value())?)
            })
            .await
    }

    /// Newest runs first, across all workflows.
    pub async fn list_recent(&self, limit: usize) -> Result<Vec<Run>> {
        self.collect(limit, None).await
    }

    /// Newest runs first for one workflow.
    pub async fn list_for_workflow(&self, workflow_id: &str, limit: usize) -> Result<Vec<Run>> {
        self.collect(limit, Some(workflow_id.to_string())).await
    }

    async fn collect(&self, limit: usize, workflow_id: Option<String>) -> Result<Vec<Run>> {
        self.gateway
            .with_db(move |db| {
                let rt = db.begin_read().map_err(StoreError::backend)?;
                let runs = rt.open_table(RUNS).map_err(StoreError::backend)?;
                let mut result = Vec::new();
                // Ids are monotonic, so reverse key order is newest first.
                for entry in runs.iter().map_err(StoreError::backend)?.rev() {
                    if result.len() >= limit {
                        break;
                    }
                    let (_, v) = entry.map_err(StoreError::backend)?;
                    let run: Run = serde_json::from_slice(v.value())?;
                    if workflow_id.as_deref().map_or(true, |id| run.workflow_id == id) {
                        result.push(run);
                    }
                }
                Ok(result)
            })
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::StoreOptions;
    use tempfile::TempDir;

    fn runs(dir: &TempDir) -> RunStore {
        StoreGateway::new(dir.path().join("runs.redb"), StoreOptions::default()).runs()
    }

    #[tokio::test]
    async fn start_assigns_increasing_ids() {
        let dir = TempDir::new().unwrap();
        let r = runs(&dir);
        let a = r.start("deploy").await.unwrap();
        let b = r.start("deploy").await.unwrap();
        assert_eq!(a.id, 1);
        assert_eq!(b.id, 2);
        assert_eq!(a.status, RunStatus::Running);
        assert!(a.completed_at.is_none());
    }

    #[tokio::test]
    async fn complete_only_touches_completion_fields() {
        let dir = TempDir::new().unwrap();
        let r = runs(&dir);
        let started = r.start("deploy").await.unwrap();
        let done = r
            .complete(started.id, RunStatus::Success, Some("2/2 steps".into()))
            .await
            .unwrap();

        assert_eq!(done.id, started.id);
        assert_eq!(done.workflow_id, started.workflow_id);
        assert_eq!(done.started_at, started.started_at);
        assert_eq!(done.status, RunStatus::Success);
        assert!(done.completed_at.is_some());
        assert_eq!(r.get(started.id).await.unwrap(), done);
    }

    #[tokio::test]
    async fn completing_twice_is_rejected() {
        let dir = TempDir::new().unwrap();
        let r = runs(&dir);
        let run = r.start("deploy").await.unwrap();
        r.complete(run.id, RunStatus::Failed, None).await.unwrap();
        assert!(matches!(
            r.complete(run.id, RunStatus::Success, None).await,
            Err(Error::Validation(_))
        ));
        assert_eq!(r.get(run.id).await.unwrap().status, RunStatus::Failed);
    }

    #[tokio::test]
    async fn complete_unknown_run_is_not_found() {
        let dir = TempDir::new().unwrap();
        let r = runs(&dir);
        assert!(matches!(
            r.complete(42, RunStatus::Success, None).await,
            Err(Error::Store(StoreError::NotFound { .. }))
        ));
    }

    #[tokio::test]
    async fn list_recent_is_newest_first_and_bounded() {
        let dir = TempDir::new().unwrap();
        let r = runs(&dir);
        for wf in ["a", "b", "a", "c"] {
            r.start(wf).await.unwrap();
        }
        let recent: Vec<u64> = r.list_recent(3).await.unwrap().iter().map(|x| x.id).collect();
        assert_eq!(recent, vec![4, 3, 2]);

        let only_a: Vec<u64> = r
            .list_for_workflow("a", 10)
            .await
            .unwrap()
            .iter()
            .map(|x| x.id)
            .collect();
        assert_eq!(only_a, vec![3, 1]);
    }
}
