use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use redb::{Database, DatabaseError};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::config::EngineConfig;
use crate::error::{Result, StoreError};
use crate::io;

use super::{RunStore, VaultStore, WorkflowStore, META, RUNS, VAULT, WORKFLOWS};

// ---------------------------------------------------------------------------
// StoreOptions
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StoreOptions {
    /// How long a caller waits for one operation before giving up.
    pub timeout: Duration,
    /// How long the handle may sit unused before the idle reaper closes it.
    pub idle_after: Duration,
}

impl Default for StoreOptions {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(5),
            idle_after: Duration::from_secs(300),
        }
    }
}

impl From<&EngineConfig> for StoreOptions {
    fn from(cfg: &EngineConfig) -> Self {
        Self {
            timeout: cfg.store_timeout(),
            idle_after: cfg.idle_close(),
        }
    }
}

// ---------------------------------------------------------------------------
// StoreGateway
// ---------------------------------------------------------------------------

/// The only owner of the database handle.
///
/// Cloning is cheap and every clone shares the same handle and lock.
/// Operations are serialized by the lock, run on the blocking pool, and raced
/// against `StoreOptions::timeout`. A timed-out operation is not cancelled:
/// it keeps the lock until it finishes and its writes may still commit, so
/// callers must treat `StoreError::TimedOut` as an unknown outcome.
#[derive(Clone)]
pub struct StoreGateway {
    inner: Arc<Inner>,
}

struct Inner {
    path: PathBuf,
    options: StoreOptions,
    handle: Mutex<Handle>,
}

#[derive(Default)]
struct Handle {
    db: Option<Database>,
    last_used: Option<Instant>,
}

impl StoreGateway {
    /// Create a gateway for the database at `path`. Nothing is opened until
    /// the first operation.
    pub fn new(path: impl Into<PathBuf>, options: StoreOptions) -> Self {
        Self {
            inner: Arc::new(Inner {
                path: path.into(),
                options,
                handle: Mutex::new(Handle::default()),
            }),
        }
    }

    pub fn from_config(cfg: &EngineConfig, home: &Path) -> Self {
        Self::new(cfg.db_path(home), StoreOptions::from(cfg))
    }

    pub fn path(&self) -> &Path {
        &self.inner.path
    }

    pub fn options(&self) -> StoreOptions {
        self.inner.options
    }

    pub fn workflows(&self) -> WorkflowStore {
        WorkflowStore::new(self.clone())
    }

    pub fn vault(&self) -> VaultStore {
        VaultStore::new(self.clone())
    }

    pub fn runs(&self) -> RunStore {
        RunStore::new(self.clone())
    }

    /// Whether the handle is currently open. An operation in flight counts as open.
    pub fn is_open(&self) -> bool {
        match self.inner.handle.try_lock() {
            Ok(handle) => handle.db.is_some(),
            Err(_) => true,
        }
    }

    /// Run `op` against the database, opening it first if needed.
    pub async fn with_db<T, F>(&self, op: F) -> Result<T>
    where
        F: FnOnce(&Database) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        self.dispatch(move |inner| {
            let mut handle = inner.lock()?;
            let db = match handle.db.take() {
                Some(db) => db,
                None => open_database(&inner.path)?,
            };
            let result = op(&db);
            handle.db = Some(db);
            handle.last_used = Some(Instant::now());
            result
        })
        .await
    }

    /// Close the handle now. The next operation reopens it.
    pub async fn shutdown(&self) -> Result<()> {
        self.dispatch(|inner| {
            let mut handle = inner.lock()?;
            if handle.db.take().is_some() {
                debug!(path = %inner.path.display(), "closed store");
            }
            Ok(())
        })
        .await
    }

    /// Close the handle if it has been unused for at least `idle_after`.
    ///
    /// Never waits for the lock: returns false when an operation is in flight.
    pub fn close_if_idle(&self) -> bool {
        let Ok(mut handle) = self.inner.handle.try_lock() else {
            return false;
        };
        let idle = handle
            .last_used
            .is_some_and(|t| t.elapsed() >= self.inner.options.idle_after);
        if idle && handle.db.take().is_some() {
            debug!(path = %self.inner.path.display(), "closed idle store");
            return true;
        }
        false
    }

    /// Periodically close the handle once it goes idle. Abort the returned
    /// task to stop reaping.
    pub fn spawn_idle_reaper(&self) -> JoinHandle<()> {
        let gateway = self.clone();
        let period = (self.inner.options.idle_after / 2)
            .clamp(Duration::from_millis(10), Duration::from_secs(30));
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            loop {
                ticker.tick().await;
                gateway.close_if_idle();
            }
        })
    }

    async fn dispatch<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Inner) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let inner = Arc::clone(&self.inner);
        let timeout = self.inner.options.timeout;
        let task = tokio::task::spawn_blocking(move || f(&inner));
        match tokio::time::timeout(timeout, task).await {
            Ok(Ok(result)) => result,
            Ok(Err(e)) => Err(StoreError::Unavailable(format!("store task failed: {e}")).into()),
            Err(_) => {
                warn!(
                    path = %self.inner.path.display(),
                    ?timeout,
                    "store operation timed out; it may still complete"
                );
                Err(StoreError::TimedOut(timeout).into())
            }
        }
    }
}

impl Inner {
    fn lock(&self) -> Result<MutexGuard<'_, Handle>> {
        self.handle
            .lock()
            .map_err(|_| StoreError::Unavailable("store lock poisoned".into()).into())
    }
}

/// Open or create the database and make sure every table exists.
fn open_database(path: &Path) -> Result<Database> {
    io::ensure_parent(path)?;
    let db = Database::create(path).map_err(|e| match e {
        DatabaseError::DatabaseAlreadyOpen => StoreError::Busy(path.to_path_buf()),
        other => StoreError::backend(other),
    })?;
    let wt = db.begin_write().map_err(StoreError::backend)?;
    wt.open_table(WORKFLOWS).map_err(StoreError::backend)?;
    wt.open_table(VAULT).map_err(StoreError::backend)?;
    wt.open_table(RUNS).map_err(StoreError::backend)?;
    wt.open_table(META).map_err(StoreError::backend)?;
    wt.commit().map_err(StoreError::backend)?;
    debug!(path = %path.display(), "opened store");
    Ok(db)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use crate::workflow::Workflow;
    use redb::ReadableTable;
    use tempfile::TempDir;

    fn gateway(dir: &TempDir, options: StoreOptions) -> StoreGateway {
        StoreGateway::new(dir.path().join("db").join("test.redb"), options)
    }

    #[tokio::test]
    async fn opens_lazily_and_stays_open() {
        let dir = TempDir::new().unwrap();
        let gw = gateway(&dir, StoreOptions::default());
        assert!(!gw.is_open());
        assert!(!gw.path().exists());

        gw.with_db(|_| Ok(())).await.unwrap();
        assert!(gw.is_open());
        assert!(gw.path().exists());

        gw.with_db(|_| Ok(())).await.unwrap();
        assert!(gw.is_open());
    }

    #[tokio::test]
    async fn shutdown_closes_and_next_call_reopens() {
        let dir = TempDir::new().unwrap();
        let gw = gateway(&dir, StoreOptions::default());
        gw.workflows()
            .create(&Workflow::new("kept", "Kept"))
            .await
            .unwrap();
        gw.shutdown().await.unwrap();
        assert!(!gw.is_open());

        let wf = gw.workflows().get("kept").await.unwrap();
        assert_eq!(wf.name, "Kept");
        assert!(gw.is_open());
    }

    #[tokio::test]
    async fn close_if_idle_respects_idle_period() {
        let dir = TempDir::new().unwrap();
        let gw = gateway(
            &dir,
            StoreOptions {
                idle_after: Duration::from_millis(20),
                ..Default::default()
            },
        );
        assert!(!gw.close_if_idle(), "never opened, nothing to close");
        gw.with_db(|_| Ok(())).await.unwrap();
        assert!(!gw.close_if_idle(), "just used");

        tokio::time::sleep(Duration::from_millis(40)).await;
        assert!(gw.close_if_idle());
        assert!(!gw.is_open());
    }

    #[tokio::test]
    async fn idle_reaper_closes_handle() {
        let dir = TempDir::new().unwrap();
        let gw = gateway(
            &dir,
            StoreOptions {
                idle_after: Duration::from_millis(20),
                ..Default::default()
            },
        );
        gw.with_db(|_| Ok(())).await.unwrap();
        let reaper = gw.spawn_idle_reaper();
        tokio::time::sleep(Duration::from_millis(200)).await;
        reaper.abort();
        assert!(!gw.is_open());
    }

    #[tokio::test]
    async fn errors_from_the_operation_pass_through() {
        let dir = TempDir::new().unwrap();
        let gw = gateway(&dir, StoreOptions::default());
        let err = gw
            .with_db(|_| -> Result<()> { Err(Error::Validation("nope".into())) })
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
        // The handle survives a failed operation.
        assert!(gw.is_open());
    }

    #[tokio::test]
    async fn timed_out_write_still_lands() {
        let dir = TempDir::new().unwrap();
        let gw = gateway(
            &dir,
            StoreOptions {
                timeout: Duration::from_millis(50),
                ..Default::default()
            },
        );
        let err = gw
            .with_db(|db| {
                std::thread::sleep(Duration::from_millis(200));
                let wt = db.begin_write().map_err(StoreError::backend)?;
                {
                    let mut meta = wt.open_table(META).map_err(StoreError::backend)?;
                    meta.insert("late", 7u64).map_err(StoreError::backend)?;
                }
                wt.commit().map_err(StoreError::backend)?;
                Ok(())
            })
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Store(StoreError::TimedOut(_))), "got {err:?}");

        // The dispatched work was not cancelled: once it releases the lock the
        // write is visible.
        tokio::time::sleep(Duration::from_millis(300)).await;
        let value = gw
            .with_db(|db| {
                let rt = db.begin_read().map_err(StoreError::backend)?;
                let meta = rt.open_table(META).map_err(StoreError::backend)?;
                let v = meta
                    .get("late")
                    .map_err(StoreError::backend)?
                    .map(|g| g.value());
                Ok(v)
            })
            .await
            .unwrap();
        assert_eq!(value, Some(7));
    }

    #[tokio::test]
    async fn second_handle_on_same_file_reports_busy() {
        let dir = TempDir::new().unwrap();
        let first = gateway(&dir, StoreOptions::default());
        first.with_db(|_| Ok(())).await.unwrap();

        let second = StoreGateway::new(first.path().to_path_buf(), StoreOptions::default());
        let err = second.with_db(|_| Ok(())).await.unwrap_err();
        assert!(
            matches!(err, Error::Store(StoreError::Busy(_))),
            "got {err:?}"
        );

        first.shutdown().await.unwrap();
        second.with_db(|_| Ok(())).await.unwrap();
    }

    #[tokio::test]
    async fn tables_exist_after_open() {
        let dir = TempDir::new().unwrap();
        let gw = gateway(&dir, StoreOptions::default());
        let count = gw
            .with_db(|db| {
                let rt = db.begin_read().map_err(StoreError::backend)?;
                let t = rt.open_table(WORKFLOWS).map_err(StoreError::backend)?;
                Ok(t.iter().map_err(StoreError::backend)?.count())
            })
            .await
            .unwrap();
        assert_eq!(count, 0);
    }
}
