use std::{
    path::{Path, PathBuf},
    sync::{mpsc, Arc},
    thread::{self, JoinHandle},
    time::Duration,
};

use anyhow::{anyhow, Context, Result};
use log::{error, info, warn};
use rusqlite::Connection;
use tokio::sync::oneshot;

use super::migrations::run_migrations;

const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

type Job = Box<dyn FnOnce(&mut Connection) + Send + 'static>;

/// Owns the store thread. Dropping the job sender ends its receive loop
/// once queued jobs are drained; the thread is then joined.
struct StoreThread {
    jobs: Option<mpsc::Sender<Job>>,
    handle: Option<JoinHandle<()>>,
}

impl Drop for StoreThread {
    fn drop(&mut self) {
        drop(self.jobs.take());
        if let Some(handle) = self.handle.take() {
            if let Err(join_err) = handle.join() {
                error!("step store thread panicked: {join_err:?}");
            }
        }
    }
}

/// Handle to the step store.
///
/// All statements run on one dedicated thread in submission order, so every
/// `execute` closure is a serialized critical section with respect to the
/// others. Read-modify-write sequences that must not interleave belong in a
/// single closure.
#[derive(Clone)]
pub struct Database {
    thread: Arc<StoreThread>,
    db_path: Arc<PathBuf>,
}

fn open_store(path: &Path) -> Result<Connection> {
    let mut conn = Connection::open(path)
        .with_context(|| format!("failed to open step store {}", path.display()))?;
    conn.busy_timeout(BUSY_TIMEOUT)
        .context("failed to set busy timeout")?;
    if let Err(err) = conn.pragma_update(None, "journal_mode", "WAL") {
        warn!("step store stays in rollback-journal mode: {err}");
    }
    run_migrations(&mut conn).context("failed to migrate step store")?;
    Ok(conn)
}

impl Database {
    /// Opens (creating if needed) and migrates the store at `db_path`, then
    /// hands the connection to its own thread.
    pub fn new(db_path: PathBuf) -> Result<Self> {
        if let Some(parent) = db_path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).with_context(|| {
                format!("failed to create database directory {}", parent.display())
            })?;
        }

        let (jobs_tx, jobs_rx) = mpsc::channel::<Job>();
        let (ready_tx, ready_rx) = mpsc::channel::<Result<()>>();
        let thread_path = db_path.clone();

        let handle = thread::Builder::new()
            .name("stepsync-db".into())
            .spawn(move || {
                let mut conn = match open_store(&thread_path) {
                    Ok(conn) => {
                        let _ = ready_tx.send(Ok(()));
                        conn
                    }
                    Err(err) => {
                        let _ = ready_tx.send(Err(err));
                        return;
                    }
                };

                for job in jobs_rx {
                    job(&mut conn);
                }
                info!("step store thread exiting");
            })
            .context("failed to spawn step store thread")?;

        let thread = StoreThread {
            jobs: Some(jobs_tx),
            handle: Some(handle),
        };
        ready_rx
            .recv()
            .context("step store thread exited during startup")??;

        info!("Step store opened at {}", db_path.display());
        Ok(Self {
            thread: Arc::new(thread),
            db_path: Arc::new(db_path),
        })
    }

    pub fn path(&self) -> &Path {
        self.db_path.as_path()
    }

    /// Runs `task` on the store thread and awaits its result.
    pub async fn execute<F, T>(&self, task: F) -> Result<T>
    where
        F: FnOnce(&mut Connection) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let jobs = self
            .thread
            .jobs
            .as_ref()
            .ok_or_else(|| anyhow!("step store is closed"))?;
        let (reply_tx, reply_rx) = oneshot::channel();

        jobs.send(Box::new(move |conn| {
            // Caller may have been cancelled; the work is done either way.
            let _ = reply_tx.send(task(conn));
        }))
        .map_err(|_| anyhow!("step store thread is not running"))?;

        reply_rx
            .await
            .map_err(|_| anyhow!("step store thread dropped the request"))?
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn opens_and_migrates_fresh_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("steps.sqlite3");
        let db = Database::new(path.clone()).unwrap();

        assert_eq!(db.path(), path.as_path());
        let version: i32 = db
            .execute(|conn| {
                Ok(conn.pragma_query_value(None, "user_version", |row| row.get(0))?)
            })
            .await
            .unwrap();
        assert!(version > 0);
    }

    #[tokio::test]
    async fn reopening_keeps_schema() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("steps.sqlite3");
        {
            let db = Database::new(path.clone()).unwrap();
            db.save_last_counter(42.0).await.unwrap();
        }
        let db = Database::new(path).unwrap();
        assert_eq!(db.get_last_counter().await.unwrap(), Some(42.0));
    }
}
