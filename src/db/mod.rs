//! Persistent record store for dose logs and medication schedules.
//!
//! All statements run on one dedicated thread that owns the SQLite
//! connection. Callers hand it closures over an mpsc queue and await the
//! result on a oneshot, so writes are serialized and a read issued after a
//! write's reply always observes that write.

use std::{
    path::{Path, PathBuf},
    sync::{mpsc, Arc},
    thread::{self, JoinHandle},
};

use rusqlite::{Connection, Transaction};
use tokio::sync::oneshot;

mod helpers;
mod migrations;
pub mod models;
mod repositories;

pub use models::{LogRecord, LogSource, NewLogRecord, NewSchedule, ScheduleRecord, StoreChange};

use crate::error::PersistenceError;
use migrations::run_migrations;

const ENABLE_LOGS: bool = true;

use crate::{log_error, log_info, log_warn};

type DbTask = Box<dyn FnOnce(&mut Connection) + Send + 'static>;

/// Owns the queue into the store thread. Dropping the queue ends the
/// thread's receive loop; the thread is joined after that.
struct StoreWorker {
    queue: Option<mpsc::Sender<DbTask>>,
    thread: Option<JoinHandle<()>>,
}

impl StoreWorker {
    fn spawn(path: PathBuf) -> Result<Self, PersistenceError> {
        let (queue, tasks) = mpsc::channel::<DbTask>();
        let (ready_tx, ready_rx) = mpsc::sync_channel(1);
        let reported_path = path.clone();

        let thread = thread::Builder::new()
            .name("dosekeeper-db".into())
            .spawn(move || {
                let mut conn = match open_connection(&path) {
                    Ok(conn) => {
                        let _ = ready_tx.send(Ok(()));
                        conn
                    }
                    Err(err) => {
                        let _ = ready_tx.send(Err(err));
                        return;
                    }
                };

                for task in tasks {
                    task(&mut conn);
                }
                log_info!("store thread for {} stopped", path.display());
            })
            .map_err(|err| PersistenceError::Open {
                path: reported_path,
                reason: format!("cannot spawn store thread: {err}"),
            })?;

        // A thread that died before answering dropped `ready_tx`.
        ready_rx
            .recv()
            .map_err(|_| PersistenceError::WorkerGone)??;

        Ok(Self {
            queue: Some(queue),
            thread: Some(thread),
        })
    }

    fn submit(&self, task: DbTask) -> Result<(), PersistenceError> {
        let queue = self.queue.as_ref().ok_or(PersistenceError::WorkerGone)?;
        queue.send(task).map_err(|_| PersistenceError::WorkerGone)
    }
}

impl Drop for StoreWorker {
    fn drop(&mut self) {
        self.queue.take();
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                log_error!("store thread panicked");
            }
        }
    }
}

/// Open the SQLite file, switch it to WAL and migrate it to the current schema.
fn open_connection(path: &Path) -> Result<Connection, PersistenceError> {
    let open_failed = |reason: String| PersistenceError::Open {
        path: path.to_path_buf(),
        reason,
    };

    let mut conn = Connection::open(path).map_err(|err| open_failed(err.to_string()))?;
    if let Err(err) = conn.pragma_update(None, "journal_mode", "WAL") {
        log_warn!("store stays in rollback-journal mode: {err}");
    }

    let applied = run_migrations(&mut conn)?;
    if applied > 0 {
        log_info!("applied {applied} store migration(s) to {}", path.display());
    }
    Ok(conn)
}

#[derive(Clone)]
pub struct Database {
    worker: Arc<StoreWorker>,
    db_path: Arc<PathBuf>,
}

impl Database {
    pub fn new(db_path: PathBuf) -> Result<Self, PersistenceError> {
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent).map_err(|err| PersistenceError::Open {
                path: db_path.clone(),
                reason: format!("cannot create {}: {err}", parent.display()),
            })?;
        }

        let worker = StoreWorker::spawn(db_path.clone())?;
        log_info!("store ready at {}", db_path.display());

        Ok(Self {
            worker: Arc::new(worker),
            db_path: Arc::new(db_path),
        })
    }

    pub fn path(&self) -> &Path {
        self.db_path.as_path()
    }

    /// Run `task` on the store thread and wait for its result.
    pub(crate) async fn execute<F, T>(&self, task: F) -> Result<T, PersistenceError>
    where
        F: FnOnce(&mut Connection) -> anyhow::Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let (reply_tx, reply_rx) = oneshot::channel();

        self.worker.submit(Box::new(move |conn| {
            // The caller may have been dropped mid-await; the write still stands.
            let _ = reply_tx.send(task(conn));
        }))?;

        reply_rx
            .await
            .map_err(|_| PersistenceError::WorkerGone)?
            .map_err(PersistenceError::from)
    }

    /// Like [`Database::execute`], inside one transaction that commits only
    /// when `task` succeeds.
    pub(crate) async fn execute_in_transaction<F, T>(&self, task: F) -> Result<T, PersistenceError>
    where
        F: FnOnce(&Transaction<'_>) -> anyhow::Result<T> + Send + 'static,
        T: Send + 'static,
    {
        self.execute(move |conn| {
            let tx = conn.transaction()?;
            let value = task(&tx)?;
            tx.commit()?;
            Ok(value)
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unopenable_location_reports_the_path() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("not-a-dir");
        std::fs::write(&blocker, b"plain file").unwrap();
        let wanted = blocker.join("store.sqlite3");

        match Database::new(wanted.clone()) {
            Err(PersistenceError::Open { path, .. }) => assert_eq!(path, wanted),
            Err(other) => panic!("unexpected error {other}"),
            Ok(_) => panic!("store opened beneath a plain file"),
        }
    }

    #[tokio::test]
    async fn failed_transaction_leaves_no_trace() {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::new(dir.path().join("store.sqlite3")).unwrap();

        let result: Result<(), _> = db
            .execute_in_transaction(|tx| {
                tx.execute(
                    "INSERT INTO dose_logs (timestamp, source) VALUES (10, 'Manual')",
                    [],
                )?;
                anyhow::bail!("abandon")
            })
            .await;

        assert!(matches!(result, Err(PersistenceError::Storage(_))));
        assert!(db.list_logs().await.unwrap().is_empty());
    }
}
