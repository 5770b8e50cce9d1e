use std::{
    path::{Path, PathBuf},
    sync::{
        atomic::{AtomicUsize, Ordering},
        mpsc, Arc, Mutex,
    },
    thread::{self, JoinHandle},
    time::Duration,
};

use anyhow::{Context, Result};
use rusqlite::{Connection, OpenFlags};
use thiserror::Error;
use tokio::sync::oneshot;

use super::migrations::run_migrations;
use crate::config::StoreConfig;
use crate::{log_debug, log_error, log_info};

const ENABLE_LOGS: bool = true;

type DbTask = Box<dyn FnOnce(&mut Connection) + Send + 'static>;

enum DbCommand {
    Execute(DbTask),
    Shutdown,
}

/// Raised when a worker thread is gone and can no longer accept tasks.
#[derive(Debug, Error)]
#[error("database worker '{0}' is not running")]
pub struct WorkerUnavailable(pub String);

/// Marks a failure to bring the schema up to date, as opposed to a backend
/// that could not be opened at all.
#[derive(Debug, Error)]
#[error("failed to run database migrations")]
pub struct SchemaMigrationFailed;

struct Worker {
    name: String,
    sender: mpsc::Sender<DbCommand>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl Worker {
    /// Spawns a thread that opens its own connection with `open`, reports
    /// readiness, then runs tasks in arrival order until shutdown.
    fn spawn<F>(name: String, open: F) -> Result<Self>
    where
        F: FnOnce() -> Result<Connection> + Send + 'static,
    {
        let (command_tx, command_rx) = mpsc::channel::<DbCommand>();
        let (ready_tx, ready_rx) = mpsc::channel::<Result<()>>();
        let thread_name = name.clone();

        let handle = thread::Builder::new()
            .name(name.clone())
            .spawn(move || {
                let mut conn = match open() {
                    Ok(conn) => conn,
                    Err(err) => {
                        let _ = ready_tx.send(Err(err));
                        return;
                    }
                };

                if ready_tx.send(Ok(())).is_err() {
                    log_error!("{thread_name}: receiver dropped before ready signal");
                    return;
                }

                while let Ok(command) = command_rx.recv() {
                    match command {
                        DbCommand::Execute(task) => task(&mut conn),
                        DbCommand::Shutdown => break,
                    }
                }

                log_info!("{thread_name} shutting down");
            })
            .with_context(|| format!("failed to spawn database worker {name}"))?;

        ready_rx
            .recv()
            .with_context(|| format!("{name} exited before signaling readiness"))??;

        Ok(Self {
            name,
            sender: command_tx,
            handle: Mutex::new(Some(handle)),
        })
    }

    async fn run<F, T>(&self, task: F) -> Result<T>
    where
        F: FnOnce(&mut Connection) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let (reply_tx, reply_rx) = oneshot::channel();
        let worker_name = self.name.clone();

        let command = DbCommand::Execute(Box::new(move |conn| {
            let result = task(conn);
            if reply_tx.send(result).is_err() {
                // The caller gave up on the result; the task itself already ran.
                log_debug!("{worker_name}: caller dropped before receiving result");
            }
        }));

        self.sender
            .send(command)
            .map_err(|_| anyhow::Error::new(WorkerUnavailable(self.name.clone())))?;

        reply_rx
            .await
            .map_err(|_| anyhow::Error::new(WorkerUnavailable(self.name.clone())))?
    }
}

impl Drop for Worker {
    fn drop(&mut self) {
        let mut guard = match self.handle.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };

        if let Some(handle) = guard.take() {
            if let Err(err) = self.sender.send(DbCommand::Shutdown) {
                log_error!("Failed to send shutdown to {}: {err}", self.name);
            }
            if let Err(join_err) = handle.join() {
                log_error!("Failed to join {}: {join_err:?}", self.name);
            }
        }
    }
}

struct DatabaseInner {
    writer: Worker,
    readers: Vec<Worker>,
    next_reader: AtomicUsize,
}

/// Handle to the history database.
///
/// All mutations go through a single writer thread, so they are totally
/// ordered. Queries are spread over read-only connections and see the last
/// committed state.
///
/// Dropping the last clone shuts the workers down and joins their threads,
/// blocking the dropping thread until queued tasks finish. Drop it from
/// `spawn_blocking` if those tasks may be long.
#[derive(Clone)]
pub struct Database {
    inner: Arc<DatabaseInner>,
    db_path: Arc<PathBuf>,
}

impl Database {
    pub fn open(config: &StoreConfig) -> Result<Self> {
        let db_path = config.database_path.clone();
        if let Some(parent) = db_path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).with_context(|| {
                    format!("failed to create database directory {}", parent.display())
                })?;
            }
        }

        let busy_timeout = Duration::from_millis(config.busy_timeout_ms);

        let writer_path = db_path.clone();
        let writer = Worker::spawn("navhistory-db-writer".into(), move || {
            let mut conn =
                Connection::open(&writer_path).context("failed to open SQLite database")?;
            conn.busy_timeout(busy_timeout)
                .context("failed to set busy timeout")?;
            conn.pragma_update(None, "journal_mode", "WAL")
                .context("failed to enable WAL mode")?;
            conn.pragma_update(None, "foreign_keys", "ON")
                .context("failed to enable foreign keys")?;
            run_migrations(&mut conn).context(SchemaMigrationFailed)?;
            Ok(conn)
        })?;

        let reader_count = config.reader_connections.max(1);
        let mut readers = Vec::with_capacity(reader_count);
        for index in 0..reader_count {
            let reader_path = db_path.clone();
            let reader = Worker::spawn(format!("navhistory-db-reader-{index}"), move || {
                let conn = Connection::open_with_flags(
                    &reader_path,
                    OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
                )
                .context("failed to open read-only SQLite connection")?;
                conn.busy_timeout(busy_timeout)
                    .context("failed to set busy timeout")?;
                conn.pragma_update(None, "query_only", "ON")
                    .context("failed to enable query_only")?;
                Ok(conn)
            })?;
            readers.push(reader);
        }

        log_info!(
            "History database initialized at {} ({} reader connections)",
            db_path.display(),
            reader_count
        );

        Ok(Self {
            inner: Arc::new(DatabaseInner {
                writer,
                readers,
                next_reader: AtomicUsize::new(0),
            }),
            db_path: Arc::new(db_path),
        })
    }

    pub fn path(&self) -> &Path {
        self.db_path.as_path()
    }

    /// Runs `task` on the writer thread, after every previously queued write.
    pub async fn execute<F, T>(&self, task: F) -> Result<T>
    where
        F: FnOnce(&mut Connection) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        self.inner.writer.run(task).await
    }

    /// Runs `task` on one of the read-only connections.
    pub async fn read<F, T>(&self, task: F) -> Result<T>
    where
        F: FnOnce(&mut Connection) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let readers = &self.inner.readers;
        let index = self.inner.next_reader.fetch_add(1, Ordering::Relaxed) % readers.len();
        readers[index].run(task).await
    }
}
