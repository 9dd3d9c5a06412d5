use rusqlite::{Connection, InterruptHandle, OpenFlags};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tokio::sync::oneshot;
use tokio::task;

use crate::error::{RelgraphError, Result};

pub mod filter;
pub mod ident;
pub mod stats;
pub mod store;

/// Wall-clock budget checked between levels of a walk.
#[derive(Debug, Clone, Copy)]
pub struct Deadline {
    expires: Option<Instant>,
    budget: Duration,
}

impl Deadline {
    pub fn after(budget: Duration) -> Self {
        Self {
            expires: Instant::now().checked_add(budget),
            budget,
        }
    }

    /// No deadline; for synchronous callers that manage time themselves.
    pub fn none() -> Self {
        Self {
            expires: None,
            budget: Duration::MAX,
        }
    }

    pub fn check(&self) -> Result<()> {
        match self.expires {
            Some(at) if Instant::now() >= at => Err(RelgraphError::Timeout(self.budget)),
            _ => Ok(()),
        }
    }
}

/// Database handle for a relational store holding graphs
pub struct Db {
    path: PathBuf,
}

impl Db {
    /// Create a new database handle; connections are opened per call
    pub fn new<P: AsRef<Path>>(db_path: P) -> Self {
        Self {
            path: db_path.as_ref().to_path_buf(),
        }
    }

    /// Open a read-only connection with read-tuned pragmas
    pub fn open_connection(&self) -> Result<Connection> {
        open_read_only(&self.path)
    }

    /// Run `f` on a blocking worker with a fresh connection and a deadline.
    ///
    /// If `budget` elapses first the in-flight statement is interrupted and the
    /// call fails with [`RelgraphError::Timeout`]. The connection is dropped on
    /// every exit path; nothing is written, so there is nothing to roll back.
    pub async fn with_deadline<F, T>(&self, budget: Duration, f: F) -> Result<T>
    where
        F: FnOnce(&Connection, &Deadline) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let path = self.path.clone();
        let expires_at = tokio::time::Instant::now() + budget;
        let (tx, rx) = oneshot::channel::<InterruptHandle>();

        let worker = task::spawn_blocking(move || {
            let conn = open_read_only(&path)?;
            let _ = tx.send(conn.get_interrupt_handle());
            let deadline = Deadline::after(budget);
            f(&conn, &deadline)
        });

        let interrupt = match tokio::time::timeout_at(expires_at, rx).await {
            Ok(Ok(handle)) => Some(handle),
            _ => None,
        };

        match tokio::time::timeout_at(expires_at, worker).await {
            Ok(joined) => joined.map_err(|e| RelgraphError::Task(e.to_string()))?,
            Err(_) => {
                if let Some(handle) = interrupt {
                    handle.interrupt();
                }
                log::warn!("Graph query exceeded its {:?} budget, interrupted", budget);
                Err(RelgraphError::Timeout(budget))
            }
        }
    }
}

fn open_read_only(path: &Path) -> Result<Connection> {
    let conn = Connection::open_with_flags(
        path,
        OpenFlags::SQLITE_OPEN_READ_ONLY
            | OpenFlags::SQLITE_OPEN_NO_MUTEX
            | OpenFlags::SQLITE_OPEN_URI,
    )?;

    // query_only = ON as a second lock on the read-only flag
    // temp_store = MEMORY for json_each and ORDER BY scratch space
    // cache_size = -65536 (64MB cache) for repeated frontier lookups
    // mmap_size = 268435456 (256MB) for memory-mapped I/O on large databases
    conn.execute_batch(
        "PRAGMA query_only = ON; \
         PRAGMA temp_store = MEMORY; \
         PRAGMA cache_size = -65536; \
         PRAGMA mmap_size = 268435456;",
    )?;
    conn.busy_timeout(Duration::from_secs(5))?;

    Ok(conn)
}
