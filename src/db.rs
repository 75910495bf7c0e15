//! Shared SQLite connection handle.
//!
//! rusqlite is blocking, so every call runs on the blocking thread pool
//! behind a mutex. The handle is cheap to clone; the evidence store and the
//! job queue may share one.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use rusqlite::Connection;
use tokio::task::JoinError;
use tracing::debug;

/// How long a writer waits on a lock held by another process
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Clonable handle to one SQLite connection
#[derive(Clone)]
pub struct Database {
    conn: Arc<Mutex<Connection>>,
    path: Option<PathBuf>,
}

impl std::fmt::Debug for Database {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Database").field("path", &self.path).finish()
    }
}

impl Database {
    /// Open (or create) a database file
    pub async fn open(path: &Path) -> Result<Self, rusqlite::Error> {
        let owned = path.to_path_buf();
        let conn = tokio::task::spawn_blocking(move || -> Result<Connection, rusqlite::Error> {
            let conn = Connection::open(&owned)?;
            conn.busy_timeout(BUSY_TIMEOUT)?;
            // WAL lets API and worker processes read while one writes
            conn.pragma_update_and_check(None, "journal_mode", "WAL", |_| Ok(()))?;
            Ok(conn)
        })
        .await
        .map_err(join_to_sqlite)??;

        debug!(path = %path.display(), "Opened database");

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            path: Some(path.to_path_buf()),
        })
    }

    /// Private in-memory database (tests)
    pub fn open_in_memory() -> Result<Self, rusqlite::Error> {
        Ok(Self {
            conn: Arc::new(Mutex::new(Connection::open_in_memory()?)),
            path: None,
        })
    }

    /// Run a closure against the connection on the blocking pool
    pub async fn call<T, E, F>(&self, f: F) -> Result<T, E>
    where
        F: FnOnce(&mut Connection) -> Result<T, E> + Send + 'static,
        T: Send + 'static,
        E: From<JoinError> + Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            // A panic inside a previous call leaves the connection usable
            let mut guard = conn.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
            f(&mut guard)
        })
        .await?
    }

    /// Close the connection if this is the last handle.
    ///
    /// Other clones keep the connection open; it closes when they drop.
    pub async fn close(self) -> Result<(), rusqlite::Error> {
        let Ok(mutex) = Arc::try_unwrap(self.conn) else {
            return Ok(());
        };
        let conn = mutex.into_inner().unwrap_or_else(|poisoned| poisoned.into_inner());

        tokio::task::spawn_blocking(move || conn.close().map_err(|(_, e)| e))
            .await
            .map_err(join_to_sqlite)?
    }
}

fn join_to_sqlite(err: JoinError) -> rusqlite::Error {
    rusqlite::Error::ToSqlConversionFailure(Box::new(err))
}
