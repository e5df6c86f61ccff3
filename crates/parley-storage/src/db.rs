//! SQLite connection for session storage.
//!
//! One rusqlite `Connection` behind a `Mutex`, opened in WAL mode with the
//! schema migrated to the latest version.

use std::path::Path;
use std::sync::Mutex;
use std::time::Duration;

use rusqlite::Connection;
use tracing::info;

use parley_core::error::ParleyError;

use crate::migrations;

const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Shared handle to the session database.
pub struct Database {
    conn: Mutex<Connection>,
}

impl Database {
    /// Open or create the database file, creating parent directories.
    pub fn new(path: &Path) -> Result<Self, ParleyError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path)
            .map_err(|e| ParleyError::Storage(format!("open {}: {}", path.display(), e)))?;
        conn.execute_batch("PRAGMA journal_mode = WAL; PRAGMA synchronous = NORMAL;")
            .map_err(|e| ParleyError::Storage(format!("configure journal: {}", e)))?;

        let db = Self::init(conn)?;
        info!(path = %path.display(), "Session database ready");
        Ok(db)
    }

    /// Private in-memory database.
    pub fn in_memory() -> Result<Self, ParleyError> {
        let conn = Connection::open_in_memory()
            .map_err(|e| ParleyError::Storage(format!("open in-memory database: {}", e)))?;
        Self::init(conn)
    }

    fn init(conn: Connection) -> Result<Self, ParleyError> {
        conn.busy_timeout(BUSY_TIMEOUT)
            .map_err(|e| ParleyError::Storage(format!("set busy timeout: {}", e)))?;
        migrations::run_migrations(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Run `f` with the connection locked.
    pub fn with_conn<F, T>(&self, f: F) -> Result<T, ParleyError>
    where
        F: FnOnce(&Connection) -> Result<T, ParleyError>,
    {
        let conn = self
            .conn
            .lock()
            .map_err(|e| ParleyError::Storage(format!("database lock poisoned: {}", e)))?;
        f(&conn)
    }
}

impl std::fmt::Debug for Database {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Database").finish_non_exhaustive()
    }
}
