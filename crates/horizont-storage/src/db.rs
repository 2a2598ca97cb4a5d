//! Database connection management.
//!
//! Wraps a single rusqlite Connection in a Mutex for thread-safe access.
//! Configures WAL mode, a busy timeout and foreign keys on initialization.
//! Several worker processes may open the same file; SQLite file locking is
//! what serialises their writes.

use std::path::Path;
use std::sync::Mutex;
use std::time::Duration;

use rusqlite::{Connection, Transaction, TransactionBehavior};
use tracing::info;

use horizont_core::error::HorizontError;

use crate::migrations;

/// Thread-safe SQLite database wrapper.
pub struct Database {
    conn: Mutex<Connection>,
}

impl Database {
    /// Open (or create) a database at the given path.
    ///
    /// Configures WAL mode, synchronous=NORMAL, foreign keys, the busy
    /// timeout and runs all pending migrations.
    pub fn new(path: &Path, busy_timeout: Duration) -> Result<Self, HorizontError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let conn = Connection::open(path)
            .map_err(|e| HorizontError::Storage(format!("Failed to open database: {}", e)))?;

        conn.busy_timeout(busy_timeout)
            .map_err(|e| HorizontError::Storage(format!("Failed to set busy timeout: {}", e)))?;

        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA synchronous = NORMAL;
             PRAGMA foreign_keys = ON;",
        )
        .map_err(|e| HorizontError::Storage(format!("Failed to set pragmas: {}", e)))?;

        info!("Database opened at {}", path.display());

        let db = Self {
            conn: Mutex::new(conn),
        };
        db.with_conn(migrations::run_migrations)?;
        Ok(db)
    }

    /// Open an in-memory database (for testing).
    pub fn in_memory() -> Result<Self, HorizontError> {
        let conn = Connection::open_in_memory()
            .map_err(|e| HorizontError::Storage(format!("Failed to open in-memory db: {}", e)))?;

        conn.execute_batch("PRAGMA foreign_keys = ON;")
            .map_err(|e| HorizontError::Storage(format!("Failed to set pragmas: {}", e)))?;

        let db = Self {
            conn: Mutex::new(conn),
        };
        db.with_conn(migrations::run_migrations)?;
        Ok(db)
    }

    /// Execute a closure with a reference to the underlying connection.
    ///
    /// The mutex is held for the duration of the closure.
    pub fn with_conn<F, T>(&self, f: F) -> Result<T, HorizontError>
    where
        F: FnOnce(&Connection) -> Result<T, HorizontError>,
    {
        let conn = self
            .conn
            .lock()
            .map_err(|e| HorizontError::Storage(format!("Database lock poisoned: {}", e)))?;
        f(&conn)
    }

    /// Run a closure inside one write transaction.
    ///
    /// The transaction is opened IMMEDIATE so the write lock is taken up
    /// front and concurrent workers queue on the busy timeout instead of
    /// failing on lock upgrade. It commits only if the closure returns `Ok`;
    /// any error (or panic) rolls every statement back.
    pub fn write_tx<F, T>(&self, f: F) -> Result<T, HorizontError>
    where
        F: FnOnce(&Transaction<'_>) -> Result<T, HorizontError>,
    {
        self.with_conn(|conn| {
            let tx = Transaction::new_unchecked(conn, TransactionBehavior::Immediate)
                .map_err(|e| HorizontError::Storage(format!("Failed to begin transaction: {}", e)))?;
            let value = f(&tx)?;
            tx.commit()
                .map_err(|e| HorizontError::Storage(format!("Failed to commit: {}", e)))?;
            Ok(value)
        })
    }
}

impl std::fmt::Debug for Database {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Database").finish()
    }
}

/// Map a rusqlite error into the storage variant.
pub(crate) fn sql_err(e: rusqlite::Error) -> HorizontError {
    HorizontError::Storage(e.to_string())
}
