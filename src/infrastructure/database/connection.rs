use rusqlite::{Connection, ErrorCode};
use std::path::Path;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tracing::debug;

use crate::domain::repositories::{StoreError, StoreResult};

/// How long a writer waits on a lock held by the other process before giving up.
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Primary manager for SQLite database operations; provides async-friendly access to synchronous rusqlite connections using tokio's spawn_blocking.
#[derive(Clone)]
pub struct DatabaseManager {
    connection: Arc<Mutex<Connection>>,
}

impl DatabaseManager {
    /// Opens the database file, creating it if needed, and configures it for crash-safe shared access.
    pub fn new(db_path: impl AsRef<Path>) -> StoreResult<Self> {
        let db_path = db_path.as_ref();
        if let Some(parent) = db_path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(|e| {
                    StoreError::StoreUnavailable(format!(
                        "cannot create {}: {}",
                        parent.display(),
                        e
                    ))
                })?;
            }
        }

        let connection = Connection::open(db_path)?;
        Self::configure(&connection)?;

        Ok(Self {
            connection: Arc::new(Mutex::new(connection)),
        })
    }

    /// Private in-memory database, for tests.
    pub fn in_memory() -> StoreResult<Self> {
        let connection = Connection::open_in_memory()?;
        Self::configure(&connection)?;

        Ok(Self {
            connection: Arc::new(Mutex::new(connection)),
        })
    }

    fn configure(connection: &Connection) -> StoreResult<()> {
        connection.busy_timeout(BUSY_TIMEOUT)?;
        // WAL lets the UI read while the host writes; FULL makes every commit survive power loss.
        let mode: String =
            connection.pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get(0))?;
        connection.pragma_update(None, "synchronous", "FULL")?;
        connection.pragma_update(None, "foreign_keys", "ON")?;
        debug!("SQLite journal mode: {}", mode);
        Ok(())
    }

    /// Execute a blocking database operation in a tokio-aware manner; moves the operation to a blocking thread pool to avoid blocking the async runtime.
    pub async fn execute_blocking<F, T>(&self, operation: F) -> StoreResult<T>
    where
        F: FnOnce(&mut Connection) -> StoreResult<T> + Send + 'static,
        T: Send + 'static,
    {
        let connection = self.connection.clone();
        tokio::task::spawn_blocking(move || {
            // A panicking operation rolls its transaction back while unwinding, so the
            // connection behind a poisoned lock is still consistent.
            let mut conn = connection.lock().unwrap_or_else(PoisonError::into_inner);
            operation(&mut conn)
        })
        .await
        .map_err(|e| StoreError::Backend(format!("store operation aborted: {}", e)))?
    }

    /// Creates the tables from schema.sql. Safe to run on every start.
    pub async fn initialize_database(&self) -> StoreResult<()> {
        let schema = include_str!("schema.sql");

        self.execute_blocking(move |connection| {
            connection.execute_batch(schema)?;
            debug!("Database schema initialized");
            Ok(())
        })
        .await
    }
}

impl From<rusqlite::Error> for StoreError {
    fn from(err: rusqlite::Error) -> Self {
        match &err {
            rusqlite::Error::SqliteFailure(e, _) => match e.code {
                ErrorCode::DatabaseBusy
                | ErrorCode::DatabaseLocked
                | ErrorCode::SystemIoFailure
                | ErrorCode::CannotOpen
                | ErrorCode::DiskFull
                | ErrorCode::OutOfMemory => StoreError::StoreUnavailable(err.to_string()),
                _ => StoreError::Backend(err.to_string()),
            },
            rusqlite::Error::FromSqlConversionFailure(..)
            | rusqlite::Error::InvalidColumnType(..)
            | rusqlite::Error::IntegralValueOutOfRange(..) => {
                StoreError::InvalidData(err.to_string())
            }
            _ => StoreError::Backend(err.to_string()),
        }
    }
}
