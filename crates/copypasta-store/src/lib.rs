pub mod error;
pub mod models;
pub mod queries;
pub mod schema;

pub use error::StoreError;

use std::path::Path;
use std::sync::Mutex;

use rusqlite::Connection;
use tracing::info;

/// Default per-user history bound (`HISTORY_LIMIT`).
pub const DEFAULT_HISTORY_LIMIT: u32 = 50;

/// Single-connection database wrapper.
///
/// A `Mutex` rather than `RwLock` guards the connection: `Connection` is
/// `Send` but not `Sync`, so shared references across threads are off the
/// table anyway. WAL mode is set for crash safety.
///
/// Writes for different users serialize on this lock; that matches the
/// single-process ownership model where SQLite allows one writer anyway.
pub struct Database {
    conn: Mutex<Connection>,
    history_limit: u32,
}

impl Database {
    pub fn open(path: &Path, history_limit: u32) -> Result<Self, StoreError> {
        let conn = Connection::open(path)?;
        let db = Self::init(conn, history_limit)?;
        info!("database opened at {}", path.display());
        Ok(db)
    }

    /// In-memory database for tests.
    pub fn open_in_memory(history_limit: u32) -> Result<Self, StoreError> {
        Self::init(Connection::open_in_memory()?, history_limit)
    }

    fn init(conn: Connection, history_limit: u32) -> Result<Self, StoreError> {
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "foreign_keys", "ON")?;

        schema::init(&conn)?;

        Ok(Self {
            conn: Mutex::new(conn),
            history_limit: history_limit.max(1),
        })
    }

    /// The configured history bound `H`.
    pub fn history_limit(&self) -> u32 {
        self.history_limit
    }

    /// Acquire the connection for read-only queries (SELECT).
    pub(crate) fn with_conn<F, T>(&self, f: F) -> Result<T, StoreError>
    where
        F: FnOnce(&Connection) -> Result<T, StoreError>,
    {
        let conn = self.conn.lock().map_err(|_| StoreError::LockPoisoned)?;
        f(&conn)
    }

    /// Acquire the connection mutably, for multi-statement transactions.
    pub(crate) fn with_conn_mut<F, T>(&self, f: F) -> Result<T, StoreError>
    where
        F: FnOnce(&mut Connection) -> Result<T, StoreError>,
    {
        let mut conn = self.conn.lock().map_err(|_| StoreError::LockPoisoned)?;
        f(&mut conn)
    }
}
