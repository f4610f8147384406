use chrono::Utc;
use rusqlite::{params, OptionalExtension, Row, TransactionBehavior};

use crate::models::{EntryRow, UserRow};
use crate::{Database, StoreError};

/// Key in `user_metadata` holding the last issued version for a user.
const VERSION_COUNTER_KEY: &str = "version_counter";

impl Database {
    // -- Users --

    /// Insert a new user and return its id. Uniqueness is enforced by the
    /// UNIQUE constraint, not a prior read, so concurrent registrations
    /// with the same name get exactly one winner; the losers see
    /// `UsernameTaken`.
    pub fn create_user(&self, username: &str, password_hash: &str) -> Result<i64, StoreError> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO users (username, password_hash) VALUES (?1, ?2)",
                (username, password_hash),
            )
            .map_err(map_constraint_violation)?;
            Ok(conn.last_insert_rowid())
        })
    }

    pub fn get_user_by_username(&self, username: &str) -> Result<Option<UserRow>, StoreError> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, username, password_hash, created_at FROM users WHERE username = ?1",
            )?;
            let row = stmt.query_row([username], user_from_row).optional()?;
            Ok(row)
        })
    }

    pub fn get_user_by_id(&self, id: i64) -> Result<Option<UserRow>, StoreError> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, username, password_hash, created_at FROM users WHERE id = ?1",
            )?;
            let row = stmt.query_row([id], user_from_row).optional()?;
            Ok(row)
        })
    }

    // -- Clipboard entries --

    /// Insert a new entry for the user and return `(entry_id, version)`.
    ///
    /// One IMMEDIATE transaction covers the whole sequence: bump the
    /// user's version counter (creating the register on first paste),
    /// insert the row with the new version, evict rows that fell out of
    /// the history window. A crash can therefore never leave the history
    /// over the bound or two entries sharing a version.
    pub fn insert_entry(
        &self,
        user_id: i64,
        content_type: &str,
        content: &str,
        metadata: &str,
        client_id: &str,
    ) -> Result<(i64, i64), StoreError> {
        let history_limit = self.history_limit() as i64;
        self.with_conn_mut(|conn| {
            let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

            tx.execute(
                "INSERT INTO user_metadata (user_id, key, value) VALUES (?1, ?2, 1)
                 ON CONFLICT(user_id, key) DO UPDATE SET value = value + 1",
                params![user_id, VERSION_COUNTER_KEY],
            )?;
            let version: i64 = tx.query_row(
                "SELECT value FROM user_metadata WHERE user_id = ?1 AND key = ?2",
                params![user_id, VERSION_COUNTER_KEY],
                |row| row.get(0),
            )?;

            tx.execute(
                "INSERT INTO clipboard_entries
                     (user_id, content_type, content, metadata, created_at, version, client_id)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![
                    user_id,
                    content_type,
                    content,
                    metadata,
                    Utc::now().to_rfc3339(),
                    version,
                    client_id
                ],
            )?;
            let entry_id = tx.last_insert_rowid();

            tx.execute(
                "DELETE FROM clipboard_entries WHERE user_id = ?1 AND version <= ?2",
                params![user_id, version - history_limit],
            )?;

            tx.commit()?;
            Ok((entry_id, version))
        })
    }

    /// The user's current entry: the row with the greatest version.
    pub fn get_current(&self, user_id: i64) -> Result<Option<EntryRow>, StoreError> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!(
                "{ENTRY_SELECT} WHERE user_id = ?1 ORDER BY version DESC LIMIT 1"
            ))?;
            let row = stmt.query_row([user_id], entry_from_row).optional()?;
            Ok(row)
        })
    }

    /// Newest-first history. `limit` is clamped to `[1, H]`.
    pub fn get_history(&self, user_id: i64, limit: u32) -> Result<Vec<EntryRow>, StoreError> {
        let limit = limit.clamp(1, self.history_limit());
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!(
                "{ENTRY_SELECT} WHERE user_id = ?1 ORDER BY version DESC LIMIT ?2"
            ))?;
            let rows = stmt
                .query_map(params![user_id, limit], entry_from_row)?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    /// Last issued version for the user, 0 if they never pasted. Reads the
    /// counter register, which stays authoritative even after eviction.
    pub fn latest_version(&self, user_id: i64) -> Result<i64, StoreError> {
        self.with_conn(|conn| {
            let version: Option<i64> = conn
                .query_row(
                    "SELECT value FROM user_metadata WHERE user_id = ?1 AND key = ?2",
                    params![user_id, VERSION_COUNTER_KEY],
                    |row| row.get(0),
                )
                .optional()?;
            Ok(version.unwrap_or(0))
        })
    }
}

const ENTRY_SELECT: &str = "SELECT id, user_id, content_type, content, \
     COALESCE(metadata, '{}'), created_at, version, client_id FROM clipboard_entries";

fn user_from_row(row: &Row<'_>) -> rusqlite::Result<UserRow> {
    Ok(UserRow {
        id: row.get(0)?,
        username: row.get(1)?,
        password_hash: row.get(2)?,
        created_at: row.get(3)?,
    })
}

fn entry_from_row(row: &Row<'_>) -> rusqlite::Result<EntryRow> {
    Ok(EntryRow {
        id: row.get(0)?,
        user_id: row.get(1)?,
        content_type: row.get(2)?,
        content: row.get(3)?,
        metadata: row.get(4)?,
        created_at: row.get(5)?,
        version: row.get(6)?,
        client_id: row.get(7)?,
    })
}

/// SQLITE_CONSTRAINT on the users insert can only be the username
/// uniqueness constraint (the id is the rowid).
fn map_constraint_violation(e: rusqlite::Error) -> StoreError {
    match e {
        rusqlite::Error::SqliteFailure(err, _)
            if err.code == rusqlite::ErrorCode::ConstraintViolation =>
        {
            StoreError::UsernameTaken
        }
        other => StoreError::Sqlite(other),
    }
}
