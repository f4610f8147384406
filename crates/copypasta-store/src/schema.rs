//! Table layout. The schema is small and fixed, so the whole DDL runs on
//! every open; `IF NOT EXISTS` keeps that idempotent and there is no
//! migration bookkeeping to maintain.

use rusqlite::Connection;
use tracing::debug;

use crate::StoreError;

pub fn init(conn: &Connection) -> Result<(), StoreError> {
    conn.execute_batch(DDL)?;
    debug!("schema ready");
    Ok(())
}

/// `users.id` is AUTOINCREMENT so ids are never reused. `clipboard_entries`
/// carries the per-user `version`; the covering index serves GetCurrent and
/// newest-first history alike. `user_metadata` holds one integer register
/// per (user, key) -- the only key in use is `version_counter`, the source
/// of truth for version ordering.
const DDL: &str = "
CREATE TABLE IF NOT EXISTS users (
    id             INTEGER PRIMARY KEY AUTOINCREMENT,
    username       TEXT NOT NULL UNIQUE,
    password_hash  TEXT NOT NULL,
    created_at     TEXT NOT NULL DEFAULT (datetime('now'))
);

CREATE TABLE IF NOT EXISTS clipboard_entries (
    id            INTEGER PRIMARY KEY AUTOINCREMENT,
    user_id       INTEGER NOT NULL REFERENCES users(id),
    content_type  TEXT NOT NULL,
    content       TEXT NOT NULL,
    metadata      TEXT,
    created_at    TEXT NOT NULL,
    version       INTEGER NOT NULL,
    client_id     TEXT NOT NULL DEFAULT '',
    UNIQUE(user_id, version)
);

CREATE INDEX IF NOT EXISTS idx_entries_user_version
    ON clipboard_entries(user_id, version DESC);

CREATE TABLE IF NOT EXISTS user_metadata (
    user_id  INTEGER NOT NULL REFERENCES users(id),
    key      TEXT NOT NULL,
    value    INTEGER NOT NULL,
    PRIMARY KEY (user_id, key)
);
";
