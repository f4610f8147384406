use thiserror::Error;

/// Failures surfaced by the storage layer. `UsernameTaken` is the only
/// variant callers branch on; everything else is opaque persistence
/// failure that the API maps to a logged 500.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("username already taken")]
    UsernameTaken,

    #[error("database lock poisoned")]
    LockPoisoned,

    #[error(transparent)]
    Sqlite(#[from] rusqlite::Error),
}
