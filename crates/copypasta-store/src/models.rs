/// Database row types -- these map directly to SQLite rows.
/// Distinct from the copypasta-types wire models to keep the storage
/// layer free of any serde surface.

pub struct UserRow {
    pub id: i64,
    pub username: String,
    pub password_hash: String,
    pub created_at: String,
}

pub struct EntryRow {
    pub id: i64,
    pub user_id: i64,
    pub content_type: String,
    pub content: String,
    pub metadata: String,
    pub created_at: String,
    pub version: i64,
    pub client_id: String,
}
