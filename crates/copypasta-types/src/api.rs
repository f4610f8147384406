use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::models::ClipboardEntry;

// -- Auth --

#[derive(Debug, Serialize, Deserialize)]
pub struct RegisterForm {
    pub username: String,
    pub password: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct LoginForm {
    pub username: String,
    pub password: String,
}

// -- Clipboard --

#[derive(Debug, Serialize, Deserialize)]
pub struct PasteRequest {
    #[serde(rename = "type")]
    pub content_type: String,
    pub content: String,
    /// A JSON string is stored as-is; any other value is stored in its
    /// compact serialization; absent defaults to `"{}"`.
    #[serde(default)]
    pub metadata: Option<Value>,
    #[serde(default)]
    pub client_id: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct PasteResponse {
    pub status: String,
    pub version: i64,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ClipboardResponse {
    pub status: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<ClipboardEntry>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct HistoryResponse {
    pub status: String,
    pub data: Vec<ClipboardEntry>,
}

/// Long-poll response. `data` is always present on the wire: `null` on
/// timeout, the delivered entry on success.
#[derive(Debug, Serialize, Deserialize)]
pub struct PollResponse {
    pub status: String,
    pub version: i64,
    pub data: Option<ClipboardEntry>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
}
