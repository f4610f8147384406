use std::time::Duration;

use anyhow::anyhow;
use axum::extract::{Extension, State};
use axum::Json;
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use image::ImageFormat;
use serde::Deserialize;
use serde_json::Value;
use tokio::time::Instant;
use tracing::debug;

use copypasta_notify::WaitOutcome;
use copypasta_store::models::EntryRow;
use copypasta_store::{Database, StoreError};
use copypasta_types::api::{
    ClipboardResponse, HistoryResponse, PasteRequest, PasteResponse, PollResponse,
};
use copypasta_types::models::{ClipboardEntry, ContentType};

use crate::auth::AppState;
use crate::error::{ApiError, ApiQuery};
use crate::middleware::CurrentUser;

/// Byte cap on rich (HTML) content.
const MAX_RICH_CONTENT_BYTES: usize = 10 * 1024 * 1024;

const DEFAULT_POLL_TIMEOUT_SECS: u64 = 30;
const DEFAULT_HISTORY_QUERY_LIMIT: u32 = 10;

/// Run a store call on the blocking pool. SQLite does real disk I/O
/// (fsync on commit under WAL), which must never stall an async worker.
async fn run_db<T, F>(state: &AppState, f: F) -> Result<T, ApiError>
where
    T: Send + 'static,
    F: FnOnce(&Database) -> Result<T, StoreError> + Send + 'static,
{
    let state = state.clone();
    tokio::task::spawn_blocking(move || f(&state.db))
        .await
        .map_err(|e| ApiError::Internal(anyhow!("join error: {e}")))?
        .map_err(ApiError::from)
}

/// POST /api/paste -- validate, insert atomically, publish the new
/// version so every long-poll waiter for this user wakes.
///
/// The body is taken as a raw JSON value so shape errors come back as
/// 400s with the same `{"error": ...}` body as every other rejection.
pub async fn paste(
    State(state): State<AppState>,
    Extension(user): Extension<CurrentUser>,
    Json(body): Json<Value>,
) -> Result<Json<PasteResponse>, ApiError> {
    let req: PasteRequest = serde_json::from_value(body)
        .map_err(|e| ApiError::BadRequest(format!("invalid paste request: {e}")))?;

    let content_type = ContentType::parse(&req.content_type)
        .ok_or_else(|| ApiError::BadRequest(format!("unknown content type: {}", req.content_type)))?;
    validate_content(content_type, &req.content)?;

    let metadata = normalize_metadata(req.metadata);
    let client_id = req.client_id.unwrap_or_default();

    let user_id = user.id;
    let content = req.content;
    let (_entry_id, version) = run_db(&state, move |db| {
        db.insert_entry(
            user_id,
            content_type.as_str(),
            &content,
            &metadata,
            &client_id,
        )
    })
    .await?;
    state.notifier.publish(user_id, version).await;

    debug!(
        "{} ({}) pasted {} v{}",
        user.username,
        user.id,
        content_type.as_str(),
        version
    );

    Ok(Json(PasteResponse {
        status: "success".into(),
        version,
    }))
}

/// GET /api/clipboard (and the legacy alias GET /api/data) -- the current
/// entry without waiting.
pub async fn current(
    State(state): State<AppState>,
    Extension(user): Extension<CurrentUser>,
) -> Result<Json<ClipboardResponse>, ApiError> {
    let user_id = user.id;
    match run_db(&state, move |db| db.get_current(user_id)).await? {
        Some(row) => Ok(Json(ClipboardResponse {
            status: "success".into(),
            data: Some(entry_to_wire(row)),
        })),
        None => Ok(Json(ClipboardResponse {
            status: "empty".into(),
            data: None,
        })),
    }
}

#[derive(Debug, Deserialize)]
pub struct HistoryQuery {
    #[serde(default = "default_history_limit")]
    pub limit: u32,
}

fn default_history_limit() -> u32 {
    DEFAULT_HISTORY_QUERY_LIMIT
}

/// GET /api/clipboard/history?limit=N -- newest first, N clamped to
/// [1, H] by the store.
pub async fn history(
    State(state): State<AppState>,
    Extension(user): Extension<CurrentUser>,
    ApiQuery(query): ApiQuery<HistoryQuery>,
) -> Result<Json<HistoryResponse>, ApiError> {
    let user_id = user.id;
    let limit = query.limit;
    let rows = run_db(&state, move |db| db.get_history(user_id, limit)).await?;
    Ok(Json(HistoryResponse {
        status: "success".into(),
        data: rows.into_iter().map(entry_to_wire).collect(),
    }))
}

#[derive(Debug, Deserialize)]
pub struct PollQuery {
    /// The client's last known version; 0 (or absent) on first connect.
    #[serde(default)]
    pub version: i64,
    /// Seconds to hold the request open, clamped to [1, POLL_MAX_TIMEOUT].
    pub timeout: Option<u64>,
    pub client_id: Option<String>,
}

/// GET /api/poll -- long poll for a change past the caller's version.
///
/// The store is consulted first so a client that is already behind gets
/// an immediate answer; only then does the request park on the notifier.
/// A delivery whose `client_id` matches the caller's is the caller's own
/// echo: it bumps the known version and the wait continues, so the echo
/// never round-trips and a foreign write can still be delivered before
/// the deadline. If the client disconnects, this future is dropped and
/// the waiter detaches; no response is written.
pub async fn poll(
    State(state): State<AppState>,
    Extension(user): Extension<CurrentUser>,
    ApiQuery(query): ApiQuery<PollQuery>,
) -> Result<Json<PollResponse>, ApiError> {
    let timeout = query
        .timeout
        .unwrap_or(DEFAULT_POLL_TIMEOUT_SECS)
        .clamp(1, state.poll_max_timeout.max(1));
    let deadline = Instant::now() + Duration::from_secs(timeout);
    let client_id = query.client_id.unwrap_or_default();
    let user_id = user.id;
    let mut known = query.version.max(0);

    loop {
        let latest = run_db(&state, move |db| db.latest_version(user_id)).await?;
        let advanced = if latest > known {
            latest
        } else {
            match state.notifier.wait_for_change(user_id, known, deadline).await {
                WaitOutcome::Advanced(version) => version,
                WaitOutcome::Timeout(version) => return Ok(Json(timeout_response(version))),
            }
        };

        let Some(row) = run_db(&state, move |db| db.get_current(user_id)).await? else {
            // Version advanced but the row is gone already; nothing to
            // deliver.
            return Ok(Json(timeout_response(advanced)));
        };

        if !client_id.is_empty() && row.client_id == client_id {
            known = known.max(row.version);
            if Instant::now() >= deadline {
                return Ok(Json(timeout_response(known)));
            }
            continue;
        }

        let version = row.version;
        debug!(
            "{} ({}) poll delivered v{} to client {:?}",
            user.username, user.id, version, client_id
        );
        return Ok(Json(PollResponse {
            status: "success".into(),
            version,
            data: Some(entry_to_wire(row)),
        }));
    }
}

fn timeout_response(version: i64) -> PollResponse {
    PollResponse {
        status: "timeout".into(),
        version,
        data: None,
    }
}

fn entry_to_wire(row: EntryRow) -> ClipboardEntry {
    ClipboardEntry {
        content_type: row.content_type,
        content: row.content,
        metadata: row.metadata,
        created_at: row.created_at,
        version: row.version,
        client_id: row.client_id,
    }
}

fn validate_content(content_type: ContentType, content: &str) -> Result<(), ApiError> {
    match content_type {
        ContentType::Text => {
            if content.trim().is_empty() {
                return Err(ApiError::BadRequest("text content must not be empty".into()));
            }
        }
        ContentType::Rich => {
            if content.len() > MAX_RICH_CONTENT_BYTES {
                return Err(ApiError::PayloadTooLarge);
            }
        }
        ContentType::Image => validate_image(content)?,
    }
    Ok(())
}

/// Accept a base64 payload (optionally behind a `data:*;base64,` prefix)
/// whose decoded bytes sniff as PNG, JPEG or GIF. The decoded bytes are
/// dropped afterwards; the original string is what gets stored.
fn validate_image(content: &str) -> Result<(), ApiError> {
    let encoded = if content.starts_with("data:") {
        content
            .split_once("base64,")
            .map(|(_, rest)| rest)
            .ok_or_else(|| {
                ApiError::BadRequest("image data URL must be base64-encoded".into())
            })?
    } else {
        content
    };

    let bytes = STANDARD
        .decode(encoded.trim())
        .map_err(|_| ApiError::BadRequest("image content is not valid base64".into()))?;

    match image::guess_format(&bytes) {
        Ok(ImageFormat::Png | ImageFormat::Jpeg | ImageFormat::Gif) => Ok(()),
        _ => Err(ApiError::BadRequest("unsupported or corrupt image data".into())),
    }
}

/// Metadata is stored verbatim and never parsed again: a JSON string is
/// kept as-is, any other value is stored in its compact serialization,
/// absence becomes the empty object.
fn normalize_metadata(metadata: Option<Value>) -> String {
    match metadata {
        None | Some(Value::Null) => "{}".to_string(),
        Some(Value::String(s)) => s,
        Some(other) => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PNG_MAGIC: &[u8] = &[0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A, 0, 0, 0, 0];

    #[test]
    fn image_validation_accepts_known_magic_bytes() {
        let png = STANDARD.encode(PNG_MAGIC);
        assert!(validate_image(&png).is_ok());
        assert!(validate_image(&format!("data:image/png;base64,{png}")).is_ok());

        let gif = STANDARD.encode(b"GIF89a\x01\x00\x01\x00");
        assert!(validate_image(&gif).is_ok());
    }

    #[test]
    fn image_validation_rejects_garbage() {
        // Valid base64, but not an image.
        let not_an_image = STANDARD.encode(b"hello world");
        assert!(validate_image(&not_an_image).is_err());

        assert!(validate_image("%%%not-base64%%%").is_err());
        assert!(validate_image("data:image/png,rawbytes").is_err());
    }

    #[test]
    fn metadata_is_stored_verbatim() {
        assert_eq!(normalize_metadata(None), "{}");
        assert_eq!(normalize_metadata(Some(Value::Null)), "{}");
        assert_eq!(
            normalize_metadata(Some(Value::String("{\"ts\":1}".into()))),
            "{\"ts\":1}"
        );
        assert_eq!(
            normalize_metadata(Some(serde_json::json!({"ua": "tray"}))),
            "{\"ua\":\"tray\"}"
        );
    }

    #[test]
    fn rich_content_size_cap() {
        let at_cap = "x".repeat(MAX_RICH_CONTENT_BYTES);
        assert!(validate_content(ContentType::Rich, &at_cap).is_ok());

        let over = "x".repeat(MAX_RICH_CONTENT_BYTES + 1);
        assert!(matches!(
            validate_content(ContentType::Rich, &over),
            Err(ApiError::PayloadTooLarge)
        ));
    }

    #[test]
    fn text_must_be_non_empty() {
        assert!(validate_content(ContentType::Text, "hi").is_ok());
        assert!(validate_content(ContentType::Text, "   \n\t").is_err());
        assert!(validate_content(ContentType::Text, "").is_err());
    }
}
