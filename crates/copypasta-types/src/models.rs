use serde::{Deserialize, Serialize};

/// Content vocabulary accepted by the relay. Anything else is rejected at
/// the API boundary and never reaches storage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContentType {
    /// Plain text; must be non-empty after trimming.
    Text,
    /// HTML fragment, capped at 10 MiB.
    Rich,
    /// Base64 PNG/JPEG/GIF, optionally carrying a `data:*;base64,` prefix.
    /// The base64 string is what gets stored, never the decoded bytes.
    Image,
}

impl ContentType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Text => "text",
            Self::Rich => "rich",
            Self::Image => "image",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "text" => Some(Self::Text),
            "rich" => Some(Self::Rich),
            "image" => Some(Self::Image),
            _ => None,
        }
    }
}

/// One clipboard submission as it travels over the wire.
///
/// `metadata` is an opaque JSON-as-string the server stores verbatim and
/// never parses; its layout is a client convention. `client_id` is an
/// opaque caller-chosen identifier used only for loop-back suppression --
/// a collision across devices merely suppresses an unrelated write, so
/// clients should pick long random suffixes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClipboardEntry {
    pub content_type: String,
    pub content: String,
    pub metadata: String,
    pub created_at: String,
    pub version: i64,
    pub client_id: String,
}
