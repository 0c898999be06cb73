//! Wire types shared between the reader client and the platform API.
//!
//! Field names follow the platform's JSON conventions (`camelCase`). Timestamps
//! are carried as the RFC 3339 strings the server emits; optional fields are
//! tolerated because several endpoints omit them.

use serde::{Deserialize, Serialize};
use serde_json::Value;

// ============================================================================
// Comments
// ============================================================================

/// Public profile fields embedded in every comment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommentAuthor {
    pub id: String,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub profile_picture: Option<String>,
    #[serde(default)]
    pub profile_image_url: Option<String>,
}

/// A comment attached to exactly one series or one chapter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Comment {
    pub id: String,
    pub user_id: String,
    #[serde(default)]
    pub series_id: Option<String>,
    #[serde(default)]
    pub chapter_id: Option<String>,
    pub content: String,
    #[serde(default)]
    pub created_at: Option<String>,
    #[serde(default)]
    pub updated_at: Option<String>,
    pub user: CommentAuthor,
}

/// Body for `POST .../comments` and `PATCH /api/comments/{id}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommentContentRequest {
    pub content: String,
}

// ============================================================================
// Home page sections
// ============================================================================

/// A series card as returned by the featured, pinned and popular sections.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SeriesCard {
    pub id: String,
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cover_image_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rating: Option<f64>,
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub genres: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub author: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chapter: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<String>,
}

/// A popular-today entry; `rank` is 1-based and assigned client-side.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RankedSeries {
    pub rank: u32,
    #[serde(flatten)]
    pub series: SeriesCard,
}

// ============================================================================
// Settings
// ============================================================================

/// Response of `GET /api/settings/public/ad-intensity`.
///
/// Missing fields fall back individually to the platform defaults.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AdIntensity {
    pub level: u8,
    pub description: String,
    pub enabled: bool,
}

impl Default for AdIntensity {
    fn default() -> Self {
        Self {
            level: 3,
            description: "Standard".to_string(),
            enabled: true,
        }
    }
}

// ============================================================================
// Errors and events
// ============================================================================

/// Error body returned by the API on non-2xx responses.
///
/// Handlers report the reason under `message` or `error`, and some send both.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorBody {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ErrorBody {
    /// The reason to show, preferring `message` over `error`.
    pub fn into_reason(self) -> Option<String> {
        self.message.or(self.error)
    }
}

/// Inbound frame on the `/ws` notification channel.
///
/// Servers have used `type` and `event` for the topic name and `data` for the
/// payload; all spellings are accepted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventFrame {
    #[serde(alias = "type", alias = "event")]
    pub topic: String,
    #[serde(default, alias = "data")]
    pub payload: Value,
}
