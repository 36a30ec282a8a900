//! Shared types between the save engine, the document store and status consumers
//!
//! These types are used by:
//! - the `save-sync` engine (document sessions, backends)
//! - the document-store HTTP API
//! - status badges and conflict banners in the presentation layer (TypeScript via ts-rs)
//!
//! Serializable with serde for JSON over HTTP

use chrono::{DateTime, Local, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use ts_rs::TS;

// ============================================================================
// Documents
// ============================================================================

/// Unique identifier for a persisted document
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash, TS)]
#[ts(export, export_to = "../../bindings/save_sync.ts")]
pub struct DocumentId(pub String);

impl DocumentId {
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for DocumentId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for DocumentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for DocumentId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

/// Opaque optimistic-concurrency token.
///
/// Every writer of a document shares the same token until one of them
/// writes successfully; the store then hands out a fresh one.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash, TS)]
#[ts(export, export_to = "../../bindings/save_sync.ts")]
pub struct Revision(pub String);

impl Revision {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Revision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Revision {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

/// The persisted artifact: a project's calculation graph plus metadata
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, TS)]
#[ts(export, export_to = "../../bindings/save_sync.ts")]
pub struct Document {
    pub id: DocumentId,
    pub name: String,
    /// Serialized graph snapshot, opaque to the save engine
    #[ts(type = "unknown")]
    pub content: serde_json::Value,
    /// Schema tag of `content`
    pub format_version: u32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Token of the write currently stored
    pub revision: Revision,
}

/// What the editor hands over right before a save attempt
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, TS)]
#[ts(export, export_to = "../../bindings/save_sync.ts")]
pub struct EditorSnapshot {
    #[ts(type = "unknown")]
    pub content: serde_json::Value,
    pub format_version: u32,
}

impl EditorSnapshot {
    pub fn new(content: serde_json::Value, format_version: u32) -> Self {
        Self {
            content,
            format_version,
        }
    }
}

impl From<&Document> for EditorSnapshot {
    fn from(document: &Document) -> Self {
        Self {
            content: document.content.clone(),
            format_version: document.format_version,
        }
    }
}

// ============================================================================
// Save Status
// ============================================================================

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default, TS)]
#[serde(rename_all = "kebab-case")]
#[ts(export, export_to = "../../bindings/save_sync.ts")]
pub enum SaveStatus {
    #[default]
    Idle,
    Saving,
    Saved,
    Conflict,
    Error,
    OfflineQueued,
}

impl SaveStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            SaveStatus::Idle => "idle",
            SaveStatus::Saving => "saving",
            SaveStatus::Saved => "saved",
            SaveStatus::Conflict => "conflict",
            SaveStatus::Error => "error",
            SaveStatus::OfflineQueued => "offline-queued",
        }
    }

    /// Whether a manual "save now" should go through the offline queue
    pub fn is_retry_pending(self) -> bool {
        matches!(self, SaveStatus::Error | SaveStatus::OfflineQueued)
    }
}

impl fmt::Display for SaveStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-document save state as published to subscribers
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default, TS)]
#[ts(export, export_to = "../../bindings/save_sync.ts")]
pub struct SaveStateSnapshot {
    pub status: SaveStatus,
    pub is_dirty: bool,
    pub known_server_revision: Option<Revision>,
    pub last_saved_at: Option<DateTime<Utc>>,
    /// Set only while `status` is `conflict`
    pub conflict_revision: Option<Revision>,
    pub last_error: Option<String>,
}

impl SaveStateSnapshot {
    /// Badge text for the status indicator
    pub fn label(&self) -> StatusLabel {
        match self.status {
            SaveStatus::Idle if self.is_dirty => StatusLabel::passive("Unsaved"),
            SaveStatus::Idle => StatusLabel::passive(""),
            SaveStatus::Saving => StatusLabel::passive("Saving…"),
            SaveStatus::Saved => match self.last_saved_at {
                Some(at) => StatusLabel::passive(format!(
                    "Saved {}",
                    at.with_timezone(&Local).format("%H:%M")
                )),
                None => StatusLabel::passive("Saved"),
            },
            SaveStatus::Conflict => StatusLabel::passive("⚠ Conflict"),
            SaveStatus::Error => StatusLabel::retry("⚠ Save failed"),
            SaveStatus::OfflineQueued => StatusLabel::retry("Queued — offline"),
        }
    }
}

/// Rendered status badge; `retryable` badges trigger "save now" on click
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, TS)]
#[ts(export, export_to = "../../bindings/save_sync.ts")]
pub struct StatusLabel {
    pub text: String,
    pub retryable: bool,
}

impl StatusLabel {
    fn passive(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            retryable: false,
        }
    }

    fn retry(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            retryable: true,
        }
    }
}

/// Offline retry queue state as published to subscribers
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default, TS)]
#[ts(export, export_to = "../../bindings/save_sync.ts")]
pub struct QueueSnapshot {
    pub has_pending: bool,
    pub retry_count: u32,
    pub next_retry_at: Option<DateTime<Utc>>,
}

impl QueueSnapshot {
    pub fn is_idle(&self) -> bool {
        !self.has_pending && self.retry_count == 0 && self.next_retry_at.is_none()
    }
}

// ============================================================================
// Document Store API Types
// ============================================================================

/// Request to create a document
#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[ts(export, export_to = "../../bindings/save_sync.ts")]
pub struct CreateDocumentRequest {
    pub name: String,
    #[ts(type = "unknown")]
    pub content: serde_json::Value,
    pub format_version: u32,
}

/// Conditional write of a whole document
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, TS)]
#[ts(export, export_to = "../../bindings/save_sync.ts")]
pub struct SaveDocumentRequest {
    pub name: String,
    #[ts(type = "unknown")]
    pub content: serde_json::Value,
    pub format_version: u32,
    /// Write only if the stored revision still equals this token
    pub expected_revision: Revision,
    /// Writer session, recorded for diagnostics only
    pub session_id: String,
}

/// Response for a successful conditional write
#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[ts(export, export_to = "../../bindings/save_sync.ts")]
pub struct SaveDocumentResponse {
    pub id: DocumentId,
    pub revision: Revision,
    pub saved: bool,
}

/// Machine-readable error body
#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[ts(export, export_to = "../../bindings/save_sync.ts")]
pub struct ApiErrorDetail {
    pub code: String,
    pub message: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[ts(export, export_to = "../../bindings/save_sync.ts")]
pub struct ApiErrorResponse {
    pub error: ApiErrorDetail,
}

/// Revision-mismatch response; carries the token currently stored
#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[ts(export, export_to = "../../bindings/save_sync.ts")]
pub struct ConflictResponse {
    #[serde(flatten)]
    pub error: ApiErrorResponse,
    pub id: DocumentId,
    pub current_revision: Revision,
}

// ============================================================================
// Constants
// ============================================================================

/// Error codes used by the document store
pub const ERROR_CODE_CONFLICT: &str = "CONFLICT";
pub const ERROR_CODE_NOT_FOUND: &str = "NOT_FOUND";
pub const ERROR_CODE_INVALID_ID: &str = "INVALID_ID";
pub const ERROR_CODE_READ_ERROR: &str = "READ_ERROR";
pub const ERROR_CODE_WRITE_ERROR: &str = "WRITE_ERROR";

// ============================================================================
// Tests
// ============================================================================
