//! Represents an object (file payload) held by the object store.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// Metadata of a stored object. The payload itself lives on disk.
#[derive(Serialize, Deserialize, Clone, FromRow, Debug)]
#[serde(rename_all = "camelCase")]
pub struct StoredObject {
    /// Internal UUID for DB indexing.
    pub id: Uuid,

    /// Object key (path-like identifier, e.g. `uploads/1700000000000_a.jpg`).
    pub key: String,

    /// Content type (MIME type).
    pub content_type: Option<String>,

    /// Size in bytes.
    pub size_bytes: i64,

    /// MD5 hex digest of the payload.
    pub etag: Option<String>,

    /// Whether the object may be served to anonymous readers.
    pub is_public: bool,

    /// Timestamp when the object was written.
    pub created_at: DateTime<Utc>,
}
