//! Represents a photo submitted to an event.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use std::fmt;
use uuid::Uuid;

/// Uploader name recorded when the guest leaves the field empty.
pub const ANONYMOUS_USER: &str = "anonymous";

/// Which entry point produced the photo.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, sqlx::Type)]
#[serde(rename_all = "lowercase")]
#[sqlx(rename_all = "lowercase")]
pub enum UploadMethod {
    /// Single multipart request to `/upload`.
    Direct,
    /// Chunk pipeline ending in `/finalize-upload`.
    Chunked,
}

impl fmt::Display for UploadMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UploadMethod::Direct => f.write_str("direct"),
            UploadMethod::Chunked => f.write_str("chunked"),
        }
    }
}

/// A persisted photo record.
///
/// Written only after the backing object has been stored; the record is the
/// authoritative view readers use to list an event's photos.
#[derive(Serialize, Deserialize, Clone, FromRow, Debug)]
#[serde(rename_all = "camelCase")]
pub struct Photo {
    pub id: Uuid,

    /// Event the photo belongs to.
    pub event_id: Uuid,

    /// Public URL of the stored object.
    pub url: String,

    /// Original filename as sent by the client.
    pub name: String,

    /// Free-text uploader name, [`ANONYMOUS_USER`] when absent.
    pub user_name: String,

    /// Size in bytes.
    pub size: i64,

    pub upload_method: UploadMethod,

    /// Key of the object in the object store.
    pub storage_key: String,

    /// Server timestamp taken at insert.
    pub created_at: DateTime<Utc>,
}

/// Fields the caller supplies when recording a new photo.
#[derive(Clone, Debug)]
pub struct NewPhoto {
    pub event_id: Uuid,
    pub url: String,
    pub name: String,
    pub user_name: Option<String>,
    pub size: i64,
    pub upload_method: UploadMethod,
    pub storage_key: String,
}

impl NewPhoto {
    /// Uploader name with blanks collapsed to [`ANONYMOUS_USER`].
    pub fn user_name_or_default(&self) -> String {
        self.user_name
            .as_deref()
            .map(str::trim)
            .filter(|name| !name.is_empty())
            .unwrap_or(ANONYMOUS_USER)
            .to_string()
    }
}
