//! Represents an event, the destination every photo upload targets.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// Status value that keeps an event open for submissions.
pub const ACTIVE_STATUS: &str = "ativo";

/// An event guests can submit photos to.
///
/// The `status` column is free text written by organizers. Only the active
/// value (compared trimmed and case-insensitively) accepts uploads.
#[derive(Serialize, Deserialize, Clone, FromRow, Debug)]
#[serde(rename_all = "camelCase")]
pub struct Event {
    /// Unique identifier for this event.
    pub id: Uuid,

    /// Display name chosen by the organizer.
    pub name: String,

    /// Free-text status, e.g. "ativo" or "inativo".
    pub status: String,

    /// When this event was created.
    pub created_at: DateTime<Utc>,
}

impl Event {
    /// True when the event still accepts photo submissions.
    pub fn accepts_uploads(&self) -> bool {
        is_active_status(&self.status)
    }
}

/// Normalize and compare a raw status against [`ACTIVE_STATUS`].
pub fn is_active_status(status: &str) -> bool {
    status.trim().to_lowercase() == ACTIVE_STATUS
}
