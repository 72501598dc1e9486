//! Read-only event endpoints used by the guest upload page and galleries.

use crate::{
    errors::AppError,
    models::{event::Event, photo::Photo},
    state::AppState,
};
use axum::{
    Json,
    extract::{Path, State},
};
use serde::Serialize;
use uuid::Uuid;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EventResponse {
    pub success: bool,
    pub event: Event,
    /// Whether the event currently accepts photo submissions.
    pub accepting_uploads: bool,
}

#[derive(Debug, Serialize)]
pub struct PhotoListResponse {
    pub success: bool,
    pub photos: Vec<Photo>,
}

/// `GET /events/{id}`
pub async fn get_event(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<EventResponse>, AppError> {
    let event = find_event(&state, &id).await?;
    Ok(Json(EventResponse {
        success: true,
        accepting_uploads: event.accepts_uploads(),
        event,
    }))
}

/// `GET /events/{id}/photos`: newest first.
pub async fn list_event_photos(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<PhotoListResponse>, AppError> {
    let event = find_event(&state, &id).await?;
    let photos = state.photos.list_by_event(event.id).await?;
    Ok(Json(PhotoListResponse {
        success: true,
        photos,
    }))
}

async fn find_event(state: &AppState, id: &str) -> Result<Event, AppError> {
    let not_found = || AppError::not_found(format!("event `{}` not found", id));
    let id = Uuid::parse_str(id).map_err(|_| not_found())?;
    state.events.get_event(id).await?.ok_or_else(not_found)
}
