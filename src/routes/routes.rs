//! Defines routes for the photo intake service.
//!
//! ## Structure
//! - **Upload pipeline**
//!   - `POST /upload-chunk`    - store one chunk (multipart)
//!   - `POST /finalize-upload` - assemble chunks and commit the photo (JSON)
//!   - `POST /upload`          - direct upload of a small file (multipart)
//!
//! - **Read endpoints**
//!   - `GET  /events/{id}`        - event and whether it accepts uploads
//!   - `GET  /events/{id}/photos` - photos of an event
//!   - `GET  /objects/{*key}`     - public photo payload (also `HEAD`)
//!
//! - **Probes**: `GET /healthz`, `GET /readyz`

use crate::{
    handlers::{
        event_handlers::{get_event, list_event_photos},
        health_handlers::{healthz, readyz},
        object_handlers::{get_object, head_object},
        upload_handlers::{direct_upload, finalize_upload, upload_chunk},
    },
    services::upload_service::MIB,
    state::AppState,
};
use axum::{
    Router,
    extract::DefaultBodyLimit,
    routing::{get, post},
};

/// Multipart framing allowance on top of the payload itself.
const MULTIPART_OVERHEAD: u64 = MIB;

/// Request body ceilings per upload route.
#[derive(Debug, Clone, Copy)]
pub struct BodyLimits {
    /// Largest accepted chunk.
    pub chunk: u64,
    /// Largest accepted direct upload, normally the file size ceiling.
    pub direct: u64,
}

impl BodyLimits {
    fn chunk_limit(&self) -> usize {
        (self.chunk + MULTIPART_OVERHEAD) as usize
    }

    fn direct_limit(&self) -> usize {
        (self.direct + MULTIPART_OVERHEAD) as usize
    }
}

/// Build and return the router for all routes.
///
/// The router carries shared state (`AppState`) to all handlers.
pub fn routes(limits: BodyLimits) -> Router<AppState> {
    Router::new()
        // health endpoints (mounted at root)
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        // upload pipeline
        .route(
            "/upload-chunk",
            post(upload_chunk).layer(DefaultBodyLimit::max(limits.chunk_limit())),
        )
        .route("/finalize-upload", post(finalize_upload))
        .route(
            "/upload",
            post(direct_upload).layer(DefaultBodyLimit::max(limits.direct_limit())),
        )
        // read endpoints
        .route("/events/{id}", get(get_event))
        .route("/events/{id}/photos", get(list_event_photos))
        .route("/objects/{*key}", get(get_object).head(head_object))
}
