//! Shared state handed to every handler.

use crate::services::{
    chunk_store::ChunkStore,
    event_store::{EventStore, SqliteEventStore},
    object_store::{LocalObjectStore, ObjectStore},
    photo_store::{PhotoStore, SqlitePhotoStore},
    upload_service::{UploadLimits, UploadService},
};
use sqlx::SqlitePool;
use std::{path::PathBuf, sync::Arc};

#[derive(Clone)]
pub struct AppState {
    /// Shared SQLite pool, used directly by readiness checks.
    pub db: Arc<SqlitePool>,
    pub uploads: UploadService,
    pub events: Arc<dyn EventStore>,
    pub photos: Arc<dyn PhotoStore>,
    pub objects: Arc<dyn ObjectStore>,
}

impl AppState {
    /// Wire the SQLite and local-disk collaborators into one state.
    pub fn local(
        db: Arc<SqlitePool>,
        chunk_dir: impl Into<PathBuf>,
        storage_dir: impl Into<PathBuf>,
        public_base_url: impl Into<String>,
        limits: UploadLimits,
    ) -> Self {
        let events = Arc::new(SqliteEventStore::new(db.clone()));
        let photos = Arc::new(SqlitePhotoStore::new(db.clone()));
        let objects = Arc::new(LocalObjectStore::new(
            db.clone(),
            storage_dir,
            public_base_url,
        ));
        let uploads = UploadService::new(
            ChunkStore::new(chunk_dir),
            events.clone(),
            objects.clone(),
            photos.clone(),
            limits,
        );

        Self {
            db,
            uploads,
            events,
            photos,
            objects,
        }
    }
}
