//! Photo metadata collaborator.

use crate::{
    models::photo::{NewPhoto, Photo},
    services::StoreResult,
};
use async_trait::async_trait;
use chrono::Utc;
use sqlx::SqlitePool;
use std::sync::Arc;
use uuid::Uuid;

#[async_trait]
pub trait PhotoStore: Send + Sync {
    /// Persist a photo record stamped with the server time.
    async fn insert_photo(&self, photo: NewPhoto) -> StoreResult<Photo>;

    /// All photos of an event, newest first.
    async fn list_by_event(&self, event_id: Uuid) -> StoreResult<Vec<Photo>>;
}

#[derive(Clone)]
pub struct SqlitePhotoStore {
    db: Arc<SqlitePool>,
}

impl SqlitePhotoStore {
    pub fn new(db: Arc<SqlitePool>) -> Self {
        Self { db }
    }
}

#[async_trait]
impl PhotoStore for SqlitePhotoStore {
    async fn insert_photo(&self, photo: NewPhoto) -> StoreResult<Photo> {
        let user_name = photo.user_name_or_default();
        let record = sqlx::query_as::<_, Photo>(
            r#"
            INSERT INTO photos (
                id, event_id, url, name, user_name, size, upload_method, storage_key, created_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            RETURNING id, event_id, url, name, user_name, size, upload_method, storage_key,
                      created_at
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(photo.event_id)
        .bind(&photo.url)
        .bind(&photo.name)
        .bind(user_name)
        .bind(photo.size)
        .bind(photo.upload_method)
        .bind(&photo.storage_key)
        .bind(Utc::now())
        .fetch_one(&*self.db)
        .await?;
        Ok(record)
    }

    async fn list_by_event(&self, event_id: Uuid) -> StoreResult<Vec<Photo>> {
        let photos = sqlx::query_as::<_, Photo>(
            "SELECT id, event_id, url, name, user_name, size, upload_method, storage_key,
                    created_at
             FROM photos WHERE event_id = ? ORDER BY created_at DESC",
        )
        .bind(event_id)
        .fetch_all(&*self.db)
        .await?;
        Ok(photos)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{db, models::photo::UploadMethod, services::event_store::SqliteEventStore};

    #[tokio::test]
    async fn blank_user_name_is_recorded_as_anonymous() {
        let pool = Arc::new(db::connect("sqlite::memory:").await.unwrap());
        db::run_migrations(&pool).await.unwrap();
        let event = SqliteEventStore::new(pool.clone())
            .create_event("Party", "ativo")
            .await
            .unwrap();
        let store = SqlitePhotoStore::new(pool);

        let photo = store
            .insert_photo(NewPhoto {
                event_id: event.id,
                url: "http://photos.test/objects/uploads/1_a.jpg".into(),
                name: "a.jpg".into(),
                user_name: Some("   ".into()),
                size: 10,
                upload_method: UploadMethod::Chunked,
                storage_key: "uploads/1_a.jpg".into(),
            })
            .await
            .unwrap();
        assert_eq!(photo.user_name, "anonymous");
        assert_eq!(photo.upload_method, UploadMethod::Chunked);

        let listed = store.list_by_event(event.id).await.unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].storage_key, "uploads/1_a.jpg");
        assert!(store.list_by_event(Uuid::new_v4()).await.unwrap().is_empty());
    }
}
