//! Event store collaborator. The upload pipeline treats it as a read-only gate.

use crate::{models::event::Event, services::StoreResult};
use async_trait::async_trait;
use chrono::Utc;
use sqlx::SqlitePool;
use std::sync::Arc;
use uuid::Uuid;

#[async_trait]
pub trait EventStore: Send + Sync {
    /// Fetch an event by id. `Ok(None)` when it does not exist.
    async fn get_event(&self, id: Uuid) -> StoreResult<Option<Event>>;
}

/// SQLite-backed event table.
#[derive(Clone)]
pub struct SqliteEventStore {
    db: Arc<SqlitePool>,
}

impl SqliteEventStore {
    pub fn new(db: Arc<SqlitePool>) -> Self {
        Self { db }
    }

    /// Insert a new event with the given status.
    pub async fn create_event(&self, name: &str, status: &str) -> StoreResult<Event> {
        let event = sqlx::query_as::<_, Event>(
            "INSERT INTO events (id, name, status, created_at) VALUES (?, ?, ?, ?)
             RETURNING id, name, status, created_at",
        )
        .bind(Uuid::new_v4())
        .bind(name)
        .bind(status)
        .bind(Utc::now())
        .fetch_one(&*self.db)
        .await?;
        Ok(event)
    }
}

#[async_trait]
impl EventStore for SqliteEventStore {
    async fn get_event(&self, id: Uuid) -> StoreResult<Option<Event>> {
        let event = sqlx::query_as::<_, Event>(
            "SELECT id, name, status, created_at FROM events WHERE id = ?",
        )
        .bind(id)
        .fetch_optional(&*self.db)
        .await?;
        Ok(event)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db;

    #[tokio::test]
    async fn create_and_get_events() {
        let pool = db::connect("sqlite::memory:").await.unwrap();
        db::run_migrations(&pool).await.unwrap();
        let store = SqliteEventStore::new(Arc::new(pool));

        let event = store.create_event("Wedding", "ativo").await.unwrap();
        let fetched = store.get_event(event.id).await.unwrap().unwrap();
        assert_eq!(fetched.name, "Wedding");
        assert!(fetched.accepts_uploads());

        let closed = store.create_event("Reunion", "inativo").await.unwrap();
        let closed = store.get_event(closed.id).await.unwrap().unwrap();
        assert!(!closed.accepts_uploads());

        assert!(store.get_event(Uuid::new_v4()).await.unwrap().is_none());
    }
}
