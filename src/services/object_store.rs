//! src/services/object_store.rs
//!
//! Object store collaborator. The pipeline only needs "put these bytes under
//! this key", "make it public" and "what is its URL"; `LocalObjectStore`
//! provides that with SQLite for metadata and local disk for payloads sharded
//! beneath `base_path/{shard}/{shard}/{key}`.

use crate::{
    models::object::StoredObject,
    services::{StoreError, StoreResult},
};
use async_trait::async_trait;
use bytes::Bytes;
use chrono::Utc;
use sqlx::SqlitePool;
use std::{
    io::{self, ErrorKind},
    path::{Path, PathBuf},
    sync::Arc,
};
use tokio::{
    fs::{self, File},
    io::{AsyncRead, AsyncWriteExt},
};
use tracing::debug;
use uuid::Uuid;

const MAX_OBJECT_KEY_LEN: usize = 1024;

/// Boxed payload reader handed to the HTTP layer for streaming.
pub type ObjectReader = Box<dyn AsyncRead + Send + Unpin>;

/// Permanent storage for assembled files.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Write `bytes` under `key`, overwriting any previous object.
    async fn put_object(
        &self,
        key: &str,
        bytes: Bytes,
        content_type: &str,
    ) -> StoreResult<StoredObject>;

    /// Allow anonymous reads of `key`.
    async fn make_public(&self, key: &str) -> StoreResult<()>;

    /// Remove `key` and its payload.
    async fn delete_object(&self, key: &str) -> StoreResult<()>;

    /// Open a public object for reading. Private or missing objects are
    /// reported as [`StoreError::ObjectNotFound`].
    async fn open_public(&self, key: &str) -> StoreResult<(StoredObject, ObjectReader)>;

    /// Public URL under which `key` is served.
    fn public_url(&self, key: &str) -> String;

    /// Cheap connectivity probe used by readiness checks.
    async fn ping(&self) -> StoreResult<()>;
}

/// Disk + SQLite object store.
#[derive(Clone)]
pub struct LocalObjectStore {
    /// Shared SQLite connection pool used for metadata operations.
    db: Arc<SqlitePool>,

    /// Base directory on disk where object payloads are stored.
    base_path: PathBuf,

    /// Prefix for public URLs, without trailing slash.
    public_base_url: String,
}

impl LocalObjectStore {
    pub fn new(
        db: Arc<SqlitePool>,
        base_path: impl Into<PathBuf>,
        public_base_url: impl Into<String>,
    ) -> Self {
        Self {
            db,
            base_path: base_path.into(),
            public_base_url: public_base_url.into().trim_end_matches('/').to_string(),
        }
    }

    pub fn base_path(&self) -> &Path {
        &self.base_path
    }

    /// Rejects empty or oversized keys, absolute keys, `..` segments and
    /// control characters.
    fn ensure_key_safe(key: &str) -> StoreResult<()> {
        if key.is_empty() || key.len() > MAX_OBJECT_KEY_LEN {
            return Err(StoreError::InvalidObjectKey);
        }
        if key.starts_with('/') || key.contains("..") {
            return Err(StoreError::InvalidObjectKey);
        }
        if key
            .bytes()
            .any(|b| b.is_ascii_control() || b == b'\\' || b == b'\0')
        {
            return Err(StoreError::InvalidObjectKey);
        }
        Ok(())
    }

    /// Two-level shard identifiers for a key: the first two bytes of
    /// MD5(key) as lowercase hex.
    fn object_shards(key: &str) -> (String, String) {
        let digest = md5::compute(key);
        (format!("{:02x}", digest[0]), format!("{:02x}", digest[1]))
    }

    /// `base_path/{shard}/{shard}/{key}`. Parent directories may not exist yet.
    fn object_path(&self, key: &str) -> PathBuf {
        let (shard_a, shard_b) = Self::object_shards(key);
        let mut path = self.base_path.clone();
        path.push(shard_a);
        path.push(shard_b);
        path.push(key);
        path
    }

    async fn fetch_object(&self, key: &str) -> StoreResult<StoredObject> {
        sqlx::query_as::<_, StoredObject>(
            "SELECT id, key, content_type, size_bytes, etag, is_public, created_at
             FROM objects WHERE key = ?",
        )
        .bind(key)
        .fetch_one(&*self.db)
        .await
        .map_err(|err| match err {
            sqlx::Error::RowNotFound => StoreError::ObjectNotFound(key.to_string()),
            other => StoreError::Sqlx(other),
        })
    }

    /// Remove empty directories from `start` up to (not including) `stop`.
    async fn prune_empty_dirs(&self, start: &Path, stop: &Path) {
        let mut current = start.to_path_buf();
        while current.starts_with(stop) && current != stop {
            match fs::remove_dir(&current).await {
                Ok(_) => match current.parent() {
                    Some(parent) => current = parent.to_path_buf(),
                    None => break,
                },
                Err(err) if err.kind() == ErrorKind::NotFound => break,
                Err(err) if err.kind() == ErrorKind::DirectoryNotEmpty => break,
                Err(err) => {
                    debug!("failed to prune directory {}: {}", current.display(), err);
                    break;
                }
            }
        }
    }
}

#[async_trait]
impl ObjectStore for LocalObjectStore {
    /// Writes to a temporary file, fsyncs, renames into place, then upserts
    /// the metadata row. The payload is removed again if the row cannot be
    /// written.
    async fn put_object(
        &self,
        key: &str,
        bytes: Bytes,
        content_type: &str,
    ) -> StoreResult<StoredObject> {
        Self::ensure_key_safe(key)?;

        let file_path = self.object_path(key);
        let parent = file_path.parent().map(Path::to_path_buf).ok_or_else(|| {
            StoreError::Io(io::Error::new(
                ErrorKind::Other,
                "object path missing parent directory",
            ))
        })?;
        fs::create_dir_all(&parent).await?;
        let tmp_path = parent.join(format!(".tmp-{}", Uuid::new_v4()));

        if let Err(err) = write_synced(&tmp_path, &bytes).await {
            let _ = fs::remove_file(&tmp_path).await;
            return Err(StoreError::Io(err));
        }
        if let Err(err) = fs::rename(&tmp_path, &file_path).await {
            let _ = fs::remove_file(&tmp_path).await;
            return Err(StoreError::Io(err));
        }

        let etag = format!("{:x}", md5::compute(&bytes));
        let insert_result = sqlx::query_as::<_, StoredObject>(
            r#"
            INSERT INTO objects (id, key, content_type, size_bytes, etag, is_public, created_at)
            VALUES (?, ?, ?, ?, ?, 0, ?)
            ON CONFLICT(key) DO UPDATE SET
                content_type = excluded.content_type,
                size_bytes = excluded.size_bytes,
                etag = excluded.etag,
                is_public = 0,
                created_at = excluded.created_at
            RETURNING id, key, content_type, size_bytes, etag, is_public, created_at
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(key)
        .bind(content_type)
        .bind(bytes.len() as i64)
        .bind(&etag)
        .bind(Utc::now())
        .fetch_one(&*self.db)
        .await;

        match insert_result {
            Ok(object) => {
                debug!(key, size = object.size_bytes, "stored object");
                Ok(object)
            }
            Err(err) => {
                let _ = fs::remove_file(&file_path).await;
                Err(StoreError::Sqlx(err))
            }
        }
    }

    async fn make_public(&self, key: &str) -> StoreResult<()> {
        let result = sqlx::query("UPDATE objects SET is_public = 1 WHERE key = ?")
            .bind(key)
            .execute(&*self.db)
            .await?;
        if result.rows_affected() == 0 {
            return Err(StoreError::ObjectNotFound(key.to_string()));
        }
        Ok(())
    }

    async fn delete_object(&self, key: &str) -> StoreResult<()> {
        Self::ensure_key_safe(key)?;
        sqlx::query("DELETE FROM objects WHERE key = ?")
            .bind(key)
            .execute(&*self.db)
            .await?;

        let file_path = self.object_path(key);
        match fs::remove_file(&file_path).await {
            Ok(_) => debug!("removed physical file {}", file_path.display()),
            Err(err) if err.kind() == ErrorKind::NotFound => {
                debug!("file {} already missing", file_path.display());
            }
            Err(err) => return Err(StoreError::Io(err)),
        }

        if let Some(parent) = file_path.parent() {
            self.prune_empty_dirs(parent, &self.base_path).await;
        }
        Ok(())
    }

    async fn open_public(&self, key: &str) -> StoreResult<(StoredObject, ObjectReader)> {
        Self::ensure_key_safe(key)?;
        let object = self.fetch_object(key).await?;
        if !object.is_public {
            return Err(StoreError::ObjectNotFound(key.to_string()));
        }

        let file = File::open(self.object_path(key)).await.map_err(|err| {
            if err.kind() == ErrorKind::NotFound {
                StoreError::ObjectNotFound(key.to_string())
            } else {
                StoreError::Io(err)
            }
        })?;

        Ok((object, Box::new(file)))
    }

    fn public_url(&self, key: &str) -> String {
        format!("{}/objects/{}", self.public_base_url, key)
    }

    async fn ping(&self) -> StoreResult<()> {
        fs::create_dir_all(&self.base_path).await?;
        let probe = self.base_path.join(format!(".readyz-{}", Uuid::new_v4()));
        fs::write(&probe, b"readyz").await?;
        let read_back = fs::read(&probe).await;
        let _ = fs::remove_file(&probe).await;
        if read_back? != b"readyz" {
            return Err(StoreError::Io(io::Error::new(
                ErrorKind::InvalidData,
                "file content mismatch",
            )));
        }
        Ok(())
    }
}

async fn write_synced(path: &Path, bytes: &[u8]) -> io::Result<()> {
    let mut file = File::create(path).await?;
    file.write_all(bytes).await?;
    file.flush().await?;
    file.sync_all().await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db;
    use tokio::io::AsyncReadExt;

    async fn store() -> (LocalObjectStore, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let pool = db::connect("sqlite::memory:").await.unwrap();
        db::run_migrations(&pool).await.unwrap();
        let store = LocalObjectStore::new(Arc::new(pool), dir.path(), "http://photos.test/");
        (store, dir)
    }

    #[tokio::test]
    async fn objects_are_private_until_made_public() {
        let (store, _dir) = store().await;
        let key = "uploads/1_a.jpg";
        let stored = store
            .put_object(key, Bytes::from_static(b"jpeg"), "image/jpeg")
            .await
            .unwrap();
        assert_eq!(stored.size_bytes, 4);
        assert_eq!(stored.etag.as_deref(), Some(format!("{:x}", md5::compute(b"jpeg")).as_str()));

        assert!(matches!(
            store.open_public(key).await,
            Err(StoreError::ObjectNotFound(_))
        ));

        store.make_public(key).await.unwrap();
        let (meta, mut reader) = store.open_public(key).await.unwrap();
        let mut body = Vec::new();
        reader.read_to_end(&mut body).await.unwrap();
        assert_eq!(body, b"jpeg");
        assert_eq!(meta.content_type.as_deref(), Some("image/jpeg"));
    }

    #[tokio::test]
    async fn public_url_joins_base_and_key() {
        let (store, _dir) = store().await;
        assert_eq!(
            store.public_url("uploads/1_a.jpg"),
            "http://photos.test/objects/uploads/1_a.jpg"
        );
    }

    #[tokio::test]
    async fn rejects_traversal_keys() {
        let (store, _dir) = store().await;
        for key in ["", "/etc/passwd", "uploads/../x", "a\\b"] {
            assert!(matches!(
                store.put_object(key, Bytes::new(), "image/png").await,
                Err(StoreError::InvalidObjectKey)
            ));
        }
    }

    #[tokio::test]
    async fn delete_removes_payload_and_prunes_shards() {
        let (store, dir) = store().await;
        let key = "uploads/2_b.png";
        store
            .put_object(key, Bytes::from_static(b"png"), "image/png")
            .await
            .unwrap();
        store.delete_object(key).await.unwrap();

        assert!(!store.object_path(key).exists());
        let mut entries = std::fs::read_dir(dir.path()).unwrap();
        assert!(entries.next().is_none());
        assert!(matches!(
            store.make_public(key).await,
            Err(StoreError::ObjectNotFound(_))
        ));
    }
}
