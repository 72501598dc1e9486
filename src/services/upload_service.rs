//! src/services/upload_service.rs
//!
//! UploadService: the chunk receiver, the finalizer and the direct upload
//! path. Business rules (event gate, size ceiling, type allow-list) are
//! enforced identically by both entry points, before any chunk is read or any
//! byte reaches the object store.

use crate::{
    models::{
        event::Event,
        photo::{NewPhoto, Photo, UploadMethod},
    },
    services::{
        StoreError,
        chunk_store::{self, ChunkFile, ChunkStore, ClaimedSession, MAX_TOTAL_CHUNKS},
        event_store::EventStore,
        object_store::ObjectStore,
        photo_store::PhotoStore,
    },
};
use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use std::{fmt, io, sync::Arc};
use thiserror::Error;
use tracing::{info, warn};
use uuid::Uuid;

pub const MIB: u64 = 1024 * 1024;

/// Default ceiling for a single photo.
pub const DEFAULT_MAX_FILE_SIZE: u64 = 50 * MIB;

/// Assembled-vs-declared size difference tolerated without a warning.
pub const DEFAULT_SIZE_TOLERANCE: u64 = 1024;

/// Content types accepted by both upload paths.
pub const ALLOWED_CONTENT_TYPES: [&str; 7] = [
    "image/jpeg",
    "image/jpg",
    "image/png",
    "image/gif",
    "image/webp",
    "image/heic",
    "image/heif",
];

const STORAGE_PREFIX: &str = "uploads";

/// Hex characters of randomness in a storage key.
const KEY_TOKEN_LEN: usize = 8;

/// Byte count rendered in MB with two decimals.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HumanSize(pub u64);

impl fmt::Display for HumanSize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.2} MB", self.0 as f64 / MIB as f64)
    }
}

#[derive(Debug, Error)]
pub enum UploadError {
    #[error("missing required field `{0}`")]
    MissingField(&'static str),
    #[error("invalid field `{field}`: {reason}")]
    InvalidField { field: &'static str, reason: String },
    #[error("chunk index {index} is out of range for {total} chunks")]
    ChunkIndexOutOfRange { index: i64, total: i64 },
    #[error("event `{0}` not found")]
    EventNotFound(String),
    #[error("event `{0}` is no longer accepting photo submissions")]
    EventClosed(String),
    #[error("file is {actual}; the maximum allowed size is {max}")]
    PayloadTooLarge { actual: HumanSize, max: HumanSize },
    /// The request body hit the transport limit before the file was read.
    #[error("request body exceeds the maximum allowed size of {max}")]
    BodyTooLarge { max: HumanSize },
    #[error(
        "file type `{0}` is not allowed; allowed types: {allowed}",
        allowed = ALLOWED_CONTENT_TYPES.join(", ")
    )]
    UnsupportedMediaType(String),
    #[error("upload `{0}` not found or expired")]
    UploadNotFound(String),
    #[error("no chunks found for upload `{0}`")]
    NoChunks(String),
    #[error("upload `{upload_id}` is missing chunks {missing:?}")]
    IncompleteUpload { upload_id: String, missing: Vec<u32> },
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Io(#[from] io::Error),
}

pub type UploadResult<T> = Result<T, UploadError>;

/// Limits applied to every upload.
#[derive(Debug, Clone, Copy)]
pub struct UploadLimits {
    pub max_file_size: u64,
    pub size_tolerance: u64,
}

impl Default for UploadLimits {
    fn default() -> Self {
        Self {
            max_file_size: DEFAULT_MAX_FILE_SIZE,
            size_tolerance: DEFAULT_SIZE_TOLERANCE,
        }
    }
}

/// Fields of one `POST /upload-chunk` request, as received.
#[derive(Debug, Default, Clone)]
pub struct ChunkRequest {
    pub chunk: Option<Bytes>,
    pub chunk_index: Option<i64>,
    pub total_chunks: Option<i64>,
    pub upload_id: Option<String>,
    pub file_name: Option<String>,
    pub file_type: Option<String>,
}

/// Acknowledgment of a stored chunk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkReceipt {
    pub upload_id: String,
    pub chunk_index: u32,
    pub total_chunks: u32,
}

/// JSON body of `POST /finalize-upload`.
#[derive(Debug, Default, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FinalizeRequest {
    pub upload_id: Option<String>,
    pub file_name: Option<String>,
    pub file_type: Option<String>,
    pub total_size: Option<u64>,
    pub event_id: Option<String>,
    pub user_name: Option<String>,
    /// When present, finalize verifies that exactly `0..totalChunks` arrived.
    pub total_chunks: Option<u32>,
}

/// File part of a direct upload.
#[derive(Debug, Clone)]
pub struct UploadedFile {
    pub file_name: String,
    pub content_type: Option<String>,
    pub bytes: Bytes,
}

/// Fields of one `POST /upload` request, as received.
#[derive(Debug, Default, Clone)]
pub struct DirectUploadRequest {
    pub file: Option<UploadedFile>,
    pub event_id: Option<String>,
    pub user_name: Option<String>,
}

/// Outcome of a committed upload.
#[derive(Debug, Clone)]
pub struct UploadReceipt {
    pub url: String,
    pub storage_key: String,
    pub size: u64,
    pub photo: Photo,
}

/// Everything needed to commit one photo, whichever path produced it.
struct PhotoPayload {
    file_name: String,
    content_type: String,
    bytes: Bytes,
    user_name: Option<String>,
    method: UploadMethod,
}

#[derive(Clone)]
pub struct UploadService {
    chunks: ChunkStore,
    events: Arc<dyn EventStore>,
    objects: Arc<dyn ObjectStore>,
    photos: Arc<dyn PhotoStore>,
    limits: UploadLimits,
}

impl UploadService {
    pub fn new(
        chunks: ChunkStore,
        events: Arc<dyn EventStore>,
        objects: Arc<dyn ObjectStore>,
        photos: Arc<dyn PhotoStore>,
        limits: UploadLimits,
    ) -> Self {
        Self {
            chunks,
            events,
            objects,
            photos,
            limits,
        }
    }

    pub fn chunk_store(&self) -> &ChunkStore {
        &self.chunks
    }

    pub fn limits(&self) -> UploadLimits {
        self.limits
    }

    /// Persist one chunk of an upload session.
    ///
    /// Validation happens before the filesystem is touched; a rejected chunk
    /// never creates a file or directory.
    pub async fn receive_chunk(&self, req: ChunkRequest) -> UploadResult<ChunkReceipt> {
        let chunk = req.chunk.ok_or(UploadError::MissingField("chunk"))?;
        let index = req.chunk_index.ok_or(UploadError::MissingField("chunkIndex"))?;
        let total = req
            .total_chunks
            .ok_or(UploadError::MissingField("totalChunks"))?;
        let upload_id = required("uploadId", req.upload_id)?;
        required("fileName", req.file_name)?;
        required("fileType", req.file_type)?;

        ensure_upload_id(&upload_id)?;
        let total_chunks = validate_total_chunks(total)?;
        if index < 0 || index >= total {
            return Err(UploadError::ChunkIndexOutOfRange { index, total });
        }
        let chunk_index = index as u32;

        self.chunks
            .write_chunk(&upload_id, chunk_index, &chunk)
            .await?;
        info!(
            upload_id = %upload_id,
            "chunk {}/{} received",
            chunk_index + 1,
            total_chunks
        );

        Ok(ChunkReceipt {
            upload_id,
            chunk_index,
            total_chunks,
        })
    }

    /// Assemble a chunked upload and commit it as a photo.
    ///
    /// Order: required fields, event gate, size and type rules, session claim,
    /// assembly, storage, metadata, cleanup. Cleanup problems are logged and
    /// never fail a committed upload.
    pub async fn finalize(&self, req: FinalizeRequest) -> UploadResult<UploadReceipt> {
        let upload_id = required("uploadId", req.upload_id)?;
        let file_name = required("fileName", req.file_name)?;
        let file_type = required("fileType", req.file_type)?;
        let total_size = req.total_size.ok_or(UploadError::MissingField("totalSize"))?;
        let event_id = required("eventId", req.event_id)?;
        ensure_upload_id(&upload_id)?;
        if let Some(total) = req.total_chunks {
            validate_total_chunks(i64::from(total))?;
        }

        let event = self.ensure_event_accepting(&event_id).await?;
        self.ensure_size_allowed(total_size)?;
        ensure_type_allowed(&file_type)?;

        let session = self
            .chunks
            .claim(&upload_id)
            .await?
            .ok_or_else(|| UploadError::UploadNotFound(upload_id.clone()))?;

        let (chunks, bytes) = match self.assemble_session(&session, req.total_chunks).await {
            Ok(assembled) => assembled,
            Err(err) => {
                session.release().await;
                return Err(err);
            }
        };

        let assembled_size = bytes.len() as u64;
        if assembled_size.abs_diff(total_size) > self.limits.size_tolerance {
            // Non-fatal by policy: the upload is committed with the bytes that arrived.
            warn!(
                upload_id = %upload_id,
                declared = total_size,
                assembled = assembled_size,
                "assembled size differs from declared size"
            );
        }

        let payload = PhotoPayload {
            file_name,
            content_type: file_type,
            bytes,
            user_name: req.user_name,
            method: UploadMethod::Chunked,
        };
        let receipt = match self.commit_photo(&event, payload).await {
            Ok(receipt) => receipt,
            Err(err) => {
                session.release().await;
                return Err(err);
            }
        };

        session.cleanup(&chunks).await;
        info!(
            upload_id = %upload_id,
            url = %receipt.url,
            "chunked upload finalized"
        );
        Ok(receipt)
    }

    /// Single-request upload for small files. Applies the same business rules
    /// as [`UploadService::finalize`].
    pub async fn direct_upload(&self, req: DirectUploadRequest) -> UploadResult<UploadReceipt> {
        let file = req.file.ok_or(UploadError::MissingField("file"))?;
        let event_id = required("eventId", req.event_id)?;

        let event = self.ensure_event_accepting(&event_id).await?;
        self.ensure_size_allowed(file.bytes.len() as u64)?;
        let content_type = file
            .content_type
            .filter(|ct| !ct.trim().is_empty())
            .unwrap_or_else(|| "application/octet-stream".to_string());
        ensure_type_allowed(&content_type)?;

        let payload = PhotoPayload {
            file_name: file.file_name,
            content_type,
            bytes: file.bytes,
            user_name: req.user_name,
            method: UploadMethod::Direct,
        };
        let receipt = self.commit_photo(&event, payload).await?;
        info!(url = %receipt.url, "direct upload stored");
        Ok(receipt)
    }

    async fn ensure_event_accepting(&self, event_id: &str) -> UploadResult<Event> {
        let id = Uuid::parse_str(event_id.trim())
            .map_err(|_| UploadError::EventNotFound(event_id.to_string()))?;
        let event = self
            .events
            .get_event(id)
            .await?
            .ok_or_else(|| UploadError::EventNotFound(event_id.to_string()))?;
        if !event.accepts_uploads() {
            return Err(UploadError::EventClosed(event_id.to_string()));
        }
        Ok(event)
    }

    fn ensure_size_allowed(&self, size: u64) -> UploadResult<()> {
        if size > self.limits.max_file_size {
            return Err(UploadError::PayloadTooLarge {
                actual: HumanSize(size),
                max: HumanSize(self.limits.max_file_size),
            });
        }
        Ok(())
    }

    async fn assemble_session(
        &self,
        session: &ClaimedSession,
        expected_chunks: Option<u32>,
    ) -> UploadResult<(Vec<ChunkFile>, Bytes)> {
        let chunks = session.list_chunks().await?;
        if chunks.is_empty() {
            return Err(UploadError::NoChunks(session.upload_id().to_string()));
        }
        if let Some(total) = expected_chunks {
            let missing = chunk_store::missing_indices(&chunks, total);
            let overflow = chunks.iter().any(|chunk| chunk.index >= total);
            if !missing.is_empty() || overflow {
                return Err(UploadError::IncompleteUpload {
                    upload_id: session.upload_id().to_string(),
                    missing,
                });
            }
        }
        // The declared size is only a hint; the ceiling applies to what arrived.
        self.ensure_size_allowed(session.stored_size(&chunks).await?)?;
        let bytes = session.assemble(&chunks).await?;
        Ok((chunks, bytes))
    }

    /// Store the payload, make it public, then record the photo. An object
    /// whose metadata cannot be written is deleted again.
    async fn commit_photo(&self, event: &Event, payload: PhotoPayload) -> UploadResult<UploadReceipt> {
        let token = Uuid::new_v4().simple().to_string();
        let key = storage_key(&payload.file_name, Utc::now(), &token[..KEY_TOKEN_LEN]);
        let size = payload.bytes.len() as u64;

        self.objects
            .put_object(&key, payload.bytes, &payload.content_type)
            .await?;
        if let Err(err) = self.objects.make_public(&key).await {
            self.discard_object(&key).await;
            return Err(err.into());
        }
        let url = self.objects.public_url(&key);

        let new_photo = NewPhoto {
            event_id: event.id,
            url: url.clone(),
            name: payload.file_name,
            user_name: payload.user_name,
            size: size as i64,
            upload_method: payload.method,
            storage_key: key.clone(),
        };
        match self.photos.insert_photo(new_photo).await {
            Ok(photo) => Ok(UploadReceipt {
                url,
                storage_key: key,
                size,
                photo,
            }),
            Err(err) => {
                self.discard_object(&key).await;
                Err(err.into())
            }
        }
    }

    async fn discard_object(&self, key: &str) {
        if let Err(err) = self.objects.delete_object(key).await {
            warn!(key, "failed to delete orphaned object: {}", err);
        }
    }
}

fn required(field: &'static str, value: Option<String>) -> UploadResult<String> {
    match value {
        Some(value) if !value.trim().is_empty() => Ok(value),
        _ => Err(UploadError::MissingField(field)),
    }
}

fn ensure_upload_id(upload_id: &str) -> UploadResult<()> {
    if chunk_store::is_valid_upload_id(upload_id) {
        Ok(())
    } else {
        Err(UploadError::InvalidField {
            field: "uploadId",
            reason: "only letters, digits, `_` and `-` are allowed (max 128)".into(),
        })
    }
}

fn validate_total_chunks(total: i64) -> UploadResult<u32> {
    if (1..=i64::from(MAX_TOTAL_CHUNKS)).contains(&total) {
        Ok(total as u32)
    } else {
        Err(UploadError::InvalidField {
            field: "totalChunks",
            reason: format!("must be between 1 and {}", MAX_TOTAL_CHUNKS),
        })
    }
}

fn ensure_type_allowed(content_type: &str) -> UploadResult<()> {
    let normalized = content_type.trim().to_ascii_lowercase();
    if ALLOWED_CONTENT_TYPES.contains(&normalized.as_str()) {
        Ok(())
    } else {
        Err(UploadError::UnsupportedMediaType(content_type.to_string()))
    }
}

/// Map every character outside `[A-Za-z0-9.-]` to `_`. A dot directly after
/// another dot is mapped too, so the result never contains `..`.
pub fn sanitize_file_name(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    let mut prev_dot = false;
    for c in name.chars() {
        let keep = c.is_ascii_alphanumeric() || c == '-' || (c == '.' && !prev_dot);
        out.push(if keep { c } else { '_' });
        prev_dot = c == '.' && keep;
    }
    out
}

/// Object key `uploads/{unix_millis}_{token}_{sanitized_name}`. The token
/// keeps same-named uploads within one millisecond apart.
pub fn storage_key(file_name: &str, at: DateTime<Utc>, token: &str) -> String {
    format!(
        "{}/{}_{}_{}",
        STORAGE_PREFIX,
        at.timestamp_millis(),
        token,
        sanitize_file_name(file_name)
    )
}
