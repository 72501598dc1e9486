//! HTTP handlers for the upload pipeline: chunk receiver, finalizer and the
//! direct single-request path. Parsing lives here; every rule lives in
//! `UploadService`.

use crate::{
    errors::AppError,
    services::upload_service::{
        ChunkRequest, DirectUploadRequest, FinalizeRequest, HumanSize, UploadError,
        UploadReceipt, UploadedFile,
    },
    state::AppState,
};
use axum::{
    Json,
    http::StatusCode,
    extract::{
        Multipart, State,
        multipart::{Field, MultipartError, MultipartRejection},
        rejection::JsonRejection,
    },
};
use serde::Serialize;

/// Body of a successful `POST /upload-chunk`.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChunkResponse {
    pub success: bool,
    pub chunk_index: u32,
    pub upload_id: String,
    pub message: String,
}

/// Body of a successful `POST /finalize-upload` or `POST /upload`.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadResponse {
    pub success: bool,
    pub url: String,
    /// Storage key of the committed object.
    pub file_name: String,
    pub size: u64,
    pub message: String,
}

impl UploadResponse {
    fn from_receipt(receipt: UploadReceipt, message: &str) -> Self {
        Self {
            success: true,
            url: receipt.url,
            file_name: receipt.storage_key,
            size: receipt.size,
            message: message.to_string(),
        }
    }
}

/// `POST /upload-chunk`: store one chunk of an upload session.
pub async fn upload_chunk(
    State(state): State<AppState>,
    multipart: Result<Multipart, MultipartRejection>,
) -> Result<Json<ChunkResponse>, AppError> {
    let mut multipart = multipart.map_err(|err| AppError::new(err.status(), err.body_text()))?;
    let mut req = ChunkRequest::default();

    while let Some(field) = multipart.next_field().await? {
        let Some(name) = field.name().map(str::to_owned) else {
            continue;
        };
        match name.as_str() {
            "chunk" => req.chunk = Some(field.bytes().await?),
            "chunkIndex" => req.chunk_index = Some(int_field("chunkIndex", field).await?),
            "totalChunks" => req.total_chunks = Some(int_field("totalChunks", field).await?),
            "uploadId" => req.upload_id = Some(field.text().await?),
            "fileName" => req.file_name = Some(field.text().await?),
            "fileType" => req.file_type = Some(field.text().await?),
            _ => {}
        }
    }

    let receipt = state.uploads.receive_chunk(req).await?;
    Ok(Json(ChunkResponse {
        success: true,
        message: format!(
            "chunk {}/{} received",
            receipt.chunk_index + 1,
            receipt.total_chunks
        ),
        chunk_index: receipt.chunk_index,
        upload_id: receipt.upload_id,
    }))
}

/// `POST /finalize-upload`: assemble the chunks and commit the photo.
pub async fn finalize_upload(
    State(state): State<AppState>,
    payload: Result<Json<FinalizeRequest>, JsonRejection>,
) -> Result<Json<UploadResponse>, AppError> {
    let Json(req) = payload?;
    let receipt = state.uploads.finalize(req).await?;
    Ok(Json(UploadResponse::from_receipt(
        receipt,
        "chunked upload finalized",
    )))
}

/// `POST /upload`: direct upload of a small file.
pub async fn direct_upload(
    State(state): State<AppState>,
    multipart: Result<Multipart, MultipartRejection>,
) -> Result<Json<UploadResponse>, AppError> {
    let mut multipart = multipart.map_err(|err| AppError::new(err.status(), err.body_text()))?;
    let mut req = DirectUploadRequest::default();
    let max = state.uploads.limits().max_file_size;
    let body_error = |err: MultipartError| body_limit_error(err, max);

    while let Some(field) = multipart.next_field().await.map_err(body_error)? {
        let Some(name) = field.name().map(str::to_owned) else {
            continue;
        };
        match name.as_str() {
            "file" => {
                let file_name = field.file_name().unwrap_or("upload").to_string();
                let content_type = field.content_type().map(str::to_owned);
                let bytes = field.bytes().await.map_err(body_error)?;
                req.file = Some(UploadedFile {
                    file_name,
                    content_type,
                    bytes,
                });
            }
            "eventId" => req.event_id = Some(field.text().await.map_err(body_error)?),
            "userName" => req.user_name = Some(field.text().await.map_err(body_error)?),
            _ => {}
        }
    }

    let receipt = state.uploads.direct_upload(req).await?;
    Ok(Json(UploadResponse::from_receipt(receipt, "upload complete")))
}

async fn int_field(name: &'static str, field: Field<'_>) -> Result<i64, AppError> {
    let text = field.text().await?;
    text.trim().parse::<i64>().map_err(|_| {
        UploadError::InvalidField {
            field: name,
            reason: format!("expected an integer, got `{}`", text),
        }
        .into()
    })
}

/// A body cut off by the route limit is reported against the file ceiling.
/// This happens while streaming, so it precedes the event check.
fn body_limit_error(err: MultipartError, max_file_size: u64) -> AppError {
    if err.status() == StatusCode::PAYLOAD_TOO_LARGE {
        UploadError::BodyTooLarge {
            max: HumanSize(max_file_size),
        }
        .into()
    } else {
        err.into()
    }
}
