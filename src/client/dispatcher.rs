//! Smart dispatcher: uploads a file either in one request or through the
//! chunk pipeline, depending on its size.
//!
//! There is no resume. Any failed request ends the attempt with a
//! [`ClientError`]; the caller starts over with a fresh upload id.

use crate::client::{
    error::ClientError,
    splitter::{self, ChunkPlan, DEFAULT_CHUNK_SIZE},
};
use chrono::Utc;
use reqwest::{
    Client, Response,
    multipart::{Form, Part},
};
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use std::{
    path::{Path, PathBuf},
    time::Duration,
};
use tokio::fs::{self, File};
use uuid::Uuid;

/// Files up to this size go through the direct path (10 MiB).
pub const DEFAULT_CHUNK_THRESHOLD: u64 = 10 * 1024 * 1024;

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60);

/// Share of the progress bar reserved for the chunk phase; finalize fills
/// the rest.
const CHUNK_PHASE_PERCENT: f64 = 90.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UploadStrategy {
    Direct,
    Chunked,
}

/// Direct for files at or below `threshold`, chunked above it.
pub fn choose_strategy(file_size: u64, threshold: u64) -> UploadStrategy {
    if file_size <= threshold {
        UploadStrategy::Direct
    } else {
        UploadStrategy::Chunked
    }
}

/// A file on local disk selected for upload.
#[derive(Debug, Clone)]
pub struct LocalFile {
    pub path: PathBuf,
    pub file_name: String,
    pub content_type: String,
    pub size: u64,
}

impl LocalFile {
    /// Stat `path` and derive its name and content type from the extension.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self, ClientError> {
        let path = path.as_ref();
        let metadata = fs::metadata(path).await?;
        let file_name = path
            .file_name()
            .and_then(|name| name.to_str())
            .unwrap_or("upload")
            .to_string();

        Ok(Self {
            path: path.to_path_buf(),
            content_type: content_type_for(&file_name).to_string(),
            file_name,
            size: metadata.len(),
        })
    }

    #[must_use]
    pub fn with_content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = content_type.into();
        self
    }
}

/// Destination of an upload.
#[derive(Debug, Clone)]
pub struct UploadOptions {
    pub event_id: String,
    pub user_name: Option<String>,
}

/// Terminal success state of an upload attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadReceipt {
    pub url: String,
    pub storage_key: String,
    pub size: u64,
    pub strategy: UploadStrategy,
    /// Number of chunk requests sent; zero for direct uploads.
    pub chunks_sent: u32,
}

/// Builder for configuring an [`UploadClient`].
#[derive(Debug)]
pub struct UploadClientBuilder {
    base_url: String,
    timeout: Duration,
    chunk_size: u64,
    threshold: u64,
    client: Option<Client>,
}

impl UploadClientBuilder {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            timeout: DEFAULT_TIMEOUT,
            chunk_size: DEFAULT_CHUNK_SIZE,
            threshold: DEFAULT_CHUNK_THRESHOLD,
            client: None,
        }
    }

    /// Per-request timeout.
    #[must_use]
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    #[must_use]
    pub fn chunk_size(mut self, chunk_size: u64) -> Self {
        self.chunk_size = chunk_size;
        self
    }

    /// Largest file size still uploaded directly.
    #[must_use]
    pub fn threshold(mut self, threshold: u64) -> Self {
        self.threshold = threshold;
        self
    }

    /// Use a custom reqwest Client.
    #[must_use]
    pub fn client(mut self, client: Client) -> Self {
        self.client = Some(client);
        self
    }

    pub fn build(self) -> Result<UploadClient, ClientError> {
        if self.chunk_size == 0 {
            return Err(ClientError::Configuration(
                "chunk size must be positive".into(),
            ));
        }
        let client = match self.client {
            Some(c) => c,
            None => Client::builder()
                .timeout(self.timeout)
                .build()
                .map_err(|e| ClientError::Configuration(e.to_string()))?,
        };

        Ok(UploadClient {
            client,
            base_url: self.base_url,
            chunk_size: self.chunk_size,
            threshold: self.threshold,
        })
    }
}

/// HTTP client for the upload endpoints.
#[derive(Debug, Clone)]
pub struct UploadClient {
    client: Client,
    base_url: String,
    chunk_size: u64,
    threshold: u64,
}

impl UploadClient {
    /// Client with default chunk size, threshold and timeout.
    pub fn new(base_url: impl Into<String>) -> Result<Self, ClientError> {
        UploadClientBuilder::new(base_url).build()
    }

    pub fn builder(base_url: impl Into<String>) -> UploadClientBuilder {
        UploadClientBuilder::new(base_url)
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn strategy_for(&self, file_size: u64) -> UploadStrategy {
        choose_strategy(file_size, self.threshold)
    }

    /// Upload `file` to the event in `options`.
    ///
    /// `progress` receives percentages in `0.0..=100.0`. On the chunked path
    /// the chunk phase spans 0 to 90 and finalize the remaining 10.
    pub async fn upload_file<F>(
        &self,
        file: &LocalFile,
        options: &UploadOptions,
        mut progress: F,
    ) -> Result<UploadReceipt, ClientError>
    where
        F: FnMut(f64),
    {
        let strategy = self.strategy_for(file.size);
        tracing::debug!(
            file = %file.file_name,
            size = file.size,
            ?strategy,
            "starting upload"
        );
        match strategy {
            UploadStrategy::Direct => self.upload_direct(file, options, &mut progress).await,
            UploadStrategy::Chunked => self.upload_chunked(file, options, &mut progress).await,
        }
    }

    async fn upload_direct<F: FnMut(f64)>(
        &self,
        file: &LocalFile,
        options: &UploadOptions,
        progress: &mut F,
    ) -> Result<UploadReceipt, ClientError> {
        progress(0.0);
        let bytes = fs::read(&file.path).await?;
        let part = Part::bytes(bytes)
            .file_name(file.file_name.clone())
            .mime_str(&file.content_type)
            .map_err(|e| ClientError::Configuration(e.to_string()))?;

        let mut form = Form::new()
            .part("file", part)
            .text("eventId", options.event_id.clone());
        if let Some(user_name) = &options.user_name {
            form = form.text("userName", user_name.clone());
        }

        let response = self
            .client
            .post(format!("{}/upload", self.base_url))
            .multipart(form)
            .send()
            .await
            .map_err(|e| ClientError::Connection(e.to_string()))?;
        let body: UploadResponseBody = parse_response(response).await?;

        progress(100.0);
        Ok(UploadReceipt {
            url: body.url,
            storage_key: body.file_name,
            size: body.size,
            strategy: UploadStrategy::Direct,
            chunks_sent: 0,
        })
    }

    async fn upload_chunked<F: FnMut(f64)>(
        &self,
        file: &LocalFile,
        options: &UploadOptions,
        progress: &mut F,
    ) -> Result<UploadReceipt, ClientError> {
        let upload_id = new_upload_id();
        let plan = ChunkPlan::new(file.size, self.chunk_size);
        let total_chunks = plan.total_chunks();
        let mut source = File::open(&file.path).await?;

        progress(0.0);
        for range in plan.ranges() {
            let bytes = splitter::read_range(&mut source, range).await?;
            let chunk = Part::bytes(bytes)
                .file_name(file.file_name.clone())
                .mime_str("application/octet-stream")
                .map_err(|e| ClientError::Configuration(e.to_string()))?;
            let form = Form::new()
                .part("chunk", chunk)
                .text("chunkIndex", range.index.to_string())
                .text("totalChunks", total_chunks.to_string())
                .text("uploadId", upload_id.clone())
                .text("fileName", file.file_name.clone())
                .text("fileType", file.content_type.clone());

            let response = self
                .client
                .post(format!("{}/upload-chunk", self.base_url))
                .multipart(form)
                .send()
                .await
                .map_err(|e| ClientError::Connection(e.to_string()))?;
            let ack: ChunkAck = parse_response(response).await?;
            if ack.chunk_index != range.index || ack.upload_id != upload_id {
                return Err(ClientError::InvalidResponse(format!(
                    "acknowledgment for chunk {} of `{}` does not match the request",
                    ack.chunk_index, ack.upload_id
                )));
            }

            progress(f64::from(range.index + 1) / f64::from(total_chunks) * CHUNK_PHASE_PERCENT);
        }

        let request = FinalizeBody {
            upload_id: &upload_id,
            file_name: &file.file_name,
            file_type: &file.content_type,
            total_size: file.size,
            event_id: &options.event_id,
            user_name: options.user_name.as_deref(),
            total_chunks,
        };
        let response = self
            .client
            .post(format!("{}/finalize-upload", self.base_url))
            .json(&request)
            .send()
            .await
            .map_err(|e| ClientError::Connection(e.to_string()))?;
        let body: UploadResponseBody = parse_response(response).await?;

        progress(100.0);
        Ok(UploadReceipt {
            url: body.url,
            storage_key: body.file_name,
            size: body.size,
            strategy: UploadStrategy::Chunked,
            chunks_sent: total_chunks,
        })
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct FinalizeBody<'a> {
    upload_id: &'a str,
    file_name: &'a str,
    file_type: &'a str,
    total_size: u64,
    event_id: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    user_name: Option<&'a str>,
    total_chunks: u32,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ChunkAck {
    chunk_index: u32,
    upload_id: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct UploadResponseBody {
    url: String,
    file_name: String,
    size: u64,
}

#[derive(Deserialize)]
struct ErrorBody {
    error: Option<String>,
}

async fn parse_response<T: DeserializeOwned>(response: Response) -> Result<T, ClientError> {
    let status = response.status();
    if status.is_success() {
        return response
            .json::<T>()
            .await
            .map_err(|e| ClientError::InvalidResponse(e.to_string()));
    }

    let message = response
        .json::<ErrorBody>()
        .await
        .ok()
        .and_then(|body| body.error)
        .unwrap_or_else(|| {
            status
                .canonical_reason()
                .unwrap_or("upload failed")
                .to_string()
        });
    Err(ClientError::Rejected { status, message })
}

/// `upload_{unix_millis}_{9 random chars}`.
fn new_upload_id() -> String {
    let random = Uuid::new_v4().simple().to_string();
    format!("upload_{}_{}", Utc::now().timestamp_millis(), &random[..9])
}

fn content_type_for(file_name: &str) -> &'static str {
    let extension = file_name
        .rsplit_once('.')
        .map(|(_, ext)| ext.to_ascii_lowercase())
        .unwrap_or_default();
    match extension.as_str() {
        "jpg" | "jpeg" => "image/jpeg",
        "png" => "image/png",
        "gif" => "image/gif",
        "webp" => "image/webp",
        "heic" => "image/heic",
        "heif" => "image/heif",
        _ => "application/octet-stream",
    }
}
