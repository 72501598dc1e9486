use crate::services::{StoreError, upload_service::UploadError};
use axum::{
    Json,
    extract::{multipart::MultipartError, rejection::JsonRejection},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;
use std::fmt;

const INTERNAL_MESSAGE: &str = "internal error while processing the upload";

/// A lightweight wrapper for general errors that keeps the message local.
#[derive(Debug)]
pub struct AppError {
    pub status: StatusCode,
    pub message: String,
}

impl AppError {
    /// Create a new AppError with a specific status and message.
    pub fn new(status: StatusCode, msg: impl Into<String>) -> Self {
        Self {
            status,
            message: msg.into(),
        }
    }

    /// Shortcut for a 500 Internal Server Error
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, msg)
    }

    /// Shortcut for 404 Not Found
    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, msg)
    }

    /// Shortcut for 400 Bad Request
    pub fn bad_request(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, msg)
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for AppError {}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = Json(json!({
            "success": false,
            "error": self.message,
            "status": self.status.as_u16()
        }));

        (self.status, body).into_response()
    }
}

impl From<UploadError> for AppError {
    fn from(err: UploadError) -> Self {
        let status = match &err {
            UploadError::MissingField(_)
            | UploadError::InvalidField { .. }
            | UploadError::ChunkIndexOutOfRange { .. }
            | UploadError::NoChunks(_)
            | UploadError::IncompleteUpload { .. } => StatusCode::BAD_REQUEST,
            UploadError::EventNotFound(_) | UploadError::UploadNotFound(_) => {
                StatusCode::NOT_FOUND
            }
            UploadError::EventClosed(_) => StatusCode::FORBIDDEN,
            UploadError::PayloadTooLarge { .. } | UploadError::BodyTooLarge { .. } => {
                StatusCode::PAYLOAD_TOO_LARGE
            }
            UploadError::UnsupportedMediaType(_) => StatusCode::UNSUPPORTED_MEDIA_TYPE,
            UploadError::Store(_) | UploadError::Io(_) => {
                // Details stay in the log; paths must not reach the client.
                tracing::error!(error = ?err, "upload failed");
                return AppError::internal(INTERNAL_MESSAGE);
            }
        };
        AppError::new(status, err.to_string())
    }
}

impl From<StoreError> for AppError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::ObjectNotFound(key) => {
                AppError::not_found(format!("object `{}` not found", key))
            }
            StoreError::InvalidObjectKey => AppError::bad_request("invalid object key"),
            other => {
                tracing::error!(error = ?other, "store operation failed");
                AppError::internal("internal error")
            }
        }
    }
}

impl From<MultipartError> for AppError {
    fn from(err: MultipartError) -> Self {
        AppError::new(err.status(), err.body_text())
    }
}

impl From<JsonRejection> for AppError {
    fn from(err: JsonRejection) -> Self {
        AppError::bad_request(err.body_text())
    }
}

impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        tracing::error!(error = ?err, "unexpected error");
        AppError::internal("internal error")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::upload_service::HumanSize;
    use std::io;

    #[test]
    fn upload_errors_map_to_distinct_statuses() {
        let cases = [
            (UploadError::MissingField("uploadId"), StatusCode::BAD_REQUEST),
            (UploadError::EventNotFound("e".into()), StatusCode::NOT_FOUND),
            (UploadError::EventClosed("e".into()), StatusCode::FORBIDDEN),
            (
                UploadError::PayloadTooLarge {
                    actual: HumanSize(2),
                    max: HumanSize(1),
                },
                StatusCode::PAYLOAD_TOO_LARGE,
            ),
            (
                UploadError::BodyTooLarge { max: HumanSize(1) },
                StatusCode::PAYLOAD_TOO_LARGE,
            ),
            (
                UploadError::UnsupportedMediaType("text/plain".into()),
                StatusCode::UNSUPPORTED_MEDIA_TYPE,
            ),
            (UploadError::UploadNotFound("u".into()), StatusCode::NOT_FOUND),
            (UploadError::NoChunks("u".into()), StatusCode::BAD_REQUEST),
        ];
        for (err, status) in cases {
            assert_eq!(AppError::from(err).status, status);
        }
    }

    #[test]
    fn io_errors_do_not_leak_paths() {
        let err = UploadError::Io(io::Error::new(
            io::ErrorKind::PermissionDenied,
            "/var/lib/photo-intake/chunks/up-1/chunk_000000",
        ));
        let app = AppError::from(err);
        assert_eq!(app.status, StatusCode::INTERNAL_SERVER_ERROR);
        assert!(!app.message.contains("/var/lib"));
    }
}
