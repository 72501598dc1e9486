use reqwest::StatusCode;
use std::io;
use thiserror::Error;

/// Why an upload attempt failed. Every variant is terminal for the attempt.
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("connection error: {0}")]
    Connection(String),
    /// The server answered with an error body.
    #[error("{message} (HTTP {status})")]
    Rejected { status: StatusCode, message: String },
    #[error("unexpected response: {0}")]
    InvalidResponse(String),
    #[error("configuration error: {0}")]
    Configuration(String),
    #[error(transparent)]
    Io(#[from] io::Error),
}

impl ClientError {
    /// HTTP status of a server-side rejection.
    pub fn status(&self) -> Option<StatusCode> {
        match self {
            ClientError::Rejected { status, .. } => Some(*status),
            _ => None,
        }
    }
}
