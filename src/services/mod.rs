//! Services behind the HTTP handlers.
//!
//! - `chunk_store` keeps in-flight upload sessions on local disk.
//! - `event_store`, `object_store`, `photo_store` are the collaborators the
//!   pipeline consumes, each behind a trait with a SQLite/disk implementation.
//! - `upload_service` runs the receive / finalize / direct-upload pipeline.
//! - `janitor` sweeps abandoned sessions in the background.

use std::io;
use thiserror::Error;

pub mod chunk_store;
pub mod event_store;
pub mod janitor;
pub mod object_store;
pub mod photo_store;
pub mod upload_service;

/// Failures raised by the persistent collaborators.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("object `{0}` not found")]
    ObjectNotFound(String),
    #[error("invalid object key")]
    InvalidObjectKey,
    #[error(transparent)]
    Sqlx(#[from] sqlx::Error),
    #[error(transparent)]
    Io(#[from] io::Error),
}

pub type StoreResult<T> = Result<T, StoreError>;
