//! Rust client for the upload endpoints.
//!
//! - [`splitter`] turns a file into ordered byte ranges and reads them lazily.
//! - [`dispatcher`] picks direct or chunked upload per file and drives the
//!   chosen path against a running server.

pub mod dispatcher;
mod error;
pub mod splitter;

pub use dispatcher::{
    DEFAULT_CHUNK_THRESHOLD, LocalFile, UploadClient, UploadClientBuilder, UploadOptions,
    UploadReceipt, UploadStrategy, choose_strategy,
};
pub use error::ClientError;
pub use splitter::{ChunkPlan, ChunkRange, DEFAULT_CHUNK_SIZE};
