//! Core data models for the photo intake service.
//!
//! These entities represent events, the photos guests submit to them, and the
//! stored objects backing each photo. They map to database tables via
//! `sqlx::FromRow` and serialize as camelCase JSON via `serde`.

pub mod event;
pub mod object;
pub mod photo;
