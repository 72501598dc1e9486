//! Event photo intake: guests upload photos to an event, either in one
//! request or as a sequence of chunks that the server assembles.
//!
//! The server side lives in [`services`] and [`handlers`]; [`client`] holds the
//! chunk splitter and the upload dispatcher used by Rust callers.

use axum::Router;

pub mod client;
pub mod config;
pub mod db;
pub mod errors;
pub mod handlers;
pub mod models;
pub mod routes;
pub mod services;
pub mod state;

pub use routes::routes::BodyLimits;
pub use state::AppState;

/// Build the complete application router.
pub fn app(state: AppState, limits: BodyLimits) -> Router {
    routes::routes::routes(limits).with_state(state)
}
