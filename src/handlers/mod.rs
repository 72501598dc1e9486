pub mod event_handlers;
pub mod health_handlers;
pub mod object_handlers;
pub mod upload_handlers;
