//! HTTP middleware for the engine.

pub mod auth;
pub mod request_id;

pub use auth::require_api_token;
pub use request_id::{REQUEST_ID_HEADER, request_id_middleware};
