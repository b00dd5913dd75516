//! HTTP routes for Gatekeeper

pub mod api;
pub mod health;

pub use api::{error_response, handle_api_request, API_PREFIX};
pub use health::health_check;
