//! Shared types for the HTTP layer.

use std::sync::Arc;

use crate::core_state::CoreState;

/// Shared context for all API routes.
#[derive(Clone)]
pub struct ApiContext {
    pub core: Arc<CoreState>,
}

impl ApiContext {
    pub fn new(core: Arc<CoreState>) -> Self {
        Self { core }
    }
}

/// Parse a path segment as a session id.
pub fn parse_session_id(raw: &str) -> Result<uuid::Uuid, crate::api::error::ApiError> {
    uuid::Uuid::parse_str(raw)
        .map_err(|_| crate::api::error::ApiError::BadRequest(format!("Invalid session id: {raw}")))
}
