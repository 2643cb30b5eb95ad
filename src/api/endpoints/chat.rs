//! Chat endpoints.
//!
//! - `POST   /api/chat/sessions`: open a session
//! - `POST   /api/chat/sessions/:id/messages`: ask, wait for the full reply
//! - `DELETE /api/chat/sessions/:id`: close the session, cancel in-flight replies

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use serde::{Deserialize, Serialize};

use crate::api::error::ApiError;
use crate::api::types::{parse_session_id, ApiContext};
use crate::pipeline::chat::ChatTurn;

const MAX_MESSAGE_CHARS: usize = 2000;

#[derive(Serialize)]
pub struct SessionCreated {
    pub session_id: String,
}

#[derive(Deserialize)]
pub struct ChatMessageRequest {
    pub message: String,
}

#[derive(Serialize)]
pub struct ChatMessageResponse {
    pub reply: String,
    pub history: Vec<ChatTurn>,
}

/// `POST /api/chat/sessions`
pub async fn create_session(
    State(ctx): State<ApiContext>,
) -> Result<(StatusCode, Json<SessionCreated>), ApiError> {
    let id = ctx.core.chat().create()?;
    Ok((
        StatusCode::CREATED,
        Json(SessionCreated {
            session_id: id.to_string(),
        }),
    ))
}

/// `POST /api/chat/sessions/:id/messages`
///
/// Blank messages get the "please ask a question" reply, not an error.
pub async fn send_message(
    State(ctx): State<ApiContext>,
    Path(id): Path<String>,
    Json(req): Json<ChatMessageRequest>,
) -> Result<Json<ChatMessageResponse>, ApiError> {
    if req.message.chars().count() > MAX_MESSAGE_CHARS {
        return Err(ApiError::BadRequest(format!(
            "Message too long (max {MAX_MESSAGE_CHARS} chars)"
        )));
    }

    let session = ctx.core.chat().get(parse_session_id(&id)?)?;
    let (reply, history) = tokio::task::spawn_blocking(move || {
        let reply = session.ask(&req.message);
        (reply, session.history())
    })
    .await?;

    Ok(Json(ChatMessageResponse { reply, history }))
}

/// `DELETE /api/chat/sessions/:id`
pub async fn close_session(
    State(ctx): State<ApiContext>,
    Path(id): Path<String>,
) -> Result<StatusCode, ApiError> {
    ctx.core.chat().remove(parse_session_id(&id)?)?;
    Ok(StatusCode::NO_CONTENT)
}
