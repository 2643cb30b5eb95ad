//! API error types with structured JSON responses.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;

use crate::pipeline::chat::ChatError;
use crate::reference::ReferenceError;
use crate::weather::WeatherError;

/// Structured error response body.
#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub error: ErrorDetail,
}

#[derive(Debug, Serialize)]
pub struct ErrorDetail {
    pub code: &'static str,
    pub message: String,
}

/// API-level errors with HTTP status mapping.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("Invalid request: {0}")]
    BadRequest(String),
    #[error("Not found: {0}")]
    NotFound(String),
    #[error("Service unavailable: {0}")]
    Unavailable(String),
    #[error("Upstream service failed: {0}")]
    Upstream(String),
    #[error("Internal error: {0}")]
    Internal(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code, message) = match &self {
            ApiError::BadRequest(detail) => {
                (StatusCode::BAD_REQUEST, "BAD_REQUEST", detail.clone())
            }
            ApiError::NotFound(detail) => (StatusCode::NOT_FOUND, "NOT_FOUND", detail.clone()),
            ApiError::Unavailable(detail) => (
                StatusCode::SERVICE_UNAVAILABLE,
                "UNAVAILABLE",
                detail.clone(),
            ),
            ApiError::Upstream(detail) => {
                tracing::warn!(detail, "Upstream service error");
                (
                    StatusCode::BAD_GATEWAY,
                    "UPSTREAM",
                    "An external service did not respond as expected".to_string(),
                )
            }
            ApiError::Internal(detail) => {
                tracing::error!(detail, "API internal error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "INTERNAL",
                    "An internal error occurred".to_string(),
                )
            }
        };

        let body = ErrorBody {
            error: ErrorDetail { code, message },
        };
        (status, Json(body)).into_response()
    }
}

impl From<ChatError> for ApiError {
    fn from(err: ChatError) -> Self {
        match err {
            ChatError::SessionNotFound(id) => ApiError::NotFound(format!("Chat session {id}")),
            ChatError::TooManySessions(_) => ApiError::Unavailable(err.to_string()),
            other => ApiError::Internal(other.to_string()),
        }
    }
}

impl From<WeatherError> for ApiError {
    fn from(err: WeatherError) -> Self {
        match err {
            WeatherError::EmptyLocation => ApiError::BadRequest(err.to_string()),
            WeatherError::NotConfigured => ApiError::Unavailable(err.to_string()),
            other => ApiError::Upstream(other.to_string()),
        }
    }
}

impl From<ReferenceError> for ApiError {
    fn from(err: ReferenceError) -> Self {
        match err {
            ReferenceError::InvalidPlant(_) => ApiError::BadRequest(err.to_string()),
            ReferenceError::NotFound(_) => ApiError::NotFound(err.to_string()),
            ReferenceError::Io(e) => ApiError::Internal(e.to_string()),
        }
    }
}

impl From<tokio::task::JoinError> for ApiError {
    fn from(err: tokio::task::JoinError) -> Self {
        ApiError::Internal(format!("Worker task failed: {err}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::to_bytes;

    async fn json_of(response: Response) -> serde_json::Value {
        let body = to_bytes(response.into_body(), 4096).await.unwrap();
        serde_json::from_slice(&body).unwrap()
    }

    #[tokio::test]
    async fn bad_request_returns_400_with_detail() {
        let response = ApiError::BadRequest("missing location".into()).into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let json = json_of(response).await;
        assert_eq!(json["error"]["code"], "BAD_REQUEST");
        assert_eq!(json["error"]["message"], "missing location");
    }

    #[tokio::test]
    async fn internal_hides_detail() {
        let response = ApiError::Internal("lock poisoned".into()).into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let json = json_of(response).await;
        assert_eq!(json["error"]["message"], "An internal error occurred");
    }

    #[tokio::test]
    async fn upstream_returns_502() {
        let response = ApiError::Upstream("timeout".into()).into_response();
        assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
        assert_eq!(json_of(response).await["error"]["code"], "UPSTREAM");
    }

    #[test]
    fn weather_errors_map_to_statuses() {
        assert!(matches!(
            ApiError::from(WeatherError::EmptyLocation),
            ApiError::BadRequest(_)
        ));
        assert!(matches!(
            ApiError::from(WeatherError::NotConfigured),
            ApiError::Unavailable(_)
        ));
        assert!(matches!(
            ApiError::from(WeatherError::Api {
                status: 401,
                body: "bad key".into()
            }),
            ApiError::Upstream(_)
        ));
    }

    #[test]
    fn chat_session_not_found_maps_to_404() {
        let id = uuid::Uuid::new_v4();
        assert!(matches!(
            ApiError::from(ChatError::SessionNotFound(id)),
            ApiError::NotFound(_)
        ));
        assert!(matches!(
            ApiError::from(ChatError::TooManySessions(1024)),
            ApiError::Unavailable(_)
        ));
    }

    #[test]
    fn reference_errors_map_to_statuses() {
        assert!(matches!(
            ApiError::from(ReferenceError::InvalidPlant("..".into())),
            ApiError::BadRequest(_)
        ));
        assert!(matches!(
            ApiError::from(ReferenceError::NotFound("Corn".into())),
            ApiError::NotFound(_)
        ));
    }
}
