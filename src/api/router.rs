//! API router.
//!
//! Returns a composable `Router` with every route nested under `/api/`.

use std::sync::Arc;

use axum::extract::DefaultBodyLimit;
use axum::http::{header, Method};
use axum::routing::{delete, get, post};
use axum::Router;
use tower_http::cors::{Any, CorsLayer};

use crate::api::endpoints;
use crate::api::types::ApiContext;
use crate::core_state::CoreState;

/// Largest accepted JSON body: a 20 MB image as base64 plus envelope.
const MAX_BODY_BYTES: usize = 28 * 1024 * 1024;

/// Build the API router.
///
/// NOTE: Path params use `:param` syntax (matchit 0.7 / axum 0.7).
pub fn api_router(core: Arc<CoreState>) -> Router {
    let ctx = ApiContext::new(core);

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::DELETE])
        .allow_headers([header::CONTENT_TYPE]);

    let api = Router::new()
        .route("/health", get(endpoints::health::check))
        .route("/diagnose", post(endpoints::diagnose::diagnose))
        .route("/chat/sessions", post(endpoints::chat::create_session))
        .route("/chat/sessions/:id", delete(endpoints::chat::close_session))
        .route(
            "/chat/sessions/:id/messages",
            post(endpoints::chat::send_message),
        )
        .route("/weather", get(endpoints::weather::lookup))
        .route("/reference/:plant", get(endpoints::reference::image))
        .with_state(ctx)
        .layer(DefaultBodyLimit::max(MAX_BODY_BYTES))
        .layer(cors);

    Router::new().nest("/api", api)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use tower::ServiceExt;

    use crate::core_state::test_support;
    use crate::inference_service::{GatedRuntime, OperationKind};

    fn get_req(uri: &str) -> Request<Body> {
        Request::builder().uri(uri).body(Body::empty()).unwrap()
    }

    #[tokio::test]
    async fn health_reports_classifier_and_gate() {
        let response = api_router(test_support::core())
            .oneshot(get_req("/api/health"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let body = axum::body::to_bytes(response.into_body(), 4096).await.unwrap();
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["status"], "ok");
        assert_eq!(json["version"], crate::config::APP_VERSION);
        assert_eq!(json["classifier"], "mock");
        assert_eq!(json["classes"], 5);
        assert_eq!(json["inference_busy"], false);
        assert!(json["current_operation"].is_null());
    }

    #[tokio::test]
    async fn health_shows_running_operation() {
        let core = test_support::core();
        let runtime = GatedRuntime::new((), "mock", core.gate());
        let _guard = runtime.acquire(OperationKind::LeafClassification).unwrap();

        let response = api_router(core.clone())
            .oneshot(get_req("/api/health"))
            .await
            .unwrap();
        let body = axum::body::to_bytes(response.into_body(), 4096).await.unwrap();
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["inference_busy"], true);
        assert_eq!(json["current_operation"]["kind"], "leaf_classification");
    }

    #[tokio::test]
    async fn not_found_for_unknown_route() {
        let response = api_router(test_support::core())
            .oneshot(get_req("/api/nonexistent"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn cors_preflight_allowed() {
        let req = Request::builder()
            .method("OPTIONS")
            .uri("/api/diagnose")
            .header("Origin", "http://localhost:5173")
            .header("Access-Control-Request-Method", "POST")
            .body(Body::empty())
            .unwrap();
        let response = api_router(test_support::core()).oneshot(req).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()["access-control-allow-origin"], "*");
    }
}
