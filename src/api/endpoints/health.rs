//! Health check endpoint.

use axum::extract::State;
use axum::Json;
use serde::Serialize;

use crate::api::types::ApiContext;
use crate::inference_service::ActiveOperation;

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
    pub classifier: String,
    pub classes: usize,
    pub chat_model: String,
    pub inference_busy: bool,
    pub current_operation: Option<ActiveOperation>,
}

/// `GET /api/health`
pub async fn check(State(ctx): State<ApiContext>) -> Json<HealthResponse> {
    let diagnosis = ctx.core.diagnosis();
    let gate = ctx.core.gate();

    Json(HealthResponse {
        status: "ok",
        version: crate::config::APP_VERSION,
        classifier: diagnosis.model_name().to_string(),
        classes: diagnosis.context().labels().len(),
        chat_model: ctx.core.chat().model_name().to_string(),
        inference_busy: gate.is_busy(),
        current_operation: gate.current_operation(),
    })
}
