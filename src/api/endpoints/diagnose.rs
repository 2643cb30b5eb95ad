//! Diagnosis endpoint.
//!
//! Always answers 200 with report text. Failures are described in the
//! report and tagged in `error_kind`.

use std::time::Duration;

use axum::extract::State;
use axum::Json;
use base64::Engine;
use serde::Deserialize;

use crate::api::types::ApiContext;
use crate::pipeline::diagnosis::{DiagnosisError, DiagnosisOutcome, ImageInput};

#[derive(Deserialize)]
pub struct DiagnoseRequest {
    /// Base64 image bytes, optionally as a `data:` URL. `null` or blank
    /// means no image.
    #[serde(default)]
    pub image: Option<String>,
}

/// `POST /api/diagnose`
pub async fn diagnose(
    State(ctx): State<ApiContext>,
    Json(req): Json<DiagnoseRequest>,
) -> Json<DiagnosisOutcome> {
    let payload = match req.image.as_deref().map(str::trim) {
        Some(p) if !p.is_empty() => p,
        _ => return Json(DiagnosisOutcome::no_image()),
    };

    let bytes = match decode_image_payload(payload) {
        Ok(bytes) => bytes,
        Err(e) => return Json(DiagnosisOutcome::from_error(&e)),
    };

    let timeout_secs = ctx.core.config.inference_timeout_secs;
    let pipeline = ctx.core.diagnosis();
    let task = tokio::task::spawn_blocking(move || pipeline.diagnose(&ImageInput::Encoded(bytes)));

    let outcome = match tokio::time::timeout(Duration::from_secs(timeout_secs), task).await {
        Ok(Ok(Ok(result))) => DiagnosisOutcome::from_result(result),
        Ok(Ok(Err(e))) => DiagnosisOutcome::from_error(&e),
        Ok(Err(join)) => DiagnosisOutcome::from_error(&DiagnosisError::Inference(format!(
            "worker task failed: {join}"
        ))),
        Err(_) => DiagnosisOutcome::from_error(&DiagnosisError::Timeout(timeout_secs)),
    };

    Json(outcome)
}

/// Strip an optional `data:<mime>;base64,` prefix and decode.
pub fn decode_image_payload(payload: &str) -> Result<Vec<u8>, DiagnosisError> {
    let encoded = match payload.strip_prefix("data:") {
        Some(rest) => rest
            .split_once(',')
            .map(|(_, data)| data)
            .ok_or_else(|| DiagnosisError::InvalidImage("Malformed data URL".into()))?,
        None => payload,
    };

    base64::engine::general_purpose::STANDARD
        .decode(encoded.trim())
        .map_err(|e| DiagnosisError::InvalidImage(format!("Image is not valid base64: {e}")))
}
