//! Healthy-leaf reference image endpoint.

use axum::extract::{Path, State};
use axum::http::header;
use axum::response::IntoResponse;

use crate::api::error::ApiError;
use crate::api::types::ApiContext;

/// `GET /api/reference/:plant`: JPEG bytes of the healthy-leaf photo.
pub async fn image(
    State(ctx): State<ApiContext>,
    Path(plant): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let gallery = ctx.core.gallery().clone();
    let bytes = tokio::task::spawn_blocking(move || gallery.read(&plant)).await??;
    Ok(([(header::CONTENT_TYPE, "image/jpeg")], bytes))
}
