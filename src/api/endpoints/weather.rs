//! Weather endpoint.

use axum::extract::{Query, State};
use axum::Json;
use serde::{Deserialize, Serialize};

use crate::api::error::ApiError;
use crate::api::types::ApiContext;
use crate::weather::{format_weather, WeatherReport};

#[derive(Deserialize)]
pub struct WeatherQuery {
    #[serde(default)]
    pub location: String,
}

#[derive(Serialize)]
pub struct WeatherResponse {
    pub report: WeatherReport,
    pub markdown: String,
}

/// `GET /api/weather?location=…`
pub async fn lookup(
    State(ctx): State<ApiContext>,
    Query(query): Query<WeatherQuery>,
) -> Result<Json<WeatherResponse>, ApiError> {
    let provider = ctx.core.weather();
    let report = tokio::task::spawn_blocking(move || provider.lookup_weather(&query.location))
        .await??;

    Ok(Json(WeatherResponse {
        markdown: format_weather(&report),
        report,
    }))
}
