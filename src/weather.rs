//! Current weather and air quality for a place name.
//!
//! Weather comes from OpenWeatherMap (metric units). The US AQI comes from
//! IQAir when a key is configured; AQI failures degrade to `None` rather than
//! failing the lookup.

use std::sync::atomic::{AtomicUsize, Ordering};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};

pub const OPENWEATHER_BASE_URL: &str = "https://api.openweathermap.org/data/2.5";
pub const IQAIR_BASE_URL: &str = "https://api.airvisual.com/v2";

#[derive(Error, Debug)]
pub enum WeatherError {
    #[error("Location is empty")]
    EmptyLocation,

    #[error("Weather service is not configured (missing API key)")]
    NotConfigured,

    #[error("Weather service is not reachable at {0}")]
    Connection(String),

    #[error("Weather service returned error (status {status}): {body}")]
    Api { status: u16, body: String },

    #[error("HTTP client error: {0}")]
    HttpClient(String),

    #[error("Response parsing error: {0}")]
    ResponseParsing(String),
}

/// Conditions at one place, at lookup time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WeatherReport {
    pub location: String,
    pub temperature_c: f64,
    pub humidity_pct: f64,
    pub description: String,
    pub aqi_us: Option<u32>,
}

pub trait WeatherProvider: Send + Sync {
    fn lookup_weather(&self, place: &str) -> Result<WeatherReport, WeatherError>;
}

/// Five-line plain-text summary.
pub fn format_weather(report: &WeatherReport) -> String {
    let aqi = report
        .aqi_us
        .map(|v| v.to_string())
        .unwrap_or_else(|| "n/a".to_string());
    format!(
        "Location: {}\nTemp: {}°C\nHumidity: {}%\nAQI: {}\nConditions: {}",
        report.location, report.temperature_c, report.humidity_pct, aqi, report.description
    )
}

// ═══════════════════════════════════════════════════════════
// Response parsing
// ═══════════════════════════════════════════════════════════

#[derive(Deserialize)]
struct CurrentWeather {
    main: MainReadings,
    #[serde(default)]
    weather: Vec<Condition>,
}

#[derive(Deserialize)]
struct MainReadings {
    temp: f64,
    humidity: f64,
}

#[derive(Deserialize)]
struct Condition {
    description: String,
}

#[derive(Deserialize)]
struct CityAirQuality {
    data: AirData,
}

#[derive(Deserialize)]
struct AirData {
    current: AirCurrent,
}

#[derive(Deserialize)]
struct AirCurrent {
    pollution: Pollution,
}

#[derive(Deserialize)]
struct Pollution {
    aqius: u32,
}

/// Parse an OpenWeatherMap `/weather` body. AQI is left empty.
pub fn parse_current_weather(place: &str, body: &str) -> Result<WeatherReport, WeatherError> {
    let parsed: CurrentWeather =
        serde_json::from_str(body).map_err(|e| WeatherError::ResponseParsing(e.to_string()))?;
    Ok(WeatherReport {
        location: place.to_string(),
        temperature_c: parsed.main.temp,
        humidity_pct: parsed.main.humidity,
        description: parsed
            .weather
            .into_iter()
            .next()
            .map(|c| c.description)
            .unwrap_or_default(),
        aqi_us: None,
    })
}

/// Parse an IQAir `/city` body into the US AQI.
pub fn parse_city_aqi(body: &str) -> Result<u32, WeatherError> {
    let parsed: CityAirQuality =
        serde_json::from_str(body).map_err(|e| WeatherError::ResponseParsing(e.to_string()))?;
    Ok(parsed.data.current.pollution.aqius)
}

// ═══════════════════════════════════════════════════════════
// OpenWeatherClient
// ═══════════════════════════════════════════════════════════

pub struct OpenWeatherClient {
    weather_base_url: String,
    aqi_base_url: String,
    weather_key: Option<String>,
    aqi_key: Option<String>,
    client: reqwest::blocking::Client,
    timeout_secs: u64,
}

impl OpenWeatherClient {
    pub fn new(
        weather_key: Option<String>,
        aqi_key: Option<String>,
        timeout_secs: u64,
    ) -> Result<Self, WeatherError> {
        let client = reqwest::blocking::Client::builder()
            .timeout(std::time::Duration::from_secs(timeout_secs))
            .build()
            .map_err(|e| WeatherError::HttpClient(e.to_string()))?;

        Ok(Self {
            weather_base_url: OPENWEATHER_BASE_URL.to_string(),
            aqi_base_url: IQAIR_BASE_URL.to_string(),
            weather_key,
            aqi_key,
            client,
            timeout_secs,
        })
    }

    /// Point at other hosts (proxies, local fakes).
    pub fn with_base_urls(mut self, weather: &str, aqi: &str) -> Self {
        self.weather_base_url = weather.trim_end_matches('/').to_string();
        self.aqi_base_url = aqi.trim_end_matches('/').to_string();
        self
    }

    fn get(&self, url: &str, query: &[(&str, &str)]) -> Result<String, WeatherError> {
        let response = self.client.get(url).query(query).send().map_err(|e| {
            if e.is_connect() {
                WeatherError::Connection(url.to_string())
            } else if e.is_timeout() {
                WeatherError::HttpClient(format!("Request timed out after {}s", self.timeout_secs))
            } else {
                WeatherError::HttpClient(e.to_string())
            }
        })?;

        let status = response.status();
        let body = response
            .text()
            .map_err(|e| WeatherError::ResponseParsing(e.to_string()))?;
        if !status.is_success() {
            return Err(WeatherError::Api {
                status: status.as_u16(),
                body,
            });
        }
        Ok(body)
    }

    fn lookup_aqi(&self, place: &str, key: &str) -> Result<u32, WeatherError> {
        let url = format!("{}/city", self.aqi_base_url);
        let body = self.get(&url, &[("city", place), ("key", key)])?;
        parse_city_aqi(&body)
    }
}

impl WeatherProvider for OpenWeatherClient {
    fn lookup_weather(&self, place: &str) -> Result<WeatherReport, WeatherError> {
        let place = place.trim();
        if place.is_empty() {
            return Err(WeatherError::EmptyLocation);
        }
        let key = self.weather_key.as_deref().ok_or(WeatherError::NotConfigured)?;

        let url = format!("{}/weather", self.weather_base_url);
        let body = self.get(&url, &[("q", place), ("appid", key), ("units", "metric")])?;
        let mut report = parse_current_weather(place, &body)?;

        if let Some(aqi_key) = self.aqi_key.as_deref() {
            match self.lookup_aqi(place, aqi_key) {
                Ok(aqi) => report.aqi_us = Some(aqi),
                Err(e) => warn!(location = place, error = %e, "AQI lookup failed"),
            }
        }

        debug!(
            location = place,
            temperature_c = report.temperature_c,
            aqi = ?report.aqi_us,
            "Weather lookup complete"
        );
        Ok(report)
    }
}

// ═══════════════════════════════════════════════════════════
// MockWeatherProvider
// ═══════════════════════════════════════════════════════════

/// Returns a fixed report for any place, renamed to the queried place.
pub struct MockWeatherProvider {
    report: WeatherReport,
    calls: AtomicUsize,
}

impl MockWeatherProvider {
    pub fn new(report: WeatherReport) -> Self {
        Self {
            report,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl WeatherProvider for MockWeatherProvider {
    fn lookup_weather(&self, place: &str) -> Result<WeatherReport, WeatherError> {
        let place = place.trim();
        if place.is_empty() {
            return Err(WeatherError::EmptyLocation);
        }
        self.calls.fetch_add(1, Ordering::SeqCst);
        let mut report = self.report.clone();
        report.location = place.to_string();
        Ok(report)
    }
}
