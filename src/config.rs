use std::net::SocketAddr;
use std::path::PathBuf;

use thiserror::Error;

/// Application-level constants
pub const APP_NAME: &str = "Leafdoc";
pub const APP_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Default HTTP bind address (same port the demo UI used).
pub const DEFAULT_BIND_ADDR: &str = "127.0.0.1:7860";

/// Default per-request classification timeout.
pub const DEFAULT_INFERENCE_TIMEOUT_SECS: u64 = 30;

/// Groq exposes an OpenAI-compatible API; Ollama works too via `/v1`.
pub const DEFAULT_CHAT_BASE_URL: &str = "https://api.groq.com/openai/v1";
pub const DEFAULT_CHAT_MODEL: &str = "qwen-2.5-32b";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Invalid value for {var}: {reason}")]
    InvalidValue { var: &'static str, reason: String },
}

/// Get the application data directory.
/// Falls back to the working directory when no home directory is known.
pub fn app_data_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(APP_NAME)
}

/// Get the models directory (classifier weights, label file)
pub fn models_dir() -> PathBuf {
    app_data_dir().join("models")
}

/// Healthy-leaf reference photos, one `{Plant}.jpg` per plant.
pub fn reference_dir() -> PathBuf {
    app_data_dir().join("healthy_leaves")
}

/// Debug builds log our crate verbosely.
pub fn is_dev() -> bool {
    cfg!(debug_assertions)
}

/// Filter used when `RUST_LOG` is not set.
pub fn default_log_filter() -> &'static str {
    if is_dev() {
        "leafdoc_lib=debug,info"
    } else {
        "leafdoc_lib=info,warn"
    }
}

/// How the classifier's raw output should be read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModelOutput {
    /// Model ends in a softmax layer.
    Probabilities,
    /// Model emits raw logits; softmax is applied after inference.
    Logits,
}

/// Runtime configuration, read once at startup.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub bind_addr: SocketAddr,
    pub model_path: PathBuf,
    pub model_output: ModelOutput,
    pub labels_path: PathBuf,
    /// `None` uses the built-in treatment table.
    pub treatments_path: Option<PathBuf>,
    pub reference_dir: PathBuf,
    pub inference_timeout_secs: u64,
    pub chat_base_url: String,
    pub chat_model: String,
    /// `None` falls back to the offline keyword assistant.
    pub chat_api_key: Option<String>,
    pub weather_api_key: Option<String>,
    pub aqi_api_key: Option<String>,
}

impl AppConfig {
    /// Defaults rooted at `app_data_dir()`.
    pub fn defaults() -> Self {
        Self {
            bind_addr: DEFAULT_BIND_ADDR
                .parse()
                .unwrap_or_else(|_| SocketAddr::from(([127, 0, 0, 1], 7860))),
            model_path: models_dir().join("plant_disease.onnx"),
            model_output: ModelOutput::Probabilities,
            labels_path: models_dir().join("class_labels.json"),
            treatments_path: None,
            reference_dir: reference_dir(),
            inference_timeout_secs: DEFAULT_INFERENCE_TIMEOUT_SECS,
            chat_base_url: DEFAULT_CHAT_BASE_URL.to_string(),
            chat_model: DEFAULT_CHAT_MODEL.to_string(),
            chat_api_key: None,
            weather_api_key: None,
            aqi_api_key: None,
        }
    }

    /// Read `LEAFDOC_*` environment variables over the defaults.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    /// Same as `from_env` with an injectable source (tests).
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |var: &str| lookup(var).filter(|v| !v.trim().is_empty());
        let mut config = Self::defaults();

        if let Some(addr) = get("LEAFDOC_BIND_ADDR") {
            config.bind_addr = addr.parse().map_err(|e| ConfigError::InvalidValue {
                var: "LEAFDOC_BIND_ADDR",
                reason: format!("{e}"),
            })?;
        }
        if let Some(path) = get("LEAFDOC_MODEL_PATH") {
            config.model_path = PathBuf::from(path);
        }
        if let Some(output) = get("LEAFDOC_MODEL_OUTPUT") {
            config.model_output = match output.to_ascii_lowercase().as_str() {
                "probabilities" => ModelOutput::Probabilities,
                "logits" => ModelOutput::Logits,
                other => {
                    return Err(ConfigError::InvalidValue {
                        var: "LEAFDOC_MODEL_OUTPUT",
                        reason: format!("expected 'probabilities' or 'logits', got '{other}'"),
                    })
                }
            };
        }
        if let Some(path) = get("LEAFDOC_LABELS_PATH") {
            config.labels_path = PathBuf::from(path);
        }
        config.treatments_path = get("LEAFDOC_TREATMENTS_PATH").map(PathBuf::from);
        if let Some(dir) = get("LEAFDOC_REFERENCE_DIR") {
            config.reference_dir = PathBuf::from(dir);
        }
        if let Some(secs) = get("LEAFDOC_INFERENCE_TIMEOUT_SECS") {
            let parsed: u64 = secs.parse().map_err(|e| ConfigError::InvalidValue {
                var: "LEAFDOC_INFERENCE_TIMEOUT_SECS",
                reason: format!("{e}"),
            })?;
            if parsed == 0 {
                return Err(ConfigError::InvalidValue {
                    var: "LEAFDOC_INFERENCE_TIMEOUT_SECS",
                    reason: "must be greater than zero".into(),
                });
            }
            config.inference_timeout_secs = parsed;
        }
        if let Some(url) = get("LEAFDOC_CHAT_BASE_URL") {
            config.chat_base_url = url;
        }
        if let Some(model) = get("LEAFDOC_CHAT_MODEL") {
            config.chat_model = model;
        }
        config.chat_api_key = get("LEAFDOC_CHAT_API_KEY");
        config.weather_api_key = get("LEAFDOC_WEATHER_API_KEY");
        config.aqi_api_key = get("LEAFDOC_AQI_API_KEY");

        Ok(config)
    }
}
