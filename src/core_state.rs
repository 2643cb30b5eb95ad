//! Application state shared by every HTTP handler.
//!
//! Built once at startup from `AppConfig`. Everything inside is either
//! immutable (tables, model, gallery) or guards its own interior state
//! (chat registry, inference gate), so handlers share one `Arc<CoreState>`.

use std::sync::Arc;

use tracing::{info, warn};

use crate::config::AppConfig;
use crate::inference_service::InferenceGate;
use crate::pipeline::chat::{ChatCompletionsClient, ChatError, ChatModel, ChatRegistry, KeywordAssistant};
use crate::pipeline::diagnosis::{
    ClassLabelTable, ClassifierAdapter, DiagnosisContext, DiagnosisError, DiagnosisPipeline,
    ImageClassifier, TreatmentTable, UnavailableClassifier,
};
use crate::reference::ReferenceGallery;
use crate::weather::{OpenWeatherClient, WeatherError, WeatherProvider};

/// HTTP timeout for chat completions.
const CHAT_TIMEOUT_SECS: u64 = 60;

/// HTTP timeout for weather and AQI lookups.
const WEATHER_TIMEOUT_SECS: u64 = 15;

#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    #[error("Diagnosis setup failed: {0}")]
    Diagnosis(#[from] DiagnosisError),

    #[error("Chat setup failed: {0}")]
    Chat(#[from] ChatError),

    #[error("Weather setup failed: {0}")]
    Weather(#[from] WeatherError),
}

// ═══════════════════════════════════════════════════════════
// CoreState
// ═══════════════════════════════════════════════════════════

pub struct CoreState {
    pub config: AppConfig,
    diagnosis: Arc<DiagnosisPipeline>,
    gate: Arc<InferenceGate>,
    chat: ChatRegistry,
    weather: Arc<dyn WeatherProvider>,
    gallery: ReferenceGallery,
}

impl CoreState {
    /// Assemble from already-built parts.
    pub fn new(
        config: AppConfig,
        diagnosis: DiagnosisPipeline,
        gate: Arc<InferenceGate>,
        chat_model: Arc<dyn ChatModel>,
        weather: Arc<dyn WeatherProvider>,
    ) -> Self {
        let gallery = ReferenceGallery::new(config.reference_dir.clone());
        Self {
            config,
            diagnosis: Arc::new(diagnosis),
            gate,
            chat: ChatRegistry::new(chat_model),
            weather,
            gallery,
        }
    }

    /// Load tables, model and clients as configured.
    ///
    /// A missing model or label file degrades the service (every diagnosis
    /// explains the problem) instead of failing startup. Malformed files fail.
    pub fn from_config(config: AppConfig) -> Result<Self, CoreError> {
        let gate = Arc::new(InferenceGate::new());

        let labels = load_labels(&config)?;
        let treatments = match &config.treatments_path {
            Some(path) => TreatmentTable::from_json_file(path)?,
            None => TreatmentTable::demo(),
        };

        let classifier = load_classifier(&config, &gate, labels.len());
        let context = DiagnosisContext::new(labels, treatments);
        let treatments = Arc::new(context.treatments().clone());
        let diagnosis = DiagnosisPipeline::with_default_preprocessing(
            ClassifierAdapter::new(classifier),
            context,
        );

        let chat_model: Arc<dyn ChatModel> = match &config.chat_api_key {
            Some(key) => {
                info!(base_url = %config.chat_base_url, model = %config.chat_model, "Chat assistant online");
                Arc::new(ChatCompletionsClient::new(
                    &config.chat_base_url,
                    &config.chat_model,
                    Some(key.clone()),
                    CHAT_TIMEOUT_SECS,
                )?)
            }
            None => {
                warn!("No chat API key configured; using the offline keyword assistant");
                Arc::new(KeywordAssistant::new(treatments))
            }
        };

        let weather = Arc::new(OpenWeatherClient::new(
            config.weather_api_key.clone(),
            config.aqi_api_key.clone(),
            WEATHER_TIMEOUT_SECS,
        )?);

        Ok(Self::new(config, diagnosis, gate, chat_model, weather))
    }

    pub fn diagnosis(&self) -> Arc<DiagnosisPipeline> {
        Arc::clone(&self.diagnosis)
    }

    pub fn gate(&self) -> Arc<InferenceGate> {
        Arc::clone(&self.gate)
    }

    pub fn chat(&self) -> &ChatRegistry {
        &self.chat
    }

    pub fn weather(&self) -> Arc<dyn WeatherProvider> {
        Arc::clone(&self.weather)
    }

    pub fn gallery(&self) -> &ReferenceGallery {
        &self.gallery
    }
}

fn load_labels(config: &AppConfig) -> Result<ClassLabelTable, DiagnosisError> {
    if config.labels_path.exists() {
        ClassLabelTable::from_json_file(&config.labels_path)
    } else {
        warn!(
            path = %config.labels_path.display(),
            "Class label file not found; every class will resolve as unknown"
        );
        Ok(ClassLabelTable::default())
    }
}

#[cfg(feature = "onnx-classifier")]
fn load_classifier(
    config: &AppConfig,
    gate: &Arc<InferenceGate>,
    label_count: usize,
) -> Arc<dyn ImageClassifier> {
    use crate::pipeline::diagnosis::{ModelInputConfig, OnnxClassifier};

    let onnx = match OnnxClassifier::load(&config.model_path, config.model_output, Arc::clone(gate)) {
        Ok(onnx) => onnx,
        Err(e) => {
            warn!(error = %e, "Classifier not loaded; diagnosis unavailable");
            return Arc::new(UnavailableClassifier::new(e.to_string()));
        }
    };

    let shape = ModelInputConfig::mobilenet_v2().batch_shape();
    match onnx.warm_up(shape) {
        Ok(classes) if label_count > 0 && classes != label_count => warn!(
            classes,
            label_count, "Model class count differs from label table"
        ),
        Ok(classes) => info!(classes, "Classifier ready"),
        Err(e) => {
            warn!(error = %e, "Classifier warm-up failed; diagnosis unavailable");
            return Arc::new(UnavailableClassifier::new(e.to_string()));
        }
    }

    Arc::new(onnx)
}

#[cfg(not(feature = "onnx-classifier"))]
fn load_classifier(
    config: &AppConfig,
    _gate: &Arc<InferenceGate>,
    _label_count: usize,
) -> Arc<dyn ImageClassifier> {
    warn!(
        model = %config.model_path.display(),
        "Built without the onnx-classifier feature; diagnosis unavailable"
    );
    Arc::new(UnavailableClassifier::new(
        "this build has no ONNX runtime (enable the onnx-classifier feature)",
    ))
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use crate::pipeline::chat::MockChatModel;
    use crate::pipeline::diagnosis::MockClassifier;
    use crate::weather::{MockWeatherProvider, WeatherReport};

    pub fn labels() -> ClassLabelTable {
        ClassLabelTable::from_json_str(
            r#"{"0": "Apple - Apple Scab", "1": "Apple - Healthy", "2": "Corn - Healthy",
                "3": "Tomato - Healthy", "4": "Tomato - Late Blight"}"#,
        )
        .unwrap()
    }

    /// State with mocks everywhere; the classifier picks `class_index`.
    pub fn core_with(classifier: Arc<dyn ImageClassifier>, reference_dir: &std::path::Path) -> Arc<CoreState> {
        let mut config = AppConfig::defaults();
        config.reference_dir = reference_dir.to_path_buf();
        let gate = Arc::new(InferenceGate::new());
        let diagnosis = DiagnosisPipeline::with_default_preprocessing(
            ClassifierAdapter::new(classifier),
            DiagnosisContext::new(labels(), TreatmentTable::demo()),
        );
        let weather = Arc::new(MockWeatherProvider::new(WeatherReport {
            location: String::new(),
            temperature_c: 21.5,
            humidity_pct: 60.0,
            description: "clear sky".into(),
            aqi_us: Some(35),
        }));
        Arc::new(CoreState::new(
            config,
            diagnosis,
            gate,
            Arc::new(MockChatModel::new("Water at the base of the plant.")),
            weather,
        ))
    }

    pub fn core() -> Arc<CoreState> {
        core_with(
            Arc::new(MockClassifier::peaked(5, 3, 0.924)),
            std::path::Path::new("/nonexistent/reference"),
        )
    }
}
