use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, info, warn};

use super::classifier::ClassifierAdapter;
use super::labels::{plant_name, ClassLabelTable};
use super::preprocess::{ImagePreprocessor, PreprocessingPipeline};
use super::report::{error_message, format_report, NO_IMAGE_MESSAGE};
use super::treatment::{canonical_label, TreatmentTable};
use super::types::{DiagnosisResult, ImageInput};
use super::{DiagnosisError, ErrorKind};

/// Immutable lookup state shared by every request.
#[derive(Debug, Clone)]
pub struct DiagnosisContext {
    labels: Arc<ClassLabelTable>,
    treatments: Arc<TreatmentTable>,
}

impl DiagnosisContext {
    pub fn new(labels: ClassLabelTable, treatments: TreatmentTable) -> Self {
        Self {
            labels: Arc::new(labels),
            treatments: Arc::new(treatments),
        }
    }

    pub fn labels(&self) -> &ClassLabelTable {
        &self.labels
    }

    pub fn treatments(&self) -> &TreatmentTable {
        &self.treatments
    }
}

/// What the text boundary hands back: always a report, plus the structured
/// result or the error tag.
#[derive(Debug, Clone, Serialize)]
pub struct DiagnosisOutcome {
    pub report: String,
    pub result: Option<DiagnosisResult>,
    pub error_kind: Option<ErrorKind>,
}

impl DiagnosisOutcome {
    pub fn no_image() -> Self {
        Self {
            report: NO_IMAGE_MESSAGE.to_string(),
            result: None,
            error_kind: None,
        }
    }

    pub fn from_result(result: DiagnosisResult) -> Self {
        Self {
            report: format_report(&result),
            result: Some(result),
            error_kind: None,
        }
    }

    pub fn from_error(error: &DiagnosisError) -> Self {
        warn!(error_kind = %error.kind(), error = %error, "Diagnosis failed");
        Self {
            report: error_message(error),
            result: None,
            error_kind: Some(error.kind()),
        }
    }
}

// ═══════════════════════════════════════════════════════════
// DiagnosisPipeline
// ═══════════════════════════════════════════════════════════

/// Normalizer → classifier → label resolver → treatment lookup.
pub struct DiagnosisPipeline {
    preprocessor: Arc<dyn ImagePreprocessor>,
    classifier: ClassifierAdapter,
    context: DiagnosisContext,
}

impl DiagnosisPipeline {
    pub fn new(
        preprocessor: Arc<dyn ImagePreprocessor>,
        classifier: ClassifierAdapter,
        context: DiagnosisContext,
    ) -> Self {
        Self {
            preprocessor,
            classifier,
            context,
        }
    }

    /// Standard 224×224 preprocessing.
    pub fn with_default_preprocessing(
        classifier: ClassifierAdapter,
        context: DiagnosisContext,
    ) -> Self {
        Self::new(
            Arc::new(PreprocessingPipeline::mobilenet_v2()),
            classifier,
            context,
        )
    }

    pub fn model_name(&self) -> &str {
        self.classifier.model_name()
    }

    pub fn context(&self) -> &DiagnosisContext {
        &self.context
    }

    pub fn diagnose(&self, image: &ImageInput) -> Result<DiagnosisResult, DiagnosisError> {
        let batch = self.preprocessor.prepare(image)?;
        debug!(shape = ?batch.shape(), "Image normalized");

        let prediction = self.classifier.classify(&batch)?;

        let label = self.context.labels.resolve(prediction.class_index);
        let treatment = self.context.treatments.lookup(&label).to_string();
        let plant = plant_name(&canonical_label(&label)).to_string();

        info!(
            class_index = prediction.class_index,
            label = %label,
            confidence = prediction.confidence,
            "Diagnosis complete"
        );

        Ok(DiagnosisResult {
            class_index: prediction.class_index,
            label,
            plant,
            confidence: prediction.confidence,
            treatment,
        })
    }

    /// Always-text form. A missing image never reaches the classifier.
    pub fn diagnose_text(&self, image: Option<&ImageInput>) -> DiagnosisOutcome {
        let Some(image) = image else {
            return DiagnosisOutcome::no_image();
        };
        match self.diagnose(image) {
            Ok(result) => DiagnosisOutcome::from_result(result),
            Err(e) => DiagnosisOutcome::from_error(&e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::diagnosis::classifier::MockClassifier;
    use crate::pipeline::diagnosis::treatment::FALLBACK_TREATMENT;
    use crate::pipeline::diagnosis::types::{ChannelOrder, PixelImage};

    fn labels() -> ClassLabelTable {
        ClassLabelTable::from_json_str(
            r#"{"0": "Apple - Apple Scab", "1": "Apple - Healthy", "2": "Corn - Healthy",
                "3": "Tomato - Healthy", "4": "Tomato - Late Blight"}"#,
        )
        .unwrap()
    }

    fn pipeline(mock: Arc<MockClassifier>) -> DiagnosisPipeline {
        DiagnosisPipeline::with_default_preprocessing(
            ClassifierAdapter::new(mock),
            DiagnosisContext::new(labels(), TreatmentTable::demo()),
        )
    }

    fn leaf_image(size: u32) -> ImageInput {
        let data = (0..size * size * 3).map(|i| (i % 251) as u8).collect();
        ImageInput::Pixels(PixelImage::new(size, size, 3, ChannelOrder::Rgb, data))
    }

    #[test]
    fn healthy_tomato_report() {
        let mock = Arc::new(MockClassifier::peaked(5, 3, 0.924));
        let outcome = pipeline(mock).diagnose_text(Some(&leaf_image(512)));

        assert_eq!(
            outcome.report,
            format!(
                "### Diagnosis: Tomato - Healthy\n\n### Confidence: 92.4%\n\n### Recommended Treatment:\n{}",
                TreatmentTable::demo().lookup("Tomato - Healthy")
            )
        );
        let result = outcome.result.unwrap();
        assert_eq!(result.class_index, 3);
        assert_eq!(result.plant, "Tomato");
        assert!(outcome.error_kind.is_none());
    }

    #[test]
    fn unknown_index_uses_sentinel_and_fallback() {
        let mock = Arc::new(MockClassifier::peaked(100, 99, 0.8));
        let result = pipeline(mock).diagnose(&leaf_image(64)).unwrap();
        assert_eq!(result.label, "Unknown class 99");
        assert_eq!(result.treatment, FALLBACK_TREATMENT);
    }

    #[test]
    fn missing_image_skips_classifier() {
        let mock = Arc::new(MockClassifier::peaked(5, 0, 0.9));
        let outcome = pipeline(mock.clone()).diagnose_text(None);
        assert_eq!(outcome.report, "Please upload an image for diagnosis.");
        assert!(outcome.result.is_none());
        assert!(outcome.error_kind.is_none());
        assert_eq!(mock.calls(), 0);
    }

    #[test]
    fn repeated_diagnosis_is_identical() {
        let mock = Arc::new(MockClassifier::peaked(5, 4, 0.61));
        let pipeline = pipeline(mock);
        let image = leaf_image(300);
        let first = pipeline.diagnose(&image).unwrap();
        let second = pipeline.diagnose(&image).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn invalid_image_becomes_error_text() {
        let mock = Arc::new(MockClassifier::peaked(5, 0, 0.9));
        let empty = ImageInput::Pixels(PixelImage::new(0, 0, 3, ChannelOrder::Rgb, vec![]));
        let outcome = pipeline(mock.clone()).diagnose_text(Some(&empty));

        assert!(outcome.report.starts_with("Error during diagnosis: "));
        assert_eq!(outcome.error_kind, Some(ErrorKind::InvalidImage));
        assert_eq!(mock.calls(), 0);
    }

    #[test]
    fn grayscale_pixels_rejected() {
        let mock = Arc::new(MockClassifier::peaked(5, 0, 0.9));
        let gray = ImageInput::Pixels(PixelImage::new(8, 8, 1, ChannelOrder::Rgb, vec![0; 64]));
        let err = pipeline(mock).diagnose(&gray).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidImage);
    }

    #[test]
    fn classifier_failure_becomes_error_text() {
        let mock = Arc::new(MockClassifier::failing("session crashed"));
        let outcome = pipeline(mock).diagnose_text(Some(&leaf_image(32)));
        assert_eq!(
            outcome.report,
            "Error during diagnosis: Inference failed: session crashed"
        );
        assert_eq!(outcome.error_kind, Some(ErrorKind::Inference));
    }

    #[test]
    fn encoded_png_is_diagnosed() {
        let img = image::RgbImage::from_fn(40, 30, |x, y| {
            image::Rgb([(x * 6) as u8, (y * 8) as u8, ((x * y) % 256) as u8])
        });
        let bytes = crate::pipeline::diagnosis::preprocess::encode_png(&img).unwrap();
        let mock = Arc::new(MockClassifier::peaked(5, 4, 0.7));
        let result = pipeline(mock).diagnose(&ImageInput::Encoded(bytes)).unwrap();
        assert_eq!(result.label, "Tomato - Late Blight");
        assert!(result.treatment.contains("mancozeb"));
    }

    #[test]
    fn folder_style_labels_resolve_plant_and_treatment() {
        let labels = ClassLabelTable::from_json_str(
            r#"{"0": "Tomato___Late_blight", "1": "Corn_(maize)___healthy"}"#,
        )
        .unwrap();
        let pipeline = DiagnosisPipeline::with_default_preprocessing(
            ClassifierAdapter::new(Arc::new(MockClassifier::peaked(2, 0, 0.88))),
            DiagnosisContext::new(labels, TreatmentTable::demo()),
        );

        let result = pipeline.diagnose(&leaf_image(64)).unwrap();
        assert_eq!(result.label, "Tomato___Late_blight");
        assert_eq!(result.plant, "Tomato");
        assert_eq!(
            result.treatment,
            TreatmentTable::demo().lookup("Tomato - Late Blight")
        );
        assert_ne!(result.treatment, FALLBACK_TREATMENT);
    }

    #[test]
    fn outcome_serializes_for_api() {
        let outcome = DiagnosisOutcome::from_error(&DiagnosisError::Timeout(30));
        let json = serde_json::to_value(&outcome).unwrap();
        assert_eq!(json["error_kind"], "timeout");
        assert!(json["result"].is_null());
    }
}
