use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use tracing::{debug, warn};

use super::types::{BatchTensor, Prediction};
use super::DiagnosisError;

/// A pretrained image classifier, treated as `tensor -> probability vector`.
pub trait ImageClassifier: Send + Sync {
    /// One probability per class in label-space order.
    fn predict(&self, batch: &BatchTensor) -> Result<Vec<f32>, DiagnosisError>;

    /// Model identifier for logs and health output.
    fn name(&self) -> &str;
}

/// Index and value of the largest entry.
///
/// Ties resolve to the lowest index: the first maximum in iteration order
/// wins. NaN entries never win. `None` for an empty or all-NaN slice.
pub fn argmax_first(values: &[f32]) -> Option<(usize, f32)> {
    let mut best: Option<(usize, f32)> = None;
    for (idx, &value) in values.iter().enumerate() {
        if value.is_nan() {
            continue;
        }
        match best {
            Some((_, current)) if value <= current => {}
            _ => best = Some((idx, value)),
        }
    }
    best
}

/// Numerically stable softmax.
pub fn softmax(logits: &[f32]) -> Vec<f32> {
    let max = logits
        .iter()
        .copied()
        .filter(|v| !v.is_nan())
        .fold(f32::NEG_INFINITY, f32::max);
    let exps: Vec<f32> = logits.iter().map(|v| (v - max).exp()).collect();
    let sum: f32 = exps.iter().sum();
    if sum > 0.0 {
        exps.iter().map(|v| v / sum).collect()
    } else {
        exps
    }
}

// ═══════════════════════════════════════════════════════════
// ClassifierAdapter
// ═══════════════════════════════════════════════════════════

/// Runs the model and reduces its output to the winning class.
///
/// Model failures surface as `DiagnosisError::Inference` and are never retried.
#[derive(Clone)]
pub struct ClassifierAdapter {
    classifier: Arc<dyn ImageClassifier>,
}

impl ClassifierAdapter {
    pub fn new(classifier: Arc<dyn ImageClassifier>) -> Self {
        Self { classifier }
    }

    pub fn model_name(&self) -> &str {
        self.classifier.name()
    }

    pub fn classify(&self, batch: &BatchTensor) -> Result<Prediction, DiagnosisError> {
        let probabilities = self.classifier.predict(batch)?;

        let (class_index, peak) = argmax_first(&probabilities).ok_or_else(|| {
            DiagnosisError::Inference("Model returned no usable probabilities".into())
        })?;

        let mut confidence = peak * 100.0;
        if !(0.0..=100.0).contains(&confidence) {
            warn!(
                model = self.classifier.name(),
                peak, "Peak probability outside [0, 1]; clamping confidence"
            );
            confidence = confidence.clamp(0.0, 100.0);
        }

        debug!(
            model = self.classifier.name(),
            classes = probabilities.len(),
            class_index,
            confidence,
            "Classified image"
        );

        Ok(Prediction {
            class_index,
            confidence,
        })
    }
}

// ═══════════════════════════════════════════════════════════
// ONNX classifier: behind `onnx-classifier` feature
// ═══════════════════════════════════════════════════════════

#[cfg(feature = "onnx-classifier")]
mod onnx {
    use super::{softmax, BatchTensor, DiagnosisError, ImageClassifier};
    use crate::config::ModelOutput;
    use crate::inference_service::{GatedRuntime, InferenceGate, OperationKind};
    use ort::session::Session;
    use std::path::Path;
    use std::sync::Arc;

    /// Image classifier backed by ONNX Runtime.
    ///
    /// `Session::run` requires `&mut self` while `ImageClassifier` exposes
    /// `&self`; the session lives in a `GatedRuntime`, whose single lock both
    /// serializes calls and reports them to the inference gate.
    pub struct OnnxClassifier {
        session: GatedRuntime<Session>,
        output: ModelOutput,
    }

    impl OnnxClassifier {
        pub fn load(
            model_path: &Path,
            output: ModelOutput,
            gate: Arc<InferenceGate>,
        ) -> Result<Self, DiagnosisError> {
            if !model_path.exists() {
                return Err(DiagnosisError::ModelNotFound(model_path.to_path_buf()));
            }

            let session = Session::builder()
                .map_err(|e: ort::Error| DiagnosisError::Inference(e.to_string()))?
                .with_intra_threads(2)
                .map_err(|e: ort::Error| DiagnosisError::Inference(e.to_string()))?
                .commit_from_file(model_path)
                .map_err(|e: ort::Error| {
                    DiagnosisError::Inference(format!("ONNX load failed: {e}"))
                })?;

            let name = model_path
                .file_stem()
                .map(|s| s.to_string_lossy().into_owned())
                .unwrap_or_else(|| "onnx".to_string());

            tracing::info!(model = %name, path = %model_path.display(), "ONNX classifier loaded");

            Ok(Self {
                session: GatedRuntime::new(session, name, gate),
                output,
            })
        }

        /// Run one blank batch through the freshly loaded model.
        /// Returns the number of classes it emits.
        pub fn warm_up(&self, input_shape: [usize; 4]) -> Result<usize, DiagnosisError> {
            let batch = BatchTensor::zeros(input_shape);
            let classes = self.infer(OperationKind::ModelWarmup, &batch)?.len();
            tracing::debug!(model = self.session.model(), classes, "Classifier warm-up done");
            Ok(classes)
        }

        fn infer(&self, kind: OperationKind, batch: &BatchTensor) -> Result<Vec<f32>, DiagnosisError> {
            use ort::value::TensorRef;

            let input = TensorRef::from_array_view(batch)
                .map_err(|e| DiagnosisError::Inference(e.to_string()))?;

            let mut session = self
                .session
                .acquire(kind)
                .map_err(|e| DiagnosisError::Inference(e.to_string()))?;

            let outputs = session
                .run(ort::inputs![input])
                .map_err(|e| DiagnosisError::Inference(format!("ONNX inference failed: {e}")))?;

            let (shape, data) = outputs[0]
                .try_extract_tensor::<f32>()
                .map_err(|e| DiagnosisError::Inference(format!("Output extraction: {e}")))?;

            // Output shape: [1, num_classes]
            if shape.len() != 2 || shape[0] != 1 {
                return Err(DiagnosisError::Inference(format!(
                    "Unexpected output shape: {shape:?}, expected [1, num_classes]"
                )));
            }

            let raw = data.to_vec();
            Ok(match self.output {
                ModelOutput::Probabilities => raw,
                ModelOutput::Logits => softmax(&raw),
            })
        }
    }

    impl ImageClassifier for OnnxClassifier {
        fn predict(&self, batch: &BatchTensor) -> Result<Vec<f32>, DiagnosisError> {
            self.infer(OperationKind::LeafClassification, batch)
        }

        fn name(&self) -> &str {
            self.session.model()
        }
    }
}

#[cfg(feature = "onnx-classifier")]
pub use onnx::OnnxClassifier;

// ═══════════════════════════════════════════════════════════
// Fallback and mock classifiers
// ═══════════════════════════════════════════════════════════

/// Stand-in used when no model could be loaded. Every call fails,
/// so the service still answers every request with an explanation.
pub struct UnavailableClassifier {
    reason: String,
}

impl UnavailableClassifier {
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }
}

impl ImageClassifier for UnavailableClassifier {
    fn predict(&self, _batch: &BatchTensor) -> Result<Vec<f32>, DiagnosisError> {
        Err(DiagnosisError::Inference(format!(
            "Classifier unavailable: {}",
            self.reason
        )))
    }

    fn name(&self) -> &str {
        "unavailable"
    }
}

/// Mock classifier for testing: returns a fixed probability vector
/// (or a fixed failure) and counts invocations.
pub struct MockClassifier {
    outcome: Result<Vec<f32>, String>,
    calls: AtomicUsize,
}

impl MockClassifier {
    pub fn new(probabilities: Vec<f32>) -> Self {
        Self {
            outcome: Ok(probabilities),
            calls: AtomicUsize::new(0),
        }
    }

    /// `num_classes` entries with `peak` at `index` and the rest sharing the remainder.
    pub fn peaked(num_classes: usize, index: usize, peak: f32) -> Self {
        let rest = if num_classes > 1 {
            (1.0 - peak) / (num_classes - 1) as f32
        } else {
            0.0
        };
        let probabilities = (0..num_classes)
            .map(|i| if i == index { peak } else { rest })
            .collect();
        Self::new(probabilities)
    }

    pub fn failing(message: &str) -> Self {
        Self {
            outcome: Err(message.to_string()),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl ImageClassifier for MockClassifier {
    fn predict(&self, _batch: &BatchTensor) -> Result<Vec<f32>, DiagnosisError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.outcome
            .clone()
            .map_err(DiagnosisError::Inference)
    }

    fn name(&self) -> &str {
        "mock"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array4;

    fn batch() -> BatchTensor {
        Array4::zeros((1, 224, 224, 3))
    }

    // ── argmax_first ──

    #[test]
    fn argmax_picks_largest() {
        assert_eq!(argmax_first(&[0.1, 0.7, 0.2]), Some((1, 0.7)));
    }

    #[test]
    fn argmax_ties_resolve_to_first_index() {
        assert_eq!(argmax_first(&[0.1, 0.4, 0.1, 0.4]), Some((1, 0.4)));
        assert_eq!(argmax_first(&[0.25, 0.25, 0.25, 0.25]), Some((0, 0.25)));
    }

    #[test]
    fn argmax_skips_nan() {
        assert_eq!(argmax_first(&[f32::NAN, 0.3, 0.2]), Some((1, 0.3)));
        assert_eq!(argmax_first(&[f32::NAN]), None);
    }

    #[test]
    fn argmax_empty_is_none() {
        assert_eq!(argmax_first(&[]), None);
    }

    // ── softmax ──

    #[test]
    fn softmax_sums_to_one_and_keeps_order() {
        let probs = softmax(&[2.0, 1.0, 0.1]);
        let sum: f32 = probs.iter().sum();
        assert!((sum - 1.0).abs() < 1e-5);
        assert!(probs[0] > probs[1] && probs[1] > probs[2]);
    }

    #[test]
    fn softmax_handles_large_logits() {
        let probs = softmax(&[1000.0, 1000.0]);
        assert!((probs[0] - 0.5).abs() < 1e-5);
    }

    // ── ClassifierAdapter ──

    #[test]
    fn adapter_scales_confidence_to_percent() {
        let adapter = ClassifierAdapter::new(Arc::new(MockClassifier::new(vec![
            0.05, 0.02, 0.004, 0.924, 0.002,
        ])));
        let prediction = adapter.classify(&batch()).unwrap();
        assert_eq!(prediction.class_index, 3);
        assert!((prediction.confidence - 92.4).abs() < 1e-3);
    }

    #[test]
    fn adapter_reports_inference_error() {
        let adapter = ClassifierAdapter::new(Arc::new(MockClassifier::failing("session crashed")));
        let err = adapter.classify(&batch()).unwrap_err();
        assert!(matches!(err, DiagnosisError::Inference(ref m) if m.contains("session crashed")));
    }

    #[test]
    fn adapter_does_not_retry() {
        let mock = Arc::new(MockClassifier::failing("boom"));
        let adapter = ClassifierAdapter::new(mock.clone());
        let _ = adapter.classify(&batch());
        assert_eq!(mock.calls(), 1);
    }

    #[test]
    fn adapter_rejects_empty_output() {
        let adapter = ClassifierAdapter::new(Arc::new(MockClassifier::new(vec![])));
        assert!(matches!(
            adapter.classify(&batch()),
            Err(DiagnosisError::Inference(_))
        ));
    }

    #[test]
    fn adapter_clamps_out_of_range_scores() {
        let adapter = ClassifierAdapter::new(Arc::new(MockClassifier::new(vec![3.0, 1.0])));
        let prediction = adapter.classify(&batch()).unwrap();
        assert_eq!(prediction.confidence, 100.0);
    }

    #[test]
    fn unavailable_classifier_always_fails() {
        let adapter = ClassifierAdapter::new(Arc::new(UnavailableClassifier::new("no model")));
        let err = adapter.classify(&batch()).unwrap_err();
        assert!(err.to_string().contains("no model"));
    }

    #[test]
    fn peaked_mock_builds_distribution() {
        let mock = MockClassifier::peaked(4, 2, 0.7);
        let probs = mock.predict(&batch()).unwrap();
        assert_eq!(probs.len(), 4);
        assert_eq!(argmax_first(&probs), Some((2, 0.7)));
    }
}
