use super::types::DiagnosisResult;
use super::DiagnosisError;

/// Shown when `diagnose` is called without an image.
pub const NO_IMAGE_MESSAGE: &str = "Please upload an image for diagnosis.";

/// Markdown report for a successful diagnosis.
pub fn format_report(result: &DiagnosisResult) -> String {
    format!(
        "### Diagnosis: {}\n\n### Confidence: {:.1}%\n\n### Recommended Treatment:\n{}",
        result.label, result.confidence, result.treatment
    )
}

/// User-visible text for a failed diagnosis.
pub fn error_message(error: &DiagnosisError) -> String {
    format!("Error during diagnosis: {error}")
}
