pub mod types;
pub mod preprocess;
pub mod classifier;
pub mod labels;
pub mod treatment;
pub mod report;
pub mod orchestrator;

pub use types::*;
pub use preprocess::*;
pub use classifier::*;
pub use labels::*;
pub use treatment::*;
pub use report::*;
pub use orchestrator::*;

use std::path::PathBuf;

use serde::Serialize;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DiagnosisError {
    #[error("Invalid image: {0}")]
    InvalidImage(String),

    #[error("Inference failed: {0}")]
    Inference(String),

    #[error("No label configured for class {0}")]
    UnresolvedLabel(usize),

    #[error("Classification timed out after {0}s")]
    Timeout(u64),

    #[error("Model file not found at: {0}")]
    ModelNotFound(PathBuf),

    #[error("Label table error: {0}")]
    LabelTable(String),

    #[error("Treatment table error: {0}")]
    TreatmentTable(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Observability tag for a failed diagnosis.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Missing or malformed input, user-correctable.
    InvalidImage,
    /// Model or runtime failure.
    Inference,
    UnresolvedLabel,
    Timeout,
    /// Startup-time table or model loading problem.
    Setup,
}

impl DiagnosisError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::InvalidImage(_) => ErrorKind::InvalidImage,
            Self::Inference(_) => ErrorKind::Inference,
            Self::UnresolvedLabel(_) => ErrorKind::UnresolvedLabel,
            Self::Timeout(_) => ErrorKind::Timeout,
            Self::ModelNotFound(_)
            | Self::LabelTable(_)
            | Self::TreatmentTable(_)
            | Self::Io(_)
            | Self::Json(_) => ErrorKind::Setup,
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidImage => write!(f, "invalid_image"),
            Self::Inference => write!(f, "inference"),
            Self::UnresolvedLabel => write!(f, "unresolved_label"),
            Self::Timeout => write!(f, "timeout"),
            Self::Setup => write!(f, "setup"),
        }
    }
}
