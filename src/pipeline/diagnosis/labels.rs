use std::collections::HashMap;
use std::path::Path;

use tracing::info;

use super::DiagnosisError;

/// Class index → disease label, loaded once at startup.
///
/// The on-disk form is a JSON object with string-encoded indices:
/// `{"0": "Apple - Apple Scab", "1": "Apple - Black Rot", ...}`.
#[derive(Debug, Clone, Default)]
pub struct ClassLabelTable {
    labels: HashMap<usize, String>,
}

impl ClassLabelTable {
    pub fn new(labels: HashMap<usize, String>) -> Self {
        Self { labels }
    }

    /// Parse the JSON object form. Keys that are not non-negative integers
    /// are a `LabelTable` error.
    pub fn from_json_str(json: &str) -> Result<Self, DiagnosisError> {
        let raw: HashMap<String, String> = serde_json::from_str(json)?;
        let mut labels = HashMap::with_capacity(raw.len());
        for (key, label) in raw {
            let index = key.trim().parse::<usize>().map_err(|_| {
                DiagnosisError::LabelTable(format!("class index '{key}' is not an integer"))
            })?;
            if labels.insert(index, label).is_some() {
                return Err(DiagnosisError::LabelTable(format!(
                    "class index {index} appears more than once"
                )));
            }
        }
        Ok(Self { labels })
    }

    pub fn from_json_file(path: &Path) -> Result<Self, DiagnosisError> {
        let json = std::fs::read_to_string(path)?;
        let table = Self::from_json_str(&json)?;
        info!(path = %path.display(), classes = table.len(), "Loaded class labels");
        Ok(table)
    }

    /// Label for `index`, or `"Unknown class {index}"` when absent.
    pub fn resolve(&self, index: usize) -> String {
        self.labels
            .get(&index)
            .cloned()
            .unwrap_or_else(|| format!("Unknown class {index}"))
    }

    /// Strict form: absent indices are an error.
    pub fn try_resolve(&self, index: usize) -> Result<&str, DiagnosisError> {
        self.labels
            .get(&index)
            .map(String::as_str)
            .ok_or(DiagnosisError::UnresolvedLabel(index))
    }

    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }
}

/// Plant part of a `"Plant - Disease"` label. Labels without the separator
/// are returned whole.
pub fn plant_name(label: &str) -> &str {
    label.split(" - ").next().unwrap_or(label).trim()
}
