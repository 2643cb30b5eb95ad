use std::collections::HashMap;
use std::path::Path;
use std::sync::LazyLock;

use regex::Regex;
use tracing::{debug, info};

use super::DiagnosisError;

/// Returned for any label without a table entry.
pub const FALLBACK_TREATMENT: &str = "No specific treatment available. Consult an expert.";

/// Small built-in table, enough to exercise the pipeline end to end.
const DEMO_TREATMENTS: &[(&str, &str)] = &[
    (
        "Apple - Apple Scab",
        "Rake and destroy fallen leaves, prune for good air circulation, apply fungicides like captan or sulfur.",
    ),
    (
        "Apple - Healthy",
        "Your apple tree appears healthy! Continue regular maintenance, including pruning and watering.",
    ),
    (
        "Corn - Healthy",
        "Your corn plant looks healthy! Continue to monitor for any signs of disease.",
    ),
    (
        "Tomato - Late Blight",
        "Apply fungicides like chlorothalonil or mancozeb, remove infected plants, and ensure proper spacing for airflow.",
    ),
    (
        "Tomato - Healthy",
        "Your tomato plant is healthy! Maintain regular watering and monitor for pests.",
    ),
];

/// Plant/disease separator: `" - "` or a run of two or more underscores
/// (PlantVillage folder names use `___`).
static SEPARATOR: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\s+-\s+|_{2,}").unwrap());

// ═══════════════════════════════════════════════════════════
// Canonical label schema: "Plant - Disease Words"
// ═══════════════════════════════════════════════════════════

/// Rewrite a label into `"Plant - Disease Words"`.
///
/// `"Tomato___Late_blight"`, `"Tomato_Late_blight"` and `"tomato - late blight"`
/// all become `"Tomato - Late Blight"`. A label with no separator is
/// title-cased as a whole.
pub fn canonical_label(label: &str) -> String {
    let trimmed = label.trim().trim_matches('_');
    let (plant, disease) = match SEPARATOR.find(trimmed) {
        Some(m) => (&trimmed[..m.start()], Some(&trimmed[m.end()..])),
        None => match trimmed.split_once('_') {
            Some((plant, disease)) => (plant, Some(disease)),
            None => (trimmed, None),
        },
    };

    let plant = title_words(plant);
    match disease.map(title_words) {
        Some(disease) if !disease.is_empty() => format!("{plant} - {disease}"),
        _ => plant,
    }
}

/// Case-insensitive lookup key for a label.
fn label_key(label: &str) -> String {
    canonical_label(label).to_lowercase()
}

fn title_words(part: &str) -> String {
    part.replace('_', " ")
        .split_whitespace()
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                Some(first) => first
                    .to_uppercase()
                    .chain(chars.flat_map(char::to_lowercase))
                    .collect::<String>(),
                None => String::new(),
            }
        })
        .collect::<Vec<String>>()
        .join(" ")
}

// ═══════════════════════════════════════════════════════════
// TreatmentTable
// ═══════════════════════════════════════════════════════════

/// Disease label → advisory text. Lookups never fail.
#[derive(Debug, Clone, Default)]
pub struct TreatmentTable {
    entries: HashMap<String, String>,
}

impl TreatmentTable {
    /// Build from `(label, advice)` pairs. Two labels with the same
    /// canonical form are a `TreatmentTable` error.
    pub fn from_entries<I, K, V>(entries: I) -> Result<Self, DiagnosisError>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: Into<String>,
    {
        let mut table = HashMap::new();
        for (label, advice) in entries {
            let key = label_key(label.as_ref());
            if key.is_empty() {
                return Err(DiagnosisError::TreatmentTable("empty label".into()));
            }
            if table.insert(key, advice.into()).is_some() {
                return Err(DiagnosisError::TreatmentTable(format!(
                    "'{}' duplicates another label after canonicalization",
                    label.as_ref()
                )));
            }
        }
        Ok(Self { entries: table })
    }

    /// The built-in demo table.
    pub fn demo() -> Self {
        Self {
            entries: DEMO_TREATMENTS
                .iter()
                .map(|(label, advice)| (label_key(label), advice.to_string()))
                .collect(),
        }
    }

    /// JSON object `{label: advice}`.
    pub fn from_json_str(json: &str) -> Result<Self, DiagnosisError> {
        let raw: HashMap<String, String> = serde_json::from_str(json)?;
        Self::from_entries(raw)
    }

    pub fn from_json_file(path: &Path) -> Result<Self, DiagnosisError> {
        let json = std::fs::read_to_string(path)?;
        let table = Self::from_json_str(&json)?;
        info!(path = %path.display(), entries = table.len(), "Loaded treatment table");
        Ok(table)
    }

    /// Advisory text for `label`, or [`FALLBACK_TREATMENT`].
    pub fn lookup(&self, label: &str) -> &str {
        match self.entries.get(&label_key(label)) {
            Some(advice) => advice,
            None => {
                debug!(label, "No treatment entry; using fallback");
                FALLBACK_TREATMENT
            }
        }
    }

    /// `(lowercase canonical label, advice)` pairs in no particular order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
