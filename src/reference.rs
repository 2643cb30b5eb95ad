use std::path::PathBuf;

use thiserror::Error;
use tracing::debug;

#[derive(Error, Debug)]
pub enum ReferenceError {
    #[error("Invalid plant name: {0}")]
    InvalidPlant(String),

    #[error("No reference image for {0}")]
    NotFound(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Healthy-leaf photos, one `{Plant}.jpg` per plant.
#[derive(Debug, Clone)]
pub struct ReferenceGallery {
    dir: PathBuf,
}

impl ReferenceGallery {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Path of the reference photo, if one exists.
    pub fn lookup(&self, plant: &str) -> Result<Option<PathBuf>, ReferenceError> {
        let plant = validate_plant_name(plant)?;
        let path = self.dir.join(format!("{plant}.jpg"));
        if path.is_file() {
            Ok(Some(path))
        } else {
            debug!(plant, dir = %self.dir.display(), "No reference image");
            Ok(None)
        }
    }

    /// JPEG bytes of the reference photo.
    pub fn read(&self, plant: &str) -> Result<Vec<u8>, ReferenceError> {
        let path = self
            .lookup(plant)?
            .ok_or_else(|| ReferenceError::NotFound(plant.trim().to_string()))?;
        Ok(std::fs::read(path)?)
    }
}

/// Letters, digits, space, `_`, `(`, `)`, `,` and `-` only. No separators,
/// no dots, so the name cannot leave the gallery directory.
fn validate_plant_name(plant: &str) -> Result<&str, ReferenceError> {
    let plant = plant.trim();
    let allowed = |c: char| c.is_ascii_alphanumeric() || matches!(c, ' ' | '_' | '(' | ')' | ',' | '-');
    if plant.is_empty() || plant.len() > 64 || !plant.chars().all(allowed) {
        return Err(ReferenceError::InvalidPlant(plant.to_string()));
    }
    Ok(plant)
}
