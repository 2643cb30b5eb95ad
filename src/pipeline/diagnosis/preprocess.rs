//! Image preprocessing for classifier input.
//!
//! Each step is an independent service composed by `PreprocessingPipeline`:
//! 1. Validate encoded bytes (size bounds)
//! 2. Decode
//! 3. `orientation.correct()`: fix EXIF rotation of phone photos
//! 4. Convert to an RGB pixel buffer
//! 5. `normalizer.normalize()`: channel order fix, resize, scale to [0, 1], batch of one
//!
//! Pure image-to-tensor transform: no model calls, fully testable.

use std::io::Cursor;

use image::imageops::FilterType;
use image::{DynamicImage, GenericImageView, RgbImage};
use ndarray::Array4;
use tracing::debug;

use super::types::{BatchTensor, ChannelOrder, ImageInput, PixelImage};
use super::DiagnosisError;

/// Maximum encoded upload size before rejecting.
const MAX_IMAGE_BYTES: usize = 20 * 1024 * 1024; // 20 MB

/// Minimum valid image size in bytes (smallest valid PNG is ~67 bytes).
const MIN_IMAGE_BYTES: usize = 67;

/// Only three-channel buffers are accepted by the normalizer.
pub const SUPPORTED_CHANNELS: u8 = 3;

// ═══════════════════════════════════════════════════════════
// Configuration
// ═══════════════════════════════════════════════════════════

/// What the classifier expects. Fixed by the model, not chosen here.
#[derive(Debug, Clone)]
pub struct ModelInputConfig {
    pub target_width: u32,
    pub target_height: u32,
    pub resize_filter: FilterType,
}

impl ModelInputConfig {
    /// MobileNetV2 trained on PlantVillage: 224x224 RGB, bilinear resize.
    pub fn mobilenet_v2() -> Self {
        Self {
            target_width: 224,
            target_height: 224,
            resize_filter: FilterType::Triangle,
        }
    }

    /// NHWC shape of one normalized image.
    pub fn batch_shape(&self) -> [usize; 4] {
        [
            1,
            self.target_height as usize,
            self.target_width as usize,
            SUPPORTED_CHANNELS as usize,
        ]
    }
}

impl Default for ModelInputConfig {
    fn default() -> Self {
        Self::mobilenet_v2()
    }
}

// ═══════════════════════════════════════════════════════════
// Service traits
// ═══════════════════════════════════════════════════════════

/// Fixes image orientation from EXIF metadata.
///
/// Phone photos embed rotation in EXIF tag 0x0112. Without correction a
/// portrait leaf shot reaches the classifier sideways.
pub trait OrientationCorrector: Send + Sync {
    /// `raw_bytes` are the undecoded file bytes (needed for EXIF reading).
    /// No-op if no EXIF or orientation=1.
    fn correct(&self, raw_bytes: &[u8], image: DynamicImage) -> DynamicImage;
}

/// Turns a pixel buffer into the classifier's input tensor.
pub trait ImageNormalizer: Send + Sync {
    fn normalize(&self, image: &PixelImage) -> Result<BatchTensor, DiagnosisError>;
}

/// Prepares any accepted input for the classifier.
pub trait ImagePreprocessor: Send + Sync {
    fn prepare(&self, input: &ImageInput) -> Result<BatchTensor, DiagnosisError>;
}

// ═══════════════════════════════════════════════════════════
// PreprocessingPipeline: composes services
// ═══════════════════════════════════════════════════════════

pub struct PreprocessingPipeline {
    orientation: Box<dyn OrientationCorrector>,
    normalizer: Box<dyn ImageNormalizer>,
}

impl PreprocessingPipeline {
    pub fn new(
        orientation: Box<dyn OrientationCorrector>,
        normalizer: Box<dyn ImageNormalizer>,
    ) -> Self {
        Self {
            orientation,
            normalizer,
        }
    }

    /// Production pipeline for a 224x224 MobileNetV2 classifier.
    pub fn mobilenet_v2() -> Self {
        Self::new(
            Box::new(ExifOrientationCorrector),
            Box::new(ResizeScaleNormalizer::new(ModelInputConfig::mobilenet_v2())),
        )
    }

    /// Decode encoded bytes into an orientation-corrected RGB buffer.
    pub fn decode(&self, bytes: &[u8]) -> Result<PixelImage, DiagnosisError> {
        validate_image_bytes(bytes)?;

        let img = image::load_from_memory(bytes)
            .map_err(|e| DiagnosisError::InvalidImage(format!("Failed to decode image: {e}")))?;
        let (orig_w, orig_h) = img.dimensions();

        let img = self.orientation.correct(bytes, img);
        let rgb = img.to_rgb8();

        debug!(
            source = format!("{orig_w}x{orig_h}"),
            oriented = format!("{}x{}", rgb.width(), rgb.height()),
            "Decoded uploaded image"
        );

        Ok(PixelImage::from_rgb(rgb))
    }
}

impl ImagePreprocessor for PreprocessingPipeline {
    fn prepare(&self, input: &ImageInput) -> Result<BatchTensor, DiagnosisError> {
        match input {
            ImageInput::Pixels(pixels) => self.normalizer.normalize(pixels),
            ImageInput::Encoded(bytes) => {
                let pixels = self.decode(bytes)?;
                self.normalizer.normalize(&pixels)
            }
        }
    }
}

// ═══════════════════════════════════════════════════════════
// Production implementations
// ═══════════════════════════════════════════════════════════

// ── ExifOrientationCorrector ──────────────────────────────

/// EXIF orientation values:
/// 1 = Normal, 2 = Mirrored, 3 = 180deg, 4 = Flipped V,
/// 5 = Mirrored + 90deg CW, 6 = 90deg CW, 7 = Mirrored + 270deg CW, 8 = 270deg CW
pub struct ExifOrientationCorrector;

impl OrientationCorrector for ExifOrientationCorrector {
    fn correct(&self, raw_bytes: &[u8], image: DynamicImage) -> DynamicImage {
        let orientation = read_exif_orientation(raw_bytes);
        apply_orientation(image, orientation)
    }
}

/// Read EXIF orientation tag from raw image bytes.
/// Returns 1 (normal) if no EXIF data or tag not present.
pub fn read_exif_orientation(bytes: &[u8]) -> u32 {
    let mut cursor = Cursor::new(bytes);
    let reader = match exif::Reader::new().read_from_container(&mut cursor) {
        Ok(r) => r,
        Err(_) => return 1,
    };

    reader
        .get_field(exif::Tag::Orientation, exif::In::PRIMARY)
        .and_then(|f| f.value.get_uint(0))
        .unwrap_or(1)
}

/// Apply EXIF orientation transform to a `DynamicImage`.
pub fn apply_orientation(img: DynamicImage, orientation: u32) -> DynamicImage {
    match orientation {
        2 => img.fliph(),
        3 => img.rotate180(),
        4 => img.flipv(),
        5 => img.rotate90().fliph(),
        6 => img.rotate90(),
        7 => img.rotate270().fliph(),
        8 => img.rotate270(),
        _ => img,
    }
}

// ── ResizeScaleNormalizer ─────────────────────────────────

/// Exact resize to the model size (no aspect padding, matching training),
/// then `u8 / 255.0` into an NHWC tensor of batch one.
pub struct ResizeScaleNormalizer {
    config: ModelInputConfig,
}

impl ResizeScaleNormalizer {
    pub fn new(config: ModelInputConfig) -> Self {
        Self { config }
    }
}

impl ImageNormalizer for ResizeScaleNormalizer {
    fn normalize(&self, image: &PixelImage) -> Result<BatchTensor, DiagnosisError> {
        let rgb = to_rgb_image(image)?;

        let (w, h) = (self.config.target_width, self.config.target_height);
        let resized = if rgb.dimensions() == (w, h) {
            rgb
        } else {
            image::imageops::resize(&rgb, w, h, self.config.resize_filter)
        };

        let [n, rows, cols, channels] = self.config.batch_shape();
        let tensor = Array4::from_shape_fn((n, rows, cols, channels), |(_, y, x, c)| {
            resized.get_pixel(x as u32, y as u32)[c] as f32 / 255.0
        });

        debug!(
            input = format!("{}x{}", image.width, image.height),
            order = ?image.order,
            output = format!("{w}x{h}"),
            "Image normalized for classifier"
        );

        Ok(tensor)
    }
}

// ═══════════════════════════════════════════════════════════
// Pure helper functions
// ═══════════════════════════════════════════════════════════

/// Validate encoded image bytes before decoding.
pub fn validate_image_bytes(bytes: &[u8]) -> Result<(), DiagnosisError> {
    if bytes.is_empty() {
        return Err(DiagnosisError::InvalidImage("No image data".into()));
    }
    if bytes.len() < MIN_IMAGE_BYTES {
        return Err(DiagnosisError::InvalidImage(
            "Image data too small to be valid".into(),
        ));
    }
    if bytes.len() > MAX_IMAGE_BYTES {
        return Err(DiagnosisError::InvalidImage(format!(
            "Image data exceeds {}MB limit",
            MAX_IMAGE_BYTES / (1024 * 1024)
        )));
    }
    Ok(())
}

/// Check a pixel buffer and convert it to an RGB image, swapping BGR.
pub fn to_rgb_image(image: &PixelImage) -> Result<RgbImage, DiagnosisError> {
    if image.is_empty() {
        return Err(DiagnosisError::InvalidImage("Image is empty".into()));
    }
    if image.channels != SUPPORTED_CHANNELS {
        return Err(DiagnosisError::InvalidImage(format!(
            "Unsupported channel count: {} (expected {SUPPORTED_CHANNELS})",
            image.channels
        )));
    }

    let expected = image.width as usize * image.height as usize * SUPPORTED_CHANNELS as usize;
    if image.data.len() != expected {
        return Err(DiagnosisError::InvalidImage(format!(
            "Pixel buffer has {} bytes, expected {expected} for {}x{}",
            image.data.len(),
            image.width,
            image.height
        )));
    }

    let mut data = image.data.clone();
    if image.order == ChannelOrder::Bgr {
        for px in data.chunks_exact_mut(3) {
            px.swap(0, 2);
        }
    }

    RgbImage::from_raw(image.width, image.height, data)
        .ok_or_else(|| DiagnosisError::InvalidImage("Pixel buffer does not fit dimensions".into()))
}

/// Encode an RGB image as PNG bytes.
pub fn encode_png(img: &RgbImage) -> Result<Vec<u8>, DiagnosisError> {
    let mut cursor = Cursor::new(Vec::new());
    DynamicImage::ImageRgb8(img.clone())
        .write_to(&mut cursor, image::ImageFormat::Png)
        .map_err(|e| DiagnosisError::InvalidImage(format!("PNG encoding failed: {e}")))?;
    Ok(cursor.into_inner())
}
