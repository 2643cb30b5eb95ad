use ndarray::Array4;
use serde::{Deserialize, Serialize};

/// Normalized classifier input, NHWC layout with a batch of one.
pub type BatchTensor = Array4<f32>;

/// Channel order of a raw pixel buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChannelOrder {
    Rgb,
    /// OpenCV-style buffers.
    Bgr,
}

/// A decoded, interleaved 8-bit pixel buffer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PixelImage {
    pub width: u32,
    pub height: u32,
    pub channels: u8,
    pub order: ChannelOrder,
    /// Row-major, `width * height * channels` bytes.
    pub data: Vec<u8>,
}

impl PixelImage {
    pub fn new(width: u32, height: u32, channels: u8, order: ChannelOrder, data: Vec<u8>) -> Self {
        Self {
            width,
            height,
            channels,
            order,
            data,
        }
    }

    /// Wrap an `image` RGB buffer without copying.
    pub fn from_rgb(image: image::RgbImage) -> Self {
        let (width, height) = image.dimensions();
        Self {
            width,
            height,
            channels: 3,
            order: ChannelOrder::Rgb,
            data: image.into_raw(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0 || self.data.is_empty()
    }
}

/// What a caller can hand to `diagnose`.
#[derive(Debug, Clone)]
pub enum ImageInput {
    /// Already-decoded pixels.
    Pixels(PixelImage),
    /// Encoded file bytes (PNG, JPEG) as uploaded.
    Encoded(Vec<u8>),
}

/// Winning class of a single inference.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Prediction {
    pub class_index: usize,
    /// Peak probability as a percentage, 0–100.
    pub confidence: f32,
}

/// Outcome of one successful diagnosis. Not persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiagnosisResult {
    pub class_index: usize,
    pub label: String,
    /// Plant part of the label (`"Tomato"` for `"Tomato - Healthy"`).
    pub plant: String,
    pub confidence: f32,
    pub treatment: String,
}
