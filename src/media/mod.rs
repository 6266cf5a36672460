//! Media synthesis for rendered documents.
//!
//! Barcodes and normalised pictures are produced as [`EmbeddedImage`] values.
//! Placing them into a document always goes through a [`MediaSink`], the
//! handle of the package being rendered in the current pass. There is no
//! process-wide "current document".

pub mod barcode;
mod font;
pub mod picture;

pub use barcode::{render_barcode, synthesize_barcode, BarcodeOptions, Symbology};
pub use picture::{decode_base64_image, normalize_image, widen_image};

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use serde_json::{json, Value};
use thiserror::Error;

/// EMU (English Metric Units) per millimetre, as used by DrawingML.
pub const EMU_PER_MM: f64 = 36_000.0;
/// EMU per inch.
pub const EMU_PER_INCH: f64 = 914_400.0;

const IMAGE_KIND: &str = "image";

/// Errors raised while synthesizing or placing media.
#[derive(Debug, Error)]
pub enum MediaError {
    #[error("unknown barcode symbology '{0}'")]
    UnknownSymbology(String),
    #[error("cannot encode '{value}' as {symbology}: {reason}")]
    Barcode {
        value: String,
        symbology: &'static str,
        reason: String,
    },
    #[error("failed to decode image: {0}")]
    Decode(#[source] image::ImageError),
    #[error("failed to encode PNG: {0}")]
    Encode(#[source] image::ImageError),
    #[error("invalid base64 image payload: {0}")]
    Base64(#[from] base64::DecodeError),
    #[error("picture '{0}' not found in template")]
    PictureNotFound(String),
    #[error("template package is malformed: {0}")]
    Package(String),
}

/// A PNG ready to be spliced into a document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EmbeddedImage {
    pub png: Vec<u8>,
    pub width: u32,
    pub height: u32,
    pub dpi: u32,
}

impl EmbeddedImage {
    /// JSON form stored in a render context.
    pub fn to_value(&self) -> Value {
        json!({
            "kind": IMAGE_KIND,
            "data": BASE64.encode(&self.png),
            "width": self.width,
            "height": self.height,
            "dpi": self.dpi,
        })
    }

    /// Inverse of [`EmbeddedImage::to_value`]. Returns `None` for any other value.
    pub fn from_value(value: &Value) -> Option<Self> {
        let object = value.as_object()?;
        if object.get("kind")?.as_str()? != IMAGE_KIND {
            return None;
        }
        let png = BASE64.decode(object.get("data")?.as_str()?).ok()?;
        Some(Self {
            png,
            width: object.get("width")?.as_u64()? as u32,
            height: object.get("height")?.as_u64()? as u32,
            dpi: object.get("dpi").and_then(Value::as_u64).unwrap_or(96) as u32,
        })
    }

    /// Size in EMU when printed at the image's own resolution.
    pub fn natural_size_emu(&self) -> (u64, u64) {
        let dpi = f64::from(self.dpi.max(1));
        (
            (f64::from(self.width) / dpi * EMU_PER_INCH).round() as u64,
            (f64::from(self.height) / dpi * EMU_PER_INCH).round() as u64,
        )
    }
}

/// Requested on-page size of an inline image. Missing sides keep the aspect ratio.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ImageSize {
    pub width_mm: Option<f64>,
    pub height_mm: Option<f64>,
}

impl ImageSize {
    pub fn height(height_mm: f64) -> Self {
        Self {
            width_mm: None,
            height_mm: Some(height_mm),
        }
    }

    /// Resolves the extent in EMU for `image`.
    pub fn resolve_emu(&self, image: &EmbeddedImage) -> (u64, u64) {
        let aspect = if image.height == 0 {
            1.0
        } else {
            f64::from(image.width) / f64::from(image.height)
        };
        match (self.width_mm, self.height_mm) {
            (Some(w), Some(h)) => ((w * EMU_PER_MM) as u64, (h * EMU_PER_MM) as u64),
            (None, Some(h)) => ((h * aspect * EMU_PER_MM) as u64, (h * EMU_PER_MM) as u64),
            (Some(w), None) => ((w * EMU_PER_MM) as u64, (w / aspect * EMU_PER_MM) as u64),
            (None, None) => image.natural_size_emu(),
        }
    }
}

/// Handle on the document being rendered.
///
/// Template filters receive one of these when the rendering pass starts and
/// use it to add media to the package. Implementations are scoped to a single
/// pass and are dropped together with the package they write into.
pub trait MediaSink: Send + Sync {
    /// Registers `image` in the package and returns the markup that shows it
    /// at the current template position.
    fn inline_image(&self, image: &EmbeddedImage, size: ImageSize) -> Result<String, MediaError>;

    /// Swaps the bytes of the existing picture called `name` for `png`.
    fn replace_picture(&self, name: &str, png: Vec<u8>) -> Result<(), MediaError>;
}
