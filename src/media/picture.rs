//! Picture normalisation: every embedded photo is re-encoded as PNG on a
//! white canvas so it lays out the same way whatever its source format.

use std::io::Cursor;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use image::{imageops, DynamicImage, ImageFormat, Rgba, RgbaImage};

use super::{EmbeddedImage, MediaError};

/// Resolution assumed for photos, which rarely carry a usable one.
pub const PICTURE_DPI: u32 = 96;

/// Pads the picture onto a white square whose side is its longer dimension.
/// The source keeps its pixels at the top-left corner.
pub fn normalize_image(raw: &[u8]) -> Result<EmbeddedImage, MediaError> {
    let source = image::load_from_memory(raw).map_err(MediaError::Decode)?;
    let side = source.width().max(source.height());
    pad_onto_white(&source, side, side)
}

/// Pads the picture onto a white canvas `factor` times as wide, same height.
pub fn widen_image(raw: &[u8], factor: f64) -> Result<EmbeddedImage, MediaError> {
    let source = image::load_from_memory(raw).map_err(MediaError::Decode)?;
    let width = ((f64::from(source.width()) * factor) as u32).max(source.width());
    pad_onto_white(&source, width, source.height())
}

/// Decodes a base64 payload, tolerating the line breaks of MIME encoders.
pub fn decode_base64_image(encoded: &str) -> Result<Vec<u8>, MediaError> {
    let compact: String = encoded.chars().filter(|c| !c.is_whitespace()).collect();
    Ok(BASE64.decode(compact)?)
}

fn pad_onto_white(
    source: &DynamicImage,
    width: u32,
    height: u32,
) -> Result<EmbeddedImage, MediaError> {
    let mut canvas = RgbaImage::from_pixel(width, height, Rgba([255, 255, 255, 255]));
    imageops::overlay(&mut canvas, &source.to_rgba8(), 0, 0);
    let flattened = DynamicImage::ImageRgb8(DynamicImage::ImageRgba8(canvas).to_rgb8());

    let mut png = Vec::new();
    flattened
        .write_to(&mut Cursor::new(&mut png), ImageFormat::Png)
        .map_err(MediaError::Encode)?;

    Ok(EmbeddedImage {
        png,
        width,
        height,
        dpi: PICTURE_DPI,
    })
}
