//! One-dimensional barcode synthesis.
//!
//! Module patterns come from `barcoders`; rasterisation is done here so the
//! module size, quiet zone and text line follow the layout parameters given by
//! the template.

use std::fmt;
use std::io::Cursor;
use std::str::FromStr;

use barcoders::sym::code39::Code39;
use barcoders::sym::code93::Code93;
use barcoders::sym::ean13::EAN13;
use barcoders::sym::ean8::EAN8;
use image::{DynamicImage, GrayImage, ImageFormat, Luma};

use super::font::{self, GLYPH_HEIGHT};
use super::{EmbeddedImage, MediaError};

pub const DEFAULT_MODULE_WIDTH_MM: f64 = 0.2;
pub const DEFAULT_MODULE_HEIGHT_MM: f64 = 15.0;
pub const BARCODE_DPI: u32 = 300;

const MM_PER_INCH: f64 = 25.4;
const POINTS_PER_INCH: f64 = 72.0;
/// Cap height of the text line relative to the nominal font size.
const CAP_HEIGHT_RATIO: f64 = 0.7;
/// Largest canvas side accepted, about 1.7 m at 300 dpi.
const MAX_CANVAS_PX: u32 = 20_000;

/// Supported barcode families.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Symbology {
    Ean13,
    Ean8,
    Code39,
    Code93,
}

impl Symbology {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Ean13 => "ean13",
            Self::Ean8 => "ean8",
            Self::Code39 => "code39",
            Self::Code93 => "code93",
        }
    }

    /// Data as it will be encoded and printed.
    fn normalize(&self, value: &str) -> String {
        match self {
            Self::Ean13 | Self::Ean8 => value.trim().to_string(),
            Self::Code39 | Self::Code93 => value.trim().to_uppercase(),
        }
    }

    /// Module pattern, one byte per module (1 = bar). No check character is
    /// appended for the Code family.
    fn encode(&self, data: &str) -> Result<Vec<u8>, MediaError> {
        let fail = |reason: String| MediaError::Barcode {
            value: data.to_string(),
            symbology: self.as_str(),
            reason,
        };
        match self {
            Self::Ean13 => EAN13::new(data)
                .map(|b| b.encode())
                .map_err(|e| fail(e.to_string())),
            Self::Ean8 => EAN8::new(data)
                .map(|b| b.encode())
                .map_err(|e| fail(e.to_string())),
            Self::Code39 => Code39::new(data)
                .map(|b| b.encode())
                .map_err(|e| fail(e.to_string())),
            Self::Code93 => Code93::new(data)
                .map(|b| b.encode())
                .map_err(|e| fail(e.to_string())),
        }
    }
}

impl FromStr for Symbology {
    type Err = MediaError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let key: String = s
            .chars()
            .filter(|c| !matches!(c, '-' | '_' | ' '))
            .collect::<String>()
            .to_ascii_lowercase();
        match key.as_str() {
            "ean" | "ean13" | "gtin" => Ok(Self::Ean13),
            "ean8" => Ok(Self::Ean8),
            "code39" => Ok(Self::Code39),
            "code93" => Ok(Self::Code93),
            _ => Err(MediaError::UnknownSymbology(s.to_string())),
        }
    }
}

impl fmt::Display for Symbology {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Layout parameters, all lengths in millimetres and the font size in points.
#[derive(Debug, Clone, PartialEq)]
pub struct BarcodeOptions {
    pub module_width: f64,
    pub module_height: f64,
    pub quiet_zone: f64,
    pub dpi: u32,
    pub font_size: f64,
    pub text_distance: f64,
    pub write_text: bool,
}

impl BarcodeOptions {
    /// Options used by templates: 300 dpi, no quiet zone, and either a 10pt
    /// text line half a millimetre under the bars or no text metrics at all.
    pub fn new(module_width: f64, module_height: f64, show_text: bool) -> Self {
        let (font_size, text_distance) = if show_text { (10.0, 0.5) } else { (0.0, 0.0) };
        Self {
            module_width,
            module_height,
            quiet_zone: 0.0,
            dpi: BARCODE_DPI,
            font_size,
            text_distance,
            write_text: show_text,
        }
    }
}

impl Default for BarcodeOptions {
    fn default() -> Self {
        Self::new(DEFAULT_MODULE_WIDTH_MM, DEFAULT_MODULE_HEIGHT_MM, false)
    }
}

/// Renders `value` as a barcode PNG.
pub fn synthesize_barcode(
    value: &str,
    symbology: Symbology,
    module_width: f64,
    module_height: f64,
    show_text: bool,
) -> Result<EmbeddedImage, MediaError> {
    render_barcode(
        value,
        symbology,
        &BarcodeOptions::new(module_width, module_height, show_text),
    )
}

/// Renders `value` with explicit layout options.
pub fn render_barcode(
    value: &str,
    symbology: Symbology,
    options: &BarcodeOptions,
) -> Result<EmbeddedImage, MediaError> {
    let data = symbology.normalize(value);
    let modules = symbology.encode(&data)?;
    let too_large = || MediaError::Barcode {
        value: data.clone(),
        symbology: symbology.as_str(),
        reason: format!("layout exceeds {MAX_CANVAS_PX}px"),
    };

    let px_per_mm = f64::from(options.dpi) / MM_PER_INCH;
    let module_px = mm_to_px(options.module_width, px_per_mm).max(1);
    let bar_height = mm_to_px(options.module_height, px_per_mm).max(1);
    let quiet = mm_to_px(options.quiet_zone, px_per_mm);
    let bars_width = u32::try_from(modules.len())
        .ok()
        .and_then(|count| count.checked_mul(module_px))
        .and_then(|bars| bars.checked_add(quiet.checked_mul(2)?))
        .filter(|width| *width <= MAX_CANVAS_PX && bar_height <= MAX_CANVAS_PX)
        .ok_or_else(too_large)?;

    let text_scale = if options.write_text && options.font_size > 0.0 {
        let cap_px = options.font_size / POINTS_PER_INCH * f64::from(options.dpi) * CAP_HEIGHT_RATIO;
        Some(((cap_px / f64::from(GLYPH_HEIGHT)).round() as u32).max(1))
    } else {
        None
    };

    let (width, height, text_top) = match text_scale {
        Some(scale) => {
            if scale > MAX_CANVAS_PX / GLYPH_HEIGHT {
                return Err(too_large());
            }
            let gap = mm_to_px(options.text_distance, px_per_mm).min(MAX_CANVAS_PX);
            let width = bars_width.max(font::text_width(&data, scale));
            let top = bar_height + gap;
            (width, top + GLYPH_HEIGHT * scale + scale, top)
        }
        None => (bars_width, bar_height, 0),
    };
    if width > MAX_CANVAS_PX || height > MAX_CANVAS_PX {
        return Err(too_large());
    }

    let mut canvas = GrayImage::from_pixel(width, height, Luma([255]));
    let bars_left = (width - bars_width) / 2 + quiet;
    for (index, module) in modules.iter().enumerate() {
        if *module == 0 {
            continue;
        }
        let left = bars_left + index as u32 * module_px;
        for x in left..left + module_px {
            for y in 0..bar_height {
                canvas.put_pixel(x, y, Luma([0]));
            }
        }
    }

    if let Some(scale) = text_scale {
        let left = (width - font::text_width(&data, scale)) / 2;
        font::draw_text(&mut canvas, &data, left, text_top, scale);
    }

    let mut png = Vec::new();
    DynamicImage::ImageLuma8(canvas)
        .write_to(&mut Cursor::new(&mut png), ImageFormat::Png)
        .map_err(MediaError::Encode)?;

    Ok(EmbeddedImage {
        png,
        width,
        height,
        dpi: options.dpi,
    })
}

fn mm_to_px(mm: f64, px_per_mm: f64) -> u32 {
    (mm * px_per_mm).round().max(0.0) as u32
}

#[cfg(test)]
mod tests {
    use super::*;

    fn decode(image: &EmbeddedImage) -> GrayImage {
        image::load_from_memory(&image.png).unwrap().to_luma8()
    }

    fn column_is_uniform(canvas: &GrayImage, x: u32) -> bool {
        let first = canvas.get_pixel(x, 0).0[0];
        (0..canvas.height()).all(|y| canvas.get_pixel(x, y).0[0] == first)
    }

    #[test]
    fn test_symbology_names() {
        assert_eq!("ean13".parse::<Symbology>().unwrap(), Symbology::Ean13);
        assert_eq!("EAN".parse::<Symbology>().unwrap(), Symbology::Ean13);
        assert_eq!("code_39".parse::<Symbology>().unwrap(), Symbology::Code39);
        assert!(matches!(
            "qr".parse::<Symbology>(),
            Err(MediaError::UnknownSymbology(_))
        ));
    }

    #[test]
    fn test_bars_only_has_no_quiet_zone_and_no_text() {
        let image = synthesize_barcode("LOT42", Symbology::Code39, 0.2, 10.0, false).unwrap();
        let canvas = decode(&image);

        // 0.2mm at 300dpi rounds to 2px per module, 10mm to 118px.
        assert_eq!(image.height, 118);
        assert_eq!(canvas.height(), 118);
        assert_eq!(image.width % 2, 0);
        // Code39 starts and ends with a bar, so no blank margin on either side.
        assert_eq!(canvas.get_pixel(0, 0).0[0], 0);
        assert_eq!(canvas.get_pixel(canvas.width() - 1, 0).0[0], 0);
        assert!((0..canvas.width()).all(|x| column_is_uniform(&canvas, x)));
    }

    #[test]
    fn test_text_line_makes_image_taller() {
        let plain = synthesize_barcode("LOT42", Symbology::Code39, 0.2, 10.0, false).unwrap();
        let labelled = synthesize_barcode("LOT42", Symbology::Code39, 0.2, 10.0, true).unwrap();
        assert!(labelled.height > plain.height);

        let canvas = decode(&labelled);
        let text_band_has_ink = (plain.height..canvas.height())
            .any(|y| (0..canvas.width()).any(|x| canvas.get_pixel(x, y).0[0] == 0));
        assert!(text_band_has_ink);
    }

    #[test]
    fn test_code39_is_uppercased() {
        let lower = synthesize_barcode("lot-7", Symbology::Code39, 0.2, 5.0, false).unwrap();
        let upper = synthesize_barcode("LOT-7", Symbology::Code39, 0.2, 5.0, false).unwrap();
        assert_eq!(lower, upper);
    }

    #[test]
    fn test_is_deterministic() {
        let a = synthesize_barcode("590123412345", Symbology::Ean13, 0.33, 20.0, true).unwrap();
        let b = synthesize_barcode("590123412345", Symbology::Ean13, 0.33, 20.0, true).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_oversized_layout_is_rejected() {
        for (width, height) in [(1.0e12, 10.0), (0.2, 1.0e12), (f64::MAX, f64::MAX)] {
            let err = synthesize_barcode("LOT42", Symbology::Code39, width, height, false).unwrap_err();
            assert!(
                matches!(err, MediaError::Barcode { symbology: "code39", ref reason, .. } if reason.contains("exceeds")),
                "{err}"
            );
        }
    }

    #[test]
    fn test_invalid_data_is_reported() {
        let err = synthesize_barcode("not digits", Symbology::Ean13, 0.2, 10.0, false).unwrap_err();
        assert!(matches!(err, MediaError::Barcode { symbology: "ean13", .. }));
    }
}
