//! Template environment shared by the word-processing and spreadsheet paths.
//!
//! Filters available to templates:
//!
//! | filter | arguments | output |
//! |---|---|---|
//! | `format_money` | | `"1 234,50"` |
//! | `amount_in_words` | | `"пять руб. пятьдесят коп."` |
//! | `render_barcode` | `type`, `width`, `height`, `text` | inline barcode |
//! | `replace_barcode` | `type`, `width`, `height`, `name`, `text` | swaps picture `name` |
//! | `replace_image` | `name` | swaps picture `name` for a base64 image |
//! | `image` | `width`, `height` (mm, optional) | inline picture |

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::Value;
use tera::{Filter, Tera};

use super::package::escape_xml;
use crate::context::{amount_in_words, format_money};
use crate::media::{
    decode_base64_image, normalize_image, synthesize_barcode, EmbeddedImage, ImageSize,
    MediaError, MediaSink, Symbology,
};
use crate::media::barcode::{DEFAULT_MODULE_HEIGHT_MM, DEFAULT_MODULE_WIDTH_MM};

/// Builds the environment for one rendering pass. Media filters write into
/// `sink`, the package being rendered.
pub fn template_engine(sink: Arc<dyn MediaSink>) -> Tera {
    let mut tera = Tera::default();
    tera.autoescape_on(vec![".xml"]);
    tera.set_escape_fn(escape_xml);
    tera.register_filter("format_money", format_money_filter);
    tera.register_filter("amount_in_words", amount_in_words_filter);
    tera.register_filter("render_barcode", RenderBarcode(sink.clone()));
    tera.register_filter("replace_barcode", ReplaceBarcode(sink.clone()));
    tera.register_filter("replace_image", ReplaceImage(sink.clone()));
    tera.register_filter("image", InlineImage(sink));
    tera
}

fn format_money_filter(value: &Value, _: &HashMap<String, Value>) -> tera::Result<Value> {
    Ok(Value::String(format_money(value)))
}

fn amount_in_words_filter(value: &Value, _: &HashMap<String, Value>) -> tera::Result<Value> {
    Ok(Value::String(amount_in_words(value)))
}

struct RenderBarcode(Arc<dyn MediaSink>);

impl Filter for RenderBarcode {
    fn filter(&self, value: &Value, args: &HashMap<String, Value>) -> tera::Result<Value> {
        let spec = BarcodeArgs::parse("render_barcode", args)?;
        let image = spec.synthesize(value).map_err(media_error)?;
        let markup = self
            .0
            .inline_image(&image, ImageSize::height(spec.height))
            .map_err(media_error)?;
        Ok(Value::String(markup))
    }

    fn is_safe(&self) -> bool {
        true
    }
}

struct ReplaceBarcode(Arc<dyn MediaSink>);

impl Filter for ReplaceBarcode {
    fn filter(&self, value: &Value, args: &HashMap<String, Value>) -> tera::Result<Value> {
        let spec = BarcodeArgs::parse("replace_barcode", args)?;
        let name = required_str("replace_barcode", args, "name")?;
        let image = spec.synthesize(value).map_err(media_error)?;
        self.0.replace_picture(name, image.png).map_err(media_error)?;
        Ok(Value::String(String::new()))
    }

    fn is_safe(&self) -> bool {
        true
    }
}

struct ReplaceImage(Arc<dyn MediaSink>);

impl Filter for ReplaceImage {
    fn filter(&self, value: &Value, args: &HashMap<String, Value>) -> tera::Result<Value> {
        let name = required_str("replace_image", args, "name")?;
        let image = picture_from_value(value).map_err(media_error)?;
        if let Some(image) = image {
            self.0.replace_picture(name, image.png).map_err(media_error)?;
        }
        Ok(Value::String(String::new()))
    }

    fn is_safe(&self) -> bool {
        true
    }
}

struct InlineImage(Arc<dyn MediaSink>);

impl Filter for InlineImage {
    fn filter(&self, value: &Value, args: &HashMap<String, Value>) -> tera::Result<Value> {
        let Some(image) = picture_from_value(value).map_err(media_error)? else {
            return Ok(Value::String(String::new()));
        };
        let size = ImageSize {
            width_mm: number_arg(args, &["width"]),
            height_mm: number_arg(args, &["height"]),
        };
        let markup = self.0.inline_image(&image, size).map_err(media_error)?;
        Ok(Value::String(markup))
    }

    fn is_safe(&self) -> bool {
        true
    }
}

/// Barcode arguments as written in a template, e.g.
/// `render_barcode(type="ean13", width=0.3, height=12, text=true)`.
struct BarcodeArgs {
    symbology: Symbology,
    width: f64,
    height: f64,
    show_text: bool,
}

impl BarcodeArgs {
    fn parse(filter: &str, args: &HashMap<String, Value>) -> tera::Result<Self> {
        let symbology = args
            .get("type")
            .or_else(|| args.get("symbology"))
            .and_then(Value::as_str)
            .ok_or_else(|| tera::Error::msg(format!("Filter `{filter}` expected a `type` argument")))?
            .parse::<Symbology>()
            .map_err(media_error)?;
        Ok(Self {
            symbology,
            width: number_arg(args, &["width", "module_width"]).unwrap_or(DEFAULT_MODULE_WIDTH_MM),
            height: number_arg(args, &["height", "module_height"]).unwrap_or(DEFAULT_MODULE_HEIGHT_MM),
            show_text: args
                .get("text")
                .or_else(|| args.get("write_text"))
                .and_then(Value::as_bool)
                .unwrap_or(false),
        })
    }

    fn synthesize(&self, value: &Value) -> Result<EmbeddedImage, MediaError> {
        synthesize_barcode(
            &value_text(value),
            self.symbology,
            self.width,
            self.height,
            self.show_text,
        )
    }
}

/// Accepts an image placed in the context by an enricher or a base64 string
/// (normalised onto a white square). Empty values yield `None`.
fn picture_from_value(value: &Value) -> Result<Option<EmbeddedImage>, MediaError> {
    if let Some(image) = EmbeddedImage::from_value(value) {
        return Ok(Some(image));
    }
    match value {
        Value::String(encoded) if !encoded.trim().is_empty() => {
            let raw = decode_base64_image(encoded)?;
            normalize_image(&raw).map(Some)
        }
        _ => Ok(None),
    }
}

fn value_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

fn number_arg(args: &HashMap<String, Value>, names: &[&str]) -> Option<f64> {
    names
        .iter()
        .find_map(|name| args.get(*name))
        .and_then(Value::as_f64)
}

fn required_str<'a>(
    filter: &str,
    args: &'a HashMap<String, Value>,
    name: &str,
) -> tera::Result<&'a str> {
    args.get(name)
        .and_then(Value::as_str)
        .ok_or_else(|| tera::Error::msg(format!("Filter `{filter}` expected a `{name}` argument")))
}

fn media_error(error: MediaError) -> tera::Error {
    tera::Error::chain(error.to_string(), error)
}
