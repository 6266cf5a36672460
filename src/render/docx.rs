//! Word-processing (docx) rendering.

use std::sync::Arc;

use lazy_static::lazy_static;
use parking_lot::Mutex;
use regex::Regex;

use super::engine::template_engine;
use super::markup::prepare_word_xml;
use super::package::{
    ensure_namespace, OoxmlPackage, IMAGE_RELATIONSHIP, OFFICE_RELATIONSHIPS_NS, PNG_CONTENT_TYPE,
};
use super::RenderError;
use crate::context::RenderContext;
use crate::media::{EmbeddedImage, ImageSize, MediaError, MediaSink};

pub const DOCUMENT_PART: &str = "word/document.xml";
pub const W_NS: &str = "http://schemas.openxmlformats.org/wordprocessingml/2006/main";
const WP_NS: &str = "http://schemas.openxmlformats.org/drawingml/2006/wordprocessingDrawing";
const A_NS: &str = "http://schemas.openxmlformats.org/drawingml/2006/main";
const PIC_NS: &str = "http://schemas.openxmlformats.org/drawingml/2006/picture";

lazy_static! {
    static ref TEMPLATED_PART: Regex =
        Regex::new(r"^word/(?:document|header\d*|footer\d*)\.xml$").unwrap();
    static ref DOC_PR_ID: Regex = Regex::new(r#"<wp:docPr\b[^>]*?\bid="(\d+)""#).unwrap();
}

/// Renders a docx template against `context`.
pub fn render_docx(template: &[u8], context: &RenderContext) -> Result<Vec<u8>, RenderError> {
    let package = OoxmlPackage::open(template)?;
    if !package.contains(DOCUMENT_PART) {
        return Err(RenderError::MissingPart(DOCUMENT_PART.to_string()));
    }

    let document = Arc::new(WordDocument::new(package));
    let mut tera = template_engine(document.clone());
    let tera_context = context.to_tera()?;

    for part in document.templated_parts() {
        let xml = document.read_xml(&part)?;
        tera.add_raw_template(&part, &prepare_word_xml(&xml))?;
        document.begin_part(&part);
        let rendered = tera.render(&part, &tera_context)?;
        document.store_part(&part, rendered);
    }
    drop(tera);

    document.finish()
}

struct WordState {
    package: OoxmlPackage,
    current_part: String,
    next_picture_id: u64,
    pending_replacements: Vec<(String, Vec<u8>)>,
}

/// Document handle for a docx rendering pass.
///
/// Inline images are added as new media parts straight away. Picture
/// replacements are queued until every part is rendered, because the named
/// picture may sit in a part that has not been evaluated yet.
pub struct WordDocument {
    state: Mutex<WordState>,
}

impl WordDocument {
    pub fn new(package: OoxmlPackage) -> Self {
        let max_id = package
            .part_names()
            .filter(|name| TEMPLATED_PART.is_match(name))
            .filter_map(|name| package.get(name))
            .flat_map(|data| {
                let xml = String::from_utf8_lossy(data);
                DOC_PR_ID
                    .captures_iter(&xml)
                    .filter_map(|caps| caps[1].parse::<u64>().ok())
                    .collect::<Vec<_>>()
            })
            .max()
            .unwrap_or(0);

        Self {
            state: Mutex::new(WordState {
                package,
                current_part: DOCUMENT_PART.to_string(),
                next_picture_id: max_id + 1,
                pending_replacements: Vec::new(),
            }),
        }
    }

    /// Body first, then headers and footers in package order.
    fn templated_parts(&self) -> Vec<String> {
        let state = self.state.lock();
        let mut parts: Vec<String> = state
            .package
            .part_names()
            .filter(|name| TEMPLATED_PART.is_match(name))
            .map(str::to_string)
            .collect();
        parts.sort_by_key(|name| name != DOCUMENT_PART);
        parts
    }

    fn read_xml(&self, part: &str) -> Result<String, RenderError> {
        self.state.lock().package.read_xml(part)
    }

    fn begin_part(&self, part: &str) {
        self.state.lock().current_part = part.to_string();
    }

    fn store_part(&self, part: &str, xml: String) {
        let xml = ensure_namespace(&xml, "wp", WP_NS);
        let xml = ensure_namespace(&xml, "r", OFFICE_RELATIONSHIPS_NS);
        self.state.lock().package.put_xml(part, xml);
    }

    fn finish(&self) -> Result<Vec<u8>, RenderError> {
        let mut state = self.state.lock();
        let parts: Vec<String> = state
            .package
            .part_names()
            .filter(|name| TEMPLATED_PART.is_match(name))
            .map(str::to_string)
            .collect();
        let replacements = std::mem::take(&mut state.pending_replacements);
        for (name, png) in replacements {
            state.package.replace_named_picture(&parts, &name, png)?;
        }
        state.package.to_bytes()
    }
}

impl MediaSink for WordDocument {
    fn inline_image(&self, image: &EmbeddedImage, size: ImageSize) -> Result<String, MediaError> {
        let mut state = self.state.lock();
        let media = state.package.next_free_name("word/media/image", "png");
        state.package.put(&media, image.png.clone());
        state
            .package
            .ensure_default_content_type("png", PNG_CONTENT_TYPE)
            .map_err(package_error)?;

        let part = state.current_part.clone();
        let target = media.trim_start_matches("word/");
        let rel_id = state
            .package
            .add_relationship(&part, IMAGE_RELATIONSHIP, target)
            .map_err(package_error)?;

        let picture_id = state.next_picture_id;
        state.next_picture_id += 1;
        let (cx, cy) = size.resolve_emu(image);
        Ok(drawing_run(&rel_id, picture_id, cx, cy))
    }

    fn replace_picture(&self, name: &str, png: Vec<u8>) -> Result<(), MediaError> {
        self.state
            .lock()
            .pending_replacements
            .push((name.to_string(), png));
        Ok(())
    }
}

fn package_error(error: RenderError) -> MediaError {
    MediaError::Package(error.to_string())
}

/// Closes the run holding the tag, adds a run with the inline drawing and
/// reopens a text run for whatever follows the tag.
fn drawing_run(rel_id: &str, id: u64, cx: u64, cy: u64) -> String {
    format!(
        concat!(
            r#"</w:t></w:r><w:r><w:drawing>"#,
            r#"<wp:inline distT="0" distB="0" distL="0" distR="0">"#,
            r#"<wp:extent cx="{cx}" cy="{cy}"/>"#,
            r#"<wp:docPr id="{id}" name="Picture {id}"/>"#,
            r#"<wp:cNvGraphicFramePr><a:graphicFrameLocks xmlns:a="{a}" noChangeAspect="1"/></wp:cNvGraphicFramePr>"#,
            r#"<a:graphic xmlns:a="{a}"><a:graphicData uri="{pic}">"#,
            r#"<pic:pic xmlns:pic="{pic}">"#,
            r#"<pic:nvPicPr><pic:cNvPr id="{id}" name="image{id}.png"/><pic:cNvPicPr/></pic:nvPicPr>"#,
            r#"<pic:blipFill><a:blip r:embed="{rel}"/><a:stretch><a:fillRect/></a:stretch></pic:blipFill>"#,
            r#"<pic:spPr><a:xfrm><a:off x="0" y="0"/><a:ext cx="{cx}" cy="{cy}"/></a:xfrm>"#,
            r#"<a:prstGeom prst="rect"><a:avLst/></a:prstGeom></pic:spPr>"#,
            r#"</pic:pic></a:graphicData></a:graphic></wp:inline>"#,
            r#"</w:drawing></w:r><w:r><w:t xml:space="preserve">"#
        ),
        cx = cx,
        cy = cy,
        id = id,
        a = A_NS,
        pic = PIC_NS,
        rel = rel_id,
    )
}
