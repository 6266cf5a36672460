//! Plain-text output, taken from a rendered docx.

use super::docx::{render_docx, DOCUMENT_PART, W_NS};
use super::package::OoxmlPackage;
use super::RenderError;
use crate::context::RenderContext;

pub fn render_text(template: &[u8], context: &RenderContext) -> Result<Vec<u8>, RenderError> {
    let rendered = render_docx(template, context)?;
    let xml = OoxmlPackage::open(&rendered)?.read_xml(DOCUMENT_PART)?;
    Ok(extract_paragraph_text(&xml)?.into_bytes())
}

/// Text of each top-level body paragraph followed by `\n`. Tabs become `\t`
/// and line breaks `\n`; paragraph and run properties are ignored.
pub fn extract_paragraph_text(xml: &str) -> Result<String, RenderError> {
    let document = roxmltree::Document::parse(xml).map_err(|e| RenderError::Xml {
        part: DOCUMENT_PART.to_string(),
        reason: e.to_string(),
    })?;
    let Some(body) = document
        .descendants()
        .find(|node| node.has_tag_name((W_NS, "body")))
    else {
        return Ok(String::new());
    };

    let mut text = String::new();
    for paragraph in body.children().filter(|node| node.has_tag_name((W_NS, "p"))) {
        for node in paragraph.descendants().filter(|node| node.is_element()) {
            let in_properties = node
                .ancestors()
                .any(|a| a.has_tag_name((W_NS, "pPr")) || a.has_tag_name((W_NS, "rPr")));
            if in_properties {
                continue;
            }
            match node.tag_name().name() {
                "t" => text.push_str(node.text().unwrap_or_default()),
                "tab" => text.push('\t'),
                "br" | "cr" => text.push('\n'),
                _ => {}
            }
        }
        text.push('\n');
    }
    Ok(text)
}
