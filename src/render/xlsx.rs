//! Spreadsheet (xlsx) rendering.
//!
//! Cells holding markup are turned into inline strings so that every
//! worksheet can be evaluated as a single template. Row loops (`{%row …%}`)
//! repeat whole `<row>` elements; the rows are renumbered afterwards so the
//! sheet stays valid.

use std::sync::Arc;

use lazy_static::lazy_static;
use parking_lot::Mutex;
use regex::{Captures, Regex};

use super::engine::template_engine;
use super::markup::{collapse_block_tags, find_open, has_markup, join_split_tags, TAG};
use super::package::{
    ensure_namespace, escape_xml, insert_before_close, OoxmlPackage, IMAGE_RELATIONSHIP,
    OFFICE_RELATIONSHIPS_NS, PNG_CONTENT_TYPE,
};
use super::RenderError;
use crate::context::{RenderContext, SHEET_NAME_KEY};
use crate::media::{EmbeddedImage, ImageSize, MediaError, MediaSink};

pub const WORKBOOK_PART: &str = "xl/workbook.xml";
const SHARED_STRINGS_PART: &str = "xl/sharedStrings.xml";
const S_NS: &str = "http://schemas.openxmlformats.org/spreadsheetml/2006/main";
const XDR_NS: &str = "http://schemas.openxmlformats.org/drawingml/2006/spreadsheetDrawing";
const A_NS: &str = "http://schemas.openxmlformats.org/drawingml/2006/main";
const SHARED_STRINGS_RELATIONSHIP: &str =
    "http://schemas.openxmlformats.org/officeDocument/2006/relationships/sharedStrings";
const DRAWING_RELATIONSHIP: &str =
    "http://schemas.openxmlformats.org/officeDocument/2006/relationships/drawing";
const DRAWING_CONTENT_TYPE: &str = "application/vnd.openxmlformats-officedocument.drawing+xml";

pub const MAX_SHEET_NAME_CHARS: usize = 31;
const FORBIDDEN_SHEET_CHARS: &[char] = &['[', ']', ':', '*', '?', '/', '\\'];

/// Private-use code points delimiting an image placeholder in cell text.
const MARKER_OPEN: char = '\u{E000}';
const MARKER_CLOSE: char = '\u{E001}';

lazy_static! {
    static ref WORKSHEET_PART: Regex = Regex::new(r"^xl/worksheets/sheet(\d+)\.xml$").unwrap();
    static ref SHARED_STRING_CELL: Regex =
        Regex::new(r"<c\b([^>]*)>\s*<v>(\d+)</v>\s*</c>").unwrap();
    static ref SHARED_TYPE_ATTR: Regex = Regex::new(r#"\s+t="s""#).unwrap();
    static ref ROW: Regex = Regex::new(r"(?s)<row\b[^>]*?/>|<row\b.*?</row>").unwrap();
    static ref ROW_NUMBER: Regex = Regex::new(r#"^(<row\b[^>]*?\sr=")(\d+)(")"#).unwrap();
    static ref CELL_REF: Regex = Regex::new(r#"(<c\b[^>]*?\sr=")([A-Z]+)(\d+)(")"#).unwrap();
    static ref MARKER: Regex = Regex::new(r"\x{E000}(\d+)\x{E001}").unwrap();
    static ref FIRST_SHEET_NAME: Regex = Regex::new(r#"(<sheet\b[^>]*?\sname=")([^"]*)(")"#).unwrap();
    static ref DRAWING_PIC_ID: Regex = Regex::new(r#"<xdr:cNvPr\b[^>]*?\sid="(\d+)""#).unwrap();
}

/// Renders an xlsx template. The first sheet is renamed to `sheet_name`.
pub fn render_xlsx(
    template: &[u8],
    context: &RenderContext,
    sheet_name: &str,
) -> Result<Vec<u8>, RenderError> {
    let package = OoxmlPackage::open(template)?;
    if !package.contains(WORKBOOK_PART) {
        return Err(RenderError::MissingPart(WORKBOOK_PART.to_string()));
    }
    let shared = shared_strings(&package)?;
    let sheets = worksheet_parts(&package);

    let book = Arc::new(SpreadsheetDocument::new(package));
    let mut tera = template_engine(book.clone());
    let mut tera_context = context.to_tera()?;
    tera_context.insert(SHEET_NAME_KEY, sheet_name);

    for sheet in &sheets {
        let xml = book.read_xml(sheet)?;
        tera.add_raw_template(sheet, &prepare_sheet_xml(&xml, &shared))?;
        book.begin_part(sheet);
        let rendered = tera.render(sheet, &tera_context)?;
        book.store_sheet(sheet, renumber_rows(&rendered))?;
    }
    drop(tera);

    book.finish(sheet_name)
}

/// Worksheet parts ordered by sheet number.
fn worksheet_parts(package: &OoxmlPackage) -> Vec<String> {
    let mut sheets: Vec<(u32, String)> = package
        .part_names()
        .filter_map(|name| {
            let number = WORKSHEET_PART.captures(name)?[1].parse().ok()?;
            Some((number, name.to_string()))
        })
        .collect();
    sheets.sort();
    sheets.into_iter().map(|(_, name)| name).collect()
}

/// Plain text of every shared string, in index order. Phonetic runs are skipped.
fn shared_strings(package: &OoxmlPackage) -> Result<Vec<String>, RenderError> {
    let part = package
        .related_part(WORKBOOK_PART, SHARED_STRINGS_RELATIONSHIP)
        .map(|(_, part)| part)
        .unwrap_or_else(|| SHARED_STRINGS_PART.to_string());
    if !package.contains(&part) {
        return Ok(Vec::new());
    }

    let xml = package.read_xml(&part)?;
    let document = roxmltree::Document::parse(&xml).map_err(|e| RenderError::Xml {
        part: part.clone(),
        reason: e.to_string(),
    })?;
    Ok(document
        .root_element()
        .children()
        .filter(|node| node.has_tag_name((S_NS, "si")))
        .map(|item| {
            item.descendants()
                .filter(|node| node.has_tag_name((S_NS, "t")))
                .filter(|node| !node.ancestors().any(|a| a.has_tag_name((S_NS, "rPh"))))
                .filter_map(|node| node.text())
                .collect::<String>()
        })
        .collect())
}

/// Inlines shared strings that carry markup and collapses `{%row` blocks.
fn prepare_sheet_xml(xml: &str, shared: &[String]) -> String {
    let xml = join_split_tags(xml);
    let inlined = SHARED_STRING_CELL.replace_all(&xml, |caps: &Captures| {
        let attrs = &caps[1];
        let text = caps[2]
            .parse::<usize>()
            .ok()
            .and_then(|index| shared.get(index))
            .filter(|text| has_markup(text));
        match (text, SHARED_TYPE_ATTR.is_match(attrs)) {
            (Some(text), true) => format!(
                r#"<c{} t="inlineStr"><is><t xml:space="preserve">{}</t></is></c>"#,
                SHARED_TYPE_ATTR.replace(attrs, ""),
                escape_outside_tags(text)
            ),
            _ => caps[0].to_string(),
        }
    });
    collapse_block_tags(&inlined, "row", "row")
}

/// XML-escapes literal text while leaving template tags as written.
fn escape_outside_tags(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut last = 0;
    for tag in TAG.find_iter(text) {
        out.push_str(&escape_xml(&text[last..tag.start()]));
        out.push_str(tag.as_str());
        last = tag.end();
    }
    out.push_str(&escape_xml(&text[last..]));
    out
}

/// Makes row numbers strictly increasing after row loops. Rows keep their
/// template number unless an earlier row pushed them down, and cell
/// references follow their row.
pub fn renumber_rows(xml: &str) -> String {
    let mut last = 0u64;
    let mut shift = 0u64;
    ROW.replace_all(xml, |caps: &Captures| {
        let row = &caps[0];
        let Some(original) = ROW_NUMBER
            .captures(row)
            .and_then(|c| c[2].parse::<u64>().ok())
        else {
            last += 1;
            return row.to_string();
        };
        let number = (original + shift).max(last + 1);
        shift = number - original;
        last = number;
        if number == original {
            return row.to_string();
        }
        let row = ROW_NUMBER.replace(row, |c: &Captures| format!("{}{}{}", &c[1], number, &c[3]));
        CELL_REF
            .replace_all(&row, |c: &Captures| format!("{}{}{}{}", &c[1], &c[2], number, &c[4]))
            .into_owned()
    })
    .into_owned()
}

/// Applies the Excel sheet-name rules: at most 31 characters, none of
/// `[]:*?/\`, no leading or trailing apostrophe.
pub fn sanitize_sheet_name(name: &str) -> String {
    let cleaned: String = name
        .chars()
        .filter(|c| !FORBIDDEN_SHEET_CHARS.contains(c) && !c.is_control())
        .collect();
    let trimmed: String = cleaned
        .trim()
        .trim_matches('\'')
        .chars()
        .take(MAX_SHEET_NAME_CHARS)
        .collect();
    let trimmed = trimmed.trim().trim_end_matches('\'').to_string();
    if trimmed.is_empty() {
        "Sheet1".to_string()
    } else {
        trimmed
    }
}

/// Zero-based column index of `A`, `B`, … `AA`.
fn column_index(letters: &str) -> u32 {
    letters
        .bytes()
        .fold(0u32, |acc, b| acc * 26 + u32::from(b - b'A') + 1)
        .saturating_sub(1)
}

struct PlacedImage {
    image: EmbeddedImage,
    size: ImageSize,
}

#[derive(Debug)]
struct Anchor {
    column: u32,
    row: u32,
    image: usize,
}

struct SheetState {
    package: OoxmlPackage,
    current_part: String,
    images: Vec<PlacedImage>,
    pending_replacements: Vec<(String, Vec<u8>)>,
}

/// Document handle for an xlsx rendering pass.
///
/// Cells cannot hold pictures, so inline images are emitted as placeholders
/// and anchored into the sheet's drawing part once the sheet is rendered.
pub struct SpreadsheetDocument {
    state: Mutex<SheetState>,
}

impl SpreadsheetDocument {
    pub fn new(package: OoxmlPackage) -> Self {
        Self {
            state: Mutex::new(SheetState {
                package,
                current_part: String::new(),
                images: Vec::new(),
                pending_replacements: Vec::new(),
            }),
        }
    }

    fn read_xml(&self, part: &str) -> Result<String, RenderError> {
        self.state.lock().package.read_xml(part)
    }

    fn begin_part(&self, part: &str) {
        self.state.lock().current_part = part.to_string();
    }

    fn store_sheet(&self, part: &str, xml: String) -> Result<(), RenderError> {
        let mut anchors = Vec::new();
        for caps in MARKER.captures_iter(&xml) {
            let Some(position) = caps.get(0).map(|m| m.start()) else {
                continue;
            };
            let Ok(image) = caps[1].parse::<usize>() else {
                continue;
            };
            let cell = find_open(&xml[..position], "c")
                .and_then(|start| CELL_REF.captures(&xml[start..position]));
            match cell {
                Some(cell) => anchors.push(Anchor {
                    column: column_index(&cell[2]),
                    row: cell[3].parse::<u32>().unwrap_or(1).saturating_sub(1),
                    image,
                }),
                None => log::warn!("Image placeholder outside a cell in {}, dropped", part),
            }
        }
        let xml = MARKER.replace_all(&xml, "").into_owned();

        let mut state = self.state.lock();
        let xml = if anchors.is_empty() {
            xml
        } else {
            let SheetState {
                package, images, ..
            } = &mut *state;
            attach_drawing(package, part, xml, &anchors, images)?
        };
        state.package.put_xml(part, xml);
        Ok(())
    }

    fn finish(&self, sheet_name: &str) -> Result<Vec<u8>, RenderError> {
        let mut state = self.state.lock();
        let drawings: Vec<String> = state
            .package
            .part_names()
            .filter(|name| name.starts_with("xl/drawings/") && name.ends_with(".xml"))
            .map(str::to_string)
            .collect();
        let replacements = std::mem::take(&mut state.pending_replacements);
        for (name, png) in replacements {
            state.package.replace_named_picture(&drawings, &name, png)?;
        }
        rename_first_sheet(&mut state.package, sheet_name)?;
        state.package.to_bytes()
    }
}

impl MediaSink for SpreadsheetDocument {
    fn inline_image(&self, image: &EmbeddedImage, size: ImageSize) -> Result<String, MediaError> {
        let mut state = self.state.lock();
        state.images.push(PlacedImage {
            image: image.clone(),
            size,
        });
        Ok(format!("{MARKER_OPEN}{}{MARKER_CLOSE}", state.images.len() - 1))
    }

    fn replace_picture(&self, name: &str, png: Vec<u8>) -> Result<(), MediaError> {
        self.state
            .lock()
            .pending_replacements
            .push((name.to_string(), png));
        Ok(())
    }
}

/// Adds one picture per anchor to the sheet's drawing, creating the drawing
/// part when the sheet has none. Returns the updated sheet XML.
fn attach_drawing(
    package: &mut OoxmlPackage,
    sheet: &str,
    mut sheet_xml: String,
    anchors: &[Anchor],
    images: &[PlacedImage],
) -> Result<String, RenderError> {
    let existing = package
        .related_part(sheet, DRAWING_RELATIONSHIP)
        .filter(|(_, part)| package.contains(part));
    let (drawing_part, drawing_xml) = match existing {
        Some((_, part)) => {
            let xml = package.read_xml(&part)?;
            (part, xml)
        }
        None => {
            let part = package.next_free_name("xl/drawings/drawing", "xml");
            let target = format!("../drawings/{}", file_name(&part));
            let rel_id = package.add_relationship(sheet, DRAWING_RELATIONSHIP, &target)?;
            package.ensure_override(&part, DRAWING_CONTENT_TYPE)?;
            sheet_xml = insert_drawing_element(
                &ensure_namespace(&sheet_xml, "r", OFFICE_RELATIONSHIPS_NS),
                &rel_id,
            )?;
            let xml = format!(
                "<?xml version=\"1.0\" encoding=\"UTF-8\" standalone=\"yes\"?>\n<xdr:wsDr xmlns:xdr=\"{XDR_NS}\" xmlns:a=\"{A_NS}\" xmlns:r=\"{OFFICE_RELATIONSHIPS_NS}\"></xdr:wsDr>"
            );
            (part, xml)
        }
    };
    let drawing_xml = ensure_namespace(&drawing_xml, "a", A_NS);
    let drawing_xml = ensure_namespace(&drawing_xml, "r", OFFICE_RELATIONSHIPS_NS);
    package.ensure_default_content_type("png", PNG_CONTENT_TYPE)?;

    let mut next_id = DRAWING_PIC_ID
        .captures_iter(&drawing_xml)
        .filter_map(|caps| caps[1].parse::<u32>().ok())
        .max()
        .unwrap_or(1)
        + 1;
    let mut fragments = String::new();
    for anchor in anchors {
        let Some(placed) = images.get(anchor.image) else {
            continue;
        };
        let media = package.next_free_name("xl/media/image", "png");
        package.put(&media, placed.image.png.clone());
        let rel_id = package.add_relationship(
            &drawing_part,
            IMAGE_RELATIONSHIP,
            &format!("../media/{}", file_name(&media)),
        )?;
        let (cx, cy) = placed.size.resolve_emu(&placed.image);
        fragments.push_str(&one_cell_anchor(anchor, cx, cy, next_id, &rel_id));
        next_id += 1;
    }

    let drawing_xml = insert_before_close(&drawing_xml, "</xdr:wsDr>", &fragments)?;
    package.put_xml(&drawing_part, drawing_xml);
    Ok(sheet_xml)
}

/// Places `<drawing r:id=…/>` where the worksheet schema expects it.
fn insert_drawing_element(xml: &str, rel_id: &str) -> Result<String, RenderError> {
    const FOLLOWERS: [&str; 8] = [
        "<legacyDrawing",
        "<drawingHF",
        "<picture",
        "<oleObjects",
        "<controls",
        "<webPublishItems",
        "<tableParts",
        "<extLst",
    ];
    let element = format!(r#"<drawing r:id="{rel_id}"/>"#);
    match FOLLOWERS.iter().filter_map(|tag| xml.find(tag)).min() {
        Some(at) => Ok(format!("{}{}{}", &xml[..at], element, &xml[at..])),
        None => insert_before_close(xml, "</worksheet>", &element),
    }
}

fn one_cell_anchor(anchor: &Anchor, cx: u64, cy: u64, id: u32, rel_id: &str) -> String {
    format!(
        concat!(
            "<xdr:oneCellAnchor>",
            "<xdr:from><xdr:col>{col}</xdr:col><xdr:colOff>0</xdr:colOff>",
            "<xdr:row>{row}</xdr:row><xdr:rowOff>0</xdr:rowOff></xdr:from>",
            r#"<xdr:ext cx="{cx}" cy="{cy}"/>"#,
            "<xdr:pic><xdr:nvPicPr>",
            r#"<xdr:cNvPr id="{id}" name="Picture {id}"/>"#,
            r#"<xdr:cNvPicPr><a:picLocks noChangeAspect="1"/></xdr:cNvPicPr></xdr:nvPicPr>"#,
            r#"<xdr:blipFill><a:blip r:embed="{rel}"/><a:stretch><a:fillRect/></a:stretch></xdr:blipFill>"#,
            r#"<xdr:spPr><a:xfrm><a:off x="0" y="0"/><a:ext cx="{cx}" cy="{cy}"/></a:xfrm>"#,
            r#"<a:prstGeom prst="rect"><a:avLst/></a:prstGeom></xdr:spPr>"#,
            "</xdr:pic><xdr:clientData/></xdr:oneCellAnchor>"
        ),
        col = anchor.column,
        row = anchor.row,
        cx = cx,
        cy = cy,
        id = id,
        rel = rel_id,
    )
}

fn file_name(part: &str) -> &str {
    part.rsplit('/').next().unwrap_or(part)
}

/// Renames the first sheet and re-points defined names that used the old name.
fn rename_first_sheet(package: &mut OoxmlPackage, sheet_name: &str) -> Result<(), RenderError> {
    let xml = package.read_xml(WORKBOOK_PART)?;
    let Some(name) = FIRST_SHEET_NAME.captures(&xml).and_then(|caps| caps.get(2)) else {
        return Ok(());
    };
    let old = name.as_str().to_string();
    let new = escape_xml(&sanitize_sheet_name(sheet_name));
    let mut renamed = format!("{}{}{}", &xml[..name.start()], new, &xml[name.end()..]);

    if let (Some(start), Some(end)) = (renamed.find("<definedNames>"), renamed.find("</definedNames>")) {
        let quoted = format!("'{}'!", new.replace('\'', "''"));
        let names = renamed[start..end]
            .replace(&format!("'{}'!", old.replace('\'', "''")), &quoted)
            .replace(&format!(">{old}!"), &format!(">{quoted}"));
        renamed.replace_range(start..end, &names);
    }

    package.put_xml(WORKBOOK_PART, renamed);
    Ok(())
}
