//! OOXML package access: zip entries, relationships and content types.

use std::io::{Cursor, Read, Write};

use lazy_static::lazy_static;
use regex::Regex;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

use super::RenderError;
use crate::media::MediaError;

pub const CONTENT_TYPES_PART: &str = "[Content_Types].xml";
pub const RELATIONSHIPS_NS: &str = "http://schemas.openxmlformats.org/package/2006/relationships";
pub const OFFICE_RELATIONSHIPS_NS: &str =
    "http://schemas.openxmlformats.org/officeDocument/2006/relationships";
pub const IMAGE_RELATIONSHIP: &str =
    "http://schemas.openxmlformats.org/officeDocument/2006/relationships/image";
pub const PNG_CONTENT_TYPE: &str = "image/png";

lazy_static! {
    static ref RELATIONSHIP_ID: Regex = Regex::new(r#"\bId="rId(\d+)""#).unwrap();
    static ref ROOT_ELEMENT: Regex = Regex::new(r"<([A-Za-z_][\w.\-]*:)?[A-Za-z_][\w.\-]*[\s>/]").unwrap();
}

#[derive(Debug, Clone)]
struct PackageEntry {
    name: String,
    data: Vec<u8>,
}

/// An OOXML zip held in memory. Entry order is preserved on write.
#[derive(Debug, Clone)]
pub struct OoxmlPackage {
    entries: Vec<PackageEntry>,
}

impl OoxmlPackage {
    pub fn open(bytes: &[u8]) -> Result<Self, RenderError> {
        let mut archive = ZipArchive::new(Cursor::new(bytes))?;
        let mut entries = Vec::with_capacity(archive.len());
        for index in 0..archive.len() {
            let mut file = archive.by_index(index)?;
            if file.is_dir() {
                continue;
            }
            let mut data = Vec::with_capacity(file.size() as usize);
            file.read_to_end(&mut data)?;
            entries.push(PackageEntry {
                name: file.name().to_string(),
                data,
            });
        }
        Ok(Self { entries })
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.iter().any(|entry| entry.name == name)
    }

    pub fn part_names(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|entry| entry.name.as_str())
    }

    pub fn get(&self, name: &str) -> Option<&[u8]> {
        self.entries
            .iter()
            .find(|entry| entry.name == name)
            .map(|entry| entry.data.as_slice())
    }

    pub fn read_xml(&self, name: &str) -> Result<String, RenderError> {
        let data = self
            .get(name)
            .ok_or_else(|| RenderError::MissingPart(name.to_string()))?;
        String::from_utf8(data.to_vec()).map_err(|_| RenderError::Xml {
            part: name.to_string(),
            reason: "part is not UTF-8".to_string(),
        })
    }

    /// Replaces the part called `name`, or appends it.
    pub fn put(&mut self, name: &str, data: Vec<u8>) {
        match self.entries.iter_mut().find(|entry| entry.name == name) {
            Some(entry) => entry.data = data,
            None => self.entries.push(PackageEntry {
                name: name.to_string(),
                data,
            }),
        }
    }

    pub fn put_xml(&mut self, name: &str, xml: String) {
        self.put(name, xml.into_bytes());
    }

    /// First unused `<prefix><n>.<extension>` with `n >= 1`.
    pub fn next_free_name(&self, prefix: &str, extension: &str) -> String {
        (1..)
            .map(|n| format!("{prefix}{n}.{extension}"))
            .find(|candidate| !self.contains(candidate))
            .unwrap_or_else(|| format!("{prefix}.{extension}"))
    }

    /// Declares a default content type for `extension` unless one exists.
    pub fn ensure_default_content_type(
        &mut self,
        extension: &str,
        content_type: &str,
    ) -> Result<(), RenderError> {
        let xml = self.read_xml(CONTENT_TYPES_PART)?;
        let lower = xml.to_ascii_lowercase();
        if lower.contains(&format!("extension=\"{}\"", extension.to_ascii_lowercase())) {
            return Ok(());
        }
        let declaration = format!(r#"<Default Extension="{extension}" ContentType="{content_type}"/>"#);
        self.put_xml(CONTENT_TYPES_PART, insert_before_close(&xml, "</Types>", &declaration)?);
        Ok(())
    }

    /// Declares the content type of a single part, e.g. `/xl/drawings/drawing1.xml`.
    pub fn ensure_override(&mut self, part: &str, content_type: &str) -> Result<(), RenderError> {
        let part_name = format!("/{}", part.trim_start_matches('/'));
        let xml = self.read_xml(CONTENT_TYPES_PART)?;
        if xml.contains(&format!("PartName=\"{part_name}\"")) {
            return Ok(());
        }
        let declaration = format!(r#"<Override PartName="{part_name}" ContentType="{content_type}"/>"#);
        self.put_xml(CONTENT_TYPES_PART, insert_before_close(&xml, "</Types>", &declaration)?);
        Ok(())
    }

    /// Adds a relationship from `source` to `target` and returns its id.
    /// `target` is relative to the source part's directory.
    pub fn add_relationship(
        &mut self,
        source: &str,
        rel_type: &str,
        target: &str,
    ) -> Result<String, RenderError> {
        let rels_part = rels_path(source);
        let xml = match self.get(&rels_part) {
            Some(_) => self.read_xml(&rels_part)?,
            None => format!(
                "<?xml version=\"1.0\" encoding=\"UTF-8\" standalone=\"yes\"?>\n<Relationships xmlns=\"{RELATIONSHIPS_NS}\"></Relationships>"
            ),
        };

        let next = RELATIONSHIP_ID
            .captures_iter(&xml)
            .filter_map(|caps| caps[1].parse::<u32>().ok())
            .max()
            .unwrap_or(0)
            + 1;
        let id = format!("rId{next}");
        let relationship = format!(r#"<Relationship Id="{id}" Type="{rel_type}" Target="{target}"/>"#);
        self.put_xml(&rels_part, insert_before_close(&xml, "</Relationships>", &relationship)?);
        Ok(id)
    }

    /// Package path of the relationship `id` declared by `source`.
    pub fn relationship_target(&self, source: &str, id: &str) -> Option<String> {
        self.relationships(source)
            .into_iter()
            .find(|rel| rel.id == id)
            .map(|rel| resolve_target(source, &rel.target))
    }

    /// Package path of the first relationship of `rel_type` declared by `source`.
    pub fn related_part(&self, source: &str, rel_type: &str) -> Option<(String, String)> {
        self.relationships(source)
            .into_iter()
            .find(|rel| rel.rel_type == rel_type)
            .map(|rel| (rel.id, resolve_target(source, &rel.target)))
    }

    fn relationships(&self, source: &str) -> Vec<Relationship> {
        let Ok(xml) = self.read_xml(&rels_path(source)) else {
            return Vec::new();
        };
        let Ok(document) = roxmltree::Document::parse(&xml) else {
            return Vec::new();
        };
        document
            .descendants()
            .filter(|node| node.has_tag_name((RELATIONSHIPS_NS, "Relationship")))
            .filter_map(|node| {
                Some(Relationship {
                    id: node.attribute("Id")?.to_string(),
                    rel_type: node.attribute("Type").unwrap_or_default().to_string(),
                    target: node.attribute("Target")?.to_string(),
                })
            })
            .collect()
    }

    /// Finds the picture whose drawing properties carry `name` (as `name` or
    /// `descr`) in any of `parts` and swaps its image bytes for `png`.
    pub fn replace_named_picture(
        &mut self,
        parts: &[String],
        name: &str,
        png: Vec<u8>,
    ) -> Result<(), MediaError> {
        let pattern = Regex::new(&format!(
            r#"<(?:pic|xdr|wp|p):(?:cNvPr|docPr)\b[^>]*\b(?:name|descr)="{}""#,
            regex::escape(&escape_xml(name))
        ))
        .map_err(|e| MediaError::Package(e.to_string()))?;

        for part in parts {
            let Some(data) = self.get(part) else {
                continue;
            };
            let xml = String::from_utf8_lossy(data);
            let Some(found) = pattern.find(&xml) else {
                continue;
            };
            let embed = xml[found.end()..]
                .find("r:embed=\"")
                .map(|offset| found.end() + offset + "r:embed=\"".len())
                .and_then(|start| {
                    xml[start..]
                        .find('"')
                        .map(|len| xml[start..start + len].to_string())
                })
                .ok_or_else(|| MediaError::Package(format!("picture '{name}' has no embedded image")))?;
            let media = self
                .relationship_target(part, &embed)
                .ok_or_else(|| MediaError::Package(format!("relationship {embed} missing in {part}")))?;
            self.put(&media, png);
            return Ok(());
        }
        Err(MediaError::PictureNotFound(name.to_string()))
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, RenderError> {
        let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
        let options = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);
        for entry in &self.entries {
            writer.start_file(entry.name.as_str(), options)?;
            writer.write_all(&entry.data)?;
        }
        Ok(writer.finish()?.into_inner())
    }
}

#[derive(Debug)]
struct Relationship {
    id: String,
    rel_type: String,
    target: String,
}

/// `word/document.xml` → `word/_rels/document.xml.rels`.
pub fn rels_path(part: &str) -> String {
    match part.rsplit_once('/') {
        Some((dir, file)) => format!("{dir}/_rels/{file}.rels"),
        None => format!("_rels/{part}.rels"),
    }
}

/// Resolves a relationship target against the directory of `source`.
pub fn resolve_target(source: &str, target: &str) -> String {
    if let Some(absolute) = target.strip_prefix('/') {
        return absolute.to_string();
    }
    let mut segments: Vec<&str> = match source.rsplit_once('/') {
        Some((dir, _)) => dir.split('/').collect(),
        None => Vec::new(),
    };
    for segment in target.split('/') {
        match segment {
            "" | "." => {}
            ".." => {
                segments.pop();
            }
            other => segments.push(other),
        }
    }
    segments.join("/")
}

/// Adds `xmlns:<prefix>="<uri>"` to the root element when it is missing.
pub fn ensure_namespace(xml: &str, prefix: &str, uri: &str) -> String {
    if xml.contains(&format!("xmlns:{prefix}=")) {
        return xml.to_string();
    }
    let start = xml
        .match_indices('<')
        .map(|(index, _)| index)
        .find(|index| !matches!(xml[index + 1..].chars().next(), Some('?') | Some('!')));
    let Some(start) = start else {
        return xml.to_string();
    };
    match ROOT_ELEMENT.find(&xml[start..]) {
        Some(found) => {
            let name_end = start + found.end() - 1;
            format!("{} xmlns:{prefix}=\"{uri}\"{}", &xml[..name_end], &xml[name_end..])
        }
        None => xml.to_string(),
    }
}

pub fn insert_before_close(xml: &str, closing: &str, fragment: &str) -> Result<String, RenderError> {
    let at = xml.rfind(closing).ok_or_else(|| RenderError::Xml {
        part: closing.trim_matches(|c| c == '<' || c == '>' || c == '/').to_string(),
        reason: format!("closing tag {closing} not found"),
    })?;
    Ok(format!("{}{}{}", &xml[..at], fragment, &xml[at..]))
}

/// Escapes text for an XML text node or attribute value.
pub fn escape_xml(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len());
    for ch in value.chars() {
        match ch {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&apos;"),
            other => escaped.push(other),
        }
    }
    escaped
}
