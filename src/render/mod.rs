//! Format rendering.
//!
//! Templates are OOXML packages with Jinja-style markup evaluated by `tera`.
//! Each call renders one record into one document; PDF output is rendered to
//! an intermediate office document that the conversion bridge finishes.

pub mod docx;
pub mod engine;
pub mod markup;
pub mod package;
pub mod text;
pub mod xlsx;

#[cfg(test)]
pub(crate) mod fixtures;

use std::io::Cursor;

use sanitize_filename::sanitize;
use thiserror::Error;
use zip::ZipArchive;

use crate::context::RenderContext;
use crate::media::MediaError;
use crate::report::models::{ReportDefinition, ReportType};

pub use docx::render_docx;
pub use text::render_text;
pub use xlsx::render_xlsx;

#[derive(Debug, Error)]
pub enum RenderError {
    #[error("template is neither a word-processing nor a spreadsheet document")]
    UnsupportedTemplateFormat,
    #[error("template package is unreadable: {0}")]
    Archive(#[from] zip::result::ZipError),
    #[error("template package has no part '{0}'")]
    MissingPart(String),
    #[error("part '{part}' is not valid XML: {reason}")]
    Xml { part: String, reason: String },
    #[error("template rendering failed: {0}")]
    Template(#[from] tera::Error),
    #[error(transparent)]
    Media(#[from] MediaError),
    #[error("I/O error while packaging document: {0}")]
    Io(#[from] std::io::Error),
}

/// One rendered record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedDocument {
    pub filename: String,
    pub bytes: Vec<u8>,
}

/// Result of rendering a record: a finished document, or an office document
/// that still has to go through PDF conversion.
#[derive(Debug)]
pub enum RenderOutput {
    Ready(RenderedDocument),
    NeedsPdfConversion(RenderedDocument),
}

/// Package family of a template.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TemplateKind {
    WordProcessing,
    Spreadsheet,
    Unknown,
}

/// Looks at the package's parts, never at the file name.
pub fn classify_template(bytes: &[u8]) -> TemplateKind {
    if !bytes.starts_with(b"PK") {
        return TemplateKind::Unknown;
    }
    let Ok(archive) = ZipArchive::new(Cursor::new(bytes)) else {
        return TemplateKind::Unknown;
    };
    let names: Vec<&str> = archive.file_names().collect();
    if names.contains(&docx::DOCUMENT_PART) {
        TemplateKind::WordProcessing
    } else if names.contains(&xlsx::WORKBOOK_PART) {
        TemplateKind::Spreadsheet
    } else {
        TemplateKind::Unknown
    }
}

/// `"Monthly report"` + `"xlsx"` → `"Monthly report.xlsx"`.
pub fn document_filename(report_name: &str, extension: &str) -> String {
    let stem = sanitize(report_name.trim());
    let stem = if stem.is_empty() { "report".to_string() } else { stem };
    format!("{stem}.{extension}")
}

/// Renders one record with the report's template.
pub fn render(report: &ReportDefinition, context: &RenderContext) -> Result<RenderOutput, RenderError> {
    let template = report.template.as_slice();
    let sheet_name = xlsx::sanitize_sheet_name(&report.name);
    let ready = |extension: &str, bytes: Vec<u8>| {
        RenderOutput::Ready(RenderedDocument {
            filename: document_filename(&report.name, extension),
            bytes,
        })
    };

    match report.report_type {
        ReportType::Docx => Ok(ready("docx", render_docx(template, context)?)),
        ReportType::Xlsx => Ok(ready("xlsx", render_xlsx(template, context, &sheet_name)?)),
        ReportType::Txt => Ok(ready("txt", render_text(template, context)?)),
        ReportType::Pdf => {
            let (extension, bytes) = match classify_template(template) {
                TemplateKind::WordProcessing => ("docx", render_docx(template, context)?),
                TemplateKind::Spreadsheet => ("xlsx", render_xlsx(template, context, &sheet_name)?),
                TemplateKind::Unknown => return Err(RenderError::UnsupportedTemplateFormat),
            };
            Ok(RenderOutput::NeedsPdfConversion(RenderedDocument {
                filename: document_filename(&report.name, extension),
                bytes,
            }))
        }
    }
}
