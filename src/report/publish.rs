//! Persisting deliverables and describing how to fetch them.

use super::models::{Disposition, DownloadDescriptor, ReportType};
use crate::render::RenderedDocument;
use crate::storage::{Attachment, AttachmentStorage, StorageError};

pub const CONTENT_URL_PREFIX: &str = "/web/content";
const NEW_WINDOW_TARGET: &str = "new";

pub async fn persist(
    storage: &dyn AttachmentStorage,
    deliverable: &RenderedDocument,
) -> Result<Attachment, StorageError> {
    storage
        .create_attachment(&deliverable.filename, &deliverable.bytes)
        .await
}

/// PDFs open inline; everything else downloads.
pub fn describe_download(attachment: &Attachment, report_type: ReportType) -> DownloadDescriptor {
    let (disposition, url) = match report_type {
        ReportType::Pdf => (
            Disposition::Inline,
            format!("{CONTENT_URL_PREFIX}/{}", attachment.id),
        ),
        _ => (
            Disposition::Attachment,
            format!("{CONTENT_URL_PREFIX}/{}?download=true", attachment.id),
        ),
    };
    DownloadDescriptor {
        attachment_id: attachment.id,
        disposition,
        url,
        target: NEW_WINDOW_TARGET.to_string(),
    }
}
