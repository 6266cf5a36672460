//! PDF conversion through an external LibreOffice process.
//!
//! The intermediate document is stored as a scratch attachment, moved into a
//! per-call scratch directory under a readable name, converted there and
//! read back. The scratch attachment and directory are removed on every path,
//! including when the conversion future is dropped before it completes.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use sanitize_filename::sanitize;
use thiserror::Error;
use tokio::process::Command;

use crate::render::RenderedDocument;
use crate::storage::{Attachment, AttachmentStorage, StorageError};

pub const PDF_EXPORT_FILTER: &str =
    r#"pdf:draw_pdf_Export:{"MaxImageResolution":{"type":"long","value":"1200"}}"#;
pub const DEFAULT_CONVERSION_TIMEOUT: Duration = Duration::from_secs(60);

const LINUX_EXECUTABLE: &str = "libreoffice";
const WINDOWS_EXECUTABLE: &str = "C:/Program Files/LibreOffice/program/soffice.exe";
const MACOS_EXECUTABLE: &str = "/Applications/LibreOffice.app/Contents/MacOS/soffice";

#[derive(Debug, Error)]
pub enum ConversionError {
    #[error("PDF conversion is not supported on platform '{0}'")]
    UnsupportedPlatform(String),
    #[error("PDF conversion timed out after {0:?}")]
    Timeout(Duration),
    #[error("PDF conversion failed: {0}")]
    Failed(String),
    #[error("could not stage document for conversion: {0}")]
    Staging(#[source] std::io::Error),
    #[error(transparent)]
    Storage(#[from] StorageError),
}

#[derive(Debug, Clone)]
pub struct ConverterSettings {
    /// Overrides the per-platform default.
    pub executable: Option<PathBuf>,
    pub timeout: Duration,
}

impl Default for ConverterSettings {
    fn default() -> Self {
        Self {
            executable: None,
            timeout: DEFAULT_CONVERSION_TIMEOUT,
        }
    }
}

/// Picks the converter for `os` (as in `std::env::consts::OS`).
pub fn resolve_executable(settings: &ConverterSettings, os: &str) -> Result<PathBuf, ConversionError> {
    if let Some(executable) = &settings.executable {
        return Ok(executable.clone());
    }
    match os {
        "linux" => Ok(PathBuf::from(LINUX_EXECUTABLE)),
        "windows" | "win32" => Ok(PathBuf::from(WINDOWS_EXECUTABLE)),
        "macos" | "darwin" => Ok(PathBuf::from(MACOS_EXECUTABLE)),
        other => Err(ConversionError::UnsupportedPlatform(other.to_string())),
    }
}

pub struct ConversionBridge {
    storage: Arc<dyn AttachmentStorage>,
    settings: ConverterSettings,
}

impl ConversionBridge {
    pub fn new(storage: Arc<dyn AttachmentStorage>, settings: ConverterSettings) -> Self {
        Self { storage, settings }
    }

    pub fn settings(&self) -> &ConverterSettings {
        &self.settings
    }

    pub async fn convert_to_pdf(&self, document: RenderedDocument) -> Result<RenderedDocument, ConversionError> {
        let executable = resolve_executable(&self.settings, std::env::consts::OS)?;
        log::info!(
            "Converting '{}' to PDF with {}",
            document.filename,
            executable.display()
        );

        let attachment = self
            .storage
            .create_attachment(&document.filename, &document.bytes)
            .await?;
        let scratch = ScratchAttachment {
            storage: self.storage.clone(),
            attachment,
            armed: true,
        };
        let result = self.convert_staged(&executable, &scratch.attachment).await;
        scratch.release().await;
        result
    }

    async fn convert_staged(
        &self,
        executable: &Path,
        scratch: &Attachment,
    ) -> Result<RenderedDocument, ConversionError> {
        let stored = self.storage.full_path(scratch);
        let parent = stored.parent().ok_or_else(|| {
            ConversionError::Staging(std::io::Error::other(format!(
                "stored file {} has no parent directory",
                stored.display()
            )))
        })?;
        let workdir = tempfile::Builder::new()
            .prefix("convert-")
            .tempdir_in(parent)
            .map_err(ConversionError::Staging)?;

        let input_name = match sanitize(&scratch.name) {
            name if name.is_empty() => "document".to_string(),
            name => name,
        };
        let input = workdir.path().join(&input_name);
        tokio::fs::rename(&stored, &input)
            .await
            .map_err(ConversionError::Staging)?;

        let result = self.invoke(executable, workdir.path(), &input).await;
        let workdir_path = workdir.path().to_path_buf();
        if let Err(e) = workdir.close() {
            log::error!(
                "Failed to remove conversion directory {}: {}",
                workdir_path.display(),
                e
            );
        }
        result
    }

    async fn invoke(
        &self,
        executable: &Path,
        outdir: &Path,
        input: &Path,
    ) -> Result<RenderedDocument, ConversionError> {
        let mut command = Command::new(executable);
        command
            .arg("--convert-to")
            .arg(PDF_EXPORT_FILTER)
            .arg("--outdir")
            .arg(outdir)
            .arg(input)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let output = match tokio::time::timeout(self.settings.timeout, command.output()).await {
            Ok(result) => result.map_err(|e| {
                ConversionError::Failed(format!("could not start {}: {}", executable.display(), e))
            })?,
            Err(_) => {
                log::error!(
                    "Converter did not finish within {:?} for {}",
                    self.settings.timeout,
                    input.display()
                );
                return Err(ConversionError::Timeout(self.settings.timeout));
            }
        };

        let stderr = String::from_utf8_lossy(&output.stderr);
        if !stderr.trim().is_empty() {
            log::warn!("Converter stderr: {}", stderr.trim());
        }
        if !output.status.success() {
            return Err(ConversionError::Failed(format!(
                "converter exited with {}",
                output.status
            )));
        }

        let stem = input
            .file_stem()
            .map(|stem| stem.to_string_lossy().into_owned())
            .unwrap_or_else(|| "document".to_string());
        let filename = format!("{stem}.pdf");
        let bytes = match tokio::fs::read(outdir.join(&filename)).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(ConversionError::Failed(format!(
                    "converter produced no {filename}"
                )))
            }
            Err(e) => return Err(ConversionError::Staging(e)),
        };
        log::info!("Converted {} ({} bytes)", filename, bytes.len());
        Ok(RenderedDocument { filename, bytes })
    }
}

/// Owns the staged copy of a document. Dropping it without [`release`]
/// schedules the unlink on the current runtime.
///
/// [`release`]: ScratchAttachment::release
struct ScratchAttachment {
    storage: Arc<dyn AttachmentStorage>,
    attachment: Attachment,
    armed: bool,
}

impl ScratchAttachment {
    async fn release(mut self) {
        unlink_scratch(self.storage.as_ref(), self.attachment.id).await;
        self.armed = false;
    }
}

impl Drop for ScratchAttachment {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        let storage = self.storage.clone();
        let id = self.attachment.id;
        match tokio::runtime::Handle::try_current() {
            Ok(runtime) => {
                log::warn!(
                    "Conversion of '{}' abandoned, removing scratch attachment {}",
                    self.attachment.name,
                    id
                );
                runtime.spawn(async move { unlink_scratch(storage.as_ref(), id).await });
            }
            Err(_) => log::error!("No runtime to remove scratch attachment {}", id),
        }
    }
}

async fn unlink_scratch(storage: &dyn AttachmentStorage, id: uuid::Uuid) {
    if let Err(e) = storage.unlink(id).await {
        log::error!("Failed to remove scratch attachment {}: {}", id, e);
    }
}
