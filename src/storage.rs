//! Attachment storage.
//!
//! Attachments are kept as flat files named after their UUID under one root
//! directory. Each payload has a `<id>.json` metadata sidecar next to it; the
//! in-memory index is rebuilt from the sidecars when storage is opened.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use utoipa::ToSchema;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("attachment {0} not found")]
    NotFound(Uuid),
    #[error("attachment storage I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("attachment metadata error: {0}")]
    Metadata(#[from] serde_json::Error),
}

const METADATA_EXTENSION: &str = "json";

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema, PartialEq)]
pub struct Attachment {
    pub id: Uuid,
    pub name: String,
    /// File name inside the storage root.
    pub store_fname: String,
    pub mimetype: String,
    pub file_size: u64,
    pub created_at: DateTime<Utc>,
}

#[async_trait]
pub trait AttachmentStorage: Send + Sync {
    async fn create_attachment(&self, name: &str, bytes: &[u8]) -> Result<Attachment, StorageError>;
    async fn get(&self, id: Uuid) -> Result<Attachment, StorageError>;
    async fn read(&self, id: Uuid) -> Result<Vec<u8>, StorageError>;
    fn full_path(&self, attachment: &Attachment) -> PathBuf;
    /// Removes the attachment. A file already gone from disk is not an error.
    async fn unlink(&self, id: Uuid) -> Result<(), StorageError>;
    async fn list(&self) -> Vec<Attachment>;
}

pub struct FilesystemStorage {
    root: PathBuf,
    index: RwLock<HashMap<Uuid, Attachment>>,
}

impl FilesystemStorage {
    pub async fn new(root: impl Into<PathBuf>) -> Result<Self, StorageError> {
        let root = root.into();
        tokio::fs::create_dir_all(&root).await?;
        let index = load_index(&root).await?;
        log::info!(
            "Attachment storage rooted at {} ({} attachments)",
            root.display(),
            index.len()
        );
        Ok(Self {
            root,
            index: RwLock::new(index),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn lookup(&self, id: Uuid) -> Result<Attachment, StorageError> {
        self.index.read().get(&id).cloned().ok_or(StorageError::NotFound(id))
    }

    fn metadata_path(&self, id: Uuid) -> PathBuf {
        self.root.join(format!("{id}.{METADATA_EXTENSION}"))
    }
}

async fn load_index(root: &Path) -> Result<HashMap<Uuid, Attachment>, StorageError> {
    let mut index = HashMap::new();
    let mut entries = tokio::fs::read_dir(root).await?;
    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        if path.extension().and_then(|ext| ext.to_str()) != Some(METADATA_EXTENSION)
            || !entry.file_type().await?.is_file()
        {
            continue;
        }
        let bytes = tokio::fs::read(&path).await?;
        match serde_json::from_slice::<Attachment>(&bytes) {
            Ok(attachment) => {
                index.insert(attachment.id, attachment);
            }
            Err(e) => log::warn!("Skipping unreadable attachment metadata {}: {}", path.display(), e),
        }
    }
    Ok(index)
}

async fn remove_if_present(path: &Path) -> Result<(), StorageError> {
    match tokio::fs::remove_file(path).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}

#[async_trait]
impl AttachmentStorage for FilesystemStorage {
    async fn create_attachment(&self, name: &str, bytes: &[u8]) -> Result<Attachment, StorageError> {
        let id = Uuid::new_v4();
        let attachment = Attachment {
            id,
            name: name.to_string(),
            store_fname: id.to_string(),
            mimetype: mime_guess::from_path(name)
                .first_or_octet_stream()
                .essence_str()
                .to_string(),
            file_size: bytes.len() as u64,
            created_at: Utc::now(),
        };
        let payload = self.full_path(&attachment);
        tokio::fs::write(&payload, bytes).await?;
        let metadata = serde_json::to_vec_pretty(&attachment)?;
        if let Err(e) = tokio::fs::write(self.metadata_path(id), metadata).await {
            remove_if_present(&payload).await?;
            return Err(e.into());
        }
        self.index.write().insert(id, attachment.clone());
        log::debug!("Stored attachment {} '{}' ({} bytes)", id, name, bytes.len());
        Ok(attachment)
    }

    async fn get(&self, id: Uuid) -> Result<Attachment, StorageError> {
        self.lookup(id)
    }

    async fn read(&self, id: Uuid) -> Result<Vec<u8>, StorageError> {
        let attachment = self.lookup(id)?;
        Ok(tokio::fs::read(self.full_path(&attachment)).await?)
    }

    fn full_path(&self, attachment: &Attachment) -> PathBuf {
        self.root.join(&attachment.store_fname)
    }

    async fn unlink(&self, id: Uuid) -> Result<(), StorageError> {
        let attachment = self.index.write().remove(&id).ok_or(StorageError::NotFound(id))?;
        remove_if_present(&self.metadata_path(id)).await?;
        remove_if_present(&self.full_path(&attachment)).await
    }

    async fn list(&self) -> Vec<Attachment> {
        let mut attachments: Vec<Attachment> = self.index.read().values().cloned().collect();
        attachments.sort_by_key(|attachment| attachment.created_at);
        attachments
    }
}
