//! Application state and the in-process definition store.
//!
//! - `report` - report definition lifecycle
//! - `binding` - action bindings kept in step with their reports

mod binding;
mod report;

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use uuid::Uuid;

use crate::config::AppConfig;
use crate::context::EnricherRegistry;
use crate::convert::{ConversionBridge, ConverterSettings};
use crate::report::aggregate::RenderPipeline;
use crate::report::models::{ActionBinding, ReportDefinition};
use crate::report::ReportService;
use crate::storage::{AttachmentStorage, FilesystemStorage};

/// Report definitions and the action bindings that expose them.
#[derive(Default)]
pub struct DefinitionStore {
    reports: RwLock<HashMap<Uuid, ReportDefinition>>,
    bindings: RwLock<HashMap<Uuid, ActionBinding>>,
}

impl DefinitionStore {
    pub fn new() -> Self {
        Self::default()
    }
}

pub struct AppState {
    pub store: Arc<DefinitionStore>,
    pub storage: Arc<dyn AttachmentStorage>,
    pub reports: ReportService,
}

impl AppState {
    pub async fn new(config: &AppConfig) -> anyhow::Result<Self> {
        let storage = Arc::new(FilesystemStorage::new(&config.attachment_dir).await?);
        Ok(Self::with_storage(
            storage,
            config.converter.clone(),
            config.render_concurrency,
        ))
    }

    pub fn with_storage(
        storage: Arc<dyn AttachmentStorage>,
        converter: ConverterSettings,
        render_concurrency: usize,
    ) -> Self {
        let store = Arc::new(DefinitionStore::new());
        let bridge = Arc::new(ConversionBridge::new(storage.clone(), converter));
        let pipeline = RenderPipeline::new(EnricherRegistry::with_defaults(), bridge, render_concurrency);
        let reports = ReportService::new(store.clone(), storage.clone(), pipeline);
        Self {
            store,
            storage,
            reports,
        }
    }
}
