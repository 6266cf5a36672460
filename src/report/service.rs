//! The run entry points: a report by id, an action binding, or a definition.

use std::sync::Arc;
use std::time::Instant;

use uuid::Uuid;

use super::aggregate::{merge, RenderPipeline};
use super::models::{DownloadDescriptor, EvalContext, ReportDefinition};
use super::publish::{describe_download, persist};
use super::ReportError;
use crate::context::build_base_context;
use crate::db::DefinitionStore;
use crate::storage::AttachmentStorage;

pub struct ReportService {
    store: Arc<DefinitionStore>,
    storage: Arc<dyn AttachmentStorage>,
    pipeline: RenderPipeline,
}

impl ReportService {
    pub fn new(
        store: Arc<DefinitionStore>,
        storage: Arc<dyn AttachmentStorage>,
        pipeline: RenderPipeline,
    ) -> Self {
        Self {
            store,
            storage,
            pipeline,
        }
    }

    pub async fn run(&self, report_id: Uuid, eval_context: EvalContext) -> Result<DownloadDescriptor, ReportError> {
        let report = self.store.get_report(report_id)?;
        self.run_definition(&report, eval_context).await
    }

    pub async fn run_binding(
        &self,
        binding_id: Uuid,
        eval_context: EvalContext,
    ) -> Result<DownloadDescriptor, ReportError> {
        let binding = self.store.get_binding(binding_id)?;
        log::info!("Running action '{}' for report {}", binding.name, binding.report_id);
        self.run(binding.report_id, eval_context).await
    }

    pub async fn run_definition(
        &self,
        report: &ReportDefinition,
        eval_context: EvalContext,
    ) -> Result<DownloadDescriptor, ReportError> {
        let started = Instant::now();
        let EvalContext { records, extra } = eval_context;
        log::info!(
            "Running report '{}' ({}) over {} record(s)",
            report.name,
            report.report_type,
            records.len()
        );

        let base_context = build_base_context(&records, extra);
        let documents = self.pipeline.render_all(report, records, &base_context).await?;
        let deliverable = merge(documents, &report.name)?;
        let attachment = persist(self.storage.as_ref(), &deliverable).await?;

        log::info!(
            "Report '{}' produced {} ({} bytes) in {:?}",
            report.name,
            attachment.name,
            attachment.file_size,
            started.elapsed()
        );
        Ok(describe_download(&attachment, report.report_type))
    }
}
