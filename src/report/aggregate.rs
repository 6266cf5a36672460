//! Per-record rendering and merging into one deliverable.

use std::io::{Cursor, Write};
use std::sync::Arc;

use futures::stream::{self, StreamExt, TryStreamExt};
use serde_json::Value;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipWriter};

use super::models::ReportDefinition;
use super::ReportError;
use crate::context::{enrich_for_record, EnricherRegistry, RenderContext};
use crate::convert::ConversionBridge;
use crate::render::{document_filename, render, RenderOutput, RenderedDocument};

pub struct RenderPipeline {
    enrichers: EnricherRegistry,
    bridge: Arc<ConversionBridge>,
    concurrency: usize,
}

impl RenderPipeline {
    pub fn new(enrichers: EnricherRegistry, bridge: Arc<ConversionBridge>, concurrency: usize) -> Self {
        Self {
            enrichers,
            bridge,
            concurrency: concurrency.max(1),
        }
    }

    pub fn concurrency(&self) -> usize {
        self.concurrency
    }

    /// One document per record, in record order. A single-document report
    /// renders the whole record set as its one record.
    pub async fn render_all(
        &self,
        report: &ReportDefinition,
        records: Vec<Value>,
        base_context: &RenderContext,
    ) -> Result<Vec<RenderedDocument>, ReportError> {
        let units = if report.is_single {
            vec![Value::Array(records)]
        } else if records.is_empty() {
            return Err(ReportError::NoRecords);
        } else {
            records
        };

        let report = Arc::new(report.clone());
        stream::iter(units.into_iter().enumerate())
            .map(|(index, record)| self.render_record(report.clone(), base_context.clone(), index, record))
            .buffered(self.concurrency)
            .try_collect()
            .await
    }

    async fn render_record(
        &self,
        report: Arc<ReportDefinition>,
        mut context: RenderContext,
        index: usize,
        record: Value,
    ) -> Result<RenderedDocument, ReportError> {
        let enrichers = self.enrichers.clone();
        let output = tokio::task::spawn_blocking(move || -> Result<RenderOutput, ReportError> {
            enrich_for_record(
                &mut context,
                record,
                index,
                &enrichers,
                report.template_name.as_deref(),
            )?;
            log::debug!("Rendering record {} of report '{}'", index, report.name);
            Ok(render(&report, &context)?)
        })
        .await??;

        match output {
            RenderOutput::Ready(document) => Ok(document),
            RenderOutput::NeedsPdfConversion(document) => Ok(self.bridge.convert_to_pdf(document).await?),
        }
    }
}

/// `"Invoice.pdf"`, 2 → `"Invoice (2).pdf"`.
pub fn disambiguated_name(filename: &str, ordinal: usize) -> String {
    match filename.rfind('.') {
        Some(dot) if dot > 0 => format!("{} ({}){}", &filename[..dot], ordinal, &filename[dot..]),
        _ => format!("{filename} ({ordinal})"),
    }
}

/// A lone document is delivered as is; several go into one deflate zip
/// named after the report.
pub fn merge(mut documents: Vec<RenderedDocument>, report_name: &str) -> Result<RenderedDocument, ReportError> {
    match documents.len() {
        0 => Err(ReportError::NoRecords),
        1 => Ok(documents.remove(0)),
        count => {
            let options = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);
            let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
            for (index, document) in documents.iter().enumerate() {
                writer.start_file(disambiguated_name(&document.filename, index + 1), options)?;
                writer.write_all(&document.bytes)?;
            }
            let bytes = writer.finish()?.into_inner();
            let filename = document_filename(report_name, "zip");
            log::info!("Merged {} documents into {}", count, filename);
            Ok(RenderedDocument { filename, bytes })
        }
    }
}
