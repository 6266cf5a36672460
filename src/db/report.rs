//! Report definition lifecycle

use chrono::Utc;
use uuid::Uuid;

use super::DefinitionStore;
use crate::report::models::{CreateReportRequest, ReportDefinition, ReportSummary, UpdateReportRequest};
use crate::report::ReportError;

fn validate_name(name: &str) -> Result<String, ReportError> {
    let name = name.trim();
    if name.is_empty() {
        return Err(ReportError::Invalid("report name must not be empty".to_string()));
    }
    Ok(name.to_string())
}

fn validate_template(template: &[u8]) -> Result<(), ReportError> {
    if template.is_empty() {
        return Err(ReportError::Invalid("template must not be empty".to_string()));
    }
    Ok(())
}

impl DefinitionStore {
    pub fn create_report(&self, req: CreateReportRequest) -> Result<ReportDefinition, ReportError> {
        let name = validate_name(&req.name)?;
        validate_template(&req.template)?;

        let mut report = ReportDefinition::new(name, req.report_type, req.template);
        report.model = req.model;
        report.template_name = req.template_name;
        report.is_single = req.is_single;
        report.code = req.code;

        self.reports.write().insert(report.id, report.clone());
        self.upsert_binding(&report);
        log::info!("Created report '{}' ({})", report.name, report.id);
        Ok(report)
    }

    pub fn get_report(&self, id: Uuid) -> Result<ReportDefinition, ReportError> {
        self.reports.read().get(&id).cloned().ok_or(ReportError::NotFound(id))
    }

    pub fn list_reports(&self) -> Vec<ReportSummary> {
        let mut summaries: Vec<ReportSummary> =
            self.reports.read().values().map(ReportDefinition::summary).collect();
        summaries.sort_by(|a, b| a.name.cmp(&b.name).then(a.id.cmp(&b.id)));
        summaries
    }

    /// Report type cannot change: every definition owns a binding.
    pub fn update_report(&self, id: Uuid, req: UpdateReportRequest) -> Result<ReportDefinition, ReportError> {
        let updated = {
            let mut reports = self.reports.write();
            let report = reports.get_mut(&id).ok_or(ReportError::NotFound(id))?;

            if let Some(report_type) = req.report_type {
                if report_type != report.report_type {
                    return Err(ReportError::ReportTypeLocked(report.name.clone()));
                }
            }
            let name = req.name.as_deref().map(validate_name).transpose()?;
            if let Some(template) = &req.template {
                validate_template(template)?;
            }

            if let Some(name) = name {
                report.name = name;
            }
            if let Some(model) = req.model {
                report.model = Some(model).filter(|m| !m.is_empty());
            }
            if let Some(template) = req.template {
                report.template = template;
            }
            if let Some(template_name) = req.template_name {
                report.template_name = Some(template_name).filter(|n| !n.is_empty());
            }
            if let Some(is_single) = req.is_single {
                report.is_single = is_single;
            }
            if let Some(code) = req.code {
                report.code = Some(code);
            }
            report.updated_at = Utc::now();
            report.clone()
        };

        self.upsert_binding(&updated);
        log::info!("Updated report '{}' ({})", updated.name, updated.id);
        Ok(updated)
    }

    pub fn delete_report(&self, id: Uuid) -> Result<(), ReportError> {
        let removed = self.reports.write().remove(&id).ok_or(ReportError::NotFound(id))?;
        self.remove_binding_for_report(id);
        log::info!("Deleted report '{}' ({})", removed.name, id);
        Ok(())
    }
}
