//! Action bindings kept in step with their reports

use uuid::Uuid;

use super::DefinitionStore;
use crate::report::models::{ActionBinding, ReportDefinition, REPORT_BINDING_TYPE};
use crate::report::ReportError;

impl DefinitionStore {
    /// Creates or refreshes the binding of `report`, keeping its id stable.
    pub(crate) fn upsert_binding(&self, report: &ReportDefinition) -> ActionBinding {
        let mut bindings = self.bindings.write();
        let id = bindings
            .values()
            .find(|binding| binding.report_id == report.id)
            .map(|binding| binding.id)
            .unwrap_or_else(Uuid::new_v4);

        let binding = ActionBinding {
            id,
            report_id: report.id,
            name: report.name.clone(),
            model: report.model.clone(),
            binding_model: report.model.clone(),
            binding_type: REPORT_BINDING_TYPE.to_string(),
        };
        bindings.insert(id, binding.clone());
        log::debug!("Bound report {} as action {}", report.id, id);
        binding
    }

    pub(crate) fn remove_binding_for_report(&self, report_id: Uuid) {
        self.bindings
            .write()
            .retain(|_, binding| binding.report_id != report_id);
    }

    pub fn get_binding(&self, id: Uuid) -> Result<ActionBinding, ReportError> {
        self.bindings
            .read()
            .get(&id)
            .cloned()
            .ok_or(ReportError::BindingNotFound(id))
    }

    pub fn binding_for_report(&self, report_id: Uuid) -> Option<ActionBinding> {
        self.bindings
            .read()
            .values()
            .find(|binding| binding.report_id == report_id)
            .cloned()
    }

    pub fn list_bindings(&self) -> Vec<ActionBinding> {
        let mut bindings: Vec<ActionBinding> = self.bindings.read().values().cloned().collect();
        bindings.sort_by(|a, b| a.name.cmp(&b.name).then(a.id.cmp(&b.id)));
        bindings
    }
}
