//! Render context construction.
//!
//! A base context is built once per run from the caller's scripting result.
//! Every record then gets its own clone, extended with the record itself and
//! whatever the enricher registered for the report's template adds.

pub mod helpers;
pub mod shipment;
mod words;

pub use helpers::{amount_in_words, format_money, join_non_empty};
pub use words::number_to_words;

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use serde_json::{Map, Value};
use thiserror::Error;

use crate::media::MediaError;

pub const RECORDS_KEY: &str = "records";
pub const RECORD_KEY: &str = "record";
pub const RECORD_INDEX_KEY: &str = "record_index";
pub const SHEET_NAME_KEY: &str = "sheet_name";
pub const COMPANY_KEY: &str = "company";

#[derive(Debug, Error)]
pub enum ContextError {
    #[error("record {index} does not fit template '{template}': {source}")]
    InvalidRecord {
        template: String,
        index: usize,
        #[source]
        source: serde_json::Error,
    },
    #[error(transparent)]
    Media(#[from] MediaError),
}

/// Values visible to a template.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RenderContext {
    values: Map<String, Value>,
}

impl RenderContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.values.get(key)
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.values.insert(key.into(), value.into());
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.values.contains_key(key)
    }

    pub fn as_map(&self) -> &Map<String, Value> {
        &self.values
    }

    pub fn to_tera(&self) -> Result<tera::Context, tera::Error> {
        tera::Context::from_value(Value::Object(self.values.clone()))
    }
}

impl From<Map<String, Value>> for RenderContext {
    fn from(values: Map<String, Value>) -> Self {
        Self { values }
    }
}

/// Builds the context shared by every record of a run. Keys of the scripting
/// result are kept as is; `records` always holds the full record set.
pub fn build_base_context(records: &[Value], scripting_result: Map<String, Value>) -> RenderContext {
    let mut context = RenderContext::from(scripting_result);
    context.insert(RECORDS_KEY, Value::Array(records.to_vec()));
    context
}

/// Adds the current record, then runs the enricher registered for
/// `template_name`, if there is one.
pub fn enrich_for_record(
    context: &mut RenderContext,
    record: Value,
    index: usize,
    registry: &EnricherRegistry,
    template_name: Option<&str>,
) -> Result<(), ContextError> {
    context.insert(RECORD_KEY, record);
    context.insert(RECORD_INDEX_KEY, index);

    if let Some(enricher) = template_name.and_then(|name| registry.get(name)) {
        log::debug!(
            "Enriching record {} for template '{}'",
            index,
            template_name.unwrap_or_default()
        );
        enricher.enrich(context, index)?;
    }
    Ok(())
}

/// Template-specific derivation of extra context keys from the current record.
pub trait ContextEnricher: Send + Sync {
    fn enrich(&self, context: &mut RenderContext, index: usize) -> Result<(), ContextError>;
}

/// Enrichers keyed by template display name.
#[derive(Clone, Default)]
pub struct EnricherRegistry {
    enrichers: HashMap<String, Arc<dyn ContextEnricher>>,
}

impl EnricherRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with the built-in enrichers.
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register(shipment::TEMPLATE_NAME, shipment::ShipmentDetails);
        registry
    }

    pub fn register(
        &mut self,
        template_name: impl Into<String>,
        enricher: impl ContextEnricher + 'static,
    ) {
        self.enrichers.insert(template_name.into(), Arc::new(enricher));
    }

    pub fn get(&self, template_name: &str) -> Option<Arc<dyn ContextEnricher>> {
        self.enrichers.get(template_name).cloned()
    }
}

impl fmt::Debug for EnricherRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.enrichers.keys()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    struct Marker;

    impl ContextEnricher for Marker {
        fn enrich(&self, context: &mut RenderContext, index: usize) -> Result<(), ContextError> {
            context.insert("marked", index);
            Ok(())
        }
    }

    fn scripting_result() -> Map<String, Value> {
        json!({"company": {"name": "ACME"}, "records": "overwritten"})
            .as_object()
            .cloned()
            .unwrap()
    }

    #[test]
    fn test_base_context_keeps_scripting_keys() {
        let records = vec![json!({"id": 1}), json!({"id": 2})];
        let context = build_base_context(&records, scripting_result());
        assert_eq!(context.get("company"), Some(&json!({"name": "ACME"})));
        assert_eq!(context.get(RECORDS_KEY), Some(&json!([{"id": 1}, {"id": 2}])));
        assert!(!context.contains_key(RECORD_KEY));
    }

    #[test]
    fn test_per_record_clones_are_independent() {
        let records = vec![json!({"id": 1}), json!({"id": 2})];
        let base = build_base_context(&records, Map::new());
        let registry = EnricherRegistry::new();

        let mut first = base.clone();
        enrich_for_record(&mut first, records[0].clone(), 0, &registry, None).unwrap();
        let mut second = base.clone();
        enrich_for_record(&mut second, records[1].clone(), 1, &registry, None).unwrap();

        assert_eq!(first.get(RECORD_KEY), Some(&json!({"id": 1})));
        assert_eq!(second.get(RECORD_KEY), Some(&json!({"id": 2})));
        assert_eq!(second.get(RECORD_INDEX_KEY), Some(&json!(1)));
        assert!(!base.contains_key(RECORD_KEY));
    }

    #[test]
    fn test_enricher_runs_only_for_its_template() {
        let mut registry = EnricherRegistry::new();
        registry.register("Labels.xlsx", Marker);

        let mut matched = RenderContext::new();
        enrich_for_record(&mut matched, json!({}), 3, &registry, Some("Labels.xlsx")).unwrap();
        assert_eq!(matched.get("marked"), Some(&json!(3)));

        let mut other = RenderContext::new();
        enrich_for_record(&mut other, json!({}), 3, &registry, Some("Other.xlsx")).unwrap();
        assert!(!other.contains_key("marked"));
    }

    #[test]
    fn test_defaults_include_shipment_details() {
        let registry = EnricherRegistry::with_defaults();
        assert!(registry.get("ShipmentDetails.xlsx").is_some());
        assert!(registry.get("shipmentdetails.xlsx").is_none());
    }
}
