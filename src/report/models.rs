use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use utoipa::ToSchema;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum ReportType {
    Docx,
    Xlsx,
    Pdf,
    Txt,
}

impl ReportType {
    pub fn extension(self) -> &'static str {
        match self {
            ReportType::Docx => "docx",
            ReportType::Xlsx => "xlsx",
            ReportType::Pdf => "pdf",
            ReportType::Txt => "txt",
        }
    }
}

impl fmt::Display for ReportType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.extension())
    }
}

impl FromStr for ReportType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "docx" => Ok(ReportType::Docx),
            "xlsx" => Ok(ReportType::Xlsx),
            "pdf" => Ok(ReportType::Pdf),
            "txt" => Ok(ReportType::Txt),
            other => Err(format!(
                "unknown report type '{other}', expected one of docx, xlsx, pdf, txt"
            )),
        }
    }
}

/// Template bytes travel as base64 strings in JSON.
mod base64_bytes {
    use base64::engine::general_purpose::STANDARD as BASE64;
    use base64::Engine;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&BASE64.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        BASE64
            .decode(encoded.trim())
            .map_err(serde::de::Error::custom)
    }

    pub mod option {
        use super::*;

        pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<Vec<u8>>, D::Error> {
            Option::<String>::deserialize(deserializer)?
                .map(|encoded| BASE64.decode(encoded.trim()).map_err(serde::de::Error::custom))
                .transpose()
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ReportDefinition {
    pub id: Uuid,
    #[schema(example = "Delivery note")]
    pub name: String,
    /// Record model the report is bound to.
    #[schema(example = "stock.picking")]
    pub model: Option<String>,
    pub report_type: ReportType,
    #[serde(with = "base64_bytes")]
    #[schema(value_type = String, format = Byte)]
    pub template: Vec<u8>,
    #[schema(example = "ShipmentDetails.xlsx")]
    pub template_name: Option<String>,
    /// Render all records into one document.
    pub is_single: bool,
    /// Scripting code, stored and never executed here.
    pub code: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ReportDefinition {
    pub fn new(name: impl Into<String>, report_type: ReportType, template: Vec<u8>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            model: None,
            report_type,
            template,
            template_name: None,
            is_single: false,
            code: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn summary(&self) -> ReportSummary {
        ReportSummary {
            id: self.id,
            name: self.name.clone(),
            model: self.model.clone(),
            report_type: self.report_type,
            template_name: self.template_name.clone(),
            is_single: self.is_single,
            template_size: self.template.len(),
            updated_at: self.updated_at,
        }
    }
}

/// A definition without its template payload.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ReportSummary {
    pub id: Uuid,
    pub name: String,
    pub model: Option<String>,
    pub report_type: ReportType,
    pub template_name: Option<String>,
    pub is_single: bool,
    pub template_size: usize,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct CreateReportRequest {
    #[schema(example = "Delivery note")]
    pub name: String,
    pub model: Option<String>,
    pub report_type: ReportType,
    #[serde(with = "base64_bytes")]
    #[schema(value_type = String, format = Byte)]
    pub template: Vec<u8>,
    pub template_name: Option<String>,
    #[serde(default)]
    pub is_single: bool,
    pub code: Option<String>,
}

#[derive(Debug, Default, Deserialize, ToSchema)]
pub struct UpdateReportRequest {
    pub name: Option<String>,
    pub model: Option<String>,
    pub report_type: Option<ReportType>,
    #[serde(default, deserialize_with = "base64_bytes::option::deserialize")]
    #[schema(value_type = Option<String>, format = Byte)]
    pub template: Option<Vec<u8>>,
    pub template_name: Option<String>,
    pub is_single: Option<bool>,
    pub code: Option<String>,
}

/// Registry entry exposing a report as a runnable action on its model.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema, PartialEq)]
pub struct ActionBinding {
    pub id: Uuid,
    pub report_id: Uuid,
    pub name: String,
    pub model: Option<String>,
    pub binding_model: Option<String>,
    #[schema(example = "report")]
    pub binding_type: String,
}

pub const REPORT_BINDING_TYPE: &str = "report";

/// Payload of a run: the record set plus the caller's scripting result.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct EvalContext {
    #[serde(default)]
    pub records: Vec<Value>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum Disposition {
    Inline,
    Attachment,
}

/// Tells the client how to open the produced attachment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct DownloadDescriptor {
    pub attachment_id: Uuid,
    pub disposition: Disposition,
    #[schema(example = "/web/content/0b0f4c7e-5d55-4b1e-9f3c-6f1e0d1c2a3b?download=true")]
    pub url: String,
    #[schema(example = "new")]
    pub target: String,
}
