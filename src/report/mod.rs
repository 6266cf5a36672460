//! Report definitions and the run pipeline built on top of them.

pub mod aggregate;
pub mod handlers;
pub mod models;
pub mod publish;
pub mod service;

use std::error::Error as StdError;

use actix_web::http::StatusCode;
use actix_web::{HttpResponse, ResponseError};
use thiserror::Error;
use uuid::Uuid;

use crate::context::ContextError;
use crate::convert::ConversionError;
use crate::render::RenderError;
use crate::storage::StorageError;
use crate::ErrorResponse;

pub use service::ReportService;

#[derive(Debug, Error)]
pub enum ReportError {
    #[error("report {0} not found")]
    NotFound(Uuid),
    #[error("action binding {0} not found")]
    BindingNotFound(Uuid),
    #[error("report type of '{0}' cannot change while it is bound to an action; delete and recreate the report")]
    ReportTypeLocked(String),
    #[error("invalid request: {0}")]
    Invalid(String),
    #[error("there are no records to render")]
    NoRecords,
    #[error(transparent)]
    Context(#[from] ContextError),
    #[error(transparent)]
    Render(#[from] RenderError),
    #[error(transparent)]
    Conversion(#[from] ConversionError),
    #[error(transparent)]
    Storage(#[from] StorageError),
    #[error("could not build archive: {0}")]
    Archive(#[from] zip::result::ZipError),
    #[error("render worker failed: {0}")]
    Worker(#[from] tokio::task::JoinError),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl ReportError {
    /// The error followed by every underlying cause not already in its text.
    pub fn detailed_message(&self) -> String {
        let mut message = self.to_string();
        let mut source = self.source();
        while let Some(cause) = source {
            let text = cause.to_string();
            if !message.contains(&text) {
                message.push_str(": ");
                message.push_str(&text);
            }
            source = cause.source();
        }
        message
    }
}

impl ResponseError for ReportError {
    fn status_code(&self) -> StatusCode {
        match self {
            ReportError::NotFound(_)
            | ReportError::BindingNotFound(_)
            | ReportError::Storage(StorageError::NotFound(_)) => StatusCode::NOT_FOUND,
            ReportError::Invalid(_)
            | ReportError::ReportTypeLocked(_)
            | ReportError::NoRecords
            | ReportError::Context(ContextError::InvalidRecord { .. }) => StatusCode::BAD_REQUEST,
            ReportError::Render(RenderError::UnsupportedTemplateFormat) => {
                StatusCode::UNPROCESSABLE_ENTITY
            }
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_response(&self) -> HttpResponse {
        let status = self.status_code();
        let message = self.detailed_message();
        let body = match status {
            StatusCode::NOT_FOUND => ErrorResponse::not_found(&message),
            StatusCode::BAD_REQUEST => ErrorResponse::bad_request(&message),
            StatusCode::UNPROCESSABLE_ENTITY => ErrorResponse::unprocessable(&message),
            _ => {
                log::error!("Report request failed: {}", message);
                ErrorResponse::internal_error(&message)
            }
        };
        HttpResponse::build(status).json(body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_status_mapping() {
        assert_eq!(ReportError::NotFound(Uuid::nil()).status_code(), StatusCode::NOT_FOUND);
        assert_eq!(
            ReportError::Storage(StorageError::NotFound(Uuid::nil())).status_code(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            ReportError::ReportTypeLocked("Invoice".into()).status_code(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            ReportError::Render(RenderError::UnsupportedTemplateFormat).status_code(),
            StatusCode::UNPROCESSABLE_ENTITY
        );
        assert_eq!(
            ReportError::Conversion(ConversionError::Timeout(Duration::from_secs(60))).status_code(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn test_detailed_message_includes_causes() {
        let err = ReportError::Conversion(ConversionError::Staging(std::io::Error::other("disk full")));
        let message = err.detailed_message();
        assert!(message.starts_with("could not stage document for conversion"));
        assert_eq!(message.matches("disk full").count(), 1);
    }
}
