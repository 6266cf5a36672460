use actix_multipart::Multipart;
use actix_web::http::header::{Charset, ContentDisposition, DispositionParam, DispositionType, ExtendedValue};
use actix_web::{web, HttpResponse};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use futures::StreamExt;
use log::info;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

use super::models::{
    ActionBinding, CreateReportRequest, DownloadDescriptor, EvalContext, ReportDefinition, ReportSummary,
    ReportType, UpdateReportRequest,
};
use super::ReportError;
use crate::storage::Attachment;
use crate::{AppState, ErrorResponse};

/// Attachment metadata with its payload.
#[derive(Debug, Serialize, ToSchema)]
pub struct AttachmentPayload {
    #[serde(flatten)]
    pub attachment: Attachment,
    /// Base64 file content.
    pub datas: String,
}

/// Multipart form accepted by the upload endpoint.
#[derive(Debug, ToSchema)]
pub struct UploadReportForm {
    #[allow(unused)]
    pub name: String,
    #[allow(unused)]
    pub report_type: ReportType,
    #[allow(unused)]
    #[schema(value_type = String, format = Binary)]
    pub template: Vec<u8>,
    #[allow(unused)]
    pub template_name: Option<String>,
    #[allow(unused)]
    pub model: Option<String>,
    #[allow(unused)]
    pub is_single: Option<bool>,
    #[allow(unused)]
    pub code: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ContentQuery {
    #[serde(default)]
    pub download: bool,
}

#[utoipa::path(
    context_path = "/api",
    tag = "Reports",
    get,
    path = "/reports",
    responses(
        (status = 200, description = "All report definitions", body = [ReportSummary])
    )
)]
pub async fn list_reports(data: web::Data<AppState>) -> HttpResponse {
    HttpResponse::Ok().json(data.store.list_reports())
}

#[utoipa::path(
    context_path = "/api",
    tag = "Reports",
    post,
    path = "/reports",
    request_body = CreateReportRequest,
    responses(
        (status = 201, description = "Report created and bound", body = ReportDefinition),
        (status = 400, description = "Invalid request", body = ErrorResponse)
    )
)]
pub async fn create_report(
    req: web::Json<CreateReportRequest>,
    data: web::Data<AppState>,
) -> Result<HttpResponse, ReportError> {
    let report = data.store.create_report(req.into_inner())?;
    Ok(HttpResponse::Created().json(report))
}

#[utoipa::path(
    context_path = "/api",
    tag = "Reports",
    post,
    path = "/reports/upload",
    request_body(content = inline(UploadReportForm), content_type = "multipart/form-data"),
    responses(
        (status = 201, description = "Report created and bound", body = ReportDefinition),
        (status = 400, description = "Invalid request", body = ErrorResponse)
    )
)]
pub async fn upload_report(
    payload: Multipart,
    data: web::Data<AppState>,
) -> Result<HttpResponse, ReportError> {
    let req = parse_report_upload(payload).await?;
    let report = data.store.create_report(req)?;
    Ok(HttpResponse::Created().json(report))
}

#[utoipa::path(
    context_path = "/api",
    tag = "Reports",
    get,
    path = "/reports/{id}",
    responses(
        (status = 200, description = "Report found", body = ReportDefinition),
        (status = 404, description = "Report not found", body = ErrorResponse)
    ),
    params(
        ("id" = Uuid, Path, description = "ID of the report")
    )
)]
pub async fn get_report(id: web::Path<Uuid>, data: web::Data<AppState>) -> Result<HttpResponse, ReportError> {
    Ok(HttpResponse::Ok().json(data.store.get_report(id.into_inner())?))
}

#[utoipa::path(
    context_path = "/api",
    tag = "Reports",
    put,
    path = "/reports/{id}",
    request_body = UpdateReportRequest,
    responses(
        (status = 200, description = "Report updated", body = ReportDefinition),
        (status = 400, description = "Invalid request or report type change", body = ErrorResponse),
        (status = 404, description = "Report not found", body = ErrorResponse)
    ),
    params(
        ("id" = Uuid, Path, description = "ID of the report")
    )
)]
pub async fn update_report(
    id: web::Path<Uuid>,
    req: web::Json<UpdateReportRequest>,
    data: web::Data<AppState>,
) -> Result<HttpResponse, ReportError> {
    let report = data.store.update_report(id.into_inner(), req.into_inner())?;
    Ok(HttpResponse::Ok().json(report))
}

#[utoipa::path(
    context_path = "/api",
    tag = "Reports",
    delete,
    path = "/reports/{id}",
    responses(
        (status = 204, description = "Report and its binding deleted"),
        (status = 404, description = "Report not found", body = ErrorResponse)
    ),
    params(
        ("id" = Uuid, Path, description = "ID of the report")
    )
)]
pub async fn delete_report(id: web::Path<Uuid>, data: web::Data<AppState>) -> Result<HttpResponse, ReportError> {
    data.store.delete_report(id.into_inner())?;
    Ok(HttpResponse::NoContent().finish())
}

#[utoipa::path(
    context_path = "/api",
    tag = "Reports",
    post,
    path = "/reports/{id}/run",
    request_body(content = Object, content_type = "application/json", description = "Evaluation context: `records` plus any scripting result keys"),
    responses(
        (status = 200, description = "Report rendered and stored", body = DownloadDescriptor),
        (status = 400, description = "No records or invalid record", body = ErrorResponse),
        (status = 404, description = "Report not found", body = ErrorResponse),
        (status = 422, description = "Template format not supported", body = ErrorResponse),
        (status = 500, description = "Rendering or conversion failed", body = ErrorResponse)
    ),
    params(
        ("id" = Uuid, Path, description = "ID of the report to run")
    )
)]
pub async fn run_report(
    id: web::Path<Uuid>,
    eval_context: web::Json<EvalContext>,
    data: web::Data<AppState>,
) -> Result<HttpResponse, ReportError> {
    let report_id = id.into_inner();
    info!("Executing run_report handler for {}", report_id);
    let descriptor = data.reports.run(report_id, eval_context.into_inner()).await?;
    Ok(HttpResponse::Ok().json(descriptor))
}

#[utoipa::path(
    context_path = "/api",
    tag = "Bindings",
    get,
    path = "/bindings",
    responses(
        (status = 200, description = "All action bindings", body = [ActionBinding])
    )
)]
pub async fn list_bindings(data: web::Data<AppState>) -> HttpResponse {
    HttpResponse::Ok().json(data.store.list_bindings())
}

#[utoipa::path(
    context_path = "/api",
    tag = "Bindings",
    post,
    path = "/bindings/{id}/run",
    request_body(content = Object, content_type = "application/json", description = "Evaluation context: `records` plus any scripting result keys"),
    responses(
        (status = 200, description = "Bound report rendered and stored", body = DownloadDescriptor),
        (status = 404, description = "Binding not found", body = ErrorResponse)
    ),
    params(
        ("id" = Uuid, Path, description = "ID of the action binding")
    )
)]
pub async fn run_binding(
    id: web::Path<Uuid>,
    eval_context: web::Json<EvalContext>,
    data: web::Data<AppState>,
) -> Result<HttpResponse, ReportError> {
    let descriptor = data
        .reports
        .run_binding(id.into_inner(), eval_context.into_inner())
        .await?;
    Ok(HttpResponse::Ok().json(descriptor))
}

#[utoipa::path(
    context_path = "/api",
    tag = "Attachments",
    get,
    path = "/attachments/{id}",
    responses(
        (status = 200, description = "Attachment with base64 content", body = AttachmentPayload),
        (status = 404, description = "Attachment not found", body = ErrorResponse)
    ),
    params(
        ("id" = Uuid, Path, description = "ID of the attachment")
    )
)]
pub async fn get_attachment(id: web::Path<Uuid>, data: web::Data<AppState>) -> Result<HttpResponse, ReportError> {
    let id = id.into_inner();
    let attachment = data.storage.get(id).await?;
    let bytes = data.storage.read(id).await?;
    Ok(HttpResponse::Ok().json(AttachmentPayload {
        attachment,
        datas: BASE64.encode(bytes),
    }))
}

#[utoipa::path(
    tag = "Attachments",
    get,
    path = "/web/content/{id}",
    responses(
        (status = 200, description = "Raw attachment content"),
        (status = 404, description = "Attachment not found", body = ErrorResponse)
    ),
    params(
        ("id" = Uuid, Path, description = "ID of the attachment"),
        ("download" = Option<bool>, Query, description = "Serve as a download instead of inline")
    )
)]
pub async fn serve_content(
    id: web::Path<Uuid>,
    query: web::Query<ContentQuery>,
    data: web::Data<AppState>,
) -> Result<HttpResponse, ReportError> {
    let id = id.into_inner();
    let attachment = data.storage.get(id).await?;
    let bytes = data.storage.read(id).await?;
    let disposition = if query.download {
        DispositionType::Attachment
    } else {
        DispositionType::Inline
    };
    Ok(HttpResponse::Ok()
        .content_type(attachment.mimetype.as_str())
        .insert_header(content_disposition(disposition, &attachment.name))
        .body(bytes))
}

/// ASCII `filename` plus the exact UTF-8 name in `filename*`.
fn content_disposition(disposition: DispositionType, name: &str) -> ContentDisposition {
    let ascii: String = name
        .chars()
        .map(|c| if c.is_ascii() && !c.is_ascii_control() { c } else { '_' })
        .collect();
    let mut parameters = vec![DispositionParam::Filename(ascii)];
    if !name.is_ascii() {
        parameters.push(DispositionParam::FilenameExt(ExtendedValue {
            charset: Charset::Ext("UTF-8".to_string()),
            language_tag: None,
            value: name.as_bytes().to_vec(),
        }));
    }
    ContentDisposition {
        disposition,
        parameters,
    }
}

async fn read_field(field: &mut actix_multipart::Field) -> Result<Vec<u8>, ReportError> {
    let mut buffer = Vec::new();
    while let Some(chunk) = field.next().await {
        let chunk = chunk.map_err(|e| ReportError::Invalid(format!("multipart read failed: {e}")))?;
        buffer.extend_from_slice(&chunk);
    }
    Ok(buffer)
}

async fn read_text_field(field: &mut actix_multipart::Field, name: &str) -> Result<String, ReportError> {
    String::from_utf8(read_field(field).await?)
        .map_err(|_| ReportError::Invalid(format!("field '{name}' is not valid UTF-8")))
}

fn parse_flag(value: &str) -> Result<bool, ReportError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "" | "0" | "false" | "off" | "no" => Ok(false),
        "1" | "true" | "on" | "yes" => Ok(true),
        other => Err(ReportError::Invalid(format!("is_single must be a boolean, got '{other}'"))),
    }
}

pub async fn parse_report_upload(mut payload: Multipart) -> Result<CreateReportRequest, ReportError> {
    let mut name = None;
    let mut report_type = None;
    let mut model = None;
    let mut is_single = false;
    let mut code = None;
    let mut template = None;
    let mut template_name = None;
    let mut uploaded_filename = None;

    while let Some(item) = payload.next().await {
        let mut field = item.map_err(|e| ReportError::Invalid(format!("multipart error: {e}")))?;
        let Some(disposition) = field.content_disposition() else {
            return Err(ReportError::Invalid("multipart field without content disposition".to_string()));
        };
        let field_name = disposition.get_name().unwrap_or_default().to_string();
        let filename = disposition.get_filename().map(str::to_string);

        match field_name.as_str() {
            "template" => {
                uploaded_filename = filename;
                template = Some(read_field(&mut field).await?);
            }
            "name" => name = Some(read_text_field(&mut field, "name").await?),
            "report_type" => {
                let value = read_text_field(&mut field, "report_type").await?;
                report_type = Some(value.parse::<ReportType>().map_err(ReportError::Invalid)?);
            }
            "model" => model = Some(read_text_field(&mut field, "model").await?).filter(|m| !m.trim().is_empty()),
            "is_single" => is_single = parse_flag(&read_text_field(&mut field, "is_single").await?)?,
            "code" => code = Some(read_text_field(&mut field, "code").await?).filter(|c| !c.is_empty()),
            "template_name" => {
                template_name = Some(read_text_field(&mut field, "template_name").await?)
                    .filter(|n| !n.trim().is_empty())
            }
            other => {
                log::debug!("Ignoring multipart field '{}'", other);
                read_field(&mut field).await?;
            }
        }
    }

    Ok(CreateReportRequest {
        name: name.ok_or_else(|| ReportError::Invalid("missing field 'name'".to_string()))?,
        report_type: report_type
            .ok_or_else(|| ReportError::Invalid("missing field 'report_type'".to_string()))?,
        template: template.ok_or_else(|| ReportError::Invalid("missing template file".to_string()))?,
        template_name: template_name.or(uploaded_filename),
        model,
        is_single,
        code,
    })
}

pub fn config(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::scope("/api")
            .service(
                web::resource("/reports")
                    .route(web::get().to(list_reports))
                    .route(web::post().to(create_report)),
            )
            .service(web::resource("/reports/upload").route(web::post().to(upload_report)))
            .service(
                web::resource("/reports/{id}")
                    .route(web::get().to(get_report))
                    .route(web::put().to(update_report))
                    .route(web::delete().to(delete_report)),
            )
            .service(web::resource("/reports/{id}/run").route(web::post().to(run_report)))
            .service(web::resource("/bindings").route(web::get().to(list_bindings)))
            .service(web::resource("/bindings/{id}/run").route(web::post().to(run_binding)))
            .service(web::resource("/attachments/{id}").route(web::get().to(get_attachment))),
    )
    .service(web::resource("/web/content/{id}").route(web::get().to(serve_content)));
}
