use actix_web::middleware::{Compress, Logger};
use actix_web::{error, web, App, HttpResponse, HttpServer};
use actix_web_prometheus::PrometheusMetricsBuilder;
use env_logger::Env;
use serde::{Deserialize, Serialize};
use utoipa::{OpenApi, ToSchema};
use utoipa_swagger_ui::SwaggerUi;

pub mod config;
pub mod context;
pub mod convert;
pub mod db;
pub mod media;
pub mod render;
pub mod report;
pub mod storage;

pub use crate::db::AppState;

/// Upper bound for JSON bodies; templates travel base64-encoded inside them.
pub const JSON_PAYLOAD_LIMIT: usize = 64 * 1024 * 1024;

#[derive(Serialize, Deserialize, ToSchema)]
pub struct ErrorResponse {
    pub error: String,
    pub message: String,
    pub timestamp: String,
}

impl ErrorResponse {
    pub fn new(error_type: &str, message: &str) -> Self {
        Self {
            error: error_type.to_string(),
            message: message.to_string(),
            timestamp: chrono::Utc::now().to_rfc3339(),
        }
    }

    pub fn not_found(message: &str) -> Self {
        Self::new("NotFound", message)
    }

    pub fn bad_request(message: &str) -> Self {
        Self::new("BadRequest", message)
    }

    pub fn unprocessable(message: &str) -> Self {
        Self::new("UnprocessableEntity", message)
    }

    pub fn internal_error(message: &str) -> Self {
        Self::new("InternalServerError", message)
    }
}

#[derive(OpenApi)]
#[openapi(
    paths(
        crate::report::handlers::list_reports,
        crate::report::handlers::create_report,
        crate::report::handlers::upload_report,
        crate::report::handlers::get_report,
        crate::report::handlers::update_report,
        crate::report::handlers::delete_report,
        crate::report::handlers::run_report,
        crate::report::handlers::list_bindings,
        crate::report::handlers::run_binding,
        crate::report::handlers::get_attachment,
        crate::report::handlers::serve_content
    ),
    components(
        schemas(
            report::models::ReportDefinition,
            report::models::ReportSummary,
            report::models::ReportType,
            report::models::CreateReportRequest,
            report::models::UpdateReportRequest,
            report::models::ActionBinding,
            report::models::DownloadDescriptor,
            report::models::Disposition,
            report::handlers::AttachmentPayload,
            report::handlers::UploadReportForm,
            storage::Attachment,
            ErrorResponse,
        )
    ),
    tags(
        (name = "Reports", description = "Report definitions and rendering."),
        (name = "Bindings", description = "Actions exposing reports on record models."),
        (name = "Attachments", description = "Rendered deliverables.")
    )
)]
pub struct ApiDoc;

/// JSON body config shared by the server and the API tests.
pub fn json_config() -> web::JsonConfig {
    web::JsonConfig::default()
        .limit(JSON_PAYLOAD_LIMIT)
        .error_handler(|err, _req| {
            let response = HttpResponse::BadRequest().json(ErrorResponse::bad_request(&err.to_string()));
            error::InternalError::from_response(err, response).into()
        })
}

pub async fn run() -> std::io::Result<()> {
    env_logger::Builder::from_env(Env::default().default_filter_or("info")).init();

    let config = match config::AppConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            log::error!("Invalid configuration: {}", e);
            std::process::exit(1);
        }
    };

    let app_state = match AppState::new(&config).await {
        Ok(state) => web::Data::new(state),
        Err(e) => {
            log::error!(
                "Failed to prepare attachment storage at {}. Error: {}",
                config.attachment_dir.display(),
                e
            );
            std::process::exit(1);
        }
    };

    let prometheus = PrometheusMetricsBuilder::new("reportgen_server")
        .endpoint("/metrics")
        .build()
        .map_err(|e| std::io::Error::other(format!("Failed to create Prometheus metrics middleware: {e}")))?;

    log::info!(
        "Starting server at http://{} (converter timeout {:?}, render concurrency {})",
        config.bind_addr,
        config.converter.timeout,
        config.render_concurrency
    );

    HttpServer::new(move || {
        App::new()
            .wrap(Compress::default())
            .wrap(prometheus.clone())
            .wrap(Logger::default())
            .app_data(app_state.clone())
            .app_data(json_config())
            .configure(report::handlers::config)
            .service(
                SwaggerUi::new("/swagger-ui/{_:.*}")
                    .url("/api-doc/openapi.json", ApiDoc::openapi()),
            )
    })
    .bind(config.bind_addr.as_str())?
    .run()
    .await
}
