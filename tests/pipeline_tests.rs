mod common;

use std::time::Duration;

use reportgen_server::convert::ConverterSettings;
use reportgen_server::report::models::{CreateReportRequest, Disposition, EvalContext, ReportType};
use reportgen_server::report::ReportError;
use reportgen_server::storage::AttachmentStorage;
use reportgen_server::AppState;
use serde_json::json;
use uuid::Uuid;

use common::{app_state, docx_template, paragraph, part_text, unzip, xlsx_template};

fn request(name: &str, report_type: ReportType, template: Vec<u8>) -> CreateReportRequest {
    CreateReportRequest {
        name: name.to_string(),
        model: Some("stock.picking".to_string()),
        report_type,
        template,
        template_name: None,
        is_single: false,
        code: None,
    }
}

fn eval_context(value: serde_json::Value) -> EvalContext {
    serde_json::from_value(value).unwrap()
}

async fn state(dir: &std::path::Path) -> AppState {
    app_state(dir, ConverterSettings::default(), 2).await
}

#[tokio::test]
async fn test_xlsx_records_are_zipped_in_order() {
    let dir = tempfile::tempdir().unwrap();
    let state = state(dir.path()).await;
    let report = state
        .store
        .create_report(request(
            "Delivery note",
            ReportType::Xlsx,
            xlsx_template(&[&["Product", "{{ record.product }}"], &["Qty", "{{ record.qty }}"]]),
        ))
        .unwrap();

    let descriptor = state
        .reports
        .run(
            report.id,
            eval_context(json!({"records": [
                {"product": "Widget 1", "qty": 1},
                {"product": "Widget 2", "qty": 2},
                {"product": "Widget 3", "qty": 3}
            ]})),
        )
        .await
        .unwrap();

    assert_eq!(descriptor.disposition, Disposition::Attachment);
    assert_eq!(descriptor.target, "new");
    assert_eq!(
        descriptor.url,
        format!("/web/content/{}?download=true", descriptor.attachment_id)
    );

    let attachment = state.storage.get(descriptor.attachment_id).await.unwrap();
    assert_eq!(attachment.name, "Delivery note.zip");
    assert_eq!(attachment.mimetype, "application/zip");

    let members = unzip(&state.storage.read(attachment.id).await.unwrap());
    let names: Vec<&str> = members.iter().map(|(name, _)| name.as_str()).collect();
    assert_eq!(
        names,
        vec!["Delivery note (1).xlsx", "Delivery note (2).xlsx", "Delivery note (3).xlsx"]
    );
    for (i, (_, workbook)) in members.iter().enumerate() {
        let sheet = part_text(workbook, "xl/worksheets/sheet1.xml");
        assert!(sheet.contains(&format!("Widget {}", i + 1)), "{sheet}");
        assert!(part_text(workbook, "xl/workbook.xml").contains(r#"name="Delivery note""#));
    }
}

#[tokio::test]
async fn test_single_record_is_delivered_unzipped() {
    let dir = tempfile::tempdir().unwrap();
    let state = state(dir.path()).await;
    let report = state
        .store
        .create_report(request(
            "Greeting",
            ReportType::Txt,
            docx_template(&paragraph("{{ company.name }} greets {{ record.name }}")),
        ))
        .unwrap();

    let descriptor = state
        .reports
        .run(
            report.id,
            eval_context(json!({"records": [{"name": "Ann"}], "company": {"name": "ACME"}})),
        )
        .await
        .unwrap();

    let attachment = state.storage.get(descriptor.attachment_id).await.unwrap();
    assert_eq!(attachment.name, "Greeting.txt");
    assert_eq!(
        state.storage.read(attachment.id).await.unwrap(),
        b"ACME greets Ann\n"
    );
}

#[tokio::test]
async fn test_is_single_renders_one_document_for_all_records() {
    let dir = tempfile::tempdir().unwrap();
    let state = state(dir.path()).await;
    let mut req = request(
        "Summary",
        ReportType::Txt,
        docx_template(&paragraph("{% for r in record %}{{ r.name }};{% endfor %}")),
    );
    req.is_single = true;
    let report = state.store.create_report(req).unwrap();

    let descriptor = state
        .reports
        .run(
            report.id,
            eval_context(json!({"records": [{"name": "a"}, {"name": "b"}, {"name": "c"}]})),
        )
        .await
        .unwrap();
    assert_eq!(
        state.storage.read(descriptor.attachment_id).await.unwrap(),
        b"a;b;c;\n"
    );
}

#[tokio::test]
async fn test_binding_runs_its_report() {
    let dir = tempfile::tempdir().unwrap();
    let state = state(dir.path()).await;
    let report = state
        .store
        .create_report(request("Label", ReportType::Docx, docx_template(&paragraph("{{ record.code }}"))))
        .unwrap();
    let binding = state.store.binding_for_report(report.id).unwrap();

    let descriptor = state
        .reports
        .run_binding(binding.id, eval_context(json!({"records": [{"code": "LOT-7"}]})))
        .await
        .unwrap();
    let document = state.storage.read(descriptor.attachment_id).await.unwrap();
    assert!(part_text(&document, "word/document.xml").contains("LOT-7"));

    let err = state
        .reports
        .run_binding(Uuid::new_v4(), EvalContext::default())
        .await
        .unwrap_err();
    assert!(matches!(err, ReportError::BindingNotFound(_)));
}

#[tokio::test]
async fn test_delivered_attachment_survives_restart() {
    let dir = tempfile::tempdir().unwrap();
    let descriptor = {
        let state = state(dir.path()).await;
        let report = state
            .store
            .create_report(request("Label", ReportType::Txt, docx_template(&paragraph("{{ record.code }}"))))
            .unwrap();
        state
            .reports
            .run(report.id, eval_context(json!({"records": [{"code": "LOT-9"}]})))
            .await
            .unwrap()
    };

    let restarted = state(dir.path()).await;
    let attachment = restarted.storage.get(descriptor.attachment_id).await.unwrap();
    assert_eq!(attachment.name, "Label.txt");
    assert_eq!(restarted.storage.read(attachment.id).await.unwrap(), b"LOT-9\n");
}

#[tokio::test]
async fn test_run_errors_store_nothing() {
    let dir = tempfile::tempdir().unwrap();
    let state = state(dir.path()).await;
    let report = state
        .store
        .create_report(request("Label", ReportType::Docx, docx_template(&paragraph("{{ record.code }}"))))
        .unwrap();

    let err = state.reports.run(report.id, EvalContext::default()).await.unwrap_err();
    assert!(matches!(err, ReportError::NoRecords));

    let err = state
        .reports
        .run(report.id, eval_context(json!({"records": [{"code": "a"}, {"other": 1}]})))
        .await
        .unwrap_err();
    assert!(matches!(err, ReportError::Render(_)));

    let err = state.reports.run(Uuid::new_v4(), EvalContext::default()).await.unwrap_err();
    assert!(matches!(err, ReportError::NotFound(_)));

    assert!(state.storage.list().await.is_empty());
}

#[cfg(unix)]
mod pdf {
    use super::*;
    use common::{converter, leftover_files, stub_converters};
    use reportgen_server::convert::ConversionError;

    #[tokio::test]
    async fn test_pdf_report_opens_inline() {
        let dir = tempfile::tempdir().unwrap();
        let state = app_state(dir.path(), converter(&stub_converters().ok, Duration::from_secs(10)), 1).await;
        let report = state
            .store
            .create_report(request("Invoice", ReportType::Pdf, docx_template(&paragraph("Bill to {{ record.name }}"))))
            .unwrap();

        let descriptor = state
            .reports
            .run(report.id, eval_context(json!({"records": [{"name": "Ann"}]})))
            .await
            .unwrap();
        assert_eq!(descriptor.disposition, Disposition::Inline);
        assert_eq!(descriptor.url, format!("/web/content/{}", descriptor.attachment_id));

        let attachment = state.storage.get(descriptor.attachment_id).await.unwrap();
        assert_eq!(attachment.name, "Invoice.pdf");
        assert_eq!(attachment.mimetype, "application/pdf");
        // The stub copies its input, so the payload is the intermediate docx.
        let payload = state.storage.read(attachment.id).await.unwrap();
        assert!(part_text(&payload, "word/document.xml").contains("Bill to Ann"));

        assert_eq!(state.storage.list().await.len(), 1);
        // The delivered PDF and its metadata sidecar.
        assert_eq!(leftover_files(dir.path()), 2);
    }

    #[tokio::test]
    async fn test_pdf_from_spreadsheet_template() {
        let dir = tempfile::tempdir().unwrap();
        let state = app_state(dir.path(), converter(&stub_converters().ok, Duration::from_secs(10)), 1).await;
        let report = state
            .store
            .create_report(request("Stock", ReportType::Pdf, xlsx_template(&[&["{{ record.sku }}"]])))
            .unwrap();

        let descriptor = state
            .reports
            .run(report.id, eval_context(json!({"records": [{"sku": "A-1"}, {"sku": "B-2"}]})))
            .await
            .unwrap();
        let attachment = state.storage.get(descriptor.attachment_id).await.unwrap();
        assert_eq!(attachment.name, "Stock.zip");
        let names: Vec<String> = unzip(&state.storage.read(attachment.id).await.unwrap())
            .into_iter()
            .map(|(name, _)| name)
            .collect();
        assert_eq!(names, vec!["Stock (1).pdf", "Stock (2).pdf"]);
    }

    #[tokio::test]
    async fn test_failed_conversion_leaves_no_files() {
        let dir = tempfile::tempdir().unwrap();
        let state = app_state(dir.path(), converter(&stub_converters().failing, Duration::from_secs(10)), 1).await;
        let report = state
            .store
            .create_report(request("Invoice", ReportType::Pdf, docx_template(&paragraph("x"))))
            .unwrap();

        let err = state
            .reports
            .run(report.id, eval_context(json!({"records": [{}]})))
            .await
            .unwrap_err();
        assert!(matches!(err, ReportError::Conversion(ConversionError::Failed(_))));
        assert!(state.storage.list().await.is_empty());
        assert_eq!(leftover_files(dir.path()), 0);
    }
}
