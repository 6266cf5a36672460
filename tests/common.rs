#![allow(dead_code)]

use std::io::{Cursor, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use reportgen_server::convert::ConverterSettings;
use reportgen_server::storage::FilesystemStorage;
use reportgen_server::AppState;
use zip::write::SimpleFileOptions;
use zip::{ZipArchive, ZipWriter};

const W_NS: &str = "http://schemas.openxmlformats.org/wordprocessingml/2006/main";
const S_NS: &str = "http://schemas.openxmlformats.org/spreadsheetml/2006/main";
const R_NS: &str = "http://schemas.openxmlformats.org/officeDocument/2006/relationships";
const PKG_RELS_NS: &str = "http://schemas.openxmlformats.org/package/2006/relationships";
const CT_NS: &str = "http://schemas.openxmlformats.org/package/2006/content-types";

pub fn zip_parts(parts: &[(&str, String)]) -> Vec<u8> {
    let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
    for (name, content) in parts {
        writer.start_file(*name, SimpleFileOptions::default()).unwrap();
        writer.write_all(content.as_bytes()).unwrap();
    }
    writer.finish().unwrap().into_inner()
}

/// Name and content of every entry, in archive order.
pub fn unzip(bytes: &[u8]) -> Vec<(String, Vec<u8>)> {
    let mut archive = ZipArchive::new(Cursor::new(bytes)).unwrap();
    (0..archive.len())
        .map(|i| {
            let mut entry = archive.by_index(i).unwrap();
            let mut content = Vec::new();
            entry.read_to_end(&mut content).unwrap();
            (entry.name().to_string(), content)
        })
        .collect()
}

pub fn part_text(package: &[u8], name: &str) -> String {
    let entry = unzip(package)
        .into_iter()
        .find(|(entry, _)| entry == name)
        .unwrap_or_else(|| panic!("package has no part {name}"));
    String::from_utf8(entry.1).unwrap()
}

pub fn paragraph(text: &str) -> String {
    format!(r#"<w:p><w:r><w:t xml:space="preserve">{text}</w:t></w:r></w:p>"#)
}

pub fn docx_template(body: &str) -> Vec<u8> {
    zip_parts(&[
        (
            "[Content_Types].xml",
            format!(r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?><Types xmlns="{CT_NS}"><Default Extension="rels" ContentType="application/vnd.openxmlformats-package.relationships+xml"/><Default Extension="xml" ContentType="application/xml"/><Override PartName="/word/document.xml" ContentType="application/vnd.openxmlformats-officedocument.wordprocessingml.document.main+xml"/></Types>"#),
        ),
        (
            "_rels/.rels",
            format!(r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?><Relationships xmlns="{PKG_RELS_NS}"><Relationship Id="rId1" Type="{R_NS}/officeDocument" Target="word/document.xml"/></Relationships>"#),
        ),
        (
            "word/document.xml",
            format!(r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?><w:document xmlns:w="{W_NS}" xmlns:r="{R_NS}"><w:body>{body}</w:body></w:document>"#),
        ),
        (
            "word/_rels/document.xml.rels",
            format!(r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?><Relationships xmlns="{PKG_RELS_NS}"></Relationships>"#),
        ),
    ])
}

/// One-sheet workbook; every non-empty cell is a shared string.
pub fn xlsx_template(rows: &[&[&str]]) -> Vec<u8> {
    let mut strings = Vec::new();
    let mut sheet_rows = String::new();
    for (row_index, row) in rows.iter().enumerate() {
        let number = row_index + 1;
        sheet_rows.push_str(&format!(r#"<row r="{number}">"#));
        for (col_index, text) in row.iter().enumerate() {
            if text.is_empty() {
                continue;
            }
            let column = (b'A' + col_index as u8) as char;
            sheet_rows.push_str(&format!(
                r#"<c r="{column}{number}" t="s"><v>{}</v></c>"#,
                strings.len()
            ));
            strings.push(format!(r#"<si><t xml:space="preserve">{text}</t></si>"#));
        }
        sheet_rows.push_str("</row>");
    }

    zip_parts(&[
        (
            "[Content_Types].xml",
            format!(r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?><Types xmlns="{CT_NS}"><Default Extension="rels" ContentType="application/vnd.openxmlformats-package.relationships+xml"/><Default Extension="xml" ContentType="application/xml"/><Override PartName="/xl/workbook.xml" ContentType="application/vnd.openxmlformats-officedocument.spreadsheetml.sheet.main+xml"/><Override PartName="/xl/worksheets/sheet1.xml" ContentType="application/vnd.openxmlformats-officedocument.spreadsheetml.worksheet+xml"/><Override PartName="/xl/sharedStrings.xml" ContentType="application/vnd.openxmlformats-officedocument.spreadsheetml.sharedStrings+xml"/></Types>"#),
        ),
        (
            "_rels/.rels",
            format!(r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?><Relationships xmlns="{PKG_RELS_NS}"><Relationship Id="rId1" Type="{R_NS}/officeDocument" Target="xl/workbook.xml"/></Relationships>"#),
        ),
        (
            "xl/workbook.xml",
            format!(r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?><workbook xmlns="{S_NS}" xmlns:r="{R_NS}"><sheets><sheet name="Template" sheetId="1" r:id="rId1"/></sheets></workbook>"#),
        ),
        (
            "xl/_rels/workbook.xml.rels",
            format!(r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?><Relationships xmlns="{PKG_RELS_NS}"><Relationship Id="rId1" Type="{R_NS}/worksheet" Target="worksheets/sheet1.xml"/><Relationship Id="rId2" Type="{R_NS}/sharedStrings" Target="sharedStrings.xml"/></Relationships>"#),
        ),
        (
            "xl/worksheets/sheet1.xml",
            format!(r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?><worksheet xmlns="{S_NS}"><sheetData>{sheet_rows}</sheetData></worksheet>"#),
        ),
        (
            "xl/sharedStrings.xml",
            format!(
                r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?><sst xmlns="{S_NS}" count="{n}" uniqueCount="{n}">{}</sst>"#,
                strings.concat(),
                n = strings.len()
            ),
        ),
    ])
}

/// Shell stand-ins for LibreOffice, written once per test binary.
pub struct StubConverters {
    _dir: tempfile::TempDir,
    /// Copies the input to `<outdir>/<stem>.pdf` and warns on stderr.
    pub ok: PathBuf,
    /// Exits with status 3.
    pub failing: PathBuf,
    /// Exits successfully without writing anything.
    pub silent: PathBuf,
    /// Sleeps far past any test timeout.
    pub hanging: PathBuf,
}

#[cfg(unix)]
pub fn stub_converters() -> &'static StubConverters {
    static STUBS: OnceLock<StubConverters> = OnceLock::new();
    STUBS.get_or_init(|| {
        let dir = tempfile::tempdir().unwrap();
        let ok = write_script(
            dir.path(),
            "ok.sh",
            r#"[ "$1" = "--convert-to" ] && [ "$3" = "--outdir" ] || exit 2
case "$2" in pdf:draw_pdf_Export:*) ;; *) exit 2 ;; esac
name=$(basename "$5")
cp "$5" "$4/${name%.*}.pdf"
echo "warn: font substituted" >&2
"#,
        );
        let failing = write_script(dir.path(), "failing.sh", "echo \"boom\" >&2\nexit 3\n");
        let silent = write_script(dir.path(), "silent.sh", "exit 0\n");
        let hanging = write_script(dir.path(), "hanging.sh", "exec sleep 30\n");
        StubConverters {
            _dir: dir,
            ok,
            failing,
            silent,
            hanging,
        }
    })
}

#[cfg(unix)]
fn write_script(dir: &Path, name: &str, body: &str) -> PathBuf {
    use std::os::unix::fs::PermissionsExt;

    let path = dir.join(name);
    std::fs::write(&path, format!("#!/bin/sh\n{body}")).unwrap();
    std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
    path
}

pub fn converter(executable: &Path, timeout: Duration) -> ConverterSettings {
    ConverterSettings {
        executable: Some(executable.to_path_buf()),
        timeout,
    }
}

pub async fn app_state(dir: &Path, converter: ConverterSettings, concurrency: usize) -> AppState {
    let storage = Arc::new(FilesystemStorage::new(dir).await.unwrap());
    AppState::with_storage(storage, converter, concurrency)
}

/// Entries left in the attachment directory.
pub fn leftover_files(dir: &Path) -> usize {
    std::fs::read_dir(dir).unwrap().count()
}
