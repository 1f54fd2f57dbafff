#![allow(dead_code)]

use axum::{
    Router,
    body::Body,
    http::{Request, StatusCode},
    response::Response,
};
use batch_doc_generator::config::ServiceConfig;
use batch_doc_generator::services::storage::{LocalStagingStore, MemoryStagingStore};
use batch_doc_generator::{AppState, create_app};
use http_body_util::BodyExt;
use rust_xlsxwriter::Workbook;
use serde_json::Value;
use std::io::{Cursor, Read, Write};
use std::path::Path;
use std::sync::Arc;
use tempfile::TempDir;
use tower::ServiceExt;
use zip::write::FileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

pub const BOUNDARY: &str = "---------------------------123456789012345678901234567";

pub fn test_config(root: &Path) -> ServiceConfig {
    ServiceConfig {
        staging_root: root.to_path_buf(),
        ..ServiceConfig::development()
    }
}

/// App over a fresh temporary staging root.
pub fn local_app() -> (Router, TempDir) {
    let dir = TempDir::new().unwrap();
    let config = test_config(dir.path());
    let storage = Arc::new(LocalStagingStore::new(dir.path()));
    (create_app(AppState::new(storage, config)), dir)
}

pub fn memory_app(config: ServiceConfig) -> (Router, Arc<MemoryStagingStore>) {
    let storage = Arc::new(MemoryStagingStore::new());
    (create_app(AppState::new(storage.clone(), config)), storage)
}

/// Minimal Word container whose body is `body`.
pub fn docx_template(body: &str) -> Vec<u8> {
    let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
    let options = FileOptions::default().compression_method(CompressionMethod::Deflated);
    writer.start_file("[Content_Types].xml", options).unwrap();
    writer.write_all(b"<?xml version=\"1.0\"?><Types/>").unwrap();
    writer.start_file("word/document.xml", options).unwrap();
    let xml = format!(
        "<?xml version=\"1.0\" encoding=\"UTF-8\"?><w:document><w:body>{}</w:body></w:document>",
        body
    );
    writer.write_all(xml.as_bytes()).unwrap();
    writer.finish().unwrap().into_inner()
}

/// Workbook whose first sheet holds `header` then `rows`, all as strings.
pub fn workbook(header: &[&str], rows: &[&[&str]]) -> Vec<u8> {
    let mut workbook = Workbook::new();
    let sheet = workbook.add_worksheet();
    for (col, name) in header.iter().enumerate() {
        sheet.write_string(0, col as u16, *name).unwrap();
    }
    for (r, row) in rows.iter().enumerate() {
        for (col, value) in row.iter().enumerate() {
            sheet.write_string(r as u32 + 1, col as u16, *value).unwrap();
        }
    }
    workbook.save_to_buffer().unwrap()
}

pub fn multipart_body(field: &str, filename: &str, data: &[u8]) -> Vec<u8> {
    let mut body = format!(
        "--{BOUNDARY}\r\n\
         Content-Disposition: form-data; name=\"{field}\"; filename=\"{filename}\"\r\n\
         Content-Type: application/octet-stream\r\n\r\n"
    )
    .into_bytes();
    body.extend_from_slice(data);
    body.extend_from_slice(format!("\r\n--{BOUNDARY}--\r\n").as_bytes());
    body
}

pub async fn post_multipart(app: &Router, uri: &str, body: Vec<u8>) -> Response {
    app.clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri(uri)
                .header(
                    "Content-Type",
                    format!("multipart/form-data; boundary={}", BOUNDARY),
                )
                .body(Body::from(body))
                .unwrap(),
        )
        .await
        .unwrap()
}

pub async fn get(app: &Router, uri: &str) -> Response {
    app.clone()
        .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
        .await
        .unwrap()
}

pub async fn body_bytes(response: Response) -> Vec<u8> {
    response.into_body().collect().await.unwrap().to_bytes().to_vec()
}

pub async fn json_body(response: Response) -> Value {
    serde_json::from_slice(&body_bytes(response).await).unwrap()
}

/// Uploads a file and returns its staged name.
pub async fn upload(app: &Router, uri: &str, filename: &str, data: &[u8]) -> String {
    let response = post_multipart(app, uri, multipart_body("file", filename, data)).await;
    assert_eq!(response.status(), StatusCode::OK);
    let json = json_body(response).await;
    json["fileName"].as_str().unwrap().to_string()
}

/// Uploads both inputs and generates a batch. Returns `(template, data, batch)`.
pub async fn staged_batch(app: &Router, body: &str, header: &[&str], rows: &[&[&str]]) -> (String, String, String) {
    let template = upload(app, "/upload-docx", "diploma.docx", &docx_template(body)).await;
    let data = upload(app, "/upload-excel", "people.xlsx", &workbook(header, rows)).await;

    let response = get(app, &format!("/generate?template={}&data={}", template, data)).await;
    assert_eq!(response.status(), StatusCode::OK);
    let json = json_body(response).await;
    let batch = json["pathName"].as_str().unwrap().to_string();
    (template, data, batch)
}

/// `word/document.xml` of every document inside a downloaded archive.
pub fn documents_in_archive(archive: &[u8]) -> Vec<String> {
    let mut outer = ZipArchive::new(Cursor::new(archive)).unwrap();
    let mut out = Vec::new();
    for i in 0..outer.len() {
        let mut entry = outer.by_index(i).unwrap();
        let mut docx = Vec::new();
        entry.read_to_end(&mut docx).unwrap();

        let mut inner = ZipArchive::new(Cursor::new(docx)).unwrap();
        let mut part = inner.by_name("word/document.xml").unwrap();
        let mut xml = String::new();
        part.read_to_string(&mut xml).unwrap();
        out.push(xml);
    }
    out
}

/// Names under the staging root, excluding the category folders themselves.
pub fn staging_leftovers(root: &Path) -> Vec<String> {
    let mut names = Vec::new();
    for entry in std::fs::read_dir(root).unwrap() {
        let entry = entry.unwrap();
        let name = entry.file_name().to_string_lossy().to_string();
        if name == "templates" || name == "data" {
            for child in std::fs::read_dir(entry.path()).unwrap() {
                names.push(format!("{}/{}", name, child.unwrap().file_name().to_string_lossy()));
            }
        } else {
            names.push(name);
        }
    }
    names.sort();
    names
}
