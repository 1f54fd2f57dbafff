use crate::AppState;
use crate::api::error::AppError;
use crate::models::Category;
use axum::{
    Json,
    extract::{Multipart, State, multipart::MultipartError},
    http::StatusCode,
};
use serde::Serialize;
use utoipa::ToSchema;

#[derive(Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct UploadResponse {
    pub status: u16,
    pub message: String,
    pub file_name: String,
}

#[utoipa::path(
    post,
    path = "/upload-docx",
    request_body(content = Multipart, description = "Word template in field `file`"),
    responses(
        (status = 200, description = "Template staged", body = UploadResponse),
        (status = 400, description = "No file provided or empty file"),
        (status = 413, description = "File too large")
    ),
    tag = "pipeline"
)]
pub async fn upload_docx(
    State(state): State<AppState>,
    multipart: Multipart,
) -> Result<Json<UploadResponse>, AppError> {
    upload(state, multipart, Category::Template, "DOCX template uploaded successfully!").await
}

#[utoipa::path(
    post,
    path = "/upload-excel",
    request_body(content = Multipart, description = "Spreadsheet in field `file`"),
    responses(
        (status = 200, description = "Spreadsheet staged", body = UploadResponse),
        (status = 400, description = "No file provided or empty file"),
        (status = 413, description = "File too large")
    ),
    tag = "pipeline"
)]
pub async fn upload_excel(
    State(state): State<AppState>,
    multipart: Multipart,
) -> Result<Json<UploadResponse>, AppError> {
    upload(state, multipart, Category::Data, "Excel file uploaded successfully!").await
}

async fn upload(
    state: AppState,
    mut multipart: Multipart,
    category: Category,
    message: &str,
) -> Result<Json<UploadResponse>, AppError> {
    let result: Result<Json<UploadResponse>, AppError> = async {
        let mut payload: Option<Vec<u8>> = None;

        while let Some(field) = multipart.next_field().await.map_err(multipart_error)? {
            if field.name() == Some("file") {
                let bytes = field.bytes().await.map_err(multipart_error)?;
                payload = Some(bytes.to_vec());
                break;
            }
        }

        let data = payload.ok_or(AppError::BadRequest("No file provided".to_string()))?;
        let staged = state.uploads.stage(category, data).await?;

        Ok(Json(UploadResponse {
            status: StatusCode::OK.as_u16(),
            message: message.to_string(),
            file_name: staged.file_name,
        }))
    }
    .await;

    if let Err(e) = &result {
        tracing::warn!("Upload failed early: {}. Consuming remaining stream...", e);
        while let Ok(Some(mut field)) = multipart.next_field().await {
            while let Ok(Some(_)) = field.chunk().await {}
        }
    }

    result
}

fn multipart_error(e: MultipartError) -> AppError {
    if e.status() == StatusCode::PAYLOAD_TOO_LARGE {
        AppError::PayloadTooLarge("Request body exceeds the maximum allowed limit".to_string())
    } else {
        AppError::BadRequest(e.body_text())
    }
}
