use crate::AppState;
use crate::api::error::AppError;
use axum::{
    body::Body,
    extract::{Query, State},
    http::{StatusCode, header},
    response::Response,
};
use serde::Deserialize;
use utoipa::IntoParams;

#[derive(Deserialize, IntoParams)]
pub struct DownloadQuery {
    /// Batch token returned by `/generate`
    #[serde(rename = "pathName")]
    pub path_name: Option<String>,
    pub template: Option<String>,
    pub data: Option<String>,
}

#[utoipa::path(
    get,
    path = "/download",
    params(DownloadQuery),
    responses(
        (status = 200, description = "Zip archive of the batch", content_type = "application/zip"),
        (status = 400, description = "Missing or invalid parameters"),
        (status = 404, description = "Batch not found"),
        (status = 500, description = "Archive creation failed")
    ),
    tag = "pipeline"
)]
pub async fn download(
    State(state): State<AppState>,
    Query(query): Query<DownloadQuery>,
) -> Result<Response, AppError> {
    let prepared = state
        .archives
        .prepare_download(
            query.path_name.as_deref(),
            query.template.as_deref(),
            query.data.as_deref(),
        )
        .await?;

    tracing::info!(
        "Sending {} ({} entries, {} bytes)",
        prepared.file_name,
        prepared.entries,
        prepared.len
    );

    let content_disposition = format!("attachment; filename=\"{}\"", prepared.file_name);
    let len = prepared.len;

    let builder = Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, "application/zip")
        .header(header::CONTENT_DISPOSITION, content_disposition)
        .header(header::CONTENT_LENGTH, len);

    match builder.body(Body::from_stream(prepared.into_stream())) {
        Ok(response) => Ok(response),
        Err(e) => Err(AppError::Internal(format!("Failed to build response: {}", e))),
    }
}
