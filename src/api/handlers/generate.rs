use crate::AppState;
use crate::api::error::AppError;
use axum::{
    Json,
    extract::{Query, State},
    http::StatusCode,
};
use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};

#[derive(Deserialize, IntoParams)]
pub struct GenerateQuery {
    /// Staged template name returned by `/upload-docx`
    pub template: Option<String>,
    /// Staged data name returned by `/upload-excel`
    pub data: Option<String>,
}

#[derive(Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct GenerateResponse {
    pub status: u16,
    pub message: String,
    /// Batch token to pass to `/download`
    pub path_name: String,
    pub documents: usize,
}

#[utoipa::path(
    get,
    path = "/generate",
    params(GenerateQuery),
    responses(
        (status = 200, description = "One document rendered per row", body = GenerateResponse),
        (status = 400, description = "Missing or invalid parameters"),
        (status = 404, description = "Template or data file not found"),
        (status = 500, description = "Rendering failed")
    ),
    tag = "pipeline"
)]
pub async fn generate(
    State(state): State<AppState>,
    Query(query): Query<GenerateQuery>,
) -> Result<Json<GenerateResponse>, AppError> {
    let outcome = state
        .batches
        .generate(query.template.as_deref(), query.data.as_deref())
        .await?;

    Ok(Json(GenerateResponse {
        status: StatusCode::OK.as_u16(),
        message: "Successfully generated data!".to_string(),
        path_name: outcome.batch_token,
        documents: outcome.documents.len(),
    }))
}
