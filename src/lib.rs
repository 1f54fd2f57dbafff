pub mod api;
pub mod config;
pub mod infrastructure;
pub mod models;
pub mod services;
pub mod utils;

use crate::config::ServiceConfig;
use crate::services::archive::ArchiveService;
use crate::services::batch::BatchService;
use crate::services::storage::StagingStore;
use crate::services::upload_service::UploadService;
use axum::{
    Router,
    http::HeaderValue,
    middleware::from_fn,
    routing::{get, post},
};
use std::sync::Arc;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

/// Extra room above the file limit for multipart framing.
const MULTIPART_OVERHEAD: usize = 1024 * 1024;

#[derive(OpenApi)]
#[openapi(
    paths(
        api::handlers::health::root,
        api::handlers::health::health_check,
        api::handlers::upload::upload_docx,
        api::handlers::upload::upload_excel,
        api::handlers::generate::generate,
        api::handlers::download::download,
    ),
    components(
        schemas(
            api::handlers::health::HealthResponse,
            api::handlers::upload::UploadResponse,
            api::handlers::generate::GenerateResponse,
        )
    ),
    tags(
        (name = "pipeline", description = "Upload, generate and download endpoints"),
        (name = "system", description = "Liveness and health")
    )
)]
pub struct ApiDoc;

#[derive(Clone)]
pub struct AppState {
    pub storage: Arc<dyn StagingStore>,
    pub uploads: Arc<UploadService>,
    pub batches: Arc<BatchService>,
    pub archives: Arc<ArchiveService>,
    pub config: ServiceConfig,
}

impl AppState {
    pub fn new(storage: Arc<dyn StagingStore>, config: ServiceConfig) -> Self {
        Self {
            uploads: Arc::new(UploadService::new(storage.clone())),
            batches: Arc::new(BatchService::new(storage.clone(), config.compression_level)),
            archives: Arc::new(ArchiveService::new(storage.clone(), config.compression_level)),
            storage,
            config,
        }
    }
}

fn cors_layer(config: &ServiceConfig) -> CorsLayer {
    let origin = if config.allows_any_origin() {
        AllowOrigin::from(Any)
    } else {
        let origins: Vec<HeaderValue> = config
            .allowed_origins
            .iter()
            .filter_map(|o| HeaderValue::from_str(o).ok())
            .collect();
        AllowOrigin::list(origins)
    };

    CorsLayer::new()
        .allow_origin(origin)
        .allow_methods(Any)
        .allow_headers(Any)
        .expose_headers(Any)
}

pub fn create_app(state: AppState) -> Router {
    Router::new()
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi()))
        .route("/", get(api::handlers::health::root))
        .route("/health", get(api::handlers::health::health_check))
        .route("/upload-docx", post(api::handlers::upload::upload_docx))
        .route("/upload-excel", post(api::handlers::upload::upload_excel))
        .route("/generate", get(api::handlers::generate::generate))
        .route("/download", get(api::handlers::download::download))
        .layer(from_fn(api::middleware::request_id::request_id_middleware))
        .layer(cors_layer(&state.config))
        .layer(axum::extract::DefaultBodyLimit::max(
            state.config.max_file_size + MULTIPART_OVERHEAD,
        ))
        .with_state(state)
}
