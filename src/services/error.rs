use thiserror::Error;

use crate::services::renderer::template::TemplateError;

/// Failure of a pipeline stage, tagged by kind so the HTTP boundary can pick a status.
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("{0}")]
    InvalidInput(String),

    #[error("{0}")]
    NotFound(String),

    #[error("Storage error: {0}")]
    Storage(#[from] anyhow::Error),

    #[error("Spreadsheet error: {0}")]
    Spreadsheet(#[from] calamine::Error),

    #[error("Template error: {0}")]
    Template(#[from] TemplateError),

    #[error("Archive error: {0}")]
    Archive(#[from] zip::result::ZipError),

    #[error("Worker task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

impl From<crate::utils::validation::ValidationError> for PipelineError {
    fn from(e: crate::utils::validation::ValidationError) -> Self {
        PipelineError::InvalidInput(e.message)
    }
}

pub type PipelineResult<T> = Result<T, PipelineError>;
