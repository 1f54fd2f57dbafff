use crate::models::{Category, StagedFile};
use crate::services::error::{PipelineError, PipelineResult};
use crate::services::identifier::staged_name;
use crate::services::storage::StagingStore;
use std::sync::Arc;

/// Stores uploaded inputs under fresh staged names.
pub struct UploadService {
    storage: Arc<dyn StagingStore>,
}

impl UploadService {
    pub fn new(storage: Arc<dyn StagingStore>) -> Self {
        Self { storage }
    }

    /// Persists the payload as `{category}/{token}_{suffix}`.
    ///
    /// Every call mints a new name, so identical uploads never collide.
    pub async fn stage(&self, category: Category, data: Vec<u8>) -> PipelineResult<StagedFile> {
        if data.is_empty() {
            return Err(PipelineError::InvalidInput(
                "Uploaded file is empty".to_string(),
            ));
        }

        let staged = StagedFile {
            category,
            file_name: staged_name(category),
            size: data.len(),
        };

        self.storage.put(&staged.key(), data).await?;
        tracing::info!(
            "Staged {} upload as {} ({} bytes)",
            category,
            staged.file_name,
            staged.size
        );

        Ok(staged)
    }
}
