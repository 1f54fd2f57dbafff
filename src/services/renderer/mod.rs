pub mod template;

use crate::models::{Category, RowRecord};
use crate::services::error::{PipelineError, PipelineResult};
use crate::services::identifier::new_token;
use crate::services::storage::StagingStore;
use crate::utils::validation::validate_staged_file;
use std::sync::Arc;
use template::TemplateDocument;

/// Renders staged templates into documents inside a batch folder.
pub struct DocumentRenderer {
    storage: Arc<dyn StagingStore>,
    compression_level: i32,
}

impl DocumentRenderer {
    pub fn new(storage: Arc<dyn StagingStore>, compression_level: i32) -> Self {
        Self {
            storage,
            compression_level,
        }
    }

    /// Reads and parses a staged template.
    pub async fn load_template(&self, template_name: &str) -> PipelineResult<Arc<TemplateDocument>> {
        validate_staged_file(Category::Template, template_name)?;
        let key = Category::Template.key_for(template_name);
        tracing::info!("Checking template at {}", key);

        if !self.storage.exists(&key).await? {
            return Err(PipelineError::NotFound(format!(
                "Template file not found: {}",
                template_name
            )));
        }

        let bytes = self.storage.get(&key).await?;
        let document = tokio::task::spawn_blocking(move || TemplateDocument::parse(&bytes)).await??;
        Ok(Arc::new(document))
    }

    /// Renders one row against a loaded template and writes `{batch}/{token}.docx`.
    ///
    /// Returns the generated document name.
    pub async fn render_document(
        &self,
        template: &Arc<TemplateDocument>,
        row: RowRecord,
        batch_token: &str,
    ) -> PipelineResult<String> {
        let template = Arc::clone(template);
        let level = self.compression_level;
        let rendered = tokio::task::spawn_blocking(move || template.render(&row, level)).await??;

        let document_name = format!("{}.docx", new_token());
        let key = format!("{}/{}", batch_token, document_name);
        tracing::debug!("Writing document to {}", key);
        self.storage.put(&key, rendered).await?;

        Ok(document_name)
    }
}
