use crate::services::error::{PipelineError, PipelineResult};
use crate::services::identifier::new_token;
use crate::services::renderer::DocumentRenderer;
use crate::services::rows::RowExtractor;
use crate::services::storage::StagingStore;
use crate::models::Category;
use crate::utils::validation::validate_staged_file;
use std::sync::Arc;

/// Outcome of one generation request.
#[derive(Debug, Clone)]
pub struct BatchOutcome {
    pub batch_token: String,
    pub documents: Vec<String>,
}

/// Drives row extraction and rendering for one template and one spreadsheet.
pub struct BatchService {
    storage: Arc<dyn StagingStore>,
    rows: RowExtractor,
    renderer: DocumentRenderer,
}

impl BatchService {
    pub fn new(storage: Arc<dyn StagingStore>, compression_level: i32) -> Self {
        Self {
            rows: RowExtractor::new(storage.clone()),
            renderer: DocumentRenderer::new(storage.clone(), compression_level),
            storage,
        }
    }

    /// Renders one document per row into a fresh batch folder.
    ///
    /// Rows are rendered sequentially in sheet order; the first failing row
    /// aborts the batch. Documents already written stay on disk.
    pub async fn generate(
        &self,
        template_name: Option<&str>,
        data_name: Option<&str>,
    ) -> PipelineResult<BatchOutcome> {
        let (Some(template_name), Some(data_name)) = (template_name, data_name) else {
            return Err(PipelineError::InvalidInput(
                "Missing required parameters: template or data".to_string(),
            ));
        };
        validate_staged_file(Category::Template, template_name)?;
        validate_staged_file(Category::Data, data_name)?;

        // 1. Rows, then the template, before anything is written
        let rows = self.rows.extract(data_name).await?;
        let template = if rows.is_empty() {
            None
        } else {
            Some(self.renderer.load_template(template_name).await?)
        };

        // 2. Empty batch folder
        let batch_token = new_token();
        self.storage.create_dir(&batch_token).await?;
        tracing::info!(
            "Generating {} documents into batch {} from template {}",
            rows.len(),
            batch_token,
            template_name
        );

        // 3. One document per row, in sheet order
        let mut documents = Vec::with_capacity(rows.len());
        if let Some(template) = template {
            let headers: Vec<&String> = rows[0].keys().collect();
            let unmatched: Vec<String> = template
                .placeholders()
                .into_iter()
                .filter(|tag| !headers.iter().any(|h| *h == tag))
                .collect();
            if !unmatched.is_empty() {
                tracing::warn!(
                    "Template placeholders without a matching column will render empty: {:?}",
                    unmatched
                );
            }

            for (index, row) in rows.into_iter().enumerate() {
                let name = self
                    .renderer
                    .render_document(&template, row, &batch_token)
                    .await
                    .inspect_err(|e| {
                        tracing::error!("Row {} of batch {} failed: {}", index + 1, batch_token, e)
                    })?;
                documents.push(name);
            }
        }

        tracing::info!("Generated data successfully for batch {}", batch_token);
        Ok(BatchOutcome {
            batch_token,
            documents,
        })
    }
}
