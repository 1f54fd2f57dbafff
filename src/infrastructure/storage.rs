use crate::config::ServiceConfig;
use crate::services::storage::{LocalStagingStore, StagingStore};
use std::sync::Arc;
use tracing::info;

pub async fn setup_storage(config: &ServiceConfig) -> Arc<dyn StagingStore> {
    let store = LocalStagingStore::new(config.staging_root.clone());
    info!("🗂️  Staging root: {}", store.root().display());

    if store.health_check().await {
        info!("✅ Staging area is ready");
    } else {
        tracing::error!(
            "❌ Staging root {} is not writable; uploads will fail",
            store.root().display()
        );
    }

    Arc::new(store)
}
