use crate::services::storage::{CATEGORY_DIRS, StagedEntry, StagingStore};
use crate::utils::validation::is_minted_token;
use chrono::{Duration as ChronoDuration, Utc};
use std::sync::Arc;
use tokio::sync::watch;
use tokio::time::{Duration, sleep};

/// Periodically removes staging leftovers of cycles that never reached download.
pub struct StagingJanitor {
    storage: Arc<dyn StagingStore>,
    max_age: ChronoDuration,
    interval: Duration,
    shutdown: watch::Receiver<bool>,
}

impl StagingJanitor {
    pub fn new(
        storage: Arc<dyn StagingStore>,
        max_age_hours: u64,
        interval_secs: u64,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        // Ages past what chrono can represent clamp to "never stale".
        let max_age = i64::try_from(max_age_hours)
            .ok()
            .and_then(ChronoDuration::try_hours)
            .unwrap_or_else(|| {
                tracing::warn!(
                    "Staging cleanup age of {}h is out of range; nothing will be swept",
                    max_age_hours
                );
                ChronoDuration::MAX
            });

        Self {
            storage,
            max_age,
            interval: Duration::from_secs(interval_secs),
            shutdown,
        }
    }

    pub async fn run(mut self) {
        tracing::info!("🚀 Staging janitor started");

        loop {
            tokio::select! {
                _ = self.shutdown.changed() => {
                    tracing::info!("🛑 Staging janitor shutting down");
                    break;
                }
                _ = sleep(self.interval) => {
                    self.sweep_once().await;
                }
            }
        }
    }

    /// Deletes generated entries older than the configured age.
    /// Returns how many entries were removed.
    pub async fn sweep_once(&self) -> usize {
        tracing::info!("🧹 Sweeping stale staging entries...");

        let entries = match self.storage.list_entries().await {
            Ok(entries) => entries,
            Err(e) => {
                tracing::error!("Failed to list staging entries: {}", e);
                return 0;
            }
        };

        let Some(cutoff) = Utc::now().checked_sub_signed(self.max_age) else {
            tracing::info!("✅ Staging sweep skipped, cleanup age exceeds the calendar");
            return 0;
        };
        let mut removed = 0;
        for entry in entries {
            if !is_generated(&entry) || entry.modified.is_none_or(|m| m >= cutoff) {
                continue;
            }

            let result = if entry.is_dir {
                self.storage.remove_dir(&entry.key).await
            } else {
                self.storage.delete(&entry.key).await
            };
            match result {
                Ok(true) => {
                    tracing::info!("Removed stale staging entry {}", entry.key);
                    removed += 1;
                }
                Ok(false) => {}
                Err(e) => tracing::error!("Failed to remove {}: {}", entry.key, e),
            }
        }

        tracing::info!("✅ Staging sweep completed, {} entries removed", removed);
        removed
    }
}

/// Only names this service mints are eligible: `{uuid}` batch folders,
/// `{uuid}.zip` archives and `{uuid}_...` staged inputs.
fn is_generated(entry: &StagedEntry) -> bool {
    let name = entry.name();
    let in_category = entry
        .key
        .split_once('/')
        .is_some_and(|(dir, _)| CATEGORY_DIRS.contains(&dir));

    if in_category {
        return !entry.is_dir
            && name
                .split_once('_')
                .is_some_and(|(token, _)| is_minted_token(token));
    }

    if entry.is_dir {
        is_minted_token(name)
    } else {
        name.strip_suffix(".zip").is_some_and(is_minted_token)
    }
}
