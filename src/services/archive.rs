use crate::models::Category;
use crate::services::error::{PipelineError, PipelineResult};
use crate::services::storage::{StagedReader, StagingStore};
use crate::utils::validation::{validate_batch_token, validate_staged_file};
use bytes::Bytes;
use futures::{Stream, StreamExt};
use std::io::{Cursor, Write};
use std::sync::Arc;
use tokio_util::io::ReaderStream;
use zip::result::ZipError;
use zip::write::FileOptions;
use zip::{CompressionMethod, ZipWriter};

pub fn archive_key(batch_token: &str) -> String {
    format!("{}.zip", batch_token)
}

/// Zips `(name, bytes)` entries at the archive root, without folder prefixes.
pub fn zip_flat(files: Vec<(String, Vec<u8>)>, compression_level: i32) -> Result<Vec<u8>, ZipError> {
    let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
    let options = FileOptions::default()
        .compression_method(CompressionMethod::Deflated)
        .compression_level(Some(compression_level));

    for (name, data) in files {
        writer.start_file(name, options)?;
        writer.write_all(&data)?;
    }

    Ok(writer.finish()?.into_inner())
}

/// Deletion rights over every artifact of one generate/download cycle.
///
/// Released explicitly once the archive has been fully streamed; if it is
/// dropped first (failed build, client disconnect) the same cleanup is
/// spawned onto the runtime.
pub struct CleanupLease {
    storage: Arc<dyn StagingStore>,
    batch_dir: String,
    files: Vec<String>,
    released: bool,
}

impl CleanupLease {
    pub fn new(
        storage: Arc<dyn StagingStore>,
        batch_token: &str,
        template_name: &str,
        data_name: &str,
    ) -> Self {
        Self {
            storage,
            batch_dir: batch_token.to_string(),
            files: vec![
                archive_key(batch_token),
                Category::Template.key_for(template_name),
                Category::Data.key_for(data_name),
            ],
            released: false,
        }
    }

    pub async fn release(mut self) {
        self.released = true;
        cleanup(
            self.storage.clone(),
            self.batch_dir.clone(),
            std::mem::take(&mut self.files),
        )
        .await;
    }
}

impl Drop for CleanupLease {
    fn drop(&mut self) {
        if self.released {
            return;
        }

        tracing::warn!(
            "Download of batch {} did not complete; cleaning up anyway",
            self.batch_dir
        );
        let storage = self.storage.clone();
        let batch_dir = std::mem::take(&mut self.batch_dir);
        let files = std::mem::take(&mut self.files);

        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(cleanup(storage, batch_dir, files));
            }
            Err(_) => tracing::error!(
                "No runtime to clean batch {}; leaving it to the staging sweeper",
                batch_dir
            ),
        }
    }
}

async fn cleanup(storage: Arc<dyn StagingStore>, batch_dir: String, files: Vec<String>) {
    match storage.remove_dir(&batch_dir).await {
        Ok(true) => tracing::info!("Deleted batch folder {}", batch_dir),
        Ok(false) => tracing::warn!("Batch folder {} was already gone", batch_dir),
        Err(e) => tracing::error!("Failed to delete batch folder {}: {}", batch_dir, e),
    }

    for key in files {
        match storage.delete(&key).await {
            Ok(true) => tracing::info!("Deleted {}", key),
            Ok(false) => tracing::warn!("{} was already gone", key),
            Err(e) => tracing::error!("Failed to delete {}: {}", key, e),
        }
    }
}

/// An archive ready to be streamed, holding the cleanup lease of its cycle.
pub struct PreparedArchive {
    pub file_name: String,
    pub len: u64,
    pub entries: usize,
    reader: StagedReader,
    lease: CleanupLease,
}

impl PreparedArchive {
    /// Body stream that releases the lease as soon as the last byte is read.
    ///
    /// Hyper stops polling a body once `Content-Length` bytes were sent, so
    /// the end of the archive is detected by length rather than by the
    /// reader returning `None`.
    pub fn into_stream(self) -> impl Stream<Item = std::io::Result<Bytes>> + Send + 'static {
        let file_name = self.file_name;
        let total = self.len;
        let state = Some((ReaderStream::new(self.reader), self.lease, 0u64));

        futures::stream::unfold(state, move |state| {
            let file_name = file_name.clone();
            async move {
                let (mut chunks, lease, sent) = state?;
                match chunks.next().await {
                    Some(Ok(chunk)) => {
                        let sent = sent + chunk.len() as u64;
                        if sent < total {
                            return Some((Ok(chunk), Some((chunks, lease, sent))));
                        }
                        tracing::info!("Downloaded {} successfully", file_name);
                        drop(chunks);
                        lease.release().await;
                        Some((Ok(chunk), None))
                    }
                    Some(Err(e)) => {
                        tracing::error!("Error streaming {}: {}", file_name, e);
                        drop(chunks);
                        lease.release().await;
                        Some((Err(e), None))
                    }
                    None => {
                        if sent < total {
                            tracing::warn!(
                                "{} ended after {} of {} bytes",
                                file_name,
                                sent,
                                total
                            );
                        }
                        drop(chunks);
                        lease.release().await;
                        None
                    }
                }
            }
        })
    }
}

/// Builds batch archives and hands them out under a cleanup lease.
pub struct ArchiveService {
    storage: Arc<dyn StagingStore>,
    compression_level: i32,
}

impl ArchiveService {
    pub fn new(storage: Arc<dyn StagingStore>, compression_level: i32) -> Self {
        Self {
            storage,
            compression_level,
        }
    }

    /// Zips the batch folder into `{batch}.zip`. Returns the number of entries.
    pub async fn build_archive(&self, batch_token: &str) -> PipelineResult<usize> {
        let names = self.storage.list_dir(batch_token).await?;
        tracing::info!("Adding {} files from {} to archive", names.len(), batch_token);

        let mut files = Vec::with_capacity(names.len());
        for name in names {
            let data = self.storage.get(&format!("{}/{}", batch_token, name)).await?;
            files.push((name, data));
        }

        let entries = files.len();
        let level = self.compression_level;
        let bytes = tokio::task::spawn_blocking(move || zip_flat(files, level)).await??;
        tracing::info!("{} total bytes in archive for {}", bytes.len(), batch_token);

        self.storage.put(&archive_key(batch_token), bytes).await?;
        Ok(entries)
    }

    /// Validates the cycle, acquires its cleanup lease and builds the archive.
    ///
    /// Only names this service issued are accepted, so nothing outside the
    /// request cycle can be archived or deleted. An unknown batch is reported
    /// as not found and nothing is deleted. From
    /// the moment the lease is taken, every exit path deletes the batch
    /// folder, the archive and both staged inputs.
    pub async fn prepare_download(
        &self,
        batch_token: Option<&str>,
        template_name: Option<&str>,
        data_name: Option<&str>,
    ) -> PipelineResult<PreparedArchive> {
        let (Some(batch_token), Some(template_name), Some(data_name)) =
            (batch_token, template_name, data_name)
        else {
            return Err(PipelineError::InvalidInput(
                "Missing required parameters: pathName, template or data".to_string(),
            ));
        };
        validate_batch_token(batch_token)?;
        validate_staged_file(Category::Template, template_name)?;
        validate_staged_file(Category::Data, data_name)?;

        if !self.storage.dir_exists(batch_token).await? {
            return Err(PipelineError::NotFound(format!(
                "Batch not found: {}",
                batch_token
            )));
        }

        tracing::info!("Creating zip for {}", batch_token);
        let lease = CleanupLease::new(self.storage.clone(), batch_token, template_name, data_name);

        let opened = async {
            let entries = self.build_archive(batch_token).await?;
            let (reader, len) = self.storage.open_read(&archive_key(batch_token)).await?;
            Ok::<_, PipelineError>((entries, reader, len))
        }
        .await;

        match opened {
            Ok((entries, reader, len)) => Ok(PreparedArchive {
                file_name: archive_key(batch_token),
                len,
                entries,
                reader,
                lease,
            }),
            Err(e) => {
                tracing::error!("Error creating archive for {}: {}", batch_token, e);
                lease.release().await;
                Err(e)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::identifier::{new_token, staged_name};
    use crate::services::storage::MemoryStagingStore;
    use zip::ZipArchive;

    struct Cycle {
        store: Arc<MemoryStagingStore>,
        batch: String,
        template: String,
        data: String,
    }

    impl Cycle {
        async fn prepare(&self) -> PipelineResult<PreparedArchive> {
            ArchiveService::new(self.store.clone(), 9)
                .prepare_download(
                    Some(self.batch.as_str()),
                    Some(self.template.as_str()),
                    Some(self.data.as_str()),
                )
                .await
        }
    }

    async fn staged_cycle(docs: &[(&str, &[u8])]) -> Cycle {
        let store = Arc::new(MemoryStagingStore::new());
        let template = staged_name(Category::Template);
        let data = staged_name(Category::Data);
        let batch = new_token();

        store.put(&Category::Template.key_for(&template), b"tpl".to_vec()).await.unwrap();
        store.put(&Category::Data.key_for(&data), b"xlsx".to_vec()).await.unwrap();
        store.create_dir(&batch).await.unwrap();
        for (name, bytes) in docs {
            store.put(&format!("{}/{}", batch, name), bytes.to_vec()).await.unwrap();
        }

        Cycle {
            store,
            batch,
            template,
            data,
        }
    }

    async fn collect(prepared: PreparedArchive) -> Vec<u8> {
        let mut stream = Box::pin(prepared.into_stream());
        let mut body = Vec::new();
        while let Some(chunk) = stream.next().await {
            body.extend_from_slice(&chunk.unwrap());
        }
        body
    }

    #[test]
    fn test_zip_flat_entries() {
        let bytes = zip_flat(
            vec![("a.docx".into(), b"A".to_vec()), ("b.docx".into(), b"B".to_vec())],
            9,
        )
        .unwrap();
        let archive = ZipArchive::new(Cursor::new(bytes)).unwrap();
        let names: Vec<&str> = archive.file_names().collect();
        assert_eq!(names.len(), 2);
        assert!(names.iter().all(|n| !n.contains('/')));
    }

    #[tokio::test]
    async fn test_full_stream_cleans_every_artifact() {
        let cycle = staged_cycle(&[("one.docx", b"1"), ("two.docx", b"2")]).await;
        let store = &cycle.store;

        let prepared = cycle.prepare().await.unwrap();
        assert_eq!(prepared.entries, 2);
        assert_eq!(prepared.file_name, format!("{}.zip", cycle.batch));

        let body = collect(prepared).await;
        let archive = ZipArchive::new(Cursor::new(body)).unwrap();
        assert_eq!(archive.len(), 2);

        assert!(!store.dir_exists(&cycle.batch).await.unwrap());
        assert!(!store.exists(&archive_key(&cycle.batch)).await.unwrap());
        assert!(!store.exists(&Category::Template.key_for(&cycle.template)).await.unwrap());
        assert!(!store.exists(&Category::Data.key_for(&cycle.data)).await.unwrap());
        assert_eq!(store.object_count(), 0);
    }

    #[tokio::test]
    async fn test_cleanup_runs_once_last_byte_is_read() {
        let cycle = staged_cycle(&[("one.docx", b"1")]).await;
        let prepared = cycle.prepare().await.unwrap();
        let len = prepared.len;

        // Read exactly `len` bytes and never poll for the end of the stream.
        let mut stream = Box::pin(prepared.into_stream());
        let mut read = 0u64;
        while read < len {
            read += stream.next().await.unwrap().unwrap().len() as u64;
        }

        assert_eq!(read, len);
        assert_eq!(cycle.store.object_count(), 0);
        assert!(!cycle.store.dir_exists(&cycle.batch).await.unwrap());
        assert!(stream.next().await.is_none());
    }

    #[tokio::test]
    async fn test_dropped_stream_still_cleans_up() {
        let cycle = staged_cycle(&[("one.docx", b"1")]).await;
        let prepared = cycle.prepare().await.unwrap();
        drop(prepared.into_stream());

        for _ in 0..50 {
            if cycle.store.object_count() == 0 {
                break;
            }
            tokio::task::yield_now().await;
        }
        assert_eq!(cycle.store.object_count(), 0);
        assert!(!cycle.store.dir_exists(&cycle.batch).await.unwrap());
    }

    #[tokio::test]
    async fn test_unknown_batch_deletes_nothing() {
        let cycle = staged_cycle(&[]).await;
        let other = Cycle {
            batch: new_token(),
            store: cycle.store.clone(),
            template: cycle.template.clone(),
            data: cycle.data.clone(),
        };

        let result = other.prepare().await;
        assert!(matches!(result, Err(PipelineError::NotFound(_))));
        assert!(cycle.store.exists(&Category::Template.key_for(&cycle.template)).await.unwrap());
        assert!(cycle.store.dir_exists(&cycle.batch).await.unwrap());
    }

    #[tokio::test]
    async fn test_names_not_issued_are_rejected_and_kept() {
        let cycle = staged_cycle(&[]).await;
        cycle.store.put("other-app/secret.txt", b"s3cret".to_vec()).await.unwrap();
        let service = ArchiveService::new(cycle.store.clone(), 9);

        for batch in ["templates", "data", "other-app"] {
            let result = service
                .prepare_download(
                    Some(batch),
                    Some(cycle.template.as_str()),
                    Some(cycle.data.as_str()),
                )
                .await;
            assert!(matches!(result, Err(PipelineError::InvalidInput(_))), "{}", batch);
        }

        let result = service
            .prepare_download(
                Some(cycle.batch.as_str()),
                Some("x_template.docx"),
                Some(cycle.data.as_str()),
            )
            .await;
        assert!(matches!(result, Err(PipelineError::InvalidInput(_))));

        assert!(cycle.store.exists("other-app/secret.txt").await.unwrap());
        assert!(cycle.store.exists(&Category::Template.key_for(&cycle.template)).await.unwrap());
        assert!(cycle.store.dir_exists(&cycle.batch).await.unwrap());
    }

    #[tokio::test]
    async fn test_empty_batch_yields_empty_archive() {
        let cycle = staged_cycle(&[]).await;
        let prepared = cycle.prepare().await.unwrap();
        assert_eq!(prepared.entries, 0);

        let body = collect(prepared).await;
        assert_eq!(ZipArchive::new(Cursor::new(body)).unwrap().len(), 0);
        assert_eq!(cycle.store.object_count(), 0);
    }

    #[tokio::test]
    async fn test_missing_download_parameters() {
        let service = ArchiveService::new(Arc::new(MemoryStagingStore::new()), 9);
        let result = service.prepare_download(Some("batch"), None, Some("d")).await;
        assert!(matches!(result, Err(PipelineError::InvalidInput(_))));
    }
}
