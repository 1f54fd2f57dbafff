use anyhow::{Context, Result, anyhow, bail};
use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use std::io::ErrorKind;
use std::path::{Component, Path, PathBuf};
use tokio::io::AsyncRead;

/// Directories under the staging root that hold uploaded inputs.
pub const CATEGORY_DIRS: [&str; 2] = ["templates", "data"];

/// A staged object or folder, as reported to the sweeper.
#[derive(Debug, Clone)]
pub struct StagedEntry {
    pub key: String,
    pub is_dir: bool,
    pub modified: Option<DateTime<Utc>>,
}

impl StagedEntry {
    /// Last path component of the key.
    pub fn name(&self) -> &str {
        self.key.rsplit('/').next().unwrap_or(&self.key)
    }
}

pub type StagedReader = Box<dyn AsyncRead + Unpin + Send>;

/// Token-keyed staging area shared by every request cycle.
///
/// Keys are `/`-separated relative paths (`templates/{name}`, `{batch}/{doc}`,
/// `{batch}.zip`). Writing a key creates its parent folders.
#[async_trait]
pub trait StagingStore: Send + Sync {
    async fn put(&self, key: &str, data: Vec<u8>) -> Result<()>;
    async fn get(&self, key: &str) -> Result<Vec<u8>>;
    /// Opens an object for streaming, returning the reader and its length.
    async fn open_read(&self, key: &str) -> Result<(StagedReader, u64)>;
    async fn exists(&self, key: &str) -> Result<bool>;
    /// Deletes an object. Returns false when it was already gone.
    async fn delete(&self, key: &str) -> Result<bool>;
    async fn create_dir(&self, dir: &str) -> Result<()>;
    async fn dir_exists(&self, dir: &str) -> Result<bool>;
    /// Names of the objects directly inside `dir`, sorted.
    async fn list_dir(&self, dir: &str) -> Result<Vec<String>>;
    /// Recursively deletes a folder. Returns false when it was already gone.
    async fn remove_dir(&self, dir: &str) -> Result<bool>;
    /// Top-level entries plus the contents of the category folders.
    async fn list_entries(&self) -> Result<Vec<StagedEntry>>;
    async fn health_check(&self) -> bool;
}

fn check_key(key: &str) -> Result<()> {
    let path = Path::new(key);
    if key.is_empty()
        || key.contains('\\')
        || !path.components().all(|c| matches!(c, Component::Normal(_)))
    {
        bail!("Invalid staging key: {:?}", key);
    }
    Ok(())
}

/// Filesystem staging rooted at a directory (`/tmp` by default).
pub struct LocalStagingStore {
    root: PathBuf,
}

impl LocalStagingStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn resolve(&self, key: &str) -> Result<PathBuf> {
        check_key(key)?;
        Ok(self.root.join(key))
    }

    async fn entry(&self, key: String, path: &Path) -> Option<StagedEntry> {
        let meta = tokio::fs::metadata(path).await.ok()?;
        Some(StagedEntry {
            key,
            is_dir: meta.is_dir(),
            modified: meta.modified().ok().map(DateTime::<Utc>::from),
        })
    }
}

#[async_trait]
impl StagingStore for LocalStagingStore {
    async fn put(&self, key: &str, data: Vec<u8>) -> Result<()> {
        let path = self.resolve(key)?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .with_context(|| format!("Failed to create directory {}", parent.display()))?;
        }
        tokio::fs::write(&path, data)
            .await
            .with_context(|| format!("Failed to write {}", path.display()))?;
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Vec<u8>> {
        let path = self.resolve(key)?;
        tokio::fs::read(&path)
            .await
            .with_context(|| format!("Failed to read {}", path.display()))
    }

    async fn open_read(&self, key: &str) -> Result<(StagedReader, u64)> {
        let path = self.resolve(key)?;
        let file = tokio::fs::File::open(&path)
            .await
            .with_context(|| format!("Failed to open {}", path.display()))?;
        let len = file.metadata().await?.len();
        Ok((Box::new(file), len))
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        let path = self.resolve(key)?;
        match tokio::fs::metadata(&path).await {
            Ok(meta) => Ok(meta.is_file()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        let path = self.resolve(key)?;
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(anyhow!("Failed to delete {}: {}", path.display(), e)),
        }
    }

    async fn create_dir(&self, dir: &str) -> Result<()> {
        let path = self.resolve(dir)?;
        tokio::fs::create_dir_all(&path)
            .await
            .with_context(|| format!("Failed to create directory {}", path.display()))
    }

    async fn dir_exists(&self, dir: &str) -> Result<bool> {
        let path = self.resolve(dir)?;
        match tokio::fs::metadata(&path).await {
            Ok(meta) => Ok(meta.is_dir()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    async fn list_dir(&self, dir: &str) -> Result<Vec<String>> {
        let path = self.resolve(dir)?;
        let mut reader = tokio::fs::read_dir(&path)
            .await
            .with_context(|| format!("Failed to list {}", path.display()))?;

        let mut names = Vec::new();
        while let Some(entry) = reader.next_entry().await? {
            if entry.file_type().await?.is_file() {
                names.push(entry.file_name().to_string_lossy().into_owned());
            }
        }
        names.sort();
        Ok(names)
    }

    async fn remove_dir(&self, dir: &str) -> Result<bool> {
        let path = self.resolve(dir)?;
        match tokio::fs::remove_dir_all(&path).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(anyhow!("Failed to remove {}: {}", path.display(), e)),
        }
    }

    async fn list_entries(&self) -> Result<Vec<StagedEntry>> {
        let mut entries = Vec::new();
        let mut reader = match tokio::fs::read_dir(&self.root).await {
            Ok(reader) => reader,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(entries),
            Err(e) => return Err(e.into()),
        };

        while let Some(entry) = reader.next_entry().await? {
            let name = entry.file_name().to_string_lossy().into_owned();
            let path = entry.path();

            if CATEGORY_DIRS.contains(&name.as_str()) && entry.file_type().await?.is_dir() {
                let mut children = tokio::fs::read_dir(&path).await?;
                while let Some(child) = children.next_entry().await? {
                    let key = format!("{}/{}", name, child.file_name().to_string_lossy());
                    if let Some(staged) = self.entry(key, &child.path()).await {
                        entries.push(staged);
                    }
                }
                continue;
            }

            if let Some(staged) = self.entry(name, &path).await {
                entries.push(staged);
            }
        }

        Ok(entries)
    }

    async fn health_check(&self) -> bool {
        tokio::fs::create_dir_all(&self.root).await.is_ok()
            && tokio::fs::metadata(&self.root)
                .await
                .map(|m| m.is_dir())
                .unwrap_or(false)
    }
}

struct MemoryObject {
    data: Bytes,
    modified: DateTime<Utc>,
}

/// In-memory staging, isolated per instance.
#[derive(Default)]
pub struct MemoryStagingStore {
    files: DashMap<String, MemoryObject>,
    dirs: DashMap<String, DateTime<Utc>>,
}

impl MemoryStagingStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Overrides the modification time of an object or folder.
    pub fn set_modified(&self, key: &str, modified: DateTime<Utc>) {
        if let Some(mut obj) = self.files.get_mut(key) {
            obj.modified = modified;
        }
        if let Some(mut dir) = self.dirs.get_mut(key) {
            *dir = modified;
        }
    }

    pub fn object_count(&self) -> usize {
        self.files.len()
    }

    fn register_parents(&self, key: &str) {
        let now = Utc::now();
        let mut prefix = String::new();
        let mut parts = key.split('/').peekable();
        while let Some(part) = parts.next() {
            if parts.peek().is_none() {
                break;
            }
            if !prefix.is_empty() {
                prefix.push('/');
            }
            prefix.push_str(part);
            self.dirs.entry(prefix.clone()).or_insert(now);
        }
    }
}

#[async_trait]
impl StagingStore for MemoryStagingStore {
    async fn put(&self, key: &str, data: Vec<u8>) -> Result<()> {
        check_key(key)?;
        self.register_parents(key);
        self.files.insert(
            key.to_string(),
            MemoryObject {
                data: Bytes::from(data),
                modified: Utc::now(),
            },
        );
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Vec<u8>> {
        check_key(key)?;
        self.files
            .get(key)
            .map(|obj| obj.data.to_vec())
            .ok_or_else(|| anyhow!("Staging object not found: {}", key))
    }

    async fn open_read(&self, key: &str) -> Result<(StagedReader, u64)> {
        check_key(key)?;
        let data = self
            .files
            .get(key)
            .map(|obj| obj.data.clone())
            .ok_or_else(|| anyhow!("Staging object not found: {}", key))?;
        let len = data.len() as u64;
        Ok((Box::new(std::io::Cursor::new(data)), len))
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        check_key(key)?;
        Ok(self.files.contains_key(key))
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        check_key(key)?;
        Ok(self.files.remove(key).is_some())
    }

    async fn create_dir(&self, dir: &str) -> Result<()> {
        check_key(dir)?;
        self.register_parents(dir);
        self.dirs.entry(dir.to_string()).or_insert_with(Utc::now);
        Ok(())
    }

    async fn dir_exists(&self, dir: &str) -> Result<bool> {
        check_key(dir)?;
        Ok(self.dirs.contains_key(dir))
    }

    async fn list_dir(&self, dir: &str) -> Result<Vec<String>> {
        check_key(dir)?;
        if !self.dirs.contains_key(dir) {
            bail!("Staging folder not found: {}", dir);
        }
        let prefix = format!("{}/", dir);
        let mut names: Vec<String> = self
            .files
            .iter()
            .filter_map(|obj| {
                obj.key()
                    .strip_prefix(&prefix)
                    .filter(|rest| !rest.contains('/'))
                    .map(str::to_string)
            })
            .collect();
        names.sort();
        Ok(names)
    }

    async fn remove_dir(&self, dir: &str) -> Result<bool> {
        check_key(dir)?;
        let prefix = format!("{}/", dir);
        let existed = self.dirs.remove(dir).is_some();
        self.dirs.retain(|key, _| !key.starts_with(&prefix));
        self.files.retain(|key, _| !key.starts_with(&prefix));
        Ok(existed)
    }

    async fn list_entries(&self) -> Result<Vec<StagedEntry>> {
        let is_listed = |key: &str| match key.split_once('/') {
            None => !CATEGORY_DIRS.contains(&key),
            Some((dir, rest)) => CATEGORY_DIRS.contains(&dir) && !rest.contains('/'),
        };

        let mut entries: Vec<StagedEntry> = self
            .dirs
            .iter()
            .filter(|dir| is_listed(dir.key()))
            .map(|dir| StagedEntry {
                key: dir.key().clone(),
                is_dir: true,
                modified: Some(*dir.value()),
            })
            .collect();

        entries.extend(
            self.files
                .iter()
                .filter(|obj| is_listed(obj.key()))
                .map(|obj| StagedEntry {
                    key: obj.key().clone(),
                    is_dir: false,
                    modified: Some(obj.modified),
                }),
        );

        Ok(entries)
    }

    async fn health_check(&self) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncReadExt;

    async fn exercise_store(store: &dyn StagingStore) {
        store.put("templates/a_template.docx", b"tpl".to_vec()).await.unwrap();
        assert!(store.exists("templates/a_template.docx").await.unwrap());
        assert!(store.dir_exists("templates").await.unwrap());
        assert_eq!(store.get("templates/a_template.docx").await.unwrap(), b"tpl");

        store.create_dir("batch").await.unwrap();
        assert!(store.list_dir("batch").await.unwrap().is_empty());
        store.put("batch/b.docx", b"b".to_vec()).await.unwrap();
        store.put("batch/a.docx", b"a".to_vec()).await.unwrap();
        assert_eq!(store.list_dir("batch").await.unwrap(), vec!["a.docx", "b.docx"]);

        let (mut reader, len) = store.open_read("batch/a.docx").await.unwrap();
        let mut buf = Vec::new();
        reader.read_to_end(&mut buf).await.unwrap();
        assert_eq!(len, 1);
        assert_eq!(buf, b"a");

        let keys: Vec<String> = store
            .list_entries()
            .await
            .unwrap()
            .into_iter()
            .map(|e| e.key)
            .collect();
        assert!(keys.contains(&"templates/a_template.docx".to_string()));
        assert!(keys.contains(&"batch".to_string()));
        assert!(!keys.contains(&"templates".to_string()));
        assert!(!keys.contains(&"batch/a.docx".to_string()));

        assert!(store.remove_dir("batch").await.unwrap());
        assert!(!store.remove_dir("batch").await.unwrap());
        assert!(!store.exists("batch/a.docx").await.unwrap());

        assert!(store.delete("templates/a_template.docx").await.unwrap());
        assert!(!store.delete("templates/a_template.docx").await.unwrap());
        assert!(store.health_check().await);
    }

    #[tokio::test]
    async fn test_memory_store() {
        let store = MemoryStagingStore::new();
        exercise_store(&store).await;
        assert_eq!(store.object_count(), 0);
    }

    #[tokio::test]
    async fn test_local_store() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalStagingStore::new(dir.path());
        exercise_store(&store).await;
        assert!(dir.path().join("templates").is_dir());
    }

    #[tokio::test]
    async fn test_rejects_escaping_keys() {
        let store = MemoryStagingStore::new();
        assert!(store.put("../outside", vec![1]).await.is_err());
        assert!(store.get("/etc/passwd").await.is_err());

        let dir = tempfile::tempdir().unwrap();
        let local = LocalStagingStore::new(dir.path());
        assert!(local.put("data/../../escape", vec![1]).await.is_err());
        assert!(local.exists("").await.is_err());
    }
}
