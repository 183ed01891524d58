//! Storage client - object storage holding uploads and columnar outputs

use async_trait::async_trait;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use tracing::debug;

use crate::error::{IngestError, Result};

/// Object storage as seen by the pipeline. Keys use `/` separators.
#[async_trait]
pub trait StorageClient: Send + Sync {
    /// Prepare the client. Callers guarantee this runs once.
    async fn init(&self) -> Result<()>;

    async fn object_exists(&self, path: &str) -> Result<bool>;

    /// Every key under `prefix`, sorted.
    async fn list_objects(&self, prefix: &str) -> Result<Vec<String>>;

    async fn signed_upload_url(&self, path: &str) -> Result<String>;

    async fn put_object(&self, path: &str, body: Vec<u8>) -> Result<()>;

    async fn get_object(&self, path: &str) -> Result<Vec<u8>>;

    /// Upload a local file under `path`.
    async fn upload_file(&self, path: &str, local: &Path) -> Result<()> {
        let body = tokio::fs::read(local).await?;
        self.put_object(path, body).await
    }

    async fn delete_object(&self, path: &str) -> Result<()>;
}

/// Key layout for one workspace/project.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StoragePaths {
    pub workspace_id: String,
    pub project_id: String,
}

impl StoragePaths {
    pub fn new(workspace_id: impl Into<String>, project_id: impl Into<String>) -> Self {
        Self {
            workspace_id: workspace_id.into(),
            project_id: project_id.into(),
        }
    }

    fn root(&self) -> String {
        format!("client/{}/{}", self.workspace_id, self.project_id)
    }

    /// Prefix of every key belonging to the project.
    pub fn project_root(&self) -> String {
        format!("{}/", self.root())
    }

    /// `client/<ws>/<proj>/input/`
    pub fn input_root(&self) -> String {
        format!("{}/input/", self.root())
    }

    pub fn input_prefix(&self, table_name: &str) -> String {
        format!("{}{}/", self.input_root(), table_name)
    }

    pub fn input_path(&self, table_name: &str, file_name: &str) -> String {
        format!("{}{}", self.input_prefix(table_name), file_name)
    }

    /// Derived artifact: `client/<ws>/<proj>/output/<hash>.<ext>`
    pub fn output_path(&self, hash: &str, ext: &str) -> String {
        format!("{}/output/{}.{}", self.root(), hash, ext)
    }

    /// Directory an external table points at.
    pub fn table_prefix(&self, table_name: &str) -> String {
        format!("{}/tables/{}/", self.root(), table_name)
    }

    pub fn table_object(&self, table_name: &str, parquet_file_name: &str) -> String {
        format!("{}{}", self.table_prefix(table_name), parquet_file_name)
    }

    /// Split an input key into `(table, file)`.
    pub fn parse_input_path<'a>(&self, key: &'a str) -> Option<(&'a str, &'a str)> {
        let root = self.input_root();
        let rest = key.strip_prefix(root.as_str())?;
        let (table, file) = rest.split_once('/')?;
        if table.is_empty() || file.is_empty() || file.contains('/') {
            return None;
        }
        Some((table, file))
    }
}

/// Filesystem-backed object store rooted at a directory.
pub struct LocalObjectStore {
    root: PathBuf,
}

impl LocalObjectStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn resolve(&self, key: &str) -> Result<PathBuf> {
        let key = key.trim_start_matches('/');
        if key.split('/').any(|part| part == "..") {
            return Err(IngestError::InvalidArgument(format!(
                "object key escapes the store: {}",
                key
            )));
        }
        Ok(self.root.join(key))
    }

    /// Keys of every file below `dir`.
    async fn walk(&self, dir: PathBuf) -> Result<Vec<String>> {
        let mut out = Vec::new();
        let is_dir = tokio::fs::metadata(&dir)
            .await
            .map(|m| m.is_dir())
            .unwrap_or(false);
        if !is_dir {
            return Ok(out);
        }
        let mut pending = vec![dir];
        while let Some(dir) = pending.pop() {
            let mut entries = tokio::fs::read_dir(&dir).await?;
            while let Some(entry) = entries.next_entry().await? {
                let path = entry.path();
                if entry.file_type().await?.is_dir() {
                    pending.push(path);
                } else if let Ok(rel) = path.strip_prefix(&self.root) {
                    let key = rel
                        .components()
                        .map(|c| c.as_os_str().to_string_lossy().into_owned())
                        .collect::<Vec<_>>()
                        .join("/");
                    out.push(key);
                }
            }
        }
        Ok(out)
    }
}

#[async_trait]
impl StorageClient for LocalObjectStore {
    async fn init(&self) -> Result<()> {
        tokio::fs::create_dir_all(&self.root).await?;
        debug!(root = %self.root.display(), "local object store ready");
        Ok(())
    }

    async fn object_exists(&self, path: &str) -> Result<bool> {
        let resolved = self.resolve(path)?;
        Ok(tokio::fs::metadata(&resolved)
            .await
            .map(|m| m.is_file())
            .unwrap_or(false))
    }

    async fn list_objects(&self, prefix: &str) -> Result<Vec<String>> {
        let prefix = prefix.trim_start_matches('/');
        // walk from the deepest directory the prefix names
        let dir_part = match prefix.rfind('/') {
            Some(idx) => &prefix[..idx],
            None => "",
        };
        let start = self.resolve(dir_part)?;
        let mut keys = self.walk(start).await?;
        keys.retain(|k| k.starts_with(prefix));
        keys.sort();
        Ok(keys)
    }

    async fn signed_upload_url(&self, path: &str) -> Result<String> {
        let resolved = self.resolve(path)?;
        Ok(format!("file://{}", resolved.display()))
    }

    async fn put_object(&self, path: &str, body: Vec<u8>) -> Result<()> {
        let resolved = self.resolve(path)?;
        if let Some(parent) = resolved.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&resolved, body).await?;
        Ok(())
    }

    async fn get_object(&self, path: &str) -> Result<Vec<u8>> {
        let resolved = self.resolve(path)?;
        tokio::fs::read(&resolved)
            .await
            .map_err(|e| IngestError::Storage(format!("cannot read {}: {}", path, e)))
    }

    async fn upload_file(&self, path: &str, local: &Path) -> Result<()> {
        let resolved = self.resolve(path)?;
        if let Some(parent) = resolved.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::copy(local, &resolved).await?;
        Ok(())
    }

    async fn delete_object(&self, path: &str) -> Result<()> {
        let resolved = self.resolve(path)?;
        match tokio::fs::remove_file(&resolved).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

/// Object store kept in memory. Counts `init` calls.
#[derive(Default)]
pub struct InMemoryObjectStore {
    objects: Mutex<BTreeMap<String, Vec<u8>>>,
    init_calls: AtomicUsize,
}

impl InMemoryObjectStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn init_calls(&self) -> usize {
        self.init_calls.load(Ordering::SeqCst)
    }

    fn objects(&self) -> std::sync::MutexGuard<'_, BTreeMap<String, Vec<u8>>> {
        self.objects.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn insert(&self, path: impl Into<String>, body: Vec<u8>) {
        self.objects().insert(path.into(), body);
    }

    pub fn get(&self, path: &str) -> Option<Vec<u8>> {
        self.objects().get(path).cloned()
    }
}

#[async_trait]
impl StorageClient for InMemoryObjectStore {
    async fn init(&self) -> Result<()> {
        self.init_calls.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn object_exists(&self, path: &str) -> Result<bool> {
        Ok(self.objects().contains_key(path))
    }

    async fn list_objects(&self, prefix: &str) -> Result<Vec<String>> {
        Ok(self
            .objects()
            .keys()
            .filter(|k| k.starts_with(prefix))
            .cloned()
            .collect())
    }

    async fn signed_upload_url(&self, path: &str) -> Result<String> {
        Ok(format!("memory://{}", path))
    }

    async fn put_object(&self, path: &str, body: Vec<u8>) -> Result<()> {
        self.insert(path, body);
        Ok(())
    }

    async fn get_object(&self, path: &str) -> Result<Vec<u8>> {
        self.get(path)
            .ok_or_else(|| IngestError::Storage(format!("no object at {}", path)))
    }

    async fn delete_object(&self, path: &str) -> Result<()> {
        self.objects().remove(path);
        Ok(())
    }
}
