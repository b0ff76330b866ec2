//! Storage Disks
//!
//! Named storage backends addressed by path. A `Disks` registry hands out
//! the disk each file record names.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use fileable_core::{DiskConfig, DiskDriver, FileConfig};
use thiserror::Error;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio::sync::RwLock;
use tracing::{debug, instrument};

/// Storage errors
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("File not found: {0}")]
    NotFound(String),
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
    #[error("Invalid path: {0}")]
    InvalidPath(String),
    #[error("Storage backend error: {0}")]
    BackendError(String),
}

pub type StorageResult<T> = Result<T, StorageError>;

/// Metadata of a stored blob
#[derive(Debug, Clone)]
pub struct FileMetadata {
    /// Size in bytes
    pub size: u64,
    /// Content type guessed from the path
    pub content_type: String,
}

/// Disk trait - unified interface for storage backends
#[async_trait]
pub trait Disk: Send + Sync {
    /// Store data at a path, replacing anything already there
    async fn put(&self, path: &str, data: Bytes) -> StorageResult<FileMetadata>;

    /// Retrieve data at a path
    async fn get(&self, path: &str) -> StorageResult<Bytes>;

    /// Delete data at a path. Deleting a missing path is not an error.
    async fn delete(&self, path: &str) -> StorageResult<()>;

    /// Check if a path exists
    async fn exists(&self, path: &str) -> StorageResult<bool>;

    /// Size in bytes of the data at a path
    async fn size(&self, path: &str) -> StorageResult<u64>;

    /// Public URL of a path
    async fn url(&self, path: &str) -> StorageResult<String>;

    /// Disk name, as stored on file records
    fn name(&self) -> &str;
}

fn guess_content_type(path: &str) -> String {
    mime_guess::from_path(path)
        .first_or_octet_stream()
        .to_string()
}

/// Local filesystem disk
pub struct LocalDisk {
    name: String,
    /// Root directory for storage
    root: PathBuf,
    /// Base URL for generating URLs
    base_url: String,
}

impl LocalDisk {
    pub fn new(name: impl Into<String>, root: impl AsRef<Path>, base_url: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            root: root.as_ref().to_path_buf(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    /// Resolve a path to a full filesystem path
    fn resolve_path(&self, path: &str) -> StorageResult<PathBuf> {
        if path.is_empty()
            || path.split(['/', '\\']).any(|part| part == "..")
            || path.starts_with('/')
            || path.starts_with('\\')
        {
            return Err(StorageError::InvalidPath(path.to_string()));
        }

        Ok(self.root.join(path))
    }

    async fn ensure_parent(&self, path: &Path) -> StorageResult<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }
        Ok(())
    }

    fn not_found(path: &str, e: std::io::Error) -> StorageError {
        if e.kind() == std::io::ErrorKind::NotFound {
            StorageError::NotFound(path.to_string())
        } else {
            StorageError::IoError(e)
        }
    }
}

#[async_trait]
impl Disk for LocalDisk {
    #[instrument(skip(self, data), fields(disk = %self.name))]
    async fn put(&self, path: &str, data: Bytes) -> StorageResult<FileMetadata> {
        let full_path = self.resolve_path(path)?;
        self.ensure_parent(&full_path).await?;

        let mut file = fs::File::create(&full_path).await?;
        file.write_all(&data).await?;
        file.sync_all().await?;

        debug!(path = ?full_path, size = data.len(), "File stored");

        Ok(FileMetadata {
            size: data.len() as u64,
            content_type: guess_content_type(path),
        })
    }

    #[instrument(skip(self), fields(disk = %self.name))]
    async fn get(&self, path: &str) -> StorageResult<Bytes> {
        let full_path = self.resolve_path(path)?;
        let data = fs::read(&full_path)
            .await
            .map_err(|e| Self::not_found(path, e))?;
        Ok(Bytes::from(data))
    }

    #[instrument(skip(self), fields(disk = %self.name))]
    async fn delete(&self, path: &str) -> StorageResult<()> {
        let full_path = self.resolve_path(path)?;

        match fs::remove_file(&full_path).await {
            Ok(()) => {
                debug!(path = ?full_path, "File deleted");
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    async fn exists(&self, path: &str) -> StorageResult<bool> {
        let full_path = self.resolve_path(path)?;
        Ok(fs::try_exists(&full_path).await?)
    }

    async fn size(&self, path: &str) -> StorageResult<u64> {
        let full_path = self.resolve_path(path)?;
        let meta = fs::metadata(&full_path)
            .await
            .map_err(|e| Self::not_found(path, e))?;
        Ok(meta.len())
    }

    async fn url(&self, path: &str) -> StorageResult<String> {
        Ok(format!("{}/{}", self.base_url, path))
    }

    fn name(&self) -> &str {
        &self.name
    }
}

/// In-memory disk for testing
pub struct MemoryDisk {
    name: String,
    base_url: String,
    files: RwLock<HashMap<String, Bytes>>,
}

impl MemoryDisk {
    pub fn new(name: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            base_url: format!("/memory/{}", name),
            name,
            files: RwLock::new(HashMap::new()),
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    /// Number of blobs currently stored
    pub async fn len(&self) -> usize {
        self.files.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.files.read().await.is_empty()
    }
}

#[async_trait]
impl Disk for MemoryDisk {
    async fn put(&self, path: &str, data: Bytes) -> StorageResult<FileMetadata> {
        let metadata = FileMetadata {
            size: data.len() as u64,
            content_type: guess_content_type(path),
        };

        let mut files = self.files.write().await;
        files.insert(path.to_string(), data);

        Ok(metadata)
    }

    async fn get(&self, path: &str) -> StorageResult<Bytes> {
        let files = self.files.read().await;
        files
            .get(path)
            .cloned()
            .ok_or_else(|| StorageError::NotFound(path.to_string()))
    }

    async fn delete(&self, path: &str) -> StorageResult<()> {
        let mut files = self.files.write().await;
        files.remove(path);
        Ok(())
    }

    async fn exists(&self, path: &str) -> StorageResult<bool> {
        let files = self.files.read().await;
        Ok(files.contains_key(path))
    }

    async fn size(&self, path: &str) -> StorageResult<u64> {
        let files = self.files.read().await;
        files
            .get(path)
            .map(|data| data.len() as u64)
            .ok_or_else(|| StorageError::NotFound(path.to_string()))
    }

    async fn url(&self, path: &str) -> StorageResult<String> {
        Ok(format!("{}/{}", self.base_url, path))
    }

    fn name(&self) -> &str {
        &self.name
    }
}

/// Registry of named disks
#[derive(Clone, Default)]
pub struct Disks {
    disks: HashMap<String, Arc<dyn Disk>>,
}

impl Disks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build every disk a configuration defines
    pub fn from_config(config: &FileConfig) -> Self {
        config
            .disks
            .iter()
            .fold(Self::new(), |disks, disk| disks.with(Self::build(disk)))
    }

    fn build(config: &DiskConfig) -> Arc<dyn Disk> {
        match config.driver {
            DiskDriver::Local => Arc::new(LocalDisk::new(&config.name, &config.root, &config.url)),
            DiskDriver::Memory => {
                Arc::new(MemoryDisk::new(&config.name).with_base_url(&config.url))
            }
        }
    }

    /// Register a disk under its own name
    pub fn with(mut self, disk: Arc<dyn Disk>) -> Self {
        self.insert(disk);
        self
    }

    pub fn insert(&mut self, disk: Arc<dyn Disk>) {
        self.disks.insert(disk.name().to_string(), disk);
    }

    /// Look up a disk by name
    pub fn get(&self, name: &str) -> Option<Arc<dyn Disk>> {
        self.disks.get(name).cloned()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.disks.keys().map(String::as_str)
    }
}
