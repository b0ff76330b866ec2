//! File record and upload models

use bytes::Bytes;
use chrono::{DateTime, Utc};
use fileable_core::{Id, Identifiable, OwnerRef};
use serde::{Deserialize, Serialize};

use crate::naming::client_extension;

/// Extensions the image pipeline accepts (compared lowercase)
pub const IMAGE_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png"];

/// Whether an extension names an image the pipeline can decode
pub fn is_image_extension(extension: &str) -> bool {
    let extension = extension.to_ascii_lowercase();
    IMAGE_EXTENSIONS.contains(&extension.as_str())
}

/// A stored file attached to an owner
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileRecord {
    /// File ID
    pub id: Option<Id>,
    /// Owner type tag (e.g. "Post", "User")
    pub owner_type: String,
    /// Owner ID
    pub owner_id: Id,
    /// Name of the disk holding the blob
    pub disk: String,
    /// Type tag partitioning the owner's files (e.g. "attachment", "avatar")
    #[serde(rename = "type")]
    pub file_type: String,
    /// Path of the blob on its disk
    pub path: String,
    /// Sanitized, uniqued name derived from the client filename
    pub original_name: String,
    /// MIME type declared by the client
    pub mime_type: String,
    /// Extension declared by the client
    pub extension: String,
    /// Stored size in bytes
    pub size: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl FileRecord {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        owner: &OwnerRef,
        disk: impl Into<String>,
        file_type: impl Into<String>,
        path: impl Into<String>,
        original_name: impl Into<String>,
        mime_type: impl Into<String>,
        extension: impl Into<String>,
        size: i64,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: None,
            owner_type: owner.owner_type.clone(),
            owner_id: owner.owner_id,
            disk: disk.into(),
            file_type: file_type.into(),
            path: path.into(),
            original_name: original_name.into(),
            mime_type: mime_type.into(),
            extension: extension.into(),
            size,
            created_at: now,
            updated_at: now,
        }
    }

    /// Reference to the owning entity
    pub fn owner(&self) -> OwnerRef {
        OwnerRef::new(self.owner_type.clone(), self.owner_id)
    }

    /// Whether this record belongs to the given owner
    pub fn belongs_to(&self, owner: &OwnerRef) -> bool {
        self.owner_type == owner.owner_type && self.owner_id == owner.owner_id
    }

    /// Check if this is an image
    pub fn is_image(&self) -> bool {
        self.mime_type.starts_with("image/")
    }

    /// Human-readable file size
    pub fn human_size(&self) -> String {
        let size = self.size as f64;
        const UNITS: &[&str] = &["B", "KB", "MB", "GB", "TB"];

        if size <= 0.0 {
            return "0 B".to_string();
        }

        let base = 1024.0_f64;
        let i = (size.ln() / base.ln()).floor() as usize;
        let i = i.min(UNITS.len() - 1);

        let value = size / base.powi(i as i32);
        format!("{:.1} {}", value, UNITS[i])
    }
}

impl Identifiable for FileRecord {
    fn id(&self) -> Option<Id> {
        self.id
    }
}

/// A file received from a client.
///
/// Name and MIME type are whatever the client claimed; nothing here is
/// verified against the bytes.
#[derive(Debug, Clone)]
pub struct UploadedFile {
    /// Client filename, including extension
    pub original_name: String,
    /// Client-declared MIME type
    pub mime_type: String,
    pub data: Bytes,
}

impl UploadedFile {
    pub fn new(
        original_name: impl Into<String>,
        mime_type: impl Into<String>,
        data: impl Into<Bytes>,
    ) -> Self {
        Self {
            original_name: original_name.into(),
            mime_type: mime_type.into(),
            data: data.into(),
        }
    }

    /// Build an upload whose MIME type is guessed from the filename
    pub fn guess(original_name: impl Into<String>, data: impl Into<Bytes>) -> Self {
        let original_name = original_name.into();
        let mime_type = mime_guess::from_path(&original_name)
            .first_or_octet_stream()
            .to_string();
        Self::new(original_name, mime_type, data)
    }

    /// Read an upload from a local file
    pub async fn from_path(path: impl AsRef<std::path::Path>) -> std::io::Result<Self> {
        let path = path.as_ref();
        let data = tokio::fs::read(path).await?;
        let name = path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or_default()
            .to_string();
        Ok(Self::guess(name, data))
    }

    /// Extension of the client filename
    pub fn extension(&self) -> &str {
        client_extension(&self.original_name)
    }

    /// Upload size in bytes
    pub fn size(&self) -> u64 {
        self.data.len() as u64
    }

    /// Whether the extension is one the image pipeline accepts
    pub fn has_image_extension(&self) -> bool {
        is_image_extension(self.extension())
    }
}
