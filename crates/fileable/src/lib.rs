//! # fileable
//!
//! Polymorphic file attachments.
//!
//! ## Features
//!
//! - Any entity implementing `FileOwner` can have files, partitioned by type tag
//! - Set, attach, and sync operations over an owner's files
//! - Named storage disks (local filesystem, in-memory)
//! - Automatic downsizing of oversized JPEG and PNG uploads
//! - Resize, crop, and fit transforms for images
//!
//! ## Example
//!
//! ```rust,ignore
//! use fileable::{Disks, FileService, MemoryFileStore, UploadedFile};
//! use fileable_core::FileConfig;
//! use std::sync::Arc;
//!
//! let config = FileConfig::from_env()?;
//! let disks = Arc::new(Disks::from_config(&config));
//! let service = FileService::new(Arc::new(MemoryFileStore::new()), disks, config);
//!
//! // Replace the post's cover
//! let cover = service
//!     .set_single_file(&post, UploadedFile::guess("cover.jpg", data), "public", "cover")
//!     .await?;
//! ```

pub mod error;
pub mod model;
pub mod naming;
pub mod owner;
pub mod service;
pub mod storage;
pub mod store;
pub mod transform;

pub use error::{FileError, FileResult};
pub use model::{is_image_extension, FileRecord, UploadedFile, IMAGE_EXTENSIONS};
pub use naming::{slugify, storage_path, unique_original_name};
pub use owner::{OwnerRegistry, SharedOwner};
pub use service::FileService;
pub use storage::{
    Disk, Disks, FileMetadata, LocalDisk, MemoryDisk, StorageError, StorageResult,
};
pub use store::{FileStore, MemoryFileStore, StoreError, StoreResult};
pub use transform::{
    fit_geometry, FitGeometry, FitPosition, ImageTransform, ImageTransformBuilder, MakeMode,
};
