//! Service errors

use fileable_core::Id;
use thiserror::Error;

use crate::storage::StorageError;
use crate::store::StoreError;

#[derive(Debug, Error)]
pub enum FileError {
    #[error("Unsupported media type: {0:?} is not one of jpg, jpeg, png")]
    UnsupportedMediaType(String),
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),
    #[error("Store error: {0}")]
    Store(#[from] StoreError),
    #[error("File not found: {0}")]
    NotFound(Id),
    #[error("Unknown disk: {0}")]
    UnknownDisk(String),
    #[error("Unknown owner type: {0}")]
    UnknownOwnerType(String),
    #[error("Image encoding failed: {0}")]
    Encode(String),
}

pub type FileResult<T> = Result<T, FileError>;
