//! File record persistence
//!
//! The `FileStore` trait is the persistence seam; `MemoryFileStore` backs
//! tests and embedded use, `fileable-db` provides PostgreSQL.

use std::sync::atomic::{AtomicI64, Ordering};

use async_trait::async_trait;
use fileable_core::{Id, OwnerRef};
use thiserror::Error;
use tokio::sync::RwLock;

use crate::model::FileRecord;

/// Persistence errors
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("File record not found: {0}")]
    NotFound(Id),
    #[error("Store backend error: {0}")]
    Backend(String),
}

pub type StoreResult<T> = Result<T, StoreError>;

/// File record store trait
#[async_trait]
pub trait FileStore: Send + Sync {
    /// Persist a new record, assigning its ID
    async fn create(&self, record: &mut FileRecord) -> StoreResult<Id>;

    /// Get a record by ID
    async fn get(&self, id: Id) -> StoreResult<Option<FileRecord>>;

    /// Every record of an owner, oldest first
    async fn for_owner(&self, owner: &OwnerRef) -> StoreResult<Vec<FileRecord>>;

    /// Records of an owner with one type tag, oldest first
    async fn for_owner_and_type(
        &self,
        owner: &OwnerRef,
        file_type: &str,
    ) -> StoreResult<Vec<FileRecord>>;

    /// Records of an owner with one type tag whose IDs are in `ids`
    async fn for_owner_type_and_ids(
        &self,
        owner: &OwnerRef,
        file_type: &str,
        ids: &[Id],
    ) -> StoreResult<Vec<FileRecord>> {
        let records = self.for_owner_and_type(owner, file_type).await?;
        Ok(records
            .into_iter()
            .filter(|r| r.id.is_some_and(|id| ids.contains(&id)))
            .collect())
    }

    /// IDs of an owner's records with one type tag
    async fn ids_for_owner_and_type(
        &self,
        owner: &OwnerRef,
        file_type: &str,
    ) -> StoreResult<Vec<Id>> {
        let records = self.for_owner_and_type(owner, file_type).await?;
        Ok(records.into_iter().filter_map(|r| r.id).collect())
    }

    /// Delete a record
    async fn delete(&self, id: Id) -> StoreResult<()>;
}

/// In-memory file store
pub struct MemoryFileStore {
    records: RwLock<Vec<FileRecord>>,
    next_id: AtomicI64,
}

impl Default for MemoryFileStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryFileStore {
    pub fn new() -> Self {
        Self {
            records: RwLock::new(Vec::new()),
            next_id: AtomicI64::new(1),
        }
    }

    /// Total number of records across all owners
    pub async fn len(&self) -> usize {
        self.records.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.records.read().await.is_empty()
    }
}

#[async_trait]
impl FileStore for MemoryFileStore {
    async fn create(&self, record: &mut FileRecord) -> StoreResult<Id> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        record.id = Some(id);

        let mut records = self.records.write().await;
        records.push(record.clone());

        Ok(id)
    }

    async fn get(&self, id: Id) -> StoreResult<Option<FileRecord>> {
        let records = self.records.read().await;
        Ok(records.iter().find(|r| r.id == Some(id)).cloned())
    }

    async fn for_owner(&self, owner: &OwnerRef) -> StoreResult<Vec<FileRecord>> {
        let records = self.records.read().await;
        Ok(records
            .iter()
            .filter(|r| r.belongs_to(owner))
            .cloned()
            .collect())
    }

    async fn for_owner_and_type(
        &self,
        owner: &OwnerRef,
        file_type: &str,
    ) -> StoreResult<Vec<FileRecord>> {
        let records = self.records.read().await;
        Ok(records
            .iter()
            .filter(|r| r.belongs_to(owner) && r.file_type == file_type)
            .cloned()
            .collect())
    }

    async fn delete(&self, id: Id) -> StoreResult<()> {
        let mut records = self.records.write().await;
        let before = records.len();
        records.retain(|r| r.id != Some(id));
        if records.len() == before {
            return Err(StoreError::NotFound(id));
        }
        Ok(())
    }
}
