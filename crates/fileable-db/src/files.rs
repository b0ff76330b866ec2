//! Files repository
//!
//! `FileStore` backed by the PostgreSQL `files` table.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use fileable::{FileRecord, FileStore, StoreError, StoreResult};
use fileable_core::{Id, OwnerRef};
use sqlx::{FromRow, PgPool};
use tracing::instrument;

const COLUMNS: &str = "id, fileable_type, fileable_id, disk, type, path, original_name, \
                       mime_type, extension, size, created_at, updated_at";

/// File row from database
#[derive(Debug, Clone, FromRow)]
pub struct FileRow {
    pub id: i64,
    pub fileable_type: String,
    pub fileable_id: i64,
    pub disk: String,
    #[sqlx(rename = "type")]
    pub file_type: String,
    pub path: String,
    pub original_name: String,
    pub mime_type: String,
    pub extension: String,
    pub size: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<FileRow> for FileRecord {
    fn from(row: FileRow) -> Self {
        FileRecord {
            id: Some(row.id),
            owner_type: row.fileable_type,
            owner_id: row.fileable_id,
            disk: row.disk,
            file_type: row.file_type,
            path: row.path,
            original_name: row.original_name,
            mime_type: row.mime_type,
            extension: row.extension,
            size: row.size,
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}

fn backend(e: sqlx::Error) -> StoreError {
    StoreError::Backend(e.to_string())
}

/// PostgreSQL file store
#[derive(Clone)]
pub struct PgFileStore {
    pool: PgPool,
}

impl PgFileStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn fetch(&self, sql: &str, owner: &OwnerRef, file_type: Option<&str>) -> StoreResult<Vec<FileRecord>> {
        let mut query = sqlx::query_as::<_, FileRow>(sql)
            .bind(&owner.owner_type)
            .bind(owner.owner_id);
        if let Some(file_type) = file_type {
            query = query.bind(file_type);
        }

        let rows = query.fetch_all(&self.pool).await.map_err(backend)?;
        Ok(rows.into_iter().map(FileRecord::from).collect())
    }
}

#[async_trait]
impl FileStore for PgFileStore {
    #[instrument(skip(self, record), fields(path = %record.path))]
    async fn create(&self, record: &mut FileRecord) -> StoreResult<Id> {
        let row = sqlx::query_as::<_, FileRow>(&format!(
            r#"
            INSERT INTO files (fileable_type, fileable_id, disk, type, path, original_name,
                               mime_type, extension, size, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            RETURNING {}
            "#,
            COLUMNS
        ))
        .bind(&record.owner_type)
        .bind(record.owner_id)
        .bind(&record.disk)
        .bind(&record.file_type)
        .bind(&record.path)
        .bind(&record.original_name)
        .bind(&record.mime_type)
        .bind(&record.extension)
        .bind(record.size)
        .bind(record.created_at)
        .bind(record.updated_at)
        .fetch_one(&self.pool)
        .await
        .map_err(backend)?;

        let id = row.id;
        *record = row.into();
        Ok(id)
    }

    async fn get(&self, id: Id) -> StoreResult<Option<FileRecord>> {
        let row = sqlx::query_as::<_, FileRow>(&format!("SELECT {} FROM files WHERE id = $1", COLUMNS))
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(backend)?;

        Ok(row.map(FileRecord::from))
    }

    async fn for_owner(&self, owner: &OwnerRef) -> StoreResult<Vec<FileRecord>> {
        let sql = format!(
            "SELECT {} FROM files WHERE fileable_type = $1 AND fileable_id = $2 ORDER BY id",
            COLUMNS
        );
        self.fetch(&sql, owner, None).await
    }

    async fn for_owner_and_type(&self, owner: &OwnerRef, file_type: &str) -> StoreResult<Vec<FileRecord>> {
        let sql = format!(
            "SELECT {} FROM files \
             WHERE fileable_type = $1 AND fileable_id = $2 AND type = $3 ORDER BY id",
            COLUMNS
        );
        self.fetch(&sql, owner, Some(file_type)).await
    }

    async fn for_owner_type_and_ids(
        &self,
        owner: &OwnerRef,
        file_type: &str,
        ids: &[Id],
    ) -> StoreResult<Vec<FileRecord>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }

        let rows = sqlx::query_as::<_, FileRow>(&format!(
            "SELECT {} FROM files \
             WHERE fileable_type = $1 AND fileable_id = $2 AND type = $3 AND id = ANY($4) \
             ORDER BY id",
            COLUMNS
        ))
        .bind(&owner.owner_type)
        .bind(owner.owner_id)
        .bind(file_type)
        .bind(ids)
        .fetch_all(&self.pool)
        .await
        .map_err(backend)?;

        Ok(rows.into_iter().map(FileRecord::from).collect())
    }

    async fn ids_for_owner_and_type(&self, owner: &OwnerRef, file_type: &str) -> StoreResult<Vec<Id>> {
        sqlx::query_scalar::<_, i64>(
            "SELECT id FROM files WHERE fileable_type = $1 AND fileable_id = $2 AND type = $3 ORDER BY id",
        )
        .bind(&owner.owner_type)
        .bind(owner.owner_id)
        .bind(file_type)
        .fetch_all(&self.pool)
        .await
        .map_err(backend)
    }

    #[instrument(skip(self))]
    async fn delete(&self, id: Id) -> StoreResult<()> {
        let result = sqlx::query("DELETE FROM files WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(backend)?;

        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound(id));
        }
        Ok(())
    }
}
