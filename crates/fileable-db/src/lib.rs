//! # fileable-db
//!
//! PostgreSQL persistence for fileable.
//!
//! - Connection pool management
//! - `files` table migration
//! - `PgFileStore`, the `FileStore` implementation over that table
//!
//! ## Example
//!
//! ```ignore
//! use fileable_db::{Database, DatabaseConfig, PgFileStore};
//!
//! let db = Database::connect(&DatabaseConfig::from_env()).await?;
//! db.migrate().await?;
//!
//! let store = Arc::new(PgFileStore::new(db.pool().clone()));
//! let service = FileService::new(store, disks, config);
//! ```

pub mod files;
pub mod pool;

pub use files::{FileRow, PgFileStore};
pub use pool::{Database, DatabaseConfig};
