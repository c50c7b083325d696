//! # Core Vault
//!
//! Content-addressed local file store.
//!
//! ## Components
//!
//! - **Models** (`models`): `FileRecord` and the `FileId` newtype
//! - **Repository** (`repository`): SQLite metadata persistence with
//!   soft-delete semantics and the live-hash uniqueness index
//! - **Store** (`store`): streaming uploads with hash-while-writing,
//!   dedup, replace-with-rollback, and consistent deletes
//! - **Database** (`db`): pooled SQLite with WAL and foreign keys

pub mod db;
pub mod error;
pub mod models;
pub mod pagination;
pub mod repository;
pub mod store;

pub use db::{create_pool, create_test_pool, DatabaseConfig};
pub use error::{Result, VaultError};
pub use models::{FileId, FileRecord, FormatCount, VaultStats};
pub use pagination::{Page, PageRequest};
pub use repository::{FileRepository, SqliteFileRepository};
pub use store::VaultStore;
