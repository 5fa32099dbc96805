//! chunkvault: deduplicating, versioned file storage on SQLite.
//!
//! Content is split with an asymmetric-extremum content-defined chunker,
//! chunks are stored once under their SHA-256 hash with reference
//! counting, and each file version is an immutable content-addressed
//! tree of chunk references. Editing a file re-chunks it and shares
//! every unchanged chunk and subtree with the previous version.
//!
//! [`FileStorageService`] is the main entry point:
//!
//! ```no_run
//! use chunkvault::config::StorageConfig;
//! use chunkvault::models::UploadRequest;
//! use chunkvault::services::FileStorageService;
//! use chunkvault::storage::Database;
//!
//! # async fn demo() -> chunkvault::error::Result<()> {
//! let config = StorageConfig::default();
//! let db = Database::open(&config.database).await?;
//! let service = FileStorageService::new(db, config.chunker);
//!
//! let outcome = service
//!     .upload_file(UploadRequest {
//!         profile_id: "profile-1".into(),
//!         folder_id: None,
//!         name: "notes.txt".into(),
//!         data: b"hello".to_vec(),
//!         mime_type: Some("text/plain".into()),
//!         detected_type: None,
//!         type_mismatch: false,
//!         owner_id: "me".into(),
//!         existing_file_id: None,
//!     })
//!     .await?;
//!
//! let bytes = service.download_file(&outcome.file_id).await?;
//! assert_eq!(bytes.as_deref(), Some(b"hello".as_slice()));
//! # Ok(())
//! # }
//! ```

pub mod chunker;
pub mod config;
pub mod error;
pub mod models;
pub mod services;
pub mod storage;

pub use config::{ChunkerConfig, DatabaseConfig, StorageConfig};
pub use error::{Result, VaultError};
pub use services::{FileStorageService, GarbageCollector, GcReport};
pub use storage::{Database, IntegrityReport};
