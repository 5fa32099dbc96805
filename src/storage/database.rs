//! SQLite persistence backend
//!
//! Owns the connection pool and the schema of the four engine relations:
//!
//! - `chunks`        content-addressed chunk payloads with ref counts
//! - `file_nodes`    content-addressed tree nodes (canonical JSON)
//! - `files`         mutable file metadata (soft-deletable)
//! - `file_versions` immutable version rows
//!
//! There is no global handle: components receive a pool clone through
//! their constructors.

use crate::config::DatabaseConfig;
use crate::error::{Result, VaultError};
use sqlx::sqlite::SqlitePoolOptions;
use sqlx::SqlitePool;
use std::time::Duration;
use tracing::info;

/// Handle to the engine database.
#[derive(Debug, Clone)]
pub struct Database {
    pool: SqlitePool,
}

impl Database {
    /// Open (creating if necessary) the database at the configured path.
    pub async fn open(config: &DatabaseConfig) -> Result<Self> {
        let db_url = format!("sqlite://{}?mode=rwc", config.path.display());

        info!(path = %config.path.display(), "Opening engine database");

        let pool = SqlitePoolOptions::new()
            .min_connections(1)
            .max_connections(config.max_connections)
            .acquire_timeout(Duration::from_secs(config.acquire_timeout_secs))
            .connect(&db_url)
            .await
            .map_err(|e| VaultError::database(format!("Failed to connect to database: {}", e)))?;

        // WAL allows concurrent reads while a writer is active.
        sqlx::query("PRAGMA journal_mode = WAL")
            .execute(&pool)
            .await
            .map_err(|e| VaultError::database(format!("Failed to enable WAL mode: {}", e)))?;

        sqlx::query("PRAGMA synchronous = NORMAL")
            .execute(&pool)
            .await
            .map_err(|e| VaultError::database(format!("Failed to set synchronous mode: {}", e)))?;

        sqlx::query("PRAGMA foreign_keys = ON")
            .execute(&pool)
            .await
            .map_err(|e| VaultError::database(format!("Failed to enable foreign keys: {}", e)))?;

        Self::init_schema(&pool).await?;

        Ok(Self { pool })
    }

    /// In-memory database on a single connection, for tests and
    /// ephemeral use. A single connection is required because each
    /// `:memory:` connection would otherwise see its own database.
    pub async fn open_in_memory() -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .map_err(|e| {
                VaultError::database(format!("Failed to open in-memory database: {}", e))
            })?;

        sqlx::query("PRAGMA foreign_keys = ON")
            .execute(&pool)
            .await
            .map_err(|e| VaultError::database(format!("Failed to enable foreign keys: {}", e)))?;

        Self::init_schema(&pool).await?;

        Ok(Self { pool })
    }

    async fn init_schema(pool: &SqlitePool) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS chunks (
                hash TEXT PRIMARY KEY,
                data BLOB NOT NULL,
                size INTEGER NOT NULL,
                ref_count INTEGER NOT NULL DEFAULT 1,
                created_at INTEGER NOT NULL
            )
            "#,
        )
        .execute(pool)
        .await
        .map_err(|e| VaultError::database(format!("Failed to create chunks table: {}", e)))?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS file_nodes (
                hash TEXT PRIMARY KEY,
                data TEXT NOT NULL,
                level INTEGER NOT NULL,
                child_count INTEGER NOT NULL,
                created_at INTEGER NOT NULL
            )
            "#,
        )
        .execute(pool)
        .await
        .map_err(|e| VaultError::database(format!("Failed to create file_nodes table: {}", e)))?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS files (
                id TEXT PRIMARY KEY,
                profile_id TEXT NOT NULL,
                folder_id TEXT,
                name TEXT NOT NULL,
                current_version_id TEXT,
                mime_type TEXT,
                detected_type TEXT,
                type_mismatch INTEGER NOT NULL DEFAULT 0,
                total_size INTEGER NOT NULL DEFAULT 0,
                owner_id TEXT NOT NULL,
                created_at INTEGER NOT NULL,
                updated_at INTEGER NOT NULL,
                deleted_at INTEGER
            )
            "#,
        )
        .execute(pool)
        .await
        .map_err(|e| VaultError::database(format!("Failed to create files table: {}", e)))?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS file_versions (
                id TEXT PRIMARY KEY,
                file_id TEXT NOT NULL REFERENCES files(id),
                version_number INTEGER NOT NULL,
                root_hash TEXT NOT NULL,
                size INTEGER NOT NULL,
                chunk_count INTEGER NOT NULL,
                checksum TEXT NOT NULL,
                created_by TEXT NOT NULL,
                created_at INTEGER NOT NULL,
                UNIQUE (file_id, version_number)
            )
            "#,
        )
        .execute(pool)
        .await
        .map_err(|e| {
            VaultError::database(format!("Failed to create file_versions table: {}", e))
        })?;

        for statement in [
            "CREATE INDEX IF NOT EXISTS idx_files_profile ON files(profile_id)",
            "CREATE INDEX IF NOT EXISTS idx_files_folder ON files(folder_id)",
            "CREATE INDEX IF NOT EXISTS idx_versions_file ON file_versions(file_id)",
            "CREATE INDEX IF NOT EXISTS idx_chunks_ref_count ON chunks(ref_count)",
        ] {
            sqlx::query(statement)
                .execute(pool)
                .await
                .map_err(|e| VaultError::database(format!("Failed to create index: {}", e)))?;
        }

        info!("Database schema initialized");
        Ok(())
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Begin a transaction spanning the caller's writes. Dropping the
    /// transaction without committing rolls everything back.
    pub async fn begin(&self) -> Result<sqlx::Transaction<'_, sqlx::Sqlite>> {
        self.pool
            .begin()
            .await
            .map_err(|e| VaultError::database(format!("Failed to begin transaction: {}", e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_open_in_memory_creates_schema() {
        let db = Database::open_in_memory().await.unwrap();

        let tables: Vec<(String,)> = sqlx::query_as(
            "SELECT name FROM sqlite_master WHERE type = 'table' ORDER BY name",
        )
        .fetch_all(db.pool())
        .await
        .unwrap();

        let names: Vec<&str> = tables.iter().map(|t| t.0.as_str()).collect();
        for required in ["chunks", "file_nodes", "files", "file_versions"] {
            assert!(names.contains(&required), "missing table {}", required);
        }
    }

    #[tokio::test]
    async fn test_open_on_disk() {
        let dir = tempfile::tempdir().unwrap();
        let config = DatabaseConfig {
            path: dir.path().join("vault.db"),
            ..Default::default()
        };

        let db = Database::open(&config).await.unwrap();
        sqlx::query("SELECT COUNT(*) FROM chunks")
            .execute(db.pool())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_transaction_rolls_back_on_drop() {
        let db = Database::open_in_memory().await.unwrap();

        {
            let mut tx = db.begin().await.unwrap();
            sqlx::query("INSERT INTO chunks (hash, data, size, ref_count, created_at) VALUES ('h', x'00', 1, 1, 0)")
                .execute(&mut *tx)
                .await
                .unwrap();
            // dropped without commit
        }

        let count: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM chunks")
            .fetch_one(db.pool())
            .await
            .unwrap();
        assert_eq!(count.0, 0);
    }
}
