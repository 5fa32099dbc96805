//! File and version metadata index
//!
//! CRUD over the `files` and `file_versions` relations. Files are
//! soft-deleted: the normal read path filters on `deleted_at IS NULL`,
//! and only the purge path ever removes rows. Version rows are immutable
//! once written.

use crate::error::{Result, VaultError};
use crate::models::{FileRecord, FileVersion};
use sqlx::{Sqlite, SqlitePool, Transaction};
use tracing::debug;

type FileRow = (
    String,
    String,
    Option<String>,
    String,
    Option<String>,
    Option<String>,
    Option<String>,
    i64,
    i64,
    String,
    i64,
    i64,
    Option<i64>,
);

type VersionRow = (
    String,
    String,
    i64,
    String,
    i64,
    i64,
    String,
    String,
    i64,
);

const FILE_COLUMNS: &str = "id, profile_id, folder_id, name, current_version_id, mime_type, \
     detected_type, type_mismatch, total_size, owner_id, created_at, updated_at, deleted_at";

const VERSION_COLUMNS: &str = "id, file_id, version_number, root_hash, size, chunk_count, \
     checksum, created_by, created_at";

fn file_from_row(row: FileRow) -> FileRecord {
    let (
        id,
        profile_id,
        folder_id,
        name,
        current_version_id,
        mime_type,
        detected_type,
        type_mismatch,
        total_size,
        owner_id,
        created_at,
        updated_at,
        deleted_at,
    ) = row;
    FileRecord {
        id,
        profile_id,
        folder_id,
        name,
        current_version_id,
        mime_type,
        detected_type,
        type_mismatch: type_mismatch != 0,
        total_size,
        owner_id,
        created_at,
        updated_at,
        deleted_at,
    }
}

fn version_from_row(row: VersionRow) -> FileVersion {
    let (id, file_id, version_number, root_hash, size, chunk_count, checksum, created_by, created_at) =
        row;
    FileVersion {
        id,
        file_id,
        version_number,
        root_hash,
        size,
        chunk_count,
        checksum,
        created_by,
        created_at,
    }
}

#[derive(Debug, Clone)]
pub struct FileIndex {
    pool: SqlitePool,
}

impl FileIndex {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn create_file_tx(
        &self,
        tx: &mut Transaction<'_, Sqlite>,
        file: &FileRecord,
    ) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO files (
                id, profile_id, folder_id, name, current_version_id, mime_type,
                detected_type, type_mismatch, total_size, owner_id,
                created_at, updated_at, deleted_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&file.id)
        .bind(&file.profile_id)
        .bind(&file.folder_id)
        .bind(&file.name)
        .bind(&file.current_version_id)
        .bind(&file.mime_type)
        .bind(&file.detected_type)
        .bind(file.type_mismatch as i64)
        .bind(file.total_size)
        .bind(&file.owner_id)
        .bind(file.created_at)
        .bind(file.updated_at)
        .bind(file.deleted_at)
        .execute(&mut **tx)
        .await
        .map_err(|e| VaultError::database(format!("Failed to insert file: {}", e)))?;

        debug!(file_id = %file.id, name = %file.name, "Created file");
        Ok(())
    }

    /// Fetch a live (not soft-deleted) file.
    pub async fn get_file(&self, file_id: &str) -> Result<Option<FileRecord>> {
        let sql = format!(
            "SELECT {} FROM files WHERE id = ? AND deleted_at IS NULL",
            FILE_COLUMNS
        );
        let row: Option<FileRow> = sqlx::query_as(&sql)
            .bind(file_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| VaultError::database(format!("Failed to fetch file: {}", e)))?;
        Ok(row.map(file_from_row))
    }

    /// Fetch a file regardless of soft-delete state (purge path).
    pub async fn get_file_any(&self, file_id: &str) -> Result<Option<FileRecord>> {
        let sql = format!("SELECT {} FROM files WHERE id = ?", FILE_COLUMNS);
        let row: Option<FileRow> = sqlx::query_as(&sql)
            .bind(file_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| VaultError::database(format!("Failed to fetch file: {}", e)))?;
        Ok(row.map(file_from_row))
    }

    /// Live files of a profile, filtered by folder. `None` matches files
    /// at the folder root (`folder_id IS NULL`).
    pub async fn list_files(
        &self,
        profile_id: &str,
        folder_id: Option<&str>,
    ) -> Result<Vec<FileRecord>> {
        let rows: Vec<FileRow> = match folder_id {
            Some(folder) => {
                let sql = format!(
                    "SELECT {} FROM files \
                     WHERE profile_id = ? AND folder_id = ? AND deleted_at IS NULL \
                     ORDER BY name",
                    FILE_COLUMNS
                );
                sqlx::query_as(&sql)
                    .bind(profile_id)
                    .bind(folder)
                    .fetch_all(&self.pool)
                    .await
            }
            None => {
                let sql = format!(
                    "SELECT {} FROM files \
                     WHERE profile_id = ? AND folder_id IS NULL AND deleted_at IS NULL \
                     ORDER BY name",
                    FILE_COLUMNS
                );
                sqlx::query_as(&sql)
                    .bind(profile_id)
                    .fetch_all(&self.pool)
                    .await
            }
        }
        .map_err(|e| VaultError::database(format!("Failed to list files: {}", e)))?;

        Ok(rows.into_iter().map(file_from_row).collect())
    }

    /// Next version number for a file: `max(version_number) + 1`, or 1.
    ///
    /// Must run inside the upload transaction, with the per-file lock
    /// held, so two concurrent uploads cannot both read the same max.
    pub async fn next_version_number_tx(
        &self,
        tx: &mut Transaction<'_, Sqlite>,
        file_id: &str,
    ) -> Result<i64> {
        let (next,): (i64,) = sqlx::query_as(
            "SELECT COALESCE(MAX(version_number), 0) + 1 FROM file_versions WHERE file_id = ?",
        )
        .bind(file_id)
        .fetch_one(&mut **tx)
        .await
        .map_err(|e| VaultError::database(format!("Failed to compute version number: {}", e)))?;
        Ok(next)
    }

    pub async fn insert_version_tx(
        &self,
        tx: &mut Transaction<'_, Sqlite>,
        version: &FileVersion,
    ) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO file_versions (
                id, file_id, version_number, root_hash, size, chunk_count,
                checksum, created_by, created_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&version.id)
        .bind(&version.file_id)
        .bind(version.version_number)
        .bind(&version.root_hash)
        .bind(version.size)
        .bind(version.chunk_count)
        .bind(&version.checksum)
        .bind(&version.created_by)
        .bind(version.created_at)
        .execute(&mut **tx)
        .await
        .map_err(|e| VaultError::database(format!("Failed to insert version: {}", e)))?;

        debug!(
            version_id = %version.id,
            file_id = %version.file_id,
            number = version.version_number,
            "Inserted file version"
        );
        Ok(())
    }

    /// Point the file at its new current version and refresh its size.
    pub async fn set_current_version_tx(
        &self,
        tx: &mut Transaction<'_, Sqlite>,
        file_id: &str,
        version_id: &str,
        total_size: i64,
        updated_at: i64,
    ) -> Result<()> {
        sqlx::query(
            "UPDATE files SET current_version_id = ?, total_size = ?, updated_at = ? WHERE id = ?",
        )
        .bind(version_id)
        .bind(total_size)
        .bind(updated_at)
        .bind(file_id)
        .execute(&mut **tx)
        .await
        .map_err(|e| VaultError::database(format!("Failed to update current version: {}", e)))?;
        Ok(())
    }

    pub async fn get_version(&self, version_id: &str) -> Result<Option<FileVersion>> {
        let sql = format!(
            "SELECT {} FROM file_versions WHERE id = ?",
            VERSION_COLUMNS
        );
        let row: Option<VersionRow> = sqlx::query_as(&sql)
            .bind(version_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| VaultError::database(format!("Failed to fetch version: {}", e)))?;
        Ok(row.map(version_from_row))
    }

    /// All versions of a file, newest first.
    pub async fn version_history(&self, file_id: &str) -> Result<Vec<FileVersion>> {
        let sql = format!(
            "SELECT {} FROM file_versions WHERE file_id = ? ORDER BY version_number DESC",
            VERSION_COLUMNS
        );
        let rows: Vec<VersionRow> = sqlx::query_as(&sql)
            .bind(file_id)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| VaultError::database(format!("Failed to fetch version history: {}", e)))?;
        Ok(rows.into_iter().map(version_from_row).collect())
    }

    /// Soft delete. Returns false when the file is absent or already
    /// deleted.
    pub async fn soft_delete(&self, file_id: &str, deleted_at: i64) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE files SET deleted_at = ?, updated_at = ? \
             WHERE id = ? AND deleted_at IS NULL",
        )
        .bind(deleted_at)
        .bind(deleted_at)
        .bind(file_id)
        .execute(&self.pool)
        .await
        .map_err(|e| VaultError::database(format!("Failed to soft-delete file: {}", e)))?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn rename(&self, file_id: &str, name: &str, updated_at: i64) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE files SET name = ?, updated_at = ? WHERE id = ? AND deleted_at IS NULL",
        )
        .bind(name)
        .bind(updated_at)
        .bind(file_id)
        .execute(&self.pool)
        .await
        .map_err(|e| VaultError::database(format!("Failed to rename file: {}", e)))?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn move_file(
        &self,
        file_id: &str,
        folder_id: Option<&str>,
        updated_at: i64,
    ) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE files SET folder_id = ?, updated_at = ? WHERE id = ? AND deleted_at IS NULL",
        )
        .bind(folder_id)
        .bind(updated_at)
        .bind(file_id)
        .execute(&self.pool)
        .await
        .map_err(|e| VaultError::database(format!("Failed to move file: {}", e)))?;
        Ok(result.rows_affected() > 0)
    }

    /// Hard-delete a file's version rows and the file row itself (purge
    /// path; ref counts must already have been released by the caller in
    /// the same transaction).
    pub async fn delete_file_rows_tx(
        &self,
        tx: &mut Transaction<'_, Sqlite>,
        file_id: &str,
    ) -> Result<()> {
        sqlx::query("DELETE FROM file_versions WHERE file_id = ?")
            .bind(file_id)
            .execute(&mut **tx)
            .await
            .map_err(|e| VaultError::database(format!("Failed to delete versions: {}", e)))?;

        sqlx::query("DELETE FROM files WHERE id = ?")
            .bind(file_id)
            .execute(&mut **tx)
            .await
            .map_err(|e| VaultError::database(format!("Failed to delete file: {}", e)))?;
        Ok(())
    }

    /// Every version belonging to a live file, the set the integrity
    /// verifier walks.
    pub async fn all_live_versions(&self) -> Result<Vec<FileVersion>> {
        let rows: Vec<VersionRow> = sqlx::query_as(
            "SELECT v.id, v.file_id, v.version_number, v.root_hash, v.size, v.chunk_count, \
                    v.checksum, v.created_by, v.created_at \
             FROM file_versions v \
             JOIN files f ON f.id = v.file_id \
             WHERE f.deleted_at IS NULL \
             ORDER BY v.file_id, v.version_number",
        )
            .fetch_all(&self.pool)
            .await
            .map_err(|e| VaultError::database(format!("Failed to list versions: {}", e)))?;
        Ok(rows.into_iter().map(version_from_row).collect())
    }
}
