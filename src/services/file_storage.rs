//! File storage orchestration
//!
//! Ties the chunker, chunk store, tree builder and file index together
//! into the upload/download surface. Upload persists everything in a
//! single transaction: chunk rows and ref counts, tree nodes, the
//! version row and the file's current-version pointer either all land
//! or none do.
//!
//! Version numbers are assigned under a per-file async mutex so two
//! concurrent uploads to the same file cannot race on
//! `max(version_number) + 1`.

use crate::chunker;
use crate::config::ChunkerConfig;
use crate::error::{Result, VaultError};
use crate::models::{
    ChunkRef, FileRecord, FileVersion, StorageStats, UploadOutcome, UploadRequest,
};
use crate::storage::{ChunkStore, Database, FileIndex, NodeStore, TreeBuilder, TreeTraverser};
use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, instrument};
use uuid::Uuid;

/// Orchestrates chunking, deduplicated persistence and retrieval.
#[derive(Clone)]
pub struct FileStorageService {
    db: Database,
    chunks: ChunkStore,
    builder: TreeBuilder,
    traverser: TreeTraverser,
    index: FileIndex,
    chunker_config: ChunkerConfig,
    /// Per-file upload locks; entries are created on demand and kept for
    /// the lifetime of the service.
    file_locks: Arc<DashMap<String, Arc<Mutex<()>>>>,
}

impl FileStorageService {
    pub fn new(db: Database, chunker_config: ChunkerConfig) -> Self {
        let pool = db.pool().clone();
        Self {
            chunks: ChunkStore::new(pool.clone()),
            builder: TreeBuilder::new(NodeStore::new(pool.clone())),
            traverser: TreeTraverser::new(NodeStore::new(pool.clone())),
            index: FileIndex::new(pool),
            db,
            chunker_config,
            file_locks: Arc::new(DashMap::new()),
        }
    }

    fn lock_for(&self, file_id: &str) -> Arc<Mutex<()>> {
        self.file_locks
            .entry(file_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Store file content as a new file or as a new version of an
    /// existing one.
    ///
    /// The write path: chunk the payload, probe which chunk hashes the
    /// store already holds, then in one transaction upsert chunk rows
    /// (bumping ref counts for duplicates), build and persist the tree,
    /// and append the version row.
    #[instrument(skip(self, request), fields(size = request.data.len()))]
    pub async fn upload_file(&self, request: UploadRequest) -> Result<UploadOutcome> {
        if request.name.trim().is_empty() {
            return Err(VaultError::validation("File name must not be empty"));
        }

        // Resolve the target file before any writes
        let existing = match &request.existing_file_id {
            Some(file_id) => match self.index.get_file(file_id).await? {
                Some(file) => Some(file),
                None => {
                    return Err(VaultError::not_found(format!(
                        "File not found: {}",
                        file_id
                    )))
                }
            },
            None => None,
        };

        let file_id = existing
            .as_ref()
            .map(|f| f.id.clone())
            .unwrap_or_else(|| Uuid::new_v4().to_string());

        let chunks = chunker::chunk(&request.data, &self.chunker_config)?;
        let checksum = ChunkStore::compute_hash(&request.data);

        // One existence probe for the whole payload, before the write tx
        let hashes: Vec<String> = chunks
            .iter()
            .map(|c| ChunkStore::compute_hash(&c.bytes))
            .collect();
        let known = self.chunks.exists_many(&hashes).await?;

        let lock = self.lock_for(&file_id);
        let _guard = lock.lock().await;

        let now = chrono::Utc::now().timestamp();
        let mut tx = self.db.begin().await?;

        let mut duplicated_bytes = 0u64;
        let mut new_bytes = 0u64;
        let mut refs = Vec::with_capacity(chunks.len());
        // Track hashes upserted within this payload: a chunk repeated in
        // the same file counts as a duplicate from the second copy on.
        let mut seen_in_payload = std::collections::HashSet::new();

        for (chunk, hash) in chunks.iter().zip(&hashes) {
            if known.contains(hash) || seen_in_payload.contains(hash) {
                duplicated_bytes += chunk.size;
            } else {
                new_bytes += chunk.size;
            }
            seen_in_payload.insert(hash.clone());

            self.chunks.put_tx(&mut tx, &chunk.bytes).await?;
            refs.push(ChunkRef {
                hash: hash.clone(),
                offset: chunk.offset,
                size: chunk.size,
            });
        }

        let root_hash = self.builder.build_tree_tx(&mut tx, &refs).await?;

        let version_number = if existing.is_some() {
            self.index.next_version_number_tx(&mut tx, &file_id).await?
        } else {
            1
        };

        let version = FileVersion {
            id: Uuid::new_v4().to_string(),
            file_id: file_id.clone(),
            version_number,
            root_hash: root_hash.clone(),
            size: request.data.len() as i64,
            chunk_count: refs.len() as i64,
            checksum: checksum.clone(),
            created_by: request.owner_id.clone(),
            created_at: now,
        };

        if existing.is_none() {
            let file = FileRecord {
                id: file_id.clone(),
                profile_id: request.profile_id.clone(),
                folder_id: request.folder_id.clone(),
                name: request.name.clone(),
                current_version_id: None,
                mime_type: request.mime_type.clone(),
                detected_type: request.detected_type.clone(),
                type_mismatch: request.type_mismatch,
                total_size: 0,
                owner_id: request.owner_id.clone(),
                created_at: now,
                updated_at: now,
                deleted_at: None,
            };
            self.index.create_file_tx(&mut tx, &file).await?;
        }

        self.index.insert_version_tx(&mut tx, &version).await?;
        self.index
            .set_current_version_tx(&mut tx, &file_id, &version.id, version.size, now)
            .await?;

        tx.commit()
            .await
            .map_err(|e| VaultError::database(format!("Failed to commit upload: {}", e)))?;

        info!(
            file_id = %file_id,
            version = version_number,
            root_hash = %root_hash,
            chunks = refs.len(),
            new_bytes,
            duplicated_bytes,
            "Uploaded file version"
        );

        Ok(UploadOutcome {
            file_id,
            version_id: version.id,
            version_number,
            root_hash,
            size: request.data.len() as u64,
            chunk_count: refs.len() as u64,
            checksum,
            duplicated_bytes,
            new_bytes,
        })
    }

    /// Reassemble a version's content. Returns `None` when the version
    /// does not exist or its owning file is soft-deleted; a resolvable
    /// version whose chunks are gone or resized is a corruption error,
    /// not absence.
    #[instrument(skip(self))]
    pub async fn download_version(&self, version_id: &str) -> Result<Option<Vec<u8>>> {
        let version = match self.index.get_version(version_id).await? {
            Some(v) => v,
            None => return Ok(None),
        };

        // Soft-deleted files hide their versions too.
        if self.index.get_file(&version.file_id).await?.is_none() {
            return Ok(None);
        }

        let refs = self.traverser.chunk_refs(&version.root_hash).await?;
        let mut buffer = vec![0u8; version.size as usize];

        for chunk_ref in &refs {
            let bytes = self
                .chunks
                .get(&chunk_ref.hash)
                .await?
                .ok_or_else(|| VaultError::MissingChunk {
                    hash: chunk_ref.hash.clone(),
                })?;
            if bytes.len() as u64 != chunk_ref.size {
                return Err(VaultError::CorruptChunk {
                    hash: chunk_ref.hash.clone(),
                    reason: format!(
                        "Size mismatch: stored {} bytes, reference says {}",
                        bytes.len(),
                        chunk_ref.size
                    ),
                });
            }
            let start = chunk_ref.offset as usize;
            let end = start
                .checked_add(bytes.len())
                .filter(|&end| end <= buffer.len())
                .ok_or_else(|| VaultError::CorruptChunk {
                    hash: chunk_ref.hash.clone(),
                    reason: format!(
                        "Range {}..{} exceeds version size {}",
                        start,
                        start as u128 + bytes.len() as u128,
                        buffer.len()
                    ),
                })?;
            buffer[start..end].copy_from_slice(&bytes);
        }

        debug!(version_id = %version.id, size = buffer.len(), "Reassembled version");
        Ok(Some(buffer))
    }

    /// Reassemble a file's current version. `None` when the file is
    /// absent, soft-deleted, or has no version yet.
    pub async fn download_file(&self, file_id: &str) -> Result<Option<Vec<u8>>> {
        let file = match self.index.get_file(file_id).await? {
            Some(f) => f,
            None => return Ok(None),
        };
        match file.current_version_id {
            Some(version_id) => self.download_version(&version_id).await,
            None => Ok(None),
        }
    }

    pub async fn get_file(&self, file_id: &str) -> Result<Option<FileRecord>> {
        self.index.get_file(file_id).await
    }

    pub async fn list_files(
        &self,
        profile_id: &str,
        folder_id: Option<&str>,
    ) -> Result<Vec<FileRecord>> {
        self.index.list_files(profile_id, folder_id).await
    }

    /// All versions of a file, newest first.
    pub async fn get_version_history(&self, file_id: &str) -> Result<Vec<FileVersion>> {
        self.index.version_history(file_id).await
    }

    pub async fn get_version(&self, version_id: &str) -> Result<Option<FileVersion>> {
        self.index.get_version(version_id).await
    }

    /// Soft delete: the file disappears from listings and reads, but its
    /// chunks keep their references until [`purge_file`] releases them.
    ///
    /// [`purge_file`]: FileStorageService::purge_file
    pub async fn delete_file(&self, file_id: &str) -> Result<bool> {
        let deleted = self
            .index
            .soft_delete(file_id, chrono::Utc::now().timestamp())
            .await?;
        if deleted {
            info!(file_id = %file_id, "Soft-deleted file");
        }
        Ok(deleted)
    }

    pub async fn rename_file(&self, file_id: &str, name: &str) -> Result<bool> {
        if name.trim().is_empty() {
            return Err(VaultError::validation("File name must not be empty"));
        }
        self.index
            .rename(file_id, name, chrono::Utc::now().timestamp())
            .await
    }

    pub async fn move_file(&self, file_id: &str, folder_id: Option<&str>) -> Result<bool> {
        self.index
            .move_file(file_id, folder_id, chrono::Utc::now().timestamp())
            .await
    }

    /// Release a file's chunk references and hard-delete its rows.
    ///
    /// Walks every version's tree, decrements each referenced chunk once
    /// per reference, and removes the version and file rows, all in one
    /// transaction. Chunks whose count reaches zero stay behind as
    /// orphans for the garbage collector. Works on soft-deleted files
    /// too; returns false when the file id is unknown.
    #[instrument(skip(self))]
    pub async fn purge_file(&self, file_id: &str) -> Result<bool> {
        let file = match self.index.get_file_any(file_id).await? {
            Some(f) => f,
            None => return Ok(false),
        };

        let lock = self.lock_for(&file.id);
        let _guard = lock.lock().await;

        let versions = self.index.version_history(&file.id).await?;

        // Resolve all trees before opening the write tx
        let mut all_refs = Vec::new();
        for version in &versions {
            all_refs.extend(self.traverser.chunk_refs(&version.root_hash).await?);
        }

        let mut tx = self.db.begin().await?;
        for chunk_ref in &all_refs {
            self.chunks.decrement_ref_tx(&mut tx, &chunk_ref.hash).await?;
        }
        self.index.delete_file_rows_tx(&mut tx, &file.id).await?;
        tx.commit()
            .await
            .map_err(|e| VaultError::database(format!("Failed to commit purge: {}", e)))?;

        self.file_locks.remove(&file.id);

        info!(
            file_id = %file.id,
            versions = versions.len(),
            released_refs = all_refs.len(),
            "Purged file"
        );
        Ok(true)
    }

    pub async fn get_storage_stats(&self) -> Result<StorageStats> {
        self.chunks.stats().await
    }
}
