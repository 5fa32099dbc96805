//! Orphaned chunk reclamation
//!
//! Chunks are never removed on the purge path itself; purge only drops
//! their ref count. This collector sweeps chunks whose count has reached
//! zero, in bounded batches so a large backlog cannot hold a write lock
//! for long.

use crate::error::Result;
use crate::storage::ChunkStore;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument};

const DEFAULT_BATCH_SIZE: i64 = 512;

/// Outcome of a collection run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GcReport {
    /// Chunk rows removed
    pub deleted_chunks: u64,
    /// Bytes of chunk payload reclaimed
    pub reclaimed_bytes: u64,
    /// Delete batches issued
    pub batches: u64,
}

#[derive(Debug, Clone)]
pub struct GarbageCollector {
    chunks: ChunkStore,
    batch_size: i64,
}

impl GarbageCollector {
    pub fn new(chunks: ChunkStore) -> Self {
        Self {
            chunks,
            batch_size: DEFAULT_BATCH_SIZE,
        }
    }

    pub fn with_batch_size(mut self, batch_size: i64) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    /// Delete every orphaned chunk, batch by batch, until none remain.
    ///
    /// Each batch is its own delete statement guarded by
    /// `ref_count <= 0`, so a chunk re-referenced by a concurrent upload
    /// between batches survives.
    #[instrument(skip(self))]
    pub async fn run(&self) -> Result<GcReport> {
        let mut report = GcReport::default();

        loop {
            let (deleted, bytes) = self.chunks.delete_orphaned(self.batch_size).await?;
            if deleted == 0 {
                break;
            }
            report.deleted_chunks += deleted;
            report.reclaimed_bytes += bytes;
            report.batches += 1;
            debug!(deleted, bytes, "Deleted orphaned chunk batch");
        }

        info!(
            deleted = report.deleted_chunks,
            reclaimed = report.reclaimed_bytes,
            batches = report.batches,
            "Garbage collection completed"
        );
        Ok(report)
    }

    /// Hashes that the next [`run`] would delete, without deleting them.
    ///
    /// [`run`]: GarbageCollector::run
    pub async fn find_orphaned(&self, limit: i64) -> Result<Vec<String>> {
        self.chunks.find_orphaned(limit).await
    }
}
