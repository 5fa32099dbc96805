//! Content-addressable chunk store
//!
//! Persists chunk payloads exactly once, keyed by the SHA-256 of their
//! bytes, with a reference count tracking how many file versions point
//! at each chunk. Reference counting is what makes deduplication safe to
//! garbage-collect.
//!
//! Concurrency contract:
//! - `put` is a single atomic upsert (`INSERT .. ON CONFLICT .. DO UPDATE
//!   SET ref_count = ref_count + 1`), never read-then-write, so
//!   concurrent uploads referencing the same content converge on a
//!   correct final count;
//! - orphan deletion re-checks `ref_count <= 0` inside the DELETE itself
//!   (compare-and-delete), never trusting an earlier scan.

use crate::error::{Result, VaultError};
use crate::models::{StorageStats, StoredChunk};
use sha2::{Digest, Sha256};
use sqlx::{Sqlite, SqlitePool, Transaction};
use std::collections::HashSet;
use tracing::{debug, info};

/// Keeps `IN (...)` lists well under SQLite's bind-variable limit.
const EXISTS_BATCH: usize = 500;

#[derive(Debug, Clone)]
pub struct ChunkStore {
    pool: SqlitePool,
}

impl ChunkStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// SHA-256 of `content`, as 64 lowercase hex characters.
    ///
    /// Pure and idempotent: the same content always produces the same
    /// hash, which is the whole basis of content addressing.
    pub fn compute_hash(content: &[u8]) -> String {
        let mut hasher = Sha256::new();
        hasher.update(content);
        format!("{:x}", hasher.finalize())
    }

    /// Store `bytes`, returning their hash.
    ///
    /// First store of a content creates the row with `ref_count = 1`;
    /// every subsequent `put` of the same content increments the count
    /// instead of writing the payload again.
    pub async fn put(&self, bytes: &[u8]) -> Result<String> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| VaultError::database(format!("Failed to begin transaction: {}", e)))?;
        let hash = self.put_tx(&mut tx, bytes).await?;
        tx.commit()
            .await
            .map_err(|e| VaultError::database(format!("Failed to commit put: {}", e)))?;
        Ok(hash)
    }

    /// Transactional form of [`put`](Self::put) for callers composing a
    /// larger atomic operation.
    pub async fn put_tx(
        &self,
        tx: &mut Transaction<'_, Sqlite>,
        bytes: &[u8],
    ) -> Result<String> {
        let hash = Self::compute_hash(bytes);

        sqlx::query(
            r#"
            INSERT INTO chunks (hash, data, size, ref_count, created_at)
            VALUES (?, ?, ?, 1, ?)
            ON CONFLICT (hash) DO UPDATE SET ref_count = ref_count + 1
            "#,
        )
        .bind(&hash)
        .bind(bytes)
        .bind(bytes.len() as i64)
        .bind(chrono::Utc::now().timestamp())
        .execute(&mut **tx)
        .await
        .map_err(|e| VaultError::database(format!("Failed to upsert chunk: {}", e)))?;

        debug!(hash = %hash, size = bytes.len(), "Stored chunk");
        Ok(hash)
    }

    /// Fetch a chunk's bytes, `None` when the hash is unknown.
    pub async fn get(&self, hash: &str) -> Result<Option<Vec<u8>>> {
        let row: Option<(Vec<u8>,)> = sqlx::query_as("SELECT data FROM chunks WHERE hash = ?")
            .bind(hash)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| VaultError::database(format!("Failed to fetch chunk: {}", e)))?;
        Ok(row.map(|r| r.0))
    }

    /// Row view (size, ref count) without the payload.
    pub async fn get_meta(&self, hash: &str) -> Result<Option<StoredChunk>> {
        let row: Option<(String, i64, i64, i64)> = sqlx::query_as(
            "SELECT hash, size, ref_count, created_at FROM chunks WHERE hash = ?",
        )
        .bind(hash)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| VaultError::database(format!("Failed to fetch chunk meta: {}", e)))?;

        Ok(row.map(|(hash, size, ref_count, created_at)| StoredChunk {
            hash,
            size,
            ref_count,
            created_at,
        }))
    }

    /// Batch existence check: the subset of `hashes` already present.
    ///
    /// Used once per upload to compute dedup statistics without a
    /// round-trip per chunk.
    pub async fn exists_many(&self, hashes: &[String]) -> Result<HashSet<String>> {
        let mut present = HashSet::new();

        for batch in hashes.chunks(EXISTS_BATCH) {
            let placeholders = vec!["?"; batch.len()].join(", ");
            let sql = format!("SELECT hash FROM chunks WHERE hash IN ({})", placeholders);

            let mut query = sqlx::query_as::<_, (String,)>(&sql);
            for hash in batch {
                query = query.bind(hash);
            }

            let rows = query
                .fetch_all(&self.pool)
                .await
                .map_err(|e| VaultError::database(format!("Failed to check chunks: {}", e)))?;
            present.extend(rows.into_iter().map(|r| r.0));
        }

        Ok(present)
    }

    pub async fn increment_ref(&self, hash: &str) -> Result<()> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| VaultError::database(format!("Failed to begin transaction: {}", e)))?;
        self.increment_ref_tx(&mut tx, hash).await?;
        tx.commit()
            .await
            .map_err(|e| VaultError::database(format!("Failed to commit increment: {}", e)))?;
        Ok(())
    }

    pub async fn increment_ref_tx(
        &self,
        tx: &mut Transaction<'_, Sqlite>,
        hash: &str,
    ) -> Result<()> {
        let result = sqlx::query("UPDATE chunks SET ref_count = ref_count + 1 WHERE hash = ?")
            .bind(hash)
            .execute(&mut **tx)
            .await
            .map_err(|e| VaultError::database(format!("Failed to increment ref: {}", e)))?;

        if result.rows_affected() == 0 {
            return Err(VaultError::MissingChunk {
                hash: hash.to_string(),
            });
        }
        Ok(())
    }

    pub async fn decrement_ref(&self, hash: &str) -> Result<()> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| VaultError::database(format!("Failed to begin transaction: {}", e)))?;
        self.decrement_ref_tx(&mut tx, hash).await?;
        tx.commit()
            .await
            .map_err(|e| VaultError::database(format!("Failed to commit decrement: {}", e)))?;
        Ok(())
    }

    pub async fn decrement_ref_tx(
        &self,
        tx: &mut Transaction<'_, Sqlite>,
        hash: &str,
    ) -> Result<()> {
        sqlx::query("UPDATE chunks SET ref_count = ref_count - 1 WHERE hash = ?")
            .bind(hash)
            .execute(&mut **tx)
            .await
            .map_err(|e| VaultError::database(format!("Failed to decrement ref: {}", e)))?;
        Ok(())
    }

    /// Aggregate dedup statistics over the whole store.
    pub async fn stats(&self) -> Result<StorageStats> {
        let (total_chunks, unique_bytes, total_bytes): (i64, i64, i64) = sqlx::query_as(
            r#"
            SELECT COUNT(*),
                   COALESCE(SUM(size), 0),
                   COALESCE(SUM(size * ref_count), 0)
            FROM chunks
            "#,
        )
        .fetch_one(&self.pool)
        .await
        .map_err(|e| VaultError::database(format!("Failed to compute stats: {}", e)))?;

        let deduplication_ratio = if total_bytes > 0 {
            1.0 - unique_bytes as f64 / total_bytes as f64
        } else {
            0.0
        };

        Ok(StorageStats {
            total_chunks,
            unique_bytes,
            total_bytes,
            deduplication_ratio,
        })
    }

    /// Hashes of chunks no version references anymore (`ref_count <= 0`).
    pub async fn find_orphaned(&self, limit: i64) -> Result<Vec<String>> {
        let rows: Vec<(String,)> =
            sqlx::query_as("SELECT hash FROM chunks WHERE ref_count <= 0 LIMIT ?")
                .bind(limit)
                .fetch_all(&self.pool)
                .await
                .map_err(|e| VaultError::database(format!("Failed to find orphans: {}", e)))?;
        Ok(rows.into_iter().map(|r| r.0).collect())
    }

    /// Delete up to `limit` orphaned chunks, returning `(count, bytes)`.
    ///
    /// The `ref_count <= 0` predicate in the DELETE itself is the
    /// compare-and-delete: a chunk re-referenced by a concurrent upload
    /// after the candidate subquery ran is left alone.
    pub async fn delete_orphaned(&self, limit: i64) -> Result<(u64, u64)> {
        let deleted: Vec<(String, i64)> = sqlx::query_as(
            r#"
            DELETE FROM chunks
            WHERE hash IN (SELECT hash FROM chunks WHERE ref_count <= 0 LIMIT ?)
              AND ref_count <= 0
            RETURNING hash, size
            "#,
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| VaultError::database(format!("Failed to delete orphans: {}", e)))?;

        let bytes: u64 = deleted.iter().map(|(_, size)| *size as u64).sum();
        if !deleted.is_empty() {
            info!(
                count = deleted.len(),
                bytes = bytes,
                "Deleted orphaned chunks"
            );
        }
        Ok((deleted.len() as u64, bytes))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::Database;

    async fn store() -> ChunkStore {
        let db = Database::open_in_memory().await.unwrap();
        ChunkStore::new(db.pool().clone())
    }

    #[test]
    fn test_compute_hash_known_value() {
        // SHA-256 of the empty string is a fixed constant.
        assert_eq!(
            ChunkStore::compute_hash(b""),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
        assert_eq!(ChunkStore::compute_hash(b"Hello").len(), 64);
    }

    #[tokio::test]
    async fn test_put_and_get_round_trip() {
        let store = store().await;
        let hash = store.put(b"chunk payload").await.unwrap();
        let bytes = store.get(&hash).await.unwrap().unwrap();
        assert_eq!(bytes, b"chunk payload");
    }

    #[tokio::test]
    async fn test_get_unknown_hash_is_none() {
        let store = store().await;
        let missing = store.get(&"0".repeat(64)).await.unwrap();
        assert!(missing.is_none());
    }

    #[tokio::test]
    async fn test_put_same_content_increments_ref() {
        let store = store().await;
        let hash1 = store.put(b"dup").await.unwrap();
        let hash2 = store.put(b"dup").await.unwrap();
        assert_eq!(hash1, hash2);

        let meta = store.get_meta(&hash1).await.unwrap().unwrap();
        assert_eq!(meta.ref_count, 2);
        assert_eq!(meta.size, 3);
    }

    #[tokio::test]
    async fn test_exists_many() {
        let store = store().await;
        let h1 = store.put(b"one").await.unwrap();
        let h2 = store.put(b"two").await.unwrap();
        let absent = "f".repeat(64);

        let present = store
            .exists_many(&[h1.clone(), h2.clone(), absent.clone()])
            .await
            .unwrap();
        assert!(present.contains(&h1));
        assert!(present.contains(&h2));
        assert!(!present.contains(&absent));

        let empty = store.exists_many(&[]).await.unwrap();
        assert!(empty.is_empty());
    }

    #[tokio::test]
    async fn test_increment_missing_chunk_is_corruption() {
        let store = store().await;
        let err = store.increment_ref(&"a".repeat(64)).await.unwrap_err();
        assert!(err.is_corruption());
    }

    #[tokio::test]
    async fn test_stats_and_dedup_ratio() {
        let store = store().await;
        store.put(b"aaaa").await.unwrap(); // 4 unique bytes
        store.put(b"aaaa").await.unwrap(); // ref 2
        store.put(b"bb").await.unwrap(); // 2 unique bytes

        let stats = store.stats().await.unwrap();
        assert_eq!(stats.total_chunks, 2);
        assert_eq!(stats.unique_bytes, 6);
        assert_eq!(stats.total_bytes, 10);
        let expected = 1.0 - 6.0 / 10.0;
        assert!((stats.deduplication_ratio - expected).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_stats_empty_store() {
        let store = store().await;
        let stats = store.stats().await.unwrap();
        assert_eq!(stats.total_chunks, 0);
        assert_eq!(stats.deduplication_ratio, 0.0);
    }

    #[tokio::test]
    async fn test_orphan_lifecycle() {
        let store = store().await;
        let hash = store.put(b"short lived").await.unwrap();

        assert!(store.find_orphaned(10).await.unwrap().is_empty());

        store.decrement_ref(&hash).await.unwrap();
        let orphans = store.find_orphaned(10).await.unwrap();
        assert_eq!(orphans, vec![hash.clone()]);

        let (count, bytes) = store.delete_orphaned(10).await.unwrap();
        assert_eq!(count, 1);
        assert_eq!(bytes, 11);
        assert!(store.get(&hash).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_delete_orphaned_skips_referenced() {
        let store = store().await;
        let live = store.put(b"still referenced").await.unwrap();
        let dead = store.put(b"orphan").await.unwrap();
        store.decrement_ref(&dead).await.unwrap();

        let (count, _) = store.delete_orphaned(10).await.unwrap();
        assert_eq!(count, 1);
        assert!(store.get(&live).await.unwrap().is_some());
        assert!(store.get(&dead).await.unwrap().is_none());
    }

    mod property_tests {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #![proptest_config(ProptestConfig::with_cases(100))]

            #[test]
            fn prop_hash_idempotent_and_hex(content in prop::collection::vec(any::<u8>(), 0..4096)) {
                let h1 = ChunkStore::compute_hash(&content);
                let h2 = ChunkStore::compute_hash(&content);
                prop_assert_eq!(&h1, &h2);
                prop_assert_eq!(h1.len(), 64);
                prop_assert!(h1.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
            }
        }
    }
}
