//! Content-addressed tree node store
//!
//! Nodes are keyed by the SHA-256 of their canonical JSON encoding and
//! written insert-if-absent: two files (or two versions of one file)
//! containing an identical sub-sequence of chunks produce the very same
//! node row; structural sharing falls out of content addressing.

use crate::error::{Result, VaultError};
use crate::models::TreeNode;
use sha2::{Digest, Sha256};
use sqlx::{Sqlite, SqlitePool, Transaction};
use tracing::debug;

#[derive(Debug, Clone)]
pub struct NodeStore {
    pool: SqlitePool,
}

impl NodeStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub(crate) fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Hash of a node: SHA-256 over its canonical encoding.
    pub fn hash_node(node: &TreeNode) -> Result<String> {
        let bytes = node.canonical_bytes()?;
        let mut hasher = Sha256::new();
        hasher.update(&bytes);
        Ok(format!("{:x}", hasher.finalize()))
    }

    /// Persist `node` (validating its invariants first) and return its
    /// hash. Storing an already-present node is a no-op.
    pub async fn put(&self, node: &TreeNode) -> Result<String> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| VaultError::database(format!("Failed to begin transaction: {}", e)))?;
        let hash = self.put_tx(&mut tx, node).await?;
        tx.commit()
            .await
            .map_err(|e| VaultError::database(format!("Failed to commit node: {}", e)))?;
        Ok(hash)
    }

    pub async fn put_tx(
        &self,
        tx: &mut Transaction<'_, Sqlite>,
        node: &TreeNode,
    ) -> Result<String> {
        node.validate()?;

        let bytes = node.canonical_bytes()?;
        let mut hasher = Sha256::new();
        hasher.update(&bytes);
        let hash = format!("{:x}", hasher.finalize());

        let encoded = String::from_utf8(bytes)
            .map_err(|e| VaultError::validation(format!("node encoding not UTF-8: {}", e)))?;

        sqlx::query(
            r#"
            INSERT OR IGNORE INTO file_nodes (hash, data, level, child_count, created_at)
            VALUES (?, ?, ?, ?, ?)
            "#,
        )
        .bind(&hash)
        .bind(&encoded)
        .bind(node.level as i64)
        .bind(node.children.len() as i64)
        .bind(chrono::Utc::now().timestamp())
        .execute(&mut **tx)
        .await
        .map_err(|e| VaultError::database(format!("Failed to insert node: {}", e)))?;

        debug!(hash = %hash, level = node.level, children = node.children.len(), "Stored tree node");
        Ok(hash)
    }

    /// Fetch and decode a node, `None` when the hash is unknown.
    ///
    /// A row that exists but fails to decode or violates the structural
    /// invariants is reported as corruption, not absence.
    pub async fn get(&self, hash: &str) -> Result<Option<TreeNode>> {
        let row: Option<(String,)> = sqlx::query_as("SELECT data FROM file_nodes WHERE hash = ?")
            .bind(hash)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| VaultError::database(format!("Failed to fetch node: {}", e)))?;

        let Some((encoded,)) = row else {
            return Ok(None);
        };

        let node: TreeNode =
            serde_json::from_str(&encoded).map_err(|e| VaultError::CorruptNode {
                hash: hash.to_string(),
                reason: format!("undecodable node data: {}", e),
            })?;

        node.validate().map_err(|e| VaultError::CorruptNode {
            hash: hash.to_string(),
            reason: e.to_string(),
        })?;

        Ok(Some(node))
    }

    /// Like [`get`](Self::get) but treats absence as corruption, for
    /// callers holding a hash that a valid tree promised exists.
    pub async fn get_required(&self, hash: &str) -> Result<TreeNode> {
        self.get(hash).await?.ok_or_else(|| VaultError::NodeNotFound {
            hash: hash.to_string(),
        })
    }

    pub async fn exists(&self, hash: &str) -> Result<bool> {
        let row: Option<(i64,)> = sqlx::query_as("SELECT 1 FROM file_nodes WHERE hash = ?")
            .bind(hash)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| VaultError::database(format!("Failed to check node: {}", e)))?;
        Ok(row.is_some())
    }
}
