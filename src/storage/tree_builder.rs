//! Bottom-up copy-on-write tree construction
//!
//! Partitions an ordered chunk-ref sequence into nodes of at most
//! [`MAX_CHILDREN_PER_NODE`] children, level by level, until a single
//! root remains. The batching keeps tree height at
//! ceil(log256(chunk_count)), and because every node is content-addressed
//! an unchanged run of chunks produces the same nodes as the previous
//! version, so new versions only pay for the path that actually changed.

use crate::error::{Result, VaultError};
use crate::models::{ChunkRef, NodeRef, TreeNode};
use crate::storage::node_store::NodeStore;
use sqlx::{Sqlite, Transaction};
use tracing::debug;

pub const MAX_CHILDREN_PER_NODE: usize = 256;

#[derive(Debug, Clone)]
pub struct TreeBuilder {
    nodes: NodeStore,
}

impl TreeBuilder {
    pub fn new(nodes: NodeStore) -> Self {
        Self { nodes }
    }

    /// Build and persist the tree for `chunk_refs`, returning the root
    /// hash. An empty input produces the canonical empty-file root: a
    /// level-0 node with zero children.
    pub async fn build_tree(&self, chunk_refs: &[ChunkRef]) -> Result<String> {
        let mut tx = self
            .nodes
            .pool()
            .begin()
            .await
            .map_err(|e| VaultError::database(format!("Failed to begin transaction: {}", e)))?;
        let root = self.build_tree_tx(&mut tx, chunk_refs).await?;
        tx.commit()
            .await
            .map_err(|e| VaultError::database(format!("Failed to commit tree: {}", e)))?;
        Ok(root)
    }

    /// Transactional form of [`build_tree`](Self::build_tree); all node
    /// writes land in the caller's transaction.
    pub async fn build_tree_tx(
        &self,
        tx: &mut Transaction<'_, Sqlite>,
        chunk_refs: &[ChunkRef],
    ) -> Result<String> {
        if chunk_refs.is_empty() {
            let root = TreeNode::leaf(Vec::new());
            return self.nodes.put_tx(tx, &root).await;
        }

        // Level 0: group chunk refs into leaves.
        let mut refs = Vec::with_capacity(chunk_refs.len().div_ceil(MAX_CHILDREN_PER_NODE));
        for group in chunk_refs.chunks(MAX_CHILDREN_PER_NODE) {
            let node = TreeNode::leaf(group.to_vec());
            let node_ref = self.store_node(tx, node).await?;
            refs.push(node_ref);
        }

        // Level n+1: group node refs until one remains.
        let mut level = 1u32;
        while refs.len() > 1 {
            let mut next = Vec::with_capacity(refs.len().div_ceil(MAX_CHILDREN_PER_NODE));
            for group in refs.chunks(MAX_CHILDREN_PER_NODE) {
                let node = TreeNode::internal(level, group.to_vec());
                next.push(self.store_node(tx, node).await?);
            }
            refs = next;
            level += 1;
        }

        let root = refs.remove(0);
        debug!(
            root = %root.hash,
            chunks = root.chunk_count,
            size = root.size,
            height = level,
            "Built tree"
        );
        Ok(root.hash)
    }

    async fn store_node(
        &self,
        tx: &mut Transaction<'_, Sqlite>,
        node: TreeNode,
    ) -> Result<NodeRef> {
        let size = node.total_size;
        let chunk_count = node.total_chunks;
        let hash = self.nodes.put_tx(tx, &node).await?;
        Ok(NodeRef {
            hash,
            size,
            chunk_count,
        })
    }
}
