//! Copy-on-write tree traversal
//!
//! Read side of the tree: depth-first leaf collection for full
//! reassembly, O(1) aggregate reads off the root, and offset lookup for
//! random access. Traversal uses an explicit stack rather than
//! recursion; depth is bounded at log256 of the chunk count either way,
//! but a stack keeps the code independent of call-stack headroom.
//!
//! A hash that a stored tree references but the node store cannot
//! resolve is corruption, never "not found".

use crate::error::{Result, VaultError};
use crate::models::{ChunkRef, TreeChild};
use crate::storage::node_store::NodeStore;

#[derive(Debug, Clone)]
pub struct TreeTraverser {
    nodes: NodeStore,
}

impl TreeTraverser {
    pub fn new(nodes: NodeStore) -> Self {
        Self { nodes }
    }

    /// All chunk refs under `root_hash`, left to right.
    pub async fn chunk_refs(&self, root_hash: &str) -> Result<Vec<ChunkRef>> {
        let root = self.nodes.get_required(root_hash).await?;
        let mut refs = Vec::with_capacity(root.total_chunks as usize);

        // Depth-first, left-to-right: children are pushed reversed so
        // the leftmost pops first.
        let mut stack = vec![root];
        while let Some(node) = stack.pop() {
            if node.is_leaf() {
                for child in node.children {
                    match child {
                        TreeChild::Chunk(chunk_ref) => refs.push(chunk_ref),
                        TreeChild::Node(node_ref) => {
                            return Err(VaultError::CorruptNode {
                                hash: node_ref.hash,
                                reason: "node child inside a level-0 node".to_string(),
                            });
                        }
                    }
                }
                continue;
            }

            let mut subtrees = Vec::with_capacity(node.children.len());
            for child in node.children {
                match child {
                    TreeChild::Node(node_ref) => {
                        subtrees.push(self.nodes.get_required(&node_ref.hash).await?)
                    }
                    TreeChild::Chunk(chunk_ref) => {
                        return Err(VaultError::CorruptChunk {
                            hash: chunk_ref.hash,
                            reason: "chunk child inside an internal node".to_string(),
                        });
                    }
                }
            }
            while let Some(subtree) = subtrees.pop() {
                stack.push(subtree);
            }
        }

        Ok(refs)
    }

    /// Total content size under `root_hash`, read straight off the root
    /// aggregate, no traversal.
    pub async fn total_size(&self, root_hash: &str) -> Result<u64> {
        Ok(self.nodes.get_required(root_hash).await?.total_size)
    }

    /// Number of chunks under `root_hash`, O(1) like
    /// [`total_size`](Self::total_size).
    pub async fn chunk_count(&self, root_hash: &str) -> Result<u64> {
        Ok(self.nodes.get_required(root_hash).await?.total_chunks)
    }

    /// Locate the chunk covering `target_offset`, returning the chunk
    /// ref and the offset relative to the chunk's start. `None` when the
    /// offset is past the end of the content.
    ///
    /// Walks one root-to-leaf path using the per-child size intervals,
    /// so random-access reads never reassemble the file.
    pub async fn find_chunk_at_offset(
        &self,
        root_hash: &str,
        target_offset: u64,
    ) -> Result<Option<(ChunkRef, u64)>> {
        let mut node = self.nodes.get_required(root_hash).await?;
        if target_offset >= node.total_size {
            return Ok(None);
        }

        // Offset of `node`'s first byte within the file.
        let mut node_start = 0u64;
        loop {
            let mut running = node_start;
            let mut descend = None;

            for child in &node.children {
                let size = child.size();
                if target_offset < running + size {
                    match child {
                        TreeChild::Chunk(chunk_ref) => {
                            return Ok(Some((chunk_ref.clone(), target_offset - running)));
                        }
                        TreeChild::Node(node_ref) => {
                            descend = Some((node_ref.hash.clone(), running));
                        }
                    }
                    break;
                }
                running += size;
            }

            match descend {
                Some((hash, start)) => {
                    node = self.nodes.get_required(&hash).await?;
                    node_start = start;
                }
                // Aggregates promised the offset was in range; an
                // uncovered gap means the node lied.
                None => {
                    return Err(VaultError::CorruptNode {
                        hash: root_hash.to_string(),
                        reason: format!(
                            "offset {} not covered despite total_size {}",
                            target_offset, node.total_size
                        ),
                    });
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::tree_builder::{TreeBuilder, MAX_CHILDREN_PER_NODE};
    use crate::storage::Database;

    async fn setup() -> (TreeBuilder, TreeTraverser, NodeStore) {
        let db = Database::open_in_memory().await.unwrap();
        let nodes = NodeStore::new(db.pool().clone());
        (
            TreeBuilder::new(nodes.clone()),
            TreeTraverser::new(nodes.clone()),
            nodes,
        )
    }

    fn refs(n: usize) -> Vec<ChunkRef> {
        let mut offset = 0u64;
        (0..n)
            .map(|i| {
                let size = 50 + (i % 13) as u64;
                let r = ChunkRef {
                    hash: format!("{:064x}", i),
                    offset,
                    size,
                };
                offset += size;
                r
            })
            .collect()
    }

    #[tokio::test]
    async fn test_round_trip_single_leaf() {
        let (builder, traverser, _) = setup().await;
        let chunk_refs = refs(5);
        let root = builder.build_tree(&chunk_refs).await.unwrap();
        assert_eq!(traverser.chunk_refs(&root).await.unwrap(), chunk_refs);
    }

    #[tokio::test]
    async fn test_round_trip_multi_level() {
        let (builder, traverser, _) = setup().await;
        // 600 chunk refs make three leaves under one internal root
        let chunk_refs = refs(600);
        let root = builder.build_tree(&chunk_refs).await.unwrap();
        assert_eq!(traverser.chunk_refs(&root).await.unwrap(), chunk_refs);
    }

    #[tokio::test]
    async fn test_round_trip_empty() {
        let (builder, traverser, _) = setup().await;
        let root = builder.build_tree(&[]).await.unwrap();
        assert!(traverser.chunk_refs(&root).await.unwrap().is_empty());
        assert_eq!(traverser.total_size(&root).await.unwrap(), 0);
        assert_eq!(traverser.chunk_count(&root).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_aggregates_from_root() {
        let (builder, traverser, _) = setup().await;
        let chunk_refs = refs(MAX_CHILDREN_PER_NODE * 2);
        let total: u64 = chunk_refs.iter().map(|c| c.size).sum();
        let root = builder.build_tree(&chunk_refs).await.unwrap();

        assert_eq!(traverser.total_size(&root).await.unwrap(), total);
        assert_eq!(
            traverser.chunk_count(&root).await.unwrap(),
            chunk_refs.len() as u64
        );
    }

    #[tokio::test]
    async fn test_find_chunk_at_offset() {
        let (builder, traverser, _) = setup().await;
        let chunk_refs = refs(400);
        let root = builder.build_tree(&chunk_refs).await.unwrap();

        // first byte
        let (found, rel) = traverser
            .find_chunk_at_offset(&root, 0)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(found, chunk_refs[0]);
        assert_eq!(rel, 0);

        // inside an arbitrary later chunk
        let target = &chunk_refs[137];
        let probe = target.offset + target.size / 2;
        let (found, rel) = traverser
            .find_chunk_at_offset(&root, probe)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(&found, target);
        assert_eq!(rel, target.size / 2);

        // last byte
        let last = chunk_refs.last().unwrap();
        let probe = last.offset + last.size - 1;
        let (found, rel) = traverser
            .find_chunk_at_offset(&root, probe)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(&found, last);
        assert_eq!(rel, last.size - 1);
    }

    #[tokio::test]
    async fn test_find_chunk_past_end_is_none() {
        let (builder, traverser, _) = setup().await;
        let chunk_refs = refs(10);
        let total: u64 = chunk_refs.iter().map(|c| c.size).sum();
        let root = builder.build_tree(&chunk_refs).await.unwrap();

        assert!(traverser
            .find_chunk_at_offset(&root, total)
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_missing_root_is_corruption() {
        let (_, traverser, _) = setup().await;
        let err = traverser.chunk_refs(&"9".repeat(64)).await.unwrap_err();
        assert!(matches!(err, VaultError::NodeNotFound { .. }));
    }

    #[tokio::test]
    async fn test_missing_inner_node_is_corruption() {
        let (builder, traverser, nodes) = setup().await;
        let chunk_refs = refs(MAX_CHILDREN_PER_NODE + 1);
        let root = builder.build_tree(&chunk_refs).await.unwrap();

        // Remove one leaf row out from under the tree.
        let inner = nodes.get(&root).await.unwrap().unwrap();
        let TreeChild::Node(first) = &inner.children[0] else {
            panic!("expected node child");
        };
        sqlx::query("DELETE FROM file_nodes WHERE hash = ?")
            .bind(&first.hash)
            .execute(nodes.pool())
            .await
            .unwrap();

        let err = traverser.chunk_refs(&root).await.unwrap_err();
        assert!(matches!(err, VaultError::NodeNotFound { .. }));
    }
}
