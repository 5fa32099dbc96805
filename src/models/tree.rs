//! Copy-on-write tree node types.
//!
//! Nodes are immutable and content-addressed: a node's identity is the
//! SHA-256 of its canonical JSON encoding. The encoding is canonical
//! because the field order is fixed by struct declaration order
//! (`level`, `children`, `totalSize`, `totalChunks`) and children are
//! serialized in their given order, never by any map ordering. Equal
//! sub-sequences of chunks therefore hash to equal nodes across files
//! and versions, which is what makes structural sharing work.

use crate::error::{Result, VaultError};
use crate::models::chunk::ChunkRef;
use serde::{Deserialize, Serialize};

/// Pointer to a persisted [`TreeNode`], carrying aggregate totals so
/// parents never need to re-traverse their subtrees.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeRef {
    pub hash: String,
    pub size: u64,
    pub chunk_count: u64,
}

/// A tree child: either a leaf chunk reference or a subtree reference.
///
/// Serialized with a `type` discriminator (`"chunk"` / `"node"`) so the
/// on-disk encoding is self-describing and stable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum TreeChild {
    #[serde(rename = "chunk")]
    Chunk(ChunkRef),
    #[serde(rename = "node")]
    Node(NodeRef),
}

impl TreeChild {
    pub fn size(&self) -> u64 {
        match self {
            TreeChild::Chunk(c) => c.size,
            TreeChild::Node(n) => n.size,
        }
    }

    pub fn chunk_count(&self) -> u64 {
        match self {
            TreeChild::Chunk(_) => 1,
            TreeChild::Node(n) => n.chunk_count,
        }
    }
}

/// An immutable, content-addressed tree node.
///
/// Level 0 nodes hold only [`ChunkRef`] children; nodes at level >= 1
/// hold only [`NodeRef`] children. Children are never mixed within one
/// node; traversal correctness depends on it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TreeNode {
    pub level: u32,
    pub children: Vec<TreeChild>,
    pub total_size: u64,
    pub total_chunks: u64,
}

impl TreeNode {
    /// Build a level-0 node from an ordered group of chunk refs.
    ///
    /// An empty group is valid: it is the canonical empty-file root.
    pub fn leaf(chunks: Vec<ChunkRef>) -> Self {
        let total_size = chunks.iter().map(|c| c.size).sum();
        let total_chunks = chunks.len() as u64;
        Self {
            level: 0,
            children: chunks.into_iter().map(TreeChild::Chunk).collect(),
            total_size,
            total_chunks,
        }
    }

    /// Build an internal node at `level >= 1` from an ordered group of
    /// child node refs.
    pub fn internal(level: u32, children: Vec<NodeRef>) -> Self {
        debug_assert!(level >= 1, "internal nodes live at level >= 1");
        let total_size = children.iter().map(|n| n.size).sum();
        let total_chunks = children.iter().map(|n| n.chunk_count).sum();
        Self {
            level,
            children: children.into_iter().map(TreeChild::Node).collect(),
            total_size,
            total_chunks,
        }
    }

    pub fn is_leaf(&self) -> bool {
        self.level == 0
    }

    /// Canonical byte encoding: the node's hash is SHA-256 of exactly
    /// these bytes.
    pub fn canonical_bytes(&self) -> Result<Vec<u8>> {
        serde_json::to_vec(self)
            .map_err(|e| VaultError::validation(format!("node serialization failed: {}", e)))
    }

    /// Check the structural invariants: homogeneous children matching
    /// the node's level, and aggregate totals equal to the child sums.
    pub fn validate(&self) -> Result<()> {
        for child in &self.children {
            match (self.level, child) {
                (0, TreeChild::Node(_)) => {
                    return Err(VaultError::validation(
                        "level-0 node must hold only chunk children",
                    ));
                }
                (l, TreeChild::Chunk(_)) if l >= 1 => {
                    return Err(VaultError::validation(
                        "internal node must hold only node children",
                    ));
                }
                _ => {}
            }
        }
        let size: u64 = self.children.iter().map(|c| c.size()).sum();
        if size != self.total_size {
            return Err(VaultError::validation(format!(
                "total_size {} does not match child sum {}",
                self.total_size, size
            )));
        }
        let chunks: u64 = self.children.iter().map(|c| c.chunk_count()).sum();
        if chunks != self.total_chunks {
            return Err(VaultError::validation(format!(
                "total_chunks {} does not match child sum {}",
                self.total_chunks, chunks
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chunk_ref(hash: &str, offset: u64, size: u64) -> ChunkRef {
        ChunkRef {
            hash: hash.to_string(),
            offset,
            size,
        }
    }

    #[test]
    fn test_leaf_aggregates() {
        let node = TreeNode::leaf(vec![chunk_ref("a", 0, 10), chunk_ref("b", 10, 20)]);
        assert_eq!(node.level, 0);
        assert_eq!(node.total_size, 30);
        assert_eq!(node.total_chunks, 2);
        node.validate().unwrap();
    }

    #[test]
    fn test_empty_leaf_is_valid() {
        let node = TreeNode::leaf(Vec::new());
        assert_eq!(node.total_size, 0);
        assert_eq!(node.total_chunks, 0);
        node.validate().unwrap();
    }

    #[test]
    fn test_internal_aggregates() {
        let node = TreeNode::internal(
            1,
            vec![
                NodeRef {
                    hash: "x".to_string(),
                    size: 100,
                    chunk_count: 3,
                },
                NodeRef {
                    hash: "y".to_string(),
                    size: 50,
                    chunk_count: 2,
                },
            ],
        );
        assert_eq!(node.total_size, 150);
        assert_eq!(node.total_chunks, 5);
        node.validate().unwrap();
    }

    #[test]
    fn test_validate_rejects_mixed_children() {
        let mut node = TreeNode::leaf(vec![chunk_ref("a", 0, 10)]);
        node.children.push(TreeChild::Node(NodeRef {
            hash: "n".to_string(),
            size: 0,
            chunk_count: 0,
        }));
        assert!(node.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_bad_totals() {
        let mut node = TreeNode::leaf(vec![chunk_ref("a", 0, 10)]);
        node.total_size = 99;
        assert!(node.validate().is_err());
    }

    #[test]
    fn test_canonical_encoding_field_order() {
        let node = TreeNode::leaf(vec![chunk_ref("ab", 0, 5)]);
        let encoded = String::from_utf8(node.canonical_bytes().unwrap()).unwrap();
        assert_eq!(
            encoded,
            r#"{"level":0,"children":[{"type":"chunk","hash":"ab","offset":0,"size":5}],"totalSize":5,"totalChunks":1}"#
        );
    }

    #[test]
    fn test_canonical_encoding_node_child() {
        let node = TreeNode::internal(
            1,
            vec![NodeRef {
                hash: "cd".to_string(),
                size: 7,
                chunk_count: 2,
            }],
        );
        let encoded = String::from_utf8(node.canonical_bytes().unwrap()).unwrap();
        assert_eq!(
            encoded,
            r#"{"level":1,"children":[{"type":"node","hash":"cd","size":7,"chunkCount":2}],"totalSize":7,"totalChunks":2}"#
        );
    }

    #[test]
    fn test_round_trip() {
        let node = TreeNode::leaf(vec![chunk_ref("ab", 0, 5), chunk_ref("cd", 5, 6)]);
        let bytes = node.canonical_bytes().unwrap();
        let decoded: TreeNode = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(decoded, node);
    }
}
