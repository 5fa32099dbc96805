use serde::{Deserialize, Serialize};

/// A chunk produced by the chunker.
///
/// Transient value: only its content (and the hash derived from it) is
/// ever persisted. `offset` is relative to the start of the chunked
/// buffer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chunk {
    pub offset: u64,
    pub size: u64,
    pub bytes: Vec<u8>,
}

/// Byte-range pointer into a stored chunk, used as a tree leaf.
///
/// `offset` is absolute within the whole file, which lets a download
/// write each chunk straight into its slot of a pre-sized buffer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkRef {
    pub hash: String,
    pub offset: u64,
    pub size: u64,
}

/// Row view of a persisted chunk (payload fetched separately).
///
/// The payload is write-once; only `ref_count` ever mutates. A chunk is
/// eligible for garbage collection only when `ref_count <= 0`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredChunk {
    pub hash: String,
    pub size: i64,
    pub ref_count: i64,
    pub created_at: i64,
}
