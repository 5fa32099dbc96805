//! Engine data model.
//!
//! Transient chunker output, persisted chunk/tree rows, and the
//! file/version metadata that ties them together.

pub mod chunk;
pub mod file;
pub mod tree;

pub use chunk::{Chunk, ChunkRef, StoredChunk};
pub use file::{FileRecord, FileVersion, StorageStats, UploadOutcome, UploadRequest};
pub use tree::{NodeRef, TreeChild, TreeNode};
