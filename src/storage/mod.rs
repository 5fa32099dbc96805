//! Content-addressed persistence layer
//!
//! Everything below the service layer lives here: the SQLite pool and
//! schema, the ref-counted chunk store, the immutable tree node store,
//! tree construction and traversal, file/version metadata, and the
//! integrity sweep.
//!
//! ## Data layout
//!
//! ```text
//! vault.db
//! ├── chunks         # hash → bytes, ref-counted
//! ├── file_nodes     # hash → canonical tree node JSON, shared, never deleted
//! ├── files          # mutable file records, soft-deleted
//! └── file_versions  # immutable version rows, one tree root each
//! ```

pub mod chunk_store;
pub mod database;
pub mod file_index;
pub mod integrity;
pub mod node_store;
pub mod tree_builder;
pub mod tree_traverser;

pub use chunk_store::ChunkStore;
pub use database::Database;
pub use file_index::FileIndex;
pub use integrity::{verify_store, verify_version, IntegrityReport, VersionIssue};
pub use node_store::NodeStore;
pub use tree_builder::{TreeBuilder, MAX_CHILDREN_PER_NODE};
pub use tree_traverser::TreeTraverser;
