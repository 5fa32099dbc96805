use serde::{Deserialize, Serialize};

/// A stored file: mutable metadata pointing at an immutable version chain.
///
/// Soft-deletable: `deleted_at` is set instead of removing rows, and the
/// normal API treats a soft-deleted file as absent. `current_version_id`
/// always references the highest non-superseded version.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileRecord {
    pub id: String,
    pub profile_id: String,
    pub folder_id: Option<String>,
    pub name: String,
    pub current_version_id: Option<String>,
    pub mime_type: Option<String>,
    /// Externally computed file-type annotation; opaque to the engine.
    pub detected_type: Option<String>,
    pub type_mismatch: bool,
    pub total_size: i64,
    pub owner_id: String,
    pub created_at: i64,
    pub updated_at: i64,
    pub deleted_at: Option<i64>,
}

/// One immutable version of a file's content.
///
/// `root_hash` identifies the version's tree; `checksum` is the SHA-256
/// of the whole content, independent of chunk boundaries, for fast
/// equality checks without re-chunking.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileVersion {
    pub id: String,
    pub file_id: String,
    /// 1-based, monotonically increasing per file.
    pub version_number: i64,
    pub root_hash: String,
    pub size: i64,
    pub chunk_count: i64,
    pub checksum: String,
    pub created_by: String,
    pub created_at: i64,
}

/// Parameters of an upload.
#[derive(Debug, Clone)]
pub struct UploadRequest {
    pub profile_id: String,
    pub folder_id: Option<String>,
    pub name: String,
    pub data: Vec<u8>,
    pub mime_type: Option<String>,
    pub detected_type: Option<String>,
    pub type_mismatch: bool,
    pub owner_id: String,
    /// When set, the upload becomes the next version of this file
    /// instead of creating a new one.
    pub existing_file_id: Option<String>,
}

/// Result of a completed upload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadOutcome {
    pub file_id: String,
    pub version_id: String,
    pub version_number: i64,
    pub root_hash: String,
    pub size: u64,
    pub chunk_count: u64,
    pub checksum: String,
    /// Bytes whose chunks already existed in the store.
    pub duplicated_bytes: u64,
    /// Bytes that required new chunk rows.
    pub new_bytes: u64,
}

/// Aggregate chunk-store statistics.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StorageStats {
    pub total_chunks: i64,
    /// Sum of stored chunk sizes (each chunk counted once).
    pub unique_bytes: i64,
    /// Sum of `size * ref_count`, the logical bytes referenced.
    pub total_bytes: i64,
    /// `1 - unique_bytes / total_bytes`; 0.0 for an empty store.
    pub deduplication_ratio: f64,
}
