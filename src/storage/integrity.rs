//! Integrity verification for chunks and version trees
//!
//! Walks every live version, resolves its tree to chunk references, and
//! checks that:
//! - every referenced chunk exists and re-hashes to its stored hash
//! - chunk references tile the version's byte range without gaps
//! - the version's recorded size and chunk count match the tree
//! - the chunks in order re-hash to the version's whole-content checksum

use crate::error::{Result, VaultError};
use crate::models::FileVersion;
use crate::storage::{ChunkStore, FileIndex, TreeTraverser};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{debug, info, warn};

/// Report produced by a verification sweep.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IntegrityReport {
    /// Versions checked
    pub total_versions: usize,
    /// Versions that passed every check
    pub valid_versions: usize,
    /// Versions with problems
    pub invalid_versions: Vec<VersionIssue>,
    /// Chunk hashes referenced but absent from the store
    pub missing_chunks: Vec<String>,
    /// Chunk hashes whose bytes no longer match
    pub corrupted_chunks: Vec<String>,
    /// Non-fatal problems encountered during the sweep
    pub warnings: Vec<String>,
    /// When the sweep ran (epoch seconds)
    pub timestamp: i64,
}

/// One failing version and why.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VersionIssue {
    pub version_id: String,
    pub file_id: String,
    pub root_hash: String,
    pub reason: String,
}

impl IntegrityReport {
    pub fn new() -> Self {
        Self {
            total_versions: 0,
            valid_versions: 0,
            invalid_versions: Vec::new(),
            missing_chunks: Vec::new(),
            corrupted_chunks: Vec::new(),
            warnings: Vec::new(),
            timestamp: chrono::Utc::now().timestamp(),
        }
    }

    pub fn is_valid(&self) -> bool {
        self.invalid_versions.is_empty()
            && self.missing_chunks.is_empty()
            && self.corrupted_chunks.is_empty()
    }

    pub fn error_count(&self) -> usize {
        self.invalid_versions.len() + self.missing_chunks.len() + self.corrupted_chunks.len()
    }
}

impl Default for IntegrityReport {
    fn default() -> Self {
        Self::new()
    }
}

/// Verify a single version end to end.
///
/// Resolves the tree, re-hashes every referenced chunk, and checks the
/// reference layout against the recorded size. Issues found are appended
/// to `report`; returns `true` when the version is clean.
pub async fn verify_version(
    chunks: &ChunkStore,
    traverser: &TreeTraverser,
    version: &FileVersion,
    report: &mut IntegrityReport,
) -> Result<bool> {
    let refs = match traverser.chunk_refs(&version.root_hash).await {
        Ok(refs) => refs,
        Err(e) if e.is_corruption() || matches!(e, VaultError::NotFound(_)) => {
            report.invalid_versions.push(VersionIssue {
                version_id: version.id.clone(),
                file_id: version.file_id.clone(),
                root_hash: version.root_hash.clone(),
                reason: format!("Tree unresolvable: {}", e),
            });
            return Ok(false);
        }
        Err(e) => return Err(e),
    };

    let mut clean = true;

    if refs.len() as i64 != version.chunk_count {
        report.invalid_versions.push(VersionIssue {
            version_id: version.id.clone(),
            file_id: version.file_id.clone(),
            root_hash: version.root_hash.clone(),
            reason: format!(
                "Chunk count mismatch: tree has {}, version records {}",
                refs.len(),
                version.chunk_count
            ),
        });
        clean = false;
    }

    let mut expected_offset = 0u64;
    for chunk_ref in &refs {
        if chunk_ref.offset != expected_offset {
            report.invalid_versions.push(VersionIssue {
                version_id: version.id.clone(),
                file_id: version.file_id.clone(),
                root_hash: version.root_hash.clone(),
                reason: format!(
                    "Gap in chunk layout at offset {} (expected {})",
                    chunk_ref.offset, expected_offset
                ),
            });
            clean = false;
            break;
        }
        expected_offset += chunk_ref.size;
    }

    if clean && expected_offset as i64 != version.size {
        report.invalid_versions.push(VersionIssue {
            version_id: version.id.clone(),
            file_id: version.file_id.clone(),
            root_hash: version.root_hash.clone(),
            reason: format!(
                "Size mismatch: chunks cover {} bytes, version records {}",
                expected_offset, version.size
            ),
        });
        clean = false;
    }

    // Recompute the whole-content checksum while verifying each chunk;
    // only meaningful when every chunk resolved.
    let mut content_hasher = Sha256::new();
    let mut all_chunks_resolved = true;

    for chunk_ref in &refs {
        match chunks.get(&chunk_ref.hash).await? {
            None => {
                debug!(hash = %chunk_ref.hash, version_id = %version.id, "Referenced chunk missing");
                if !report.missing_chunks.contains(&chunk_ref.hash) {
                    report.missing_chunks.push(chunk_ref.hash.clone());
                }
                all_chunks_resolved = false;
                clean = false;
            }
            Some(bytes) => {
                let actual = ChunkStore::compute_hash(&bytes);
                if actual != chunk_ref.hash {
                    warn!(
                        hash = %chunk_ref.hash,
                        version_id = %version.id,
                        "Chunk bytes do not match hash"
                    );
                    if !report.corrupted_chunks.contains(&chunk_ref.hash) {
                        report.corrupted_chunks.push(chunk_ref.hash.clone());
                    }
                    clean = false;
                }
                content_hasher.update(&bytes);
            }
        }
    }

    if all_chunks_resolved {
        let content_checksum = format!("{:x}", content_hasher.finalize());
        if content_checksum != version.checksum {
            report.invalid_versions.push(VersionIssue {
                version_id: version.id.clone(),
                file_id: version.file_id.clone(),
                root_hash: version.root_hash.clone(),
                reason: format!(
                    "Checksum mismatch: content hashes to {}, version records {}",
                    content_checksum, version.checksum
                ),
            });
            clean = false;
        }
    }

    if !clean
        && !report
            .invalid_versions
            .iter()
            .any(|issue| issue.version_id == version.id)
    {
        report.invalid_versions.push(VersionIssue {
            version_id: version.id.clone(),
            file_id: version.file_id.clone(),
            root_hash: version.root_hash.clone(),
            reason: "Missing or corrupted chunks".to_string(),
        });
    }

    Ok(clean)
}

/// Verify every version of every live file.
pub async fn verify_store(
    chunks: &ChunkStore,
    traverser: &TreeTraverser,
    index: &FileIndex,
) -> Result<IntegrityReport> {
    info!("Starting storage integrity verification");

    let mut report = IntegrityReport::new();
    let versions = index.all_live_versions().await?;
    report.total_versions = versions.len();

    for version in &versions {
        match verify_version(chunks, traverser, version, &mut report).await {
            Ok(true) => report.valid_versions += 1,
            Ok(false) => {}
            Err(e) => {
                report
                    .warnings
                    .push(format!("Failed to verify version {}: {}", version.id, e));
            }
        }
    }

    info!(
        total = report.total_versions,
        valid = report.valid_versions,
        invalid = report.invalid_versions.len(),
        missing = report.missing_chunks.len(),
        corrupted = report.corrupted_chunks.len(),
        "Integrity verification completed"
    );

    Ok(report)
}
