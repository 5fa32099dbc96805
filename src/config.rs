//! Engine configuration
//!
//! All tunables live in [`StorageConfig`], which can be built from a TOML
//! file or taken as [`Default`]. The chunking defaults are interop
//! constants: changing them changes chunk boundaries, which breaks
//! deduplication against existing stores.

use crate::error::{Result, VaultError};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Content-defined chunking parameters (AE algorithm).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ChunkerConfig {
    /// Minimum chunk size in bytes; no boundary is considered earlier.
    pub min_size: usize,
    /// Target (expected average) chunk size; only used to derive the window.
    pub target_size: usize,
    /// Hard upper bound; a chunk is force-cut at this size.
    pub max_size: usize,
}

impl Default for ChunkerConfig {
    fn default() -> Self {
        Self {
            min_size: 2048,
            target_size: 8192,
            max_size: 65536,
        }
    }
}

impl ChunkerConfig {
    /// Backward-window length: `max(48, floor(sqrt(target_size)))`.
    pub fn window_size(&self) -> usize {
        ((self.target_size as f64).sqrt().floor() as usize).max(48)
    }

    pub fn validate(&self) -> Result<()> {
        if self.min_size == 0 {
            return Err(VaultError::validation("min_size must be greater than zero"));
        }
        if self.min_size > self.target_size {
            return Err(VaultError::validation(format!(
                "min_size ({}) must not exceed target_size ({})",
                self.min_size, self.target_size
            )));
        }
        if self.target_size > self.max_size {
            return Err(VaultError::validation(format!(
                "target_size ({}) must not exceed max_size ({})",
                self.target_size, self.max_size
            )));
        }
        Ok(())
    }
}

/// SQLite connection settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// Path of the database file; created if absent.
    pub path: PathBuf,
    pub max_connections: u32,
    pub acquire_timeout_secs: u64,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("chunkvault.db"),
            max_connections: 10,
            acquire_timeout_secs: 30,
        }
    }
}

/// Top-level engine configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub database: DatabaseConfig,
    pub chunker: ChunkerConfig,
}

impl StorageConfig {
    /// Load configuration from a TOML file, falling back to defaults for
    /// any missing section or key.
    pub fn load(path: &Path) -> Result<Self> {
        let settings = config::Config::builder()
            .add_source(config::File::from(path))
            .build()
            .map_err(|e| VaultError::Config(format!("failed to read config: {}", e)))?;

        settings
            .try_deserialize()
            .map_err(|e| VaultError::Config(format!("failed to parse config: {}", e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_chunker_constants() {
        let config = ChunkerConfig::default();
        assert_eq!(config.min_size, 2048);
        assert_eq!(config.target_size, 8192);
        assert_eq!(config.max_size, 65536);
        // floor(sqrt(8192)) = 90
        assert_eq!(config.window_size(), 90);
    }

    #[test]
    fn test_window_size_floor() {
        let config = ChunkerConfig {
            min_size: 16,
            target_size: 64,
            max_size: 256,
        };
        // sqrt(64) = 8 < 48, so the floor applies
        assert_eq!(config.window_size(), 48);
    }

    #[rstest::rstest]
    #[case::inverted_min(8192, 2048, 65536)]
    #[case::inverted_max(2048, 65536, 8192)]
    #[case::zero_min(0, 8192, 65536)]
    fn test_validate_rejects_bad_bounds(
        #[case] min_size: usize,
        #[case] target_size: usize,
        #[case] max_size: usize,
    ) {
        let config = ChunkerConfig {
            min_size,
            target_size,
            max_size,
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_load_from_toml() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("vault.toml");
        std::fs::write(
            &path,
            "[chunker]\nmin_size = 1024\n\n[database]\nmax_connections = 4\n",
        )
        .unwrap();

        let config = StorageConfig::load(&path).unwrap();
        assert_eq!(config.chunker.min_size, 1024);
        // untouched keys keep their defaults
        assert_eq!(config.chunker.target_size, 8192);
        assert_eq!(config.database.max_connections, 4);
    }
}
