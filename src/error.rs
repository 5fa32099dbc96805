use miette::Diagnostic;
use thiserror::Error;

/// Engine-wide error type.
///
/// Three failure classes are kept distinct on purpose:
/// - expected absences (`NotFound`): recoverable, callers usually map
///   these to an empty/`None` response;
/// - corruption (`MissingChunk`, `NodeNotFound`, `CorruptChunk`,
///   `CorruptNode`): a hash referenced by a valid tree or version could
///   not be resolved or failed verification; fatal and never folded into
///   "not found";
/// - validation (`Validation`): malformed parameters, rejected before
///   any write happens.
#[derive(Error, Debug, Diagnostic)]
pub enum VaultError {
    #[error("IO error: {0}")]
    #[diagnostic(code(vault::io_error))]
    Io(#[from] std::io::Error),

    #[error("Database error: {0}")]
    #[diagnostic(
        code(vault::database_error),
        help("Check database connection and schema integrity")
    )]
    Database(String),

    #[error("Validation error: {0}")]
    #[diagnostic(
        code(vault::validation_error),
        help("Check that your input meets the required format and constraints")
    )]
    Validation(String),

    #[error("Not found: {0}")]
    #[diagnostic(code(vault::not_found))]
    NotFound(String),

    #[error("Missing chunk: {hash} is referenced by a stored version but absent from the chunk store")]
    #[diagnostic(
        code(vault::missing_chunk),
        help("The chunk store is inconsistent; run an integrity verification")
    )]
    MissingChunk { hash: String },

    #[error("Missing tree node: {hash} is referenced but absent from the node store")]
    #[diagnostic(
        code(vault::node_not_found),
        help("The node store is inconsistent; run an integrity verification")
    )]
    NodeNotFound { hash: String },

    #[error("Corrupt chunk {hash}: {reason}")]
    #[diagnostic(code(vault::corrupt_chunk))]
    CorruptChunk { hash: String, reason: String },

    #[error("Corrupt tree node {hash}: {reason}")]
    #[diagnostic(code(vault::corrupt_node))]
    CorruptNode { hash: String, reason: String },

    #[error("Configuration error: {0}")]
    #[diagnostic(code(vault::config_error))]
    Config(String),
}

impl VaultError {
    pub fn database(message: impl Into<String>) -> Self {
        VaultError::Database(message.into())
    }

    pub fn validation(message: impl Into<String>) -> Self {
        VaultError::Validation(message.into())
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        VaultError::NotFound(message.into())
    }

    /// True for the corruption class of failures (unretryable).
    pub fn is_corruption(&self) -> bool {
        matches!(
            self,
            VaultError::MissingChunk { .. }
                | VaultError::NodeNotFound { .. }
                | VaultError::CorruptChunk { .. }
                | VaultError::CorruptNode { .. }
        )
    }
}

pub type Result<T> = std::result::Result<T, VaultError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_creation() {
        let error = VaultError::validation("bad chunk options");
        assert!(matches!(error, VaultError::Validation(_)));

        let error = VaultError::not_found("no such file");
        assert!(matches!(error, VaultError::NotFound(_)));
    }

    #[test]
    fn test_corruption_classification() {
        let missing = VaultError::MissingChunk {
            hash: "ab".repeat(32),
        };
        assert!(missing.is_corruption());

        let not_found = VaultError::not_found("file gone");
        assert!(!not_found.is_corruption());
    }

    #[test]
    fn test_io_error_conversion() {
        let io_error = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let vault_error: VaultError = io_error.into();
        assert!(matches!(vault_error, VaultError::Io(_)));
    }

    #[test]
    fn test_error_display() {
        let error = VaultError::MissingChunk {
            hash: "deadbeef".to_string(),
        };
        let display = format!("{}", error);
        assert!(display.contains("deadbeef"));
        assert!(display.contains("Missing chunk"));
    }
}
