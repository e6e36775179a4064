//! Error types for the runner.

use std::path::PathBuf;
use thiserror::Error;

/// Main error type for the runner.
#[derive(Debug, Error)]
pub enum RunnerError {
    /// The engine rejected an operation.
    #[error(transparent)]
    Bridge(#[from] clipsrules::BridgeError),

    /// A document or script could not be read.
    #[error("Failed to read {}: {source}", .path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A JSON runner document is malformed.
    #[error("Invalid runner document {}: {source}", .path.display())]
    Document {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    /// Output could not be encoded as JSON.
    #[error("JSON encoding failed: {0}")]
    Json(#[from] serde_json::Error),
}

/// Result type alias for runner operations.
pub type Result<T> = std::result::Result<T, RunnerError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_read_error_names_path() {
        let err = RunnerError::Read {
            path: PathBuf::from("rules.clp"),
            source: std::io::Error::new(std::io::ErrorKind::NotFound, "missing"),
        };
        assert_eq!(err.to_string(), "Failed to read rules.clp: missing");
    }

    #[test]
    fn test_bridge_error_is_transparent() {
        let err = RunnerError::from(clipsrules::BridgeError::ReservedSymbol("TRUE".into()));
        assert_eq!(
            err.to_string(),
            clipsrules::BridgeError::ReservedSymbol("TRUE".into()).to_string()
        );
    }
}
