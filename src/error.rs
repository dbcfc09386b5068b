//! Error taxonomy shared by the engine and its transport.

use std::path::PathBuf;

/// Errors surfaced by session operations.
///
/// Every variant is reported synchronously to the caller; the engine does no
/// I/O of its own, so nothing here is retryable.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EngineError {
    /// Malformed upload or import document, empty asset list.
    #[error("invalid input: {0}")]
    InvalidInput(String),
    /// Unknown session id.
    #[error("not found: {0}")]
    NotFound(String),
    /// Operation not allowed in the current state, or a position that no
    /// longer resolves against the catalog.
    #[error("invalid state: {0}")]
    InvalidState(String),
    /// Internal invariant violated.
    #[error("corrupt state: {0}")]
    CorruptState(String),
}

impl EngineError {
    /// Short machine-readable name of the variant.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::InvalidInput(_) => "invalid_input",
            Self::NotFound(_) => "not_found",
            Self::InvalidState(_) => "invalid_state",
            Self::CorruptState(_) => "corrupt_state",
        }
    }
}

/// Errors from loading the decision-tree catalog.
#[derive(Debug, thiserror::Error)]
pub enum CatalogError {
    #[error("failed to read catalog {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse catalog: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("invalid catalog: {0}")]
    Invalid(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = EngineError::NotFound("session abc".into());
        assert_eq!(err.to_string(), "not found: session abc");
        assert_eq!(err.kind(), "not_found");
    }

    #[test]
    fn test_catalog_error_from_json() {
        let parse_err = serde_json::from_str::<serde_json::Value>("{").unwrap_err();
        let err: CatalogError = parse_err.into();
        assert!(err.to_string().starts_with("failed to parse catalog"));
    }
}
