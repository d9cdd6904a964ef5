//! Error taxonomy for diff sessions.

use thiserror::Error;

/// Failures that end a diff session.
///
/// Stale or superseded responses are not represented here: they are a normal
/// outcome of the polling protocol and are discarded silently.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DiffError {
    /// The structure document cannot form a tree (duplicate identity,
    /// inconsistent node map). Retrying will not fix it.
    #[error("malformed structure: {0}")]
    MalformedStructure(String),

    /// Transport or backend failure on a structure or node-page request.
    #[error("request failed: {0}")]
    RequestFailed(String),

    /// Session configuration that the engine cannot run with.
    #[error("invalid config: {0}")]
    InvalidConfig(String),
}

impl DiffError {
    /// Whether `refresh` is worth trying after this error.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::RequestFailed(_))
    }
}

pub type Result<T> = std::result::Result<T, DiffError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_includes_detail() {
        let err = DiffError::RequestFailed("HTTP 500: job error".to_string());
        assert_eq!(err.to_string(), "request failed: HTTP 500: job error");
    }

    #[test]
    fn test_only_request_failures_are_retryable() {
        assert!(DiffError::RequestFailed("timeout".into()).is_retryable());
        assert!(!DiffError::MalformedStructure("dup".into()).is_retryable());
        assert!(!DiffError::InvalidConfig("page size".into()).is_retryable());
    }
}
