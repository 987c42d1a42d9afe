//! Error types for fedsearch

use crate::search::SearchSource;
use thiserror::Error;

/// Result type alias using FedSearchError
pub type Result<T> = std::result::Result<T, FedSearchError>;

/// Error type alias for convenience
pub type Error = FedSearchError;

/// Main error type for fedsearch
#[derive(Debug, Error)]
pub enum FedSearchError {
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid search plan: {0}")]
    InvalidPlan(String),

    #[error("{backend} backend unavailable: {message}")]
    Backend {
        backend: SearchSource,
        message: String,
    },

    #[error("{backend} backend timed out after {elapsed_ms}ms")]
    Timeout {
        backend: SearchSource,
        elapsed_ms: u64,
    },

    #[error("Search cancelled")]
    Cancelled,

    #[error("Embedding error: {0}")]
    Embedding(String),

    #[error("{0}")]
    Other(#[from] anyhow::Error),
}

impl FedSearchError {
    /// Shorthand for a failed backend call
    pub fn backend(backend: SearchSource, message: impl Into<String>) -> Self {
        Self::Backend {
            backend,
            message: message.into(),
        }
    }

    /// Whether this error only removes one backend's contribution.
    ///
    /// Unavailable, timed out and cancelled backends are recorded on the
    /// response and the search carries on with whatever else answered.
    pub fn is_backend_failure(&self) -> bool {
        matches!(
            self,
            Self::Backend { .. } | Self::Timeout { .. } | Self::Cancelled | Self::Embedding(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backend_failure_classification() {
        assert!(FedSearchError::backend(SearchSource::Text, "db locked").is_backend_failure());
        assert!(FedSearchError::Timeout {
            backend: SearchSource::Vector,
            elapsed_ms: 100
        }
        .is_backend_failure());
        assert!(FedSearchError::Cancelled.is_backend_failure());
        assert!(!FedSearchError::InvalidPlan("no query".into()).is_backend_failure());
        assert!(!FedSearchError::Config("bad".into()).is_backend_failure());
    }

    #[test]
    fn test_error_display() {
        let err = FedSearchError::Timeout {
            backend: SearchSource::Provider,
            elapsed_ms: 2000,
        };
        assert_eq!(err.to_string(), "provider backend timed out after 2000ms");
    }
}
