//! Error types for linkswipe operations
//!
//! This module defines the error type shared by the cache, the remote data
//! accessors, the session store and local persistence.

use thiserror::Error;

/// Main error type for linkswipe operations
#[derive(Error, Debug)]
pub enum LinkSwipeError {
    /// Backend rejected or failed a row operation
    #[error("Backend error: {0}")]
    Backend(String),

    /// HTTP transport error (wrapper)
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Authentication error - invalid credentials or expired session
    #[error("Authentication error: {0}")]
    Authentication(String),

    /// An operation that needs a signed-in user was called without one
    #[error("No active session")]
    NoSession,

    /// A cache producer failed
    #[error("Fetch error: {0}")]
    Fetch(String),

    /// Serialization/Deserialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Local key-value storage error
    #[error("Storage error: {0}")]
    Storage(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// Caller supplied something unusable
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// A component was used without the context it depends on
    #[error("Missing context: {0}")]
    MissingContext(&'static str),

    /// Generic error with context
    #[error("Error: {0}")]
    Other(String),
}

/// Result type alias for linkswipe operations
pub type Result<T> = std::result::Result<T, LinkSwipeError>;

impl From<String> for LinkSwipeError {
    fn from(s: String) -> Self {
        LinkSwipeError::Other(s)
    }
}

impl From<&str> for LinkSwipeError {
    fn from(s: &str) -> Self {
        LinkSwipeError::Other(s.to_string())
    }
}

impl From<serde_json::Error> for LinkSwipeError {
    fn from(e: serde_json::Error) -> Self {
        LinkSwipeError::Serialization(e.to_string())
    }
}

impl From<std::io::Error> for LinkSwipeError {
    fn from(e: std::io::Error) -> Self {
        LinkSwipeError::Storage(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let error = LinkSwipeError::Backend("row rejected".to_string());
        assert_eq!(error.to_string(), "Backend error: row rejected");

        assert_eq!(LinkSwipeError::NoSession.to_string(), "No active session");

        let missing = LinkSwipeError::MissingContext("session provider");
        assert!(missing.to_string().contains("session provider"));
    }

    #[test]
    fn test_error_conversion() {
        let error: LinkSwipeError = "test error".into();
        assert!(matches!(error, LinkSwipeError::Other(_)));

        let error: LinkSwipeError = "test error".to_string().into();
        assert!(matches!(error, LinkSwipeError::Other(_)));

        let json_err = serde_json::from_str::<u32>("nope").unwrap_err();
        let error: LinkSwipeError = json_err.into();
        assert!(matches!(error, LinkSwipeError::Serialization(_)));
    }
}
