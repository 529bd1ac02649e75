//! Error types for content-system and CDN operations

use thiserror::Error;

/// Error types for CDN operations
#[derive(Error, Debug)]
pub enum Error {
    /// HTTP request failed
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// Resource does not exist on the CDN or API (HTTP 404)
    #[error("not found: {resource}")]
    NotFound {
        /// Resource that was requested
        resource: String,
    },

    /// Bearer token rejected and refresh failed
    #[error("authorization expired: {reason}")]
    AuthExpired {
        /// Why authorization could not be restored
        reason: String,
    },

    /// Transient failures exhausted the retry budget
    #[error("network failed for {resource} after {attempts} attempts")]
    NetworkFailed {
        /// Resource being requested
        resource: String,
        /// Attempts made before giving up
        attempts: u32,
    },

    /// Response body could not be decoded
    #[error("invalid response: {reason}")]
    InvalidResponse {
        /// Reason the response was rejected
        reason: String,
    },

    /// JSON deserialization failed
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// IO error (zlib inflation, body assembly)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for CDN operations
pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Create a not found error
    pub fn not_found(resource: impl Into<String>) -> Self {
        Self::NotFound {
            resource: resource.into(),
        }
    }

    /// Create an auth expired error
    pub fn auth_expired(reason: impl Into<String>) -> Self {
        Self::AuthExpired {
            reason: reason.into(),
        }
    }

    /// Create a network failed error
    pub fn network_failed(resource: impl Into<String>, attempts: u32) -> Self {
        Self::NetworkFailed {
            resource: resource.into(),
            attempts,
        }
    }

    /// Create an invalid response error
    pub fn invalid_response(reason: impl Into<String>) -> Self {
        Self::InvalidResponse {
            reason: reason.into(),
        }
    }

    /// Whether the error is a permanent 404.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}
