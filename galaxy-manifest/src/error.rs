//! Error types for manifest parsing

use thiserror::Error;

/// Error types for manifest and depot parsing
#[derive(Error, Debug)]
pub enum Error {
    /// JSON did not match the expected manifest schema
    #[error("invalid manifest: {reason}")]
    InvalidManifest {
        /// Why the manifest was rejected
        reason: String,
    },

    /// A hash field was not valid lowercase hex
    #[error("invalid hash: {hash}")]
    InvalidHash {
        /// The offending hash string
        hash: String,
    },

    /// Unknown platform string
    #[error("unknown platform: {platform}")]
    UnknownPlatform {
        /// The offending platform string
        platform: String,
    },

    /// JSON deserialization failed
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Result type for manifest operations
pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Create an invalid manifest error
    pub fn invalid_manifest(reason: impl Into<String>) -> Self {
        Self::InvalidManifest {
            reason: reason.into(),
        }
    }

    /// Create an invalid hash error
    pub fn invalid_hash(hash: impl Into<String>) -> Self {
        Self::InvalidHash { hash: hash.into() }
    }
}
