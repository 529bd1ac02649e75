//! Error types for resolution and downloading

use thiserror::Error;

/// Error types for download operations
#[derive(Error, Debug)]
pub enum Error {
    /// CDN or API request failed
    #[error(transparent)]
    Cdn(#[from] galaxy_cdn::Error),

    /// Manifest parsing failed
    #[error(transparent)]
    Manifest(#[from] galaxy_manifest::Error),

    /// Downloaded bytes did not match the expected hash after all retries
    #[error("hash mismatch for {resource}: expected {expected}, got {actual}")]
    HashMismatch {
        /// File or chunk being verified
        resource: String,
        /// Expected MD5
        expected: String,
        /// Actual MD5
        actual: String,
    },

    /// Body shorter or longer than the manifest declared
    #[error("size mismatch for {resource}: expected {expected} bytes, got {actual}")]
    SizeMismatch {
        /// Resource being downloaded
        resource: String,
        /// Expected size in bytes
        expected: u64,
        /// Actual size in bytes
        actual: u64,
    },

    /// Operation is not supported (unknown patch algorithm, …)
    #[error("unsupported: {what}")]
    Unsupported {
        /// What was not supported
        what: String,
    },

    /// An item could not be downloaded with the given options
    #[error("invalid item: {reason}")]
    InvalidItem {
        /// Why the item was rejected
        reason: String,
    },

    /// The cancellation token was tripped; partial files are preserved
    #[error("cancelled")]
    Cancelled,

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for download operations
pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Create a hash mismatch error
    pub fn hash_mismatch(
        resource: impl Into<String>,
        expected: impl Into<String>,
        actual: impl Into<String>,
    ) -> Self {
        Self::HashMismatch {
            resource: resource.into(),
            expected: expected.into(),
            actual: actual.into(),
        }
    }

    /// Create a size mismatch error
    pub fn size_mismatch(resource: impl Into<String>, expected: u64, actual: u64) -> Self {
        Self::SizeMismatch {
            resource: resource.into(),
            expected,
            actual,
        }
    }

    /// Create an unsupported error
    pub fn unsupported(what: impl Into<String>) -> Self {
        Self::Unsupported { what: what.into() }
    }

    /// Create an invalid item error
    pub fn invalid_item(reason: impl Into<String>) -> Self {
        Self::InvalidItem {
            reason: reason.into(),
        }
    }

    /// Whether the underlying cause is a permanent 404.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::Cdn(e) if e.is_not_found())
    }
}
