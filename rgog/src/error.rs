//! Error types for archive operations

use thiserror::Error;

/// Error types for RGOG operations
#[derive(Error, Debug)]
pub enum Error {
    /// Archive structure is malformed (bad magic, sections out of bounds,
    /// declared sizes inconsistent)
    #[error("invalid archive: {reason}")]
    InvalidArchive {
        /// Why the archive was rejected
        reason: String,
    },

    /// Unknown format version or archive type
    #[error("unsupported archive: {what}")]
    Unsupported {
        /// What was not supported
        what: String,
    },

    /// A referenced part file is missing
    #[error("missing archive part {part}: {path}")]
    MissingPart {
        /// Part number
        part: u32,
        /// Expected path
        path: String,
    },

    /// Stored content failed checksum verification
    #[error("verification failed for {resource}: expected {expected}, got {actual}")]
    VerifyFailed {
        /// Object that failed
        resource: String,
        /// Expected MD5
        expected: String,
        /// Actual MD5
        actual: String,
    },

    /// Requested build is not in the archive
    #[error("build {build_id} not found in archive")]
    BuildNotFound {
        /// Requested build id
        build_id: u64,
    },

    /// Input tree is unusable for packing
    #[error("invalid input tree: {reason}")]
    InvalidInput {
        /// Why the tree was rejected
        reason: String,
    },

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON error while walking manifests
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Manifest parsing failed during reassembly
    #[error(transparent)]
    Manifest(#[from] galaxy_manifest::Error),
}

/// Result type for RGOG operations
pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Create an invalid archive error
    pub fn invalid_archive(reason: impl Into<String>) -> Self {
        Self::InvalidArchive {
            reason: reason.into(),
        }
    }

    /// Create an unsupported error
    pub fn unsupported(what: impl Into<String>) -> Self {
        Self::Unsupported { what: what.into() }
    }

    /// Create an invalid input error
    pub fn invalid_input(reason: impl Into<String>) -> Self {
        Self::InvalidInput {
            reason: reason.into(),
        }
    }

    /// Create a verification failure
    pub fn verify_failed(
        resource: impl Into<String>,
        expected: impl Into<String>,
        actual: impl Into<String>,
    ) -> Self {
        Self::VerifyFailed {
            resource: resource.into(),
            expected: expected.into(),
            actual: actual.into(),
        }
    }
}
