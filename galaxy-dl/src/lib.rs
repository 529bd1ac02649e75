//! Build resolution and parallel verified downloads
//!
//! Ties the CDN client to the manifest model: resolves builds across both
//! content-system generations (with direct-access paths for delisted
//! content), downloads depot items through a bounded worker pool with hash
//! verification and zlib decompression, and resolves xdelta3 patches
//! between build pairs.

pub mod cancel;
pub mod downloader;
pub mod error;
pub mod patches;
pub mod resolver;

pub use cancel::CancelToken;
pub use downloader::{Downloaded, DownloadOptions, Downloader, ProgressFn};
pub use error::{Error, Result};
pub use patches::get_patch;
pub use resolver::{BuildResolver, DirectSelector};
