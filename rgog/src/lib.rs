//! RGOG: a deterministic, seekable archive container for Galaxy v2 trees
//!
//! An RGOG archive packs a mirrored `v2/{meta,store}` CDN tree into one or
//! more binary parts with a metadata-first layout: every section a reader
//! needs to locate content precedes the content itself, so listing an
//! archive touches only the head of part 0. Packing is bit-deterministic:
//! the same input tree and part-size limit produce identical bytes on any
//! host.

pub mod error;
pub mod format;
pub mod languages;
pub mod reader;
pub mod writer;

pub use error::{Error, Result};
pub use format::{
    ChunkRecord, OsCode, ProductRecord, RgogHeader, BuildRecord, Section, DEFAULT_PART_SIZE,
    RGOG_MAGIC, RGOG_VERSION, TYPE_BASE, TYPE_PATCH,
};
pub use languages::LanguageSet;
pub use reader::{Archive, ArchiveStats, ExtractOptions, UnpackOptions, VerifyReport};
pub use writer::{pack, PackOptions, PackSummary};
