//! Typed data model for GOG Galaxy builds, manifests and depots
//!
//! The Galaxy content system ships two incompatible manifest generations:
//! generation 1 describes a monolithic `main.bin` blob plus per-file
//! offsets, generation 2 describes files as ordered lists of
//! content-addressed zlib chunks. This crate parses both shapes into a
//! common model at the network boundary and keeps the raw JSON around for
//! archival fidelity.

pub mod chunk;
pub mod depot;
pub mod diff;
pub mod error;
pub mod item;
pub mod manifest;
pub mod patch;
pub mod path;

pub use chunk::Chunk;
pub use depot::Depot;
pub use diff::ManifestDiff;
pub use error::{Error, Result};
pub use item::{DepotItem, SfcRef, V1Blob, V1File, V2File, V2Sfc};
pub use manifest::{BuildInfo, Manifest, Platform};
pub use patch::{FilePatchDiff, Patch};
pub use path::{galaxy_path, is_zlib, md5_hex, range_header};
