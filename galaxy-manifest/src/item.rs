//! Depot items: the files a downloader materialises
//!
//! `DepotItem` is a tagged variant over the four shapes a downloadable
//! object can take. V1 builds ship one monolithic blob plus per-file
//! extraction records; V2 builds ship chunked files, some of which live
//! inside a Small Files Container.

use serde::Deserialize;

use crate::chunk::{chunks_with_offsets, Chunk, ChunkJson};
use crate::error::{Error, Result};
use crate::path::normalize_path;

/// Path every Small Files Container is materialised under.
pub const SFC_PATH: &str = "galaxy_smallfilescontainer";

/// Reference into a Small Files Container.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct SfcRef {
    /// Byte offset of the member within the decompressed container
    #[serde(default)]
    pub offset: u64,
    /// Byte length of the member
    #[serde(default)]
    pub size: u64,
}

/// The monolithic `main.bin` of a generation 1 build.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct V1Blob {
    /// Product the blob belongs to
    pub product_id: String,
    /// Path of the blob relative to the secure-link root, typically
    /// `main.bin`
    pub blob_path: String,
    /// Size of the blob on disk
    pub total_size: u64,
    /// MD5 of the entire blob
    pub blob_md5: String,
}

/// A logical file extracted from a V1 blob via a byte range.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct V1File {
    /// Product the file belongs to
    pub product_id: String,
    /// Install-relative path
    pub path: String,
    /// Offset within `main.bin`
    pub offset: u64,
    /// Length within `main.bin`
    pub size: u64,
    /// MD5 of the extracted file
    pub md5: String,
    /// Path of the enclosing blob
    pub blob_path: String,
}

/// A chunked generation 2 file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct V2File {
    /// Product the file belongs to
    pub product_id: String,
    /// Install-relative path
    pub path: String,
    /// Ordered chunk list. For members of a Small Files Container these
    /// describe the extracted file and are advisory only; the chunks may or
    /// may not exist as CDN objects.
    pub chunks: Vec<Chunk>,
    /// MD5 of the assembled plaintext
    pub md5: Option<String>,
    /// SHA-256 of the assembled plaintext, when the manifest carries one
    pub sha256: Option<String>,
    /// Present when the file lives inside a Small Files Container
    pub sfc_ref: Option<SfcRef>,
    /// Manifest flags (`executable`, `hidden`, …)
    pub flags: Vec<String>,
    /// Sum of compressed chunk sizes
    pub total_size_compressed: u64,
    /// Sum of uncompressed chunk sizes
    pub total_size_uncompressed: u64,
    /// Whether the file comes from a dependency repository
    pub is_dependency: bool,
}

/// A Small Files Container: a downloadable chunked object whose inflated
/// body concatenates many small member files.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct V2Sfc {
    /// Product the container belongs to
    pub product_id: String,
    /// Real CDN-addressable chunks of the container
    pub chunks: Vec<Chunk>,
    /// MD5 of the inflated container
    pub md5: Option<String>,
    /// Sum of compressed chunk sizes
    pub total_size_compressed: u64,
    /// Sum of uncompressed chunk sizes
    pub total_size_uncompressed: u64,
    /// Whether the container comes from a dependency repository
    pub is_dependency: bool,
}

/// One file to materialise, tagged by download strategy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DepotItem {
    /// Generation 1 monolithic blob, fetched with HTTP ranges
    V1Blob(V1Blob),
    /// Single range extraction out of a V1 blob
    V1File(V1File),
    /// Ordinary chunked V2 file (or SFC member)
    V2File(V2File),
    /// Small Files Container
    V2Sfc(V2Sfc),
}

impl DepotItem {
    /// Install-relative path of the materialised file.
    pub fn path(&self) -> &str {
        match self {
            Self::V1Blob(b) => &b.blob_path,
            Self::V1File(f) => &f.path,
            Self::V2File(f) => &f.path,
            Self::V2Sfc(_) => SFC_PATH,
        }
    }

    /// MD5 of the materialised plaintext, when known.
    pub fn md5(&self) -> Option<&str> {
        match self {
            Self::V1Blob(b) => Some(&b.blob_md5),
            Self::V1File(f) => Some(&f.md5),
            Self::V2File(f) => f.md5.as_deref(),
            Self::V2Sfc(s) => s.md5.as_deref(),
        }
    }

    /// Uncompressed size of the materialised file.
    pub fn total_size_uncompressed(&self) -> u64 {
        match self {
            Self::V1Blob(b) => b.total_size,
            Self::V1File(f) => f.size,
            Self::V2File(f) => f.total_size_uncompressed,
            Self::V2Sfc(s) => s.total_size_uncompressed,
        }
    }

    /// Product id the item belongs to.
    pub fn product_id(&self) -> &str {
        match self {
            Self::V1Blob(b) => &b.product_id,
            Self::V1File(f) => &f.product_id,
            Self::V2File(f) => &f.product_id,
            Self::V2Sfc(s) => &s.product_id,
        }
    }

    /// Chunks of the item, empty for V1 shapes.
    pub fn chunks(&self) -> &[Chunk] {
        match self {
            Self::V2File(f) => &f.chunks,
            Self::V2Sfc(s) => &s.chunks,
            _ => &[],
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DepotManifestJson {
    depot: DepotBodyJson,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DepotBodyJson {
    #[serde(default)]
    items: Vec<ItemJson>,
    small_files_container: Option<SfcJson>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ItemJson {
    #[serde(rename = "type", default)]
    kind: String,
    #[serde(default)]
    path: String,
    #[serde(default)]
    chunks: Vec<ChunkJson>,
    sfc_ref: Option<SfcRef>,
    md5: Option<String>,
    sha256: Option<String>,
    #[serde(default)]
    flags: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct SfcJson {
    #[serde(default)]
    chunks: Vec<ChunkJson>,
    md5: Option<String>,
}

/// Parse a generation 2 depot manifest into its item list.
///
/// When the depot carries a Small Files Container, one [`DepotItem::V2Sfc`]
/// is prepended so downloaders fetch the container before its members.
pub fn parse_depot_items(
    manifest_json: &serde_json::Value,
    product_id: &str,
    is_dependency: bool,
) -> Result<Vec<DepotItem>> {
    let parsed: DepotManifestJson = serde_json::from_value(manifest_json.clone())
        .map_err(|e| Error::invalid_manifest(format!("depot manifest: {e}")))?;

    let mut items = Vec::with_capacity(parsed.depot.items.len() + 1);

    if let Some(sfc) = &parsed.depot.small_files_container {
        let (chunks, total_compressed, total_uncompressed) = chunks_with_offsets(&sfc.chunks);
        let md5 = match (&sfc.md5, chunks.len()) {
            (Some(m), _) => Some(m.to_lowercase()),
            (None, 1) => Some(chunks[0].md5_uncompressed.clone()),
            _ => None,
        };
        items.push(DepotItem::V2Sfc(V2Sfc {
            product_id: product_id.to_string(),
            chunks,
            md5,
            total_size_compressed: total_compressed,
            total_size_uncompressed: total_uncompressed,
            is_dependency,
        }));
    }

    for raw in &parsed.depot.items {
        if raw.kind != "DepotFile" {
            continue;
        }

        let (chunks, total_compressed, total_uncompressed) = chunks_with_offsets(&raw.chunks);

        // Single-chunk files often omit the file-level md5; the chunk's
        // uncompressed hash is the same value.
        let md5 = match (&raw.md5, chunks.len()) {
            (Some(m), _) => Some(m.to_lowercase()),
            (None, 1) => Some(chunks[0].md5_uncompressed.clone()),
            _ => None,
        };

        items.push(DepotItem::V2File(V2File {
            product_id: product_id.to_string(),
            path: normalize_path(&raw.path),
            chunks,
            md5,
            sha256: raw.sha256.as_ref().map(|s| s.to_lowercase()),
            sfc_ref: raw.sfc_ref,
            flags: raw.flags.clone(),
            total_size_compressed: total_compressed,
            total_size_uncompressed: total_uncompressed,
            is_dependency,
        }));
    }

    Ok(items)
}
