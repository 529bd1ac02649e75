//! Differential patch records between two builds
//!
//! The patches API answers with an xdelta3 patch manifest per compatible
//! build pair. Patch delta chunks live under a separate credentialed CDN
//! root; the per-patch client id and secret from the root manifest are
//! required to mint secure links for them.

use serde::Deserialize;

use crate::chunk::{chunks_with_offsets, Chunk, ChunkJson};
use crate::error::{Error, Result};
use crate::path::normalize_path;

/// The only patch algorithm the content system ships.
pub const PATCH_ALGORITHM: &str = "xdelta3";

/// A patch for updating one file, downloaded as xdelta3 delta chunks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FilePatchDiff {
    /// Path of the old file
    pub source_path: String,
    /// Path of the new file
    pub target_path: String,
    /// MD5 of the old file
    pub md5_source: String,
    /// MD5 of the new file
    pub md5_target: String,
    /// MD5 of the assembled delta
    pub md5: String,
    /// Ordered delta chunks
    pub chunks: Vec<Chunk>,
}

#[derive(Debug, Deserialize)]
struct DepotDiffJson {
    #[serde(rename = "type", default)]
    kind: String,
    #[serde(default)]
    md5_source: String,
    #[serde(default)]
    md5_target: String,
    #[serde(default)]
    path_source: String,
    #[serde(default)]
    path_target: String,
    #[serde(default)]
    md5: String,
    #[serde(default)]
    chunks: Vec<ChunkJson>,
}

/// Container of file patches for a single `(from_build, to_build)` pair.
#[derive(Debug, Clone)]
pub struct Patch {
    /// Patch algorithm, always `xdelta3`
    pub algorithm: String,
    /// Per-file patch records
    pub files: Vec<FilePatchDiff>,
    /// Per-patch client id for the patch-store secure link
    pub client_id: String,
    /// Per-patch client secret for the patch-store secure link
    pub client_secret: String,
    /// Source build id
    pub from_build_id: String,
    /// Target build id
    pub to_build_id: String,
}

impl Patch {
    /// Find the patch covering `target_path`, if any.
    pub fn diff_for(&self, target_path: &str) -> Option<&FilePatchDiff> {
        self.files.iter().find(|f| f.target_path == target_path)
    }
}

/// Parse the `DepotDiff` items of a depot patch manifest.
///
/// Items of any other type are rejected; an unknown record type means the
/// patch format changed under us and a full download is safer.
pub fn parse_depot_diffs(manifest_json: &serde_json::Value) -> Result<Vec<FilePatchDiff>> {
    let items = manifest_json
        .pointer("/depot/items")
        .and_then(|v| v.as_array())
        .ok_or_else(|| Error::invalid_manifest("patch depot manifest without items"))?;

    let mut diffs = Vec::with_capacity(items.len());
    for item in items {
        let parsed: DepotDiffJson = serde_json::from_value(item.clone())
            .map_err(|e| Error::invalid_manifest(format!("depot diff: {e}")))?;
        if parsed.kind != "DepotDiff" {
            return Err(Error::invalid_manifest(format!(
                "unknown patch item type: {}",
                parsed.kind
            )));
        }

        let (chunks, _, _) = chunks_with_offsets(&parsed.chunks);
        diffs.push(FilePatchDiff {
            source_path: normalize_path(&parsed.path_source),
            target_path: normalize_path(&parsed.path_target),
            md5_source: parsed.md5_source.to_lowercase(),
            md5_target: parsed.md5_target.to_lowercase(),
            md5: parsed.md5.to_lowercase(),
            chunks,
        });
    }

    Ok(diffs)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_depot_diffs() {
        let manifest = json!({
            "depot": {
                "items": [{
                    "type": "DepotDiff",
                    "path_source": "data\\game.pak",
                    "path_target": "data\\game.pak",
                    "md5_source": "aa".repeat(16),
                    "md5_target": "bb".repeat(16),
                    "md5": "cc".repeat(16),
                    "chunks": [{"compressedMd5": "dd".repeat(16), "md5": "ee".repeat(16),
                                "compressedSize": 9, "size": 40}]
                }]
            }
        });

        let diffs = parse_depot_diffs(&manifest).unwrap();
        assert_eq!(diffs.len(), 1);
        assert_eq!(diffs[0].target_path, "data/game.pak");
        assert_eq!(diffs[0].chunks.len(), 1);
    }

    #[test]
    fn test_unknown_item_type_rejected() {
        let manifest = json!({
            "depot": {"items": [{"type": "DepotSnapshot"}]}
        });
        assert!(parse_depot_diffs(&manifest).is_err());
    }

    #[test]
    fn test_diff_for() {
        let patch = Patch {
            algorithm: PATCH_ALGORITHM.to_string(),
            files: vec![FilePatchDiff {
                source_path: "a".into(),
                target_path: "a".into(),
                md5_source: "aa".repeat(16),
                md5_target: "bb".repeat(16),
                md5: "cc".repeat(16),
                chunks: Vec::new(),
            }],
            client_id: String::new(),
            client_secret: String::new(),
            from_build_id: "1".into(),
            to_build_id: "2".into(),
        };

        assert!(patch.diff_for("a").is_some());
        assert!(patch.diff_for("b").is_none());
    }
}
