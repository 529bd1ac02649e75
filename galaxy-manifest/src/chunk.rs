//! Chunk records for generation 2 files

use serde::Deserialize;

/// One zlib-compressed fragment of a V2 file.
///
/// Chunks are content-addressed: `md5_compressed` is both the integrity
/// check for the downloaded bytes and the CDN path key. The two offsets are
/// cumulative positions within the file, computed by prefix sum over the
/// manifest's chunk list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chunk {
    /// MD5 of the compressed bytes (CDN address)
    pub md5_compressed: String,
    /// MD5 of the inflated bytes
    pub md5_uncompressed: String,
    /// Compressed size in bytes
    pub size_compressed: u64,
    /// Uncompressed size in bytes
    pub size_uncompressed: u64,
    /// Cumulative offset within the compressed stream
    pub offset_compressed: u64,
    /// Cumulative offset within the assembled plaintext
    pub offset_uncompressed: u64,
}

/// Raw chunk record as it appears in depot manifest JSON.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct ChunkJson {
    #[serde(default)]
    pub compressed_md5: String,
    #[serde(default)]
    pub md5: String,
    #[serde(default)]
    pub compressed_size: u64,
    #[serde(default)]
    pub size: u64,
}

/// Convert raw chunk records into [`Chunk`]s with cumulative offsets.
///
/// Returns the chunks plus the total compressed and uncompressed sizes.
pub(crate) fn chunks_with_offsets(raw: &[ChunkJson]) -> (Vec<Chunk>, u64, u64) {
    let mut chunks = Vec::with_capacity(raw.len());
    let mut offset_compressed = 0u64;
    let mut offset_uncompressed = 0u64;

    for c in raw {
        chunks.push(Chunk {
            md5_compressed: c.compressed_md5.to_lowercase(),
            md5_uncompressed: c.md5.to_lowercase(),
            size_compressed: c.compressed_size,
            size_uncompressed: c.size,
            offset_compressed,
            offset_uncompressed,
        });
        offset_compressed += c.compressed_size;
        offset_uncompressed += c.size;
    }

    (chunks, offset_compressed, offset_uncompressed)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn raw(compressed: u64, size: u64) -> ChunkJson {
        ChunkJson {
            compressed_md5: "AA".repeat(16),
            md5: "bb".repeat(16),
            compressed_size: compressed,
            size,
        }
    }

    #[test]
    fn test_offsets_are_prefix_sums() {
        let (chunks, total_c, total_u) = chunks_with_offsets(&[raw(10, 25), raw(7, 30), raw(3, 5)]);

        assert_eq!(chunks[0].offset_compressed, 0);
        assert_eq!(chunks[0].offset_uncompressed, 0);
        assert_eq!(chunks[1].offset_compressed, 10);
        assert_eq!(chunks[1].offset_uncompressed, 25);
        assert_eq!(chunks[2].offset_compressed, 17);
        assert_eq!(chunks[2].offset_uncompressed, 55);
        assert_eq!(total_c, 20);
        assert_eq!(total_u, 60);
    }

    #[test]
    fn test_hashes_lowercased() {
        let (chunks, _, _) = chunks_with_offsets(&[raw(1, 1)]);
        assert_eq!(chunks[0].md5_compressed, "aa".repeat(16));
    }

    #[test]
    fn test_empty_list() {
        let (chunks, total_c, total_u) = chunks_with_offsets(&[]);
        assert!(chunks.is_empty());
        assert_eq!(total_c, 0);
        assert_eq!(total_u, 0);
    }
}
