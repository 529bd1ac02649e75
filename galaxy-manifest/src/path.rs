//! Content-address paths, hash helpers and HTTP range composition
//!
//! Galaxy stores every CDN object under a two-level fan-out derived from its
//! MD5: `ab/cd/abcdef…`. The same split is used for the on-disk mirror and
//! inside RGOG archives, so it lives here rather than in the CDN client.

use crate::error::{Error, Result};

/// Convert a content hash to the Galaxy CDN path format.
///
/// `e80b5017098950fc58aad83c8c14978e` becomes
/// `e8/0b/e80b5017098950fc58aad83c8c14978e`. Hashes that already contain a
/// `/` are passed through unchanged.
pub fn galaxy_path(hash: &str) -> String {
    if hash.contains('/') || hash.len() < 4 {
        return hash.to_string();
    }
    format!("{}/{}/{}", &hash[0..2], &hash[2..4], hash)
}

/// Lowercase hex MD5 of a byte slice.
pub fn md5_hex(data: &[u8]) -> String {
    hex::encode(md5::compute(data).0)
}

/// Decode a 32-char hex MD5 into its 16 raw bytes.
pub fn md5_bytes(hash: &str) -> Result<[u8; 16]> {
    if hash.len() != 32 {
        return Err(Error::invalid_hash(hash));
    }
    let decoded = hex::decode(hash).map_err(|_| Error::invalid_hash(hash))?;
    let mut out = [0u8; 16];
    out.copy_from_slice(&decoded);
    Ok(out)
}

/// Check whether a body carries a zlib stream header.
///
/// Per RFC 1950 the low nibble of the first byte is the compression method;
/// 8 is DEFLATE, and the two-byte header is a multiple of 31.
pub fn is_zlib(data: &[u8]) -> bool {
    if data.len() < 2 {
        return false;
    }
    data[0] & 0x0F == 0x08 && u16::from_be_bytes([data[0], data[1]]) % 31 == 0
}

/// Compose an HTTP `Range` header value for `size` bytes at `offset`.
pub fn range_header(offset: u64, size: u64) -> String {
    format!("bytes={}-{}", offset, offset + size - 1)
}

/// Normalise a manifest path: backslashes become `/`, leading separators
/// are stripped. Galaxy manifests use Windows separators.
pub fn normalize_path(path: &str) -> String {
    path.replace('\\', "/").trim_start_matches('/').to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_galaxy_path_split() {
        assert_eq!(
            galaxy_path("e80b5017098950fc58aad83c8c14978e"),
            "e8/0b/e80b5017098950fc58aad83c8c14978e"
        );
    }

    #[test]
    fn test_galaxy_path_passthrough() {
        assert_eq!(galaxy_path("e8/0b/e80b"), "e8/0b/e80b");
        assert_eq!(galaxy_path("ab"), "ab");
    }

    #[test]
    fn test_md5_roundtrip() {
        let hash = md5_hex(b"abcdefghij");
        assert_eq!(hash, "e80b5017098950fc58aad83c8c14978e");
        assert_eq!(hex::encode(md5_bytes(&hash).unwrap()), hash);
    }

    #[test]
    fn test_md5_bytes_rejects_short() {
        assert!(md5_bytes("abcd").is_err());
    }

    #[test]
    fn test_is_zlib() {
        // Standard zlib headers at the common compression levels
        assert!(is_zlib(&[0x78, 0x01]));
        assert!(is_zlib(&[0x78, 0x9C]));
        assert!(is_zlib(&[0x78, 0xDA]));
        assert!(!is_zlib(&[0x1F, 0x8B])); // gzip
        assert!(!is_zlib(b"{\"a\":1}"));
        assert!(!is_zlib(&[0x78]));
    }

    #[test]
    fn test_range_header() {
        assert_eq!(range_header(0, 1_048_576), "bytes=0-1048575");
        assert_eq!(range_header(100, 50), "bytes=100-149");
    }

    #[test]
    fn test_normalize_path() {
        assert_eq!(normalize_path("bin\\win64\\game.exe"), "bin/win64/game.exe");
        assert_eq!(normalize_path("/data/app.dat"), "data/app.dat");
    }
}
