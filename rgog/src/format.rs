//! Binary layout of the RGOG container
//!
//! All multi-byte integers are little-endian. Section starts are 64-byte
//! aligned with NUL padding; the sizes recorded in the header count content
//! bytes only, never padding.

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use std::io::{Read, Write};

use crate::error::{Error, Result};
use crate::languages::LanguageSet;

/// Archive magic.
pub const RGOG_MAGIC: &[u8; 4] = b"RGOG";
/// Current format version.
pub const RGOG_VERSION: u16 = 0x0002;
/// Base-build archive type.
pub const TYPE_BASE: u8 = 0x01;
/// Patch-collection archive type (reserved).
pub const TYPE_PATCH: u8 = 0x02;
/// Header size in bytes.
pub const HEADER_SIZE: u64 = 128;
/// Section alignment.
pub const SECTION_ALIGNMENT: u64 = 64;
/// Size of one chunk metadata record.
pub const CHUNK_RECORD_SIZE: u64 = 40;
/// Fixed prefix size of a build record.
pub const BUILD_RECORD_SIZE: u64 = 48;
/// Size of one manifest record within a build record.
pub const MANIFEST_RECORD_SIZE: u64 = 48;
/// Default part-size limit: 2 GiB of data bytes.
pub const DEFAULT_PART_SIZE: u64 = 2 * 1024 * 1024 * 1024;

/// Round `offset` up to the next alignment boundary.
pub fn align_up(offset: u64) -> u64 {
    offset.div_ceil(SECTION_ALIGNMENT) * SECTION_ALIGNMENT
}

/// One `(offset, size)` header pair. Zero for sections absent from a part.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Section {
    /// Absolute offset of the section within its part
    pub offset: u64,
    /// Content size in bytes, excluding alignment padding
    pub size: u64,
}

impl Section {
    /// Whether the section is present.
    pub fn is_present(&self) -> bool {
        self.size > 0
    }

    /// Exclusive end offset.
    pub fn end(&self) -> u64 {
        self.offset + self.size
    }
}

/// Operating system code of a build.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(u8)]
pub enum OsCode {
    /// Unknown or unset
    #[default]
    None = 0,
    /// Windows
    Windows = 1,
    /// macOS
    Mac = 2,
    /// Linux
    Linux = 3,
}

impl OsCode {
    /// Decode from the stored byte; unknown values map to `None`.
    pub fn from_u8(value: u8) -> Self {
        match value {
            1 => Self::Windows,
            2 => Self::Mac,
            3 => Self::Linux,
            _ => Self::None,
        }
    }

    /// Map a CDN platform string.
    pub fn from_platform(platform: &str) -> Self {
        match platform.to_ascii_lowercase().as_str() {
            "windows" => Self::Windows,
            "osx" | "mac" => Self::Mac,
            "linux" => Self::Linux,
            _ => Self::None,
        }
    }

    /// Human-readable name.
    pub fn name(&self) -> &'static str {
        match self {
            Self::None => "null",
            Self::Windows => "Windows",
            Self::Mac => "Mac",
            Self::Linux => "Linux",
        }
    }
}

/// The 128-byte part header.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RgogHeader {
    /// Archive type (`TYPE_BASE` or `TYPE_PATCH`)
    pub archive_type: u8,
    /// This part's number, 0-based
    pub part_number: u32,
    /// Total parts in the archive
    pub total_parts: u32,
    /// Builds across all parts
    pub total_build_count: u16,
    /// Chunks across all parts
    pub total_chunk_count: u32,
    /// Chunks in this part
    pub local_chunk_count: u32,
    /// Product metadata section (part 0 only)
    pub product_metadata: Section,
    /// Build metadata section (part 0 only)
    pub build_metadata: Section,
    /// Build files section (part 0 only)
    pub build_files: Section,
    /// Chunk metadata section
    pub chunk_metadata: Section,
    /// Chunk files section
    pub chunk_files: Section,
}

impl RgogHeader {
    /// Serialize as exactly 128 bytes.
    pub fn write_to<W: Write>(&self, writer: &mut W) -> Result<()> {
        writer.write_all(RGOG_MAGIC)?;
        writer.write_u16::<LittleEndian>(RGOG_VERSION)?;
        writer.write_u8(self.archive_type)?;
        writer.write_u8(0)?; // reserved
        writer.write_u32::<LittleEndian>(self.part_number)?;
        writer.write_u32::<LittleEndian>(self.total_parts)?;
        writer.write_u16::<LittleEndian>(self.total_build_count)?;
        writer.write_u32::<LittleEndian>(self.total_chunk_count)?;
        writer.write_u32::<LittleEndian>(self.local_chunk_count)?;
        for section in [
            &self.product_metadata,
            &self.build_metadata,
            &self.build_files,
            &self.chunk_metadata,
            &self.chunk_files,
        ] {
            writer.write_u64::<LittleEndian>(section.offset)?;
            writer.write_u64::<LittleEndian>(section.size)?;
        }
        // 26 fixed bytes + 5 * 16 pair bytes = 106; pad to 128
        writer.write_all(&[0u8; (HEADER_SIZE - 106) as usize])?;
        Ok(())
    }

    /// Parse from exactly 128 bytes, validating magic, version and type.
    pub fn read_from<R: Read>(reader: &mut R) -> Result<Self> {
        let mut raw = [0u8; HEADER_SIZE as usize];
        reader.read_exact(&mut raw)?;
        let mut cursor = &raw[..];

        let mut magic = [0u8; 4];
        cursor.read_exact(&mut magic)?;
        if &magic != RGOG_MAGIC {
            return Err(Error::invalid_archive("bad magic number"));
        }

        let version = cursor.read_u16::<LittleEndian>()?;
        if version != RGOG_VERSION {
            return Err(Error::unsupported(format!("format version {version:#06x}")));
        }

        let archive_type = cursor.read_u8()?;
        if archive_type != TYPE_BASE && archive_type != TYPE_PATCH {
            return Err(Error::unsupported(format!(
                "archive type {archive_type:#04x}"
            )));
        }
        let _reserved = cursor.read_u8()?;

        let part_number = cursor.read_u32::<LittleEndian>()?;
        let total_parts = cursor.read_u32::<LittleEndian>()?;
        let total_build_count = cursor.read_u16::<LittleEndian>()?;
        let total_chunk_count = cursor.read_u32::<LittleEndian>()?;
        let local_chunk_count = cursor.read_u32::<LittleEndian>()?;

        let mut sections = [Section::default(); 5];
        for section in &mut sections {
            section.offset = cursor.read_u64::<LittleEndian>()?;
            section.size = cursor.read_u64::<LittleEndian>()?;
        }

        Ok(Self {
            archive_type,
            part_number,
            total_parts,
            total_build_count,
            total_chunk_count,
            local_chunk_count,
            product_metadata: sections[0],
            build_metadata: sections[1],
            build_files: sections[2],
            chunk_metadata: sections[3],
            chunk_files: sections[4],
        })
    }
}

/// Product metadata: id plus display name, 8-byte aligned.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProductRecord {
    /// Numeric product id
    pub product_id: u64,
    /// Product name (UTF-8)
    pub name: String,
}

impl ProductRecord {
    /// Serialized size including the trailing 8-byte alignment.
    pub fn byte_size(&self) -> u64 {
        let raw = 8 + 4 + self.name.len() as u64;
        raw.div_ceil(8) * 8
    }

    /// Serialize.
    pub fn write_to<W: Write>(&self, writer: &mut W) -> Result<()> {
        writer.write_u64::<LittleEndian>(self.product_id)?;
        writer.write_u32::<LittleEndian>(self.name.len() as u32)?;
        writer.write_all(self.name.as_bytes())?;
        let written = 8 + 4 + self.name.len() as u64;
        let padding = self.byte_size() - written;
        writer.write_all(&vec![0u8; padding as usize])?;
        Ok(())
    }

    /// Parse from a section body.
    pub fn read_from<R: Read>(reader: &mut R) -> Result<Self> {
        let product_id = reader.read_u64::<LittleEndian>()?;
        let name_len = reader.read_u32::<LittleEndian>()? as usize;
        let mut name = vec![0u8; name_len];
        reader.read_exact(&mut name)?;
        let name = String::from_utf8(name)
            .map_err(|_| Error::invalid_archive("product name is not UTF-8"))?;
        Ok(Self { product_id, name })
    }
}

/// One depot manifest referenced by a build (48 bytes).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManifestRecord {
    /// Depot manifest id: MD5 of the compressed manifest bytes
    pub depot_id: [u8; 16],
    /// Offset within the BuildFiles section
    pub offset: u64,
    /// Size of the compressed manifest
    pub size: u64,
    /// Packed language bit-set
    pub languages: LanguageSet,
}

impl ManifestRecord {
    fn write_to<W: Write>(&self, writer: &mut W) -> Result<()> {
        writer.write_all(&self.depot_id)?;
        writer.write_u64::<LittleEndian>(self.offset)?;
        writer.write_u64::<LittleEndian>(self.size)?;
        writer.write_u64::<LittleEndian>(self.languages.low)?;
        writer.write_u64::<LittleEndian>(self.languages.high)?;
        Ok(())
    }

    fn read_from<R: Read>(reader: &mut R) -> Result<Self> {
        let mut depot_id = [0u8; 16];
        reader.read_exact(&mut depot_id)?;
        let offset = reader.read_u64::<LittleEndian>()?;
        let size = reader.read_u64::<LittleEndian>()?;
        let low = reader.read_u64::<LittleEndian>()?;
        let high = reader.read_u64::<LittleEndian>()?;
        Ok(Self {
            depot_id,
            offset,
            size,
            languages: LanguageSet { low, high },
        })
    }
}

/// Build metadata record: 48 bytes plus 48 per manifest.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildRecord {
    /// Numeric build id
    pub build_id: u64,
    /// Operating system of the build
    pub os: OsCode,
    /// Repository id: MD5 of the compressed repository bytes
    pub repository_id: [u8; 16],
    /// Repository offset within the BuildFiles section
    pub repository_offset: u64,
    /// Size of the compressed repository
    pub repository_size: u64,
    /// Depot manifests of the build
    pub manifests: Vec<ManifestRecord>,
}

impl BuildRecord {
    /// Serialized size.
    pub fn byte_size(&self) -> u64 {
        BUILD_RECORD_SIZE + MANIFEST_RECORD_SIZE * self.manifests.len() as u64
    }

    /// Serialize.
    pub fn write_to<W: Write>(&self, writer: &mut W) -> Result<()> {
        writer.write_u64::<LittleEndian>(self.build_id)?;
        writer.write_u8(self.os as u8)?;
        writer.write_all(&[0u8; 3])?;
        writer.write_all(&self.repository_id)?;
        writer.write_u64::<LittleEndian>(self.repository_offset)?;
        writer.write_u64::<LittleEndian>(self.repository_size)?;
        writer.write_u16::<LittleEndian>(self.manifests.len() as u16)?;
        writer.write_all(&[0u8; 2])?;
        for manifest in &self.manifests {
            manifest.write_to(writer)?;
        }
        Ok(())
    }

    /// Parse one record, consuming exactly its serialized size.
    pub fn read_from<R: Read>(reader: &mut R) -> Result<Self> {
        let build_id = reader.read_u64::<LittleEndian>()?;
        let os = OsCode::from_u8(reader.read_u8()?);
        let mut reserved3 = [0u8; 3];
        reader.read_exact(&mut reserved3)?;
        let mut repository_id = [0u8; 16];
        reader.read_exact(&mut repository_id)?;
        let repository_offset = reader.read_u64::<LittleEndian>()?;
        let repository_size = reader.read_u64::<LittleEndian>()?;
        let manifest_count = reader.read_u16::<LittleEndian>()?;
        let mut reserved2 = [0u8; 2];
        reader.read_exact(&mut reserved2)?;

        let mut manifests = Vec::with_capacity(manifest_count as usize);
        for _ in 0..manifest_count {
            manifests.push(ManifestRecord::read_from(reader)?);
        }

        Ok(Self {
            build_id,
            os,
            repository_id,
            repository_offset,
            repository_size,
            manifests,
        })
    }
}

/// Chunk metadata record (exactly 40 bytes).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkRecord {
    /// Content address: MD5 of the compressed chunk bytes
    pub compressed_md5: [u8; 16],
    /// Offset within this part's ChunkFiles section
    pub offset: u64,
    /// Compressed size
    pub size: u64,
    /// Product whose store tree the chunk belongs to
    pub product_id: u64,
}

impl ChunkRecord {
    /// Serialize.
    pub fn write_to<W: Write>(&self, writer: &mut W) -> Result<()> {
        writer.write_all(&self.compressed_md5)?;
        writer.write_u64::<LittleEndian>(self.offset)?;
        writer.write_u64::<LittleEndian>(self.size)?;
        writer.write_u64::<LittleEndian>(self.product_id)?;
        Ok(())
    }

    /// Parse.
    pub fn read_from<R: Read>(reader: &mut R) -> Result<Self> {
        let mut compressed_md5 = [0u8; 16];
        reader.read_exact(&mut compressed_md5)?;
        let offset = reader.read_u64::<LittleEndian>()?;
        let size = reader.read_u64::<LittleEndian>()?;
        let product_id = reader.read_u64::<LittleEndian>()?;
        Ok(Self {
            compressed_md5,
            offset,
            size,
            product_id,
        })
    }

    /// Lowercase hex of the content address.
    pub fn md5_hex(&self) -> String {
        hex::encode(self.compressed_md5)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_align_up() {
        assert_eq!(align_up(0), 0);
        assert_eq!(align_up(1), 64);
        assert_eq!(align_up(64), 64);
        assert_eq!(align_up(65), 128);
    }

    #[test]
    fn test_header_roundtrip_is_128_bytes() {
        let header = RgogHeader {
            archive_type: TYPE_BASE,
            part_number: 0,
            total_parts: 3,
            total_build_count: 2,
            total_chunk_count: 100,
            local_chunk_count: 40,
            product_metadata: Section { offset: 128, size: 24 },
            build_metadata: Section { offset: 192, size: 96 },
            build_files: Section { offset: 320, size: 1000 },
            chunk_metadata: Section { offset: 1344, size: 1600 },
            chunk_files: Section { offset: 2944, size: 123456 },
        };

        let mut raw = Vec::new();
        header.write_to(&mut raw).unwrap();
        assert_eq!(raw.len(), HEADER_SIZE as usize);
        assert_eq!(&raw[0..4], b"RGOG");

        let parsed = RgogHeader::read_from(&mut raw.as_slice()).unwrap();
        assert_eq!(parsed, header);
    }

    #[test]
    fn test_header_rejects_bad_magic() {
        let mut raw = vec![0u8; 128];
        raw[0..4].copy_from_slice(b"GOGR");
        assert!(matches!(
            RgogHeader::read_from(&mut raw.as_slice()),
            Err(Error::InvalidArchive { .. })
        ));
    }

    #[test]
    fn test_header_rejects_unknown_version() {
        let header = RgogHeader {
            archive_type: TYPE_BASE,
            ..Default::default()
        };
        let mut raw = Vec::new();
        header.write_to(&mut raw).unwrap();
        raw[4] = 0x99; // clobber the version
        assert!(matches!(
            RgogHeader::read_from(&mut raw.as_slice()),
            Err(Error::Unsupported { .. })
        ));
    }

    #[test]
    fn test_chunk_record_is_40_bytes() {
        let record = ChunkRecord {
            compressed_md5: [0xAB; 16],
            offset: 7,
            size: 9,
            product_id: 1234,
        };
        let mut raw = Vec::new();
        record.write_to(&mut raw).unwrap();
        assert_eq!(raw.len(), CHUNK_RECORD_SIZE as usize);

        let parsed = ChunkRecord::read_from(&mut raw.as_slice()).unwrap();
        assert_eq!(parsed, record);
    }

    #[test]
    fn test_build_record_roundtrip() {
        let record = BuildRecord {
            build_id: 51,
            os: OsCode::Windows,
            repository_id: [1; 16],
            repository_offset: 0,
            repository_size: 333,
            manifests: vec![ManifestRecord {
                depot_id: [2; 16],
                offset: 333,
                size: 444,
                languages: LanguageSet { low: 0b101, high: 0 },
            }],
        };
        assert_eq!(record.byte_size(), 96);

        let mut raw = Vec::new();
        record.write_to(&mut raw).unwrap();
        assert_eq!(raw.len(), 96);

        let parsed = BuildRecord::read_from(&mut raw.as_slice()).unwrap();
        assert_eq!(parsed, record);
    }

    #[test]
    fn test_product_record_aligns_to_8() {
        let record = ProductRecord {
            product_id: 1207658924,
            name: "Unreal Gold".to_string(), // 11 bytes; 8+4+11=23 -> 24
        };
        assert_eq!(record.byte_size(), 24);

        let mut raw = Vec::new();
        record.write_to(&mut raw).unwrap();
        assert_eq!(raw.len(), 24);

        let parsed = ProductRecord::read_from(&mut raw.as_slice()).unwrap();
        assert_eq!(parsed, record);
    }
}
