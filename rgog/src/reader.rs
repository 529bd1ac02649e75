//! Archive reading: list, verify, extract, unpack
//!
//! Opening an archive parses part 0's metadata head and merges the chunk
//! tables of every present sibling part into one global index keyed by
//! content address. Chunk bodies are only touched by the operations that
//! need them.

use std::collections::{BTreeMap, BTreeSet};
use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use flate2::read::ZlibDecoder;
use galaxy_manifest::item::{parse_depot_items, DepotItem};
use galaxy_manifest::{galaxy_path, md5_hex};

use crate::error::{Error, Result};
use crate::format::{
    BuildRecord, ChunkRecord, ProductRecord, RgogHeader, CHUNK_RECORD_SIZE, HEADER_SIZE,
};
use crate::writer::part_path_for;

/// Where one chunk lives.
#[derive(Debug, Clone, Copy)]
pub struct ChunkLocation {
    /// Part number holding the chunk
    pub part: u32,
    /// Absolute offset within the part file
    pub offset: u64,
    /// Compressed size
    pub size: u64,
    /// Product whose store tree the chunk belongs to
    pub product_id: u64,
}

#[derive(Debug)]
struct PartInfo {
    path: PathBuf,
    header: Option<RgogHeader>,
}

/// Options for [`Archive::extract`].
#[derive(Debug, Clone, Default)]
pub struct ExtractOptions {
    /// Restrict to one build
    pub build_id: Option<u64>,
    /// Reassemble plaintext files instead of emitting the raw tree
    pub reassemble: bool,
    /// Emit chunks only, no metadata
    pub chunks_only: bool,
}

/// Options for [`Archive::unpack`].
#[derive(Debug, Clone, Default)]
pub struct UnpackOptions {
    /// Also write pretty-printed JSON copies under `debug/`
    pub debug: bool,
    /// Emit chunks only, no metadata
    pub chunks_only: bool,
}

/// Aggregate statistics of an archive.
#[derive(Debug, Clone)]
pub struct ArchiveStats {
    /// Declared part count
    pub total_parts: u32,
    /// Parts found on disk
    pub present_parts: u32,
    /// Builds in the archive
    pub builds: usize,
    /// Declared chunk count across all parts
    pub total_chunks: u32,
    /// Chunks actually indexed (missing parts reduce this)
    pub indexed_chunks: usize,
    /// Compressed bytes across indexed chunks
    pub chunk_bytes: u64,
    /// Bytes of repositories and manifests
    pub build_files_bytes: u64,
}

/// Result of [`Archive::verify`].
#[derive(Debug, Default)]
pub struct VerifyReport {
    /// Problems found; empty means the archive passed
    pub errors: Vec<String>,
}

impl VerifyReport {
    /// Whether verification passed.
    pub fn passed(&self) -> bool {
        self.errors.is_empty()
    }
}

/// An opened RGOG archive.
#[derive(Debug)]
pub struct Archive {
    parts: Vec<PartInfo>,
    header: RgogHeader,
    product: Option<ProductRecord>,
    builds: Vec<BuildRecord>,
    chunk_index: BTreeMap<[u8; 16], ChunkLocation>,
}

impl Archive {
    /// Open part 0 of an archive and index every present part.
    pub fn open(path: &Path) -> Result<Self> {
        let mut file = File::open(path)?;
        let header = RgogHeader::read_from(&mut file)?;
        if header.part_number != 0 {
            return Err(Error::invalid_archive(format!(
                "{} is part {} of {}; open part 0",
                path.display(),
                header.part_number + 1,
                header.total_parts
            )));
        }

        let file_len = file.metadata()?.len();
        check_sections(&header, file_len, 0)?;

        let product = if header.product_metadata.is_present() {
            file.seek(SeekFrom::Start(header.product_metadata.offset))?;
            Some(ProductRecord::read_from(&mut file)?)
        } else {
            None
        };

        let mut builds = Vec::with_capacity(header.total_build_count as usize);
        if header.build_metadata.is_present() {
            file.seek(SeekFrom::Start(header.build_metadata.offset))?;
            let mut body = vec![0u8; header.build_metadata.size as usize];
            file.read_exact(&mut body)?;
            let mut cursor = &body[..];
            for _ in 0..header.total_build_count {
                builds.push(BuildRecord::read_from(&mut cursor)?);
            }
        }

        let mut chunk_index = BTreeMap::new();
        index_part_chunks(&mut file, &header, 0, &mut chunk_index)?;

        let mut parts = vec![PartInfo {
            path: path.to_path_buf(),
            header: Some(header.clone()),
        }];

        for part_number in 1..header.total_parts {
            let part_path = part_path_for(path, part_number);
            match File::open(&part_path) {
                Ok(mut part_file) => {
                    let part_header = RgogHeader::read_from(&mut part_file)?;
                    if part_header.part_number != part_number {
                        return Err(Error::invalid_archive(format!(
                            "{} declares part {}, expected {part_number}",
                            part_path.display(),
                            part_header.part_number
                        )));
                    }
                    check_sections(&part_header, part_file.metadata()?.len(), part_number)?;
                    index_part_chunks(&mut part_file, &part_header, part_number, &mut chunk_index)?;
                    parts.push(PartInfo {
                        path: part_path,
                        header: Some(part_header),
                    });
                }
                Err(_) => {
                    warn!("part {part_number} missing: {}", part_path.display());
                    parts.push(PartInfo {
                        path: part_path,
                        header: None,
                    });
                }
            }
        }

        debug!(
            "opened archive: {} builds, {} indexed chunks",
            builds.len(),
            chunk_index.len()
        );
        Ok(Self {
            parts,
            header,
            product,
            builds,
            chunk_index,
        })
    }

    /// Part 0 header.
    pub fn header(&self) -> &RgogHeader {
        &self.header
    }

    /// Product metadata, when the archive carries it.
    pub fn product(&self) -> Option<&ProductRecord> {
        self.product.as_ref()
    }

    /// Builds in the archive, ascending by build id.
    pub fn builds(&self) -> &[BuildRecord] {
        &self.builds
    }

    /// Look up a chunk by its 32-hex content address.
    pub fn find_chunk(&self, md5_hex_str: &str) -> Option<ChunkLocation> {
        let decoded = hex::decode(md5_hex_str).ok()?;
        let key: [u8; 16] = decoded.try_into().ok()?;
        self.chunk_index.get(&key).copied()
    }

    /// Aggregate statistics.
    pub fn stats(&self) -> ArchiveStats {
        ArchiveStats {
            total_parts: self.header.total_parts,
            present_parts: self.parts.iter().filter(|p| p.header.is_some()).count() as u32,
            builds: self.builds.len(),
            total_chunks: self.header.total_chunk_count,
            indexed_chunks: self.chunk_index.len(),
            chunk_bytes: self.chunk_index.values().map(|c| c.size).sum(),
            build_files_bytes: self.header.build_files.size,
        }
    }

    /// Read a stored chunk body (compressed, as archived).
    pub fn read_chunk(&self, location: ChunkLocation) -> Result<Vec<u8>> {
        let part = self
            .parts
            .get(location.part as usize)
            .ok_or_else(|| Error::invalid_archive(format!("part {} out of range", location.part)))?;
        if part.header.is_none() {
            return Err(Error::MissingPart {
                part: location.part,
                path: part.path.display().to_string(),
            });
        }
        read_at(&part.path, location.offset, location.size)
    }

    /// Read a repository or manifest body from the BuildFiles section.
    pub fn read_build_file(&self, offset: u64, size: u64) -> Result<Vec<u8>> {
        read_at(&self.parts[0].path, self.header.build_files.offset + offset, size)
    }

    /// Validate the archive.
    ///
    /// Quick mode checks structure only: magic, version, section bounds
    /// and declared counts (the bounds and version were already enforced
    /// at open). Full mode additionally recomputes the MD5 of every chunk
    /// body and every build file against its content address.
    pub fn verify(&self, quick: bool) -> Result<VerifyReport> {
        let mut report = VerifyReport::default();

        let expected_local: u32 = self
            .parts
            .iter()
            .filter_map(|p| p.header.as_ref())
            .map(|h| h.local_chunk_count)
            .sum();
        if self.parts.iter().all(|p| p.header.is_some())
            && expected_local != self.header.total_chunk_count
        {
            report.errors.push(format!(
                "declared {} chunks but parts carry {expected_local}",
                self.header.total_chunk_count
            ));
        }
        for part in &self.parts {
            let Some(header) = &part.header else {
                report
                    .errors
                    .push(format!("missing part file {}", part.path.display()));
                continue;
            };
            if header.chunk_metadata.size != CHUNK_RECORD_SIZE * header.local_chunk_count as u64 {
                report.errors.push(format!(
                    "part {}: chunk metadata size {} does not match {} records",
                    header.part_number, header.chunk_metadata.size, header.local_chunk_count
                ));
            }
        }
        if self.builds.len() != self.header.total_build_count as usize {
            report.errors.push(format!(
                "declared {} builds but parsed {}",
                self.header.total_build_count,
                self.builds.len()
            ));
        }

        if quick {
            return Ok(report);
        }

        for (md5, location) in &self.chunk_index {
            let body = self.read_chunk(*location)?;
            let actual = md5_hex(&body);
            let expected = hex::encode(md5);
            if actual != expected {
                report
                    .errors
                    .push(format!("chunk {expected}: stored bytes hash to {actual}"));
            }
        }

        let mut seen = BTreeSet::new();
        for build in &self.builds {
            let repo_hex = hex::encode(build.repository_id);
            if seen.insert(repo_hex.clone()) {
                let body = self.read_build_file(build.repository_offset, build.repository_size)?;
                let actual = md5_hex(&body);
                if actual != repo_hex {
                    report
                        .errors
                        .push(format!("repository {repo_hex}: stored bytes hash to {actual}"));
                }
            }
            for manifest in &build.manifests {
                let depot_hex = hex::encode(manifest.depot_id);
                if seen.insert(depot_hex.clone()) {
                    let body = self.read_build_file(manifest.offset, manifest.size)?;
                    let actual = md5_hex(&body);
                    if actual != depot_hex {
                        report.errors.push(format!(
                            "manifest {depot_hex}: stored bytes hash to {actual}"
                        ));
                    }
                }
            }
        }

        Ok(report)
    }

    /// Reverse the pack: restore the `v2/{meta,store}` tree byte for byte.
    pub fn unpack(&self, out_dir: &Path, opts: &UnpackOptions) -> Result<()> {
        if !opts.chunks_only {
            let meta_dir = out_dir.join("v2").join("meta");
            let mut written = BTreeSet::new();

            for build in &self.builds {
                let repo_hex = hex::encode(build.repository_id);
                if written.insert(repo_hex.clone()) {
                    let body =
                        self.read_build_file(build.repository_offset, build.repository_size)?;
                    write_file(&meta_dir.join(galaxy_path(&repo_hex)), &body)?;
                    if opts.debug {
                        write_debug_json(out_dir, &repo_hex, "repository", &body)?;
                    }
                }
                for manifest in &build.manifests {
                    let depot_hex = hex::encode(manifest.depot_id);
                    if written.insert(depot_hex.clone()) {
                        let body = self.read_build_file(manifest.offset, manifest.size)?;
                        write_file(&meta_dir.join(galaxy_path(&depot_hex)), &body)?;
                        if opts.debug {
                            write_debug_json(out_dir, &depot_hex, "manifest", &body)?;
                        }
                    }
                }
            }
        }

        let store_dir = out_dir.join("v2").join("store");
        for (md5, location) in &self.chunk_index {
            let hex_name = hex::encode(md5);
            let body = self.read_chunk(*location)?;
            let dest = store_dir
                .join(location.product_id.to_string())
                .join(galaxy_path(&hex_name));
            write_file(&dest, &body)?;
        }

        info!(
            "unpacked {} chunks and {} builds to {}",
            self.chunk_index.len(),
            self.builds.len(),
            out_dir.display()
        );
        Ok(())
    }

    /// Extract builds from the archive.
    ///
    /// Without `reassemble` this emits the selected builds' slice of the
    /// raw tree (their metadata plus the chunks their manifests
    /// reference). With `reassemble` the depot manifests are walked and
    /// plaintext files are written at their install paths, slicing Small
    /// Files Container members out of their container.
    pub fn extract(&self, out_dir: &Path, opts: &ExtractOptions) -> Result<()> {
        let selected: Vec<&BuildRecord> = match opts.build_id {
            Some(build_id) => {
                let build = self
                    .builds
                    .iter()
                    .find(|b| b.build_id == build_id)
                    .ok_or(Error::BuildNotFound { build_id })?;
                vec![build]
            }
            None => self.builds.iter().collect(),
        };

        if opts.reassemble {
            for build in &selected {
                self.reassemble_build(build, out_dir)?;
            }
            return Ok(());
        }

        let meta_dir = out_dir.join("v2").join("meta");
        let store_dir = out_dir.join("v2").join("store");
        let mut written_meta = BTreeSet::new();
        let mut written_chunks = BTreeSet::new();

        for build in &selected {
            if !opts.chunks_only {
                let repo_hex = hex::encode(build.repository_id);
                if written_meta.insert(repo_hex.clone()) {
                    let body =
                        self.read_build_file(build.repository_offset, build.repository_size)?;
                    write_file(&meta_dir.join(galaxy_path(&repo_hex)), &body)?;
                }
            }

            for manifest in &build.manifests {
                let depot_hex = hex::encode(manifest.depot_id);
                let body = self.read_build_file(manifest.offset, manifest.size)?;
                if !opts.chunks_only && written_meta.insert(depot_hex.clone()) {
                    write_file(&meta_dir.join(galaxy_path(&depot_hex)), &body)?;
                }

                let manifest_json = inflate_value(&body)?;
                for chunk_hex in crate::writer::manifest_chunk_ids(&manifest_json) {
                    if !written_chunks.insert(chunk_hex.clone()) {
                        continue;
                    }
                    let Some(location) = self.find_chunk(&chunk_hex) else {
                        // Phantom chunks of SFC members are expected to be
                        // absent; their bytes live in the container.
                        debug!("chunk {chunk_hex} not archived, skipping");
                        continue;
                    };
                    let chunk_body = self.read_chunk(location)?;
                    let dest = store_dir
                        .join(location.product_id.to_string())
                        .join(galaxy_path(&chunk_hex));
                    write_file(&dest, &chunk_body)?;
                }
            }
        }

        Ok(())
    }

    fn reassemble_build(&self, build: &BuildRecord, out_dir: &Path) -> Result<()> {
        let product_id = self
            .product
            .as_ref()
            .map(|p| p.product_id.to_string())
            .unwrap_or_default();

        for manifest in &build.manifests {
            let body = self.read_build_file(manifest.offset, manifest.size)?;
            let manifest_json = inflate_value(&body)?;
            let items = parse_depot_items(&manifest_json, &product_id, false)?;

            // The container body is needed before any member is written.
            let mut container: Option<Vec<u8>> = None;
            if let Some(DepotItem::V2Sfc(sfc)) =
                items.iter().find(|i| matches!(i, DepotItem::V2Sfc(_)))
            {
                let mut buffer = Vec::with_capacity(sfc.total_size_uncompressed as usize);
                for chunk in &sfc.chunks {
                    buffer.extend_from_slice(&self.inflate_archived_chunk(chunk)?);
                }
                container = Some(buffer);
            }

            for item in &items {
                let DepotItem::V2File(file) = item else {
                    continue;
                };
                let dest = out_dir.join(&file.path);

                if let Some(sfc_ref) = file.sfc_ref {
                    let Some(buffer) = &container else {
                        warn!("{}: sfc member without container, skipping", file.path);
                        continue;
                    };
                    let end = (sfc_ref.offset + sfc_ref.size) as usize;
                    if end > buffer.len() {
                        return Err(Error::invalid_archive(format!(
                            "{}: sfc reference outside container",
                            file.path
                        )));
                    }
                    write_file(&dest, &buffer[sfc_ref.offset as usize..end])?;
                    continue;
                }

                let mut plain = Vec::with_capacity(file.total_size_uncompressed as usize);
                for chunk in &file.chunks {
                    plain.extend_from_slice(&self.inflate_archived_chunk(chunk)?);
                }
                if let Some(expected) = &file.md5 {
                    let actual = md5_hex(&plain);
                    if &actual != expected {
                        return Err(Error::verify_failed(&file.path, expected, actual));
                    }
                }
                write_file(&dest, &plain)?;
            }
        }

        info!("reassembled build {} into {}", build.build_id, out_dir.display());
        Ok(())
    }

    fn inflate_archived_chunk(&self, chunk: &galaxy_manifest::Chunk) -> Result<Vec<u8>> {
        let location = self.find_chunk(&chunk.md5_compressed).ok_or_else(|| {
            Error::invalid_archive(format!("chunk {} not in archive", chunk.md5_compressed))
        })?;
        let body = self.read_chunk(location)?;

        if chunk.size_compressed == chunk.size_uncompressed {
            return Ok(body);
        }
        let mut decoder = ZlibDecoder::new(body.as_slice());
        let mut plain = Vec::with_capacity(chunk.size_uncompressed as usize);
        decoder.read_to_end(&mut plain)?;
        Ok(plain)
    }
}

fn index_part_chunks(
    file: &mut File,
    header: &RgogHeader,
    part_number: u32,
    index: &mut BTreeMap<[u8; 16], ChunkLocation>,
) -> Result<()> {
    if header.local_chunk_count == 0 {
        return Ok(());
    }
    file.seek(SeekFrom::Start(header.chunk_metadata.offset))?;
    let mut body = vec![0u8; header.chunk_metadata.size as usize];
    file.read_exact(&mut body)?;
    let mut cursor = &body[..];
    for _ in 0..header.local_chunk_count {
        let record = ChunkRecord::read_from(&mut cursor)?;
        index.insert(
            record.compressed_md5,
            ChunkLocation {
                part: part_number,
                offset: header.chunk_files.offset + record.offset,
                size: record.size,
                product_id: record.product_id,
            },
        );
    }
    Ok(())
}

fn check_sections(header: &RgogHeader, file_len: u64, part: u32) -> Result<()> {
    for (name, section) in [
        ("product metadata", &header.product_metadata),
        ("build metadata", &header.build_metadata),
        ("build files", &header.build_files),
        ("chunk metadata", &header.chunk_metadata),
        ("chunk files", &header.chunk_files),
    ] {
        if section.is_present() && (section.offset < HEADER_SIZE || section.end() > file_len) {
            return Err(Error::invalid_archive(format!(
                "part {part}: {name} section [{}, {}) outside file of {file_len} bytes",
                section.offset,
                section.end()
            )));
        }
    }
    Ok(())
}

fn read_at(path: &Path, offset: u64, size: u64) -> Result<Vec<u8>> {
    let mut file = File::open(path)?;
    file.seek(SeekFrom::Start(offset))?;
    let mut body = vec![0u8; size as usize];
    file.read_exact(&mut body)?;
    Ok(body)
}

fn write_file(path: &Path, body: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, body)?;
    Ok(())
}

fn write_debug_json(out_dir: &Path, hex_name: &str, kind: &str, compressed: &[u8]) -> Result<()> {
    let value = inflate_value(compressed)?;
    let pretty = serde_json::to_string_pretty(&value)?;
    let dest = out_dir.join("debug").join(format!("{hex_name}_{kind}.json"));
    write_file(&dest, pretty.as_bytes())
}

fn inflate_value(compressed: &[u8]) -> Result<serde_json::Value> {
    let mut decoder = ZlibDecoder::new(compressed);
    let mut plain = Vec::new();
    decoder.read_to_end(&mut plain)?;
    Ok(serde_json::from_slice(&plain)?)
}
