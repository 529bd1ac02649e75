//! Deterministic archive packing
//!
//! Packing is a pre-scan followed by a straight sequential emission: the
//! scan fixes every section size and entry offset up front, so each part
//! is written once with no back-patching and the output depends only on
//! the input tree and the part-size limit.
//!
//! Determinism rules: builds ascend by build id; repositories and depot
//! manifests are placed in lowercase-hex order of their content address;
//! chunks are ordered globally by lowercase hex of their compressed MD5;
//! alignment padding is NUL; stored bytes are never recompressed.

use std::collections::{BTreeMap, BTreeSet};
use std::fs::File;
use std::io::{BufWriter, Read, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use flate2::read::ZlibDecoder;
use galaxy_manifest::galaxy_path;

use crate::error::{Error, Result};
use crate::format::{
    align_up, BuildRecord, ChunkRecord, ManifestRecord, OsCode, ProductRecord, RgogHeader,
    Section, CHUNK_RECORD_SIZE, DEFAULT_PART_SIZE, HEADER_SIZE, TYPE_BASE,
};
use crate::languages::LanguageSet;

/// Options for [`pack`].
#[derive(Debug, Clone)]
pub struct PackOptions {
    /// Data-byte budget per part (BuildFiles + ChunkFiles, excluding
    /// metadata and padding)
    pub max_part_size: u64,
    /// Archive type byte
    pub archive_type: u8,
    /// Pack only the named build and the chunks its manifests reference
    pub build_id: Option<u64>,
    /// Product display name; defaults to the input directory name
    pub product_name: Option<String>,
}

impl Default for PackOptions {
    fn default() -> Self {
        Self {
            max_part_size: DEFAULT_PART_SIZE,
            archive_type: TYPE_BASE,
            build_id: None,
            product_name: None,
        }
    }
}

/// Result of a pack operation.
#[derive(Debug)]
pub struct PackSummary {
    /// Written part files, part 0 first
    pub parts: Vec<PathBuf>,
    /// Builds packed
    pub builds: usize,
    /// Unique chunks packed
    pub chunks: usize,
    /// Total data bytes (build files + chunk files)
    pub data_bytes: u64,
}

#[derive(Debug, Clone)]
struct DepotRef {
    manifest: String,
    product_id: u64,
    languages: Vec<String>,
}

#[derive(Debug, Clone)]
struct RepositoryInfo {
    path: PathBuf,
    id: [u8; 16],
    id_hex: String,
    build_id: u64,
    product_id: u64,
    os: OsCode,
    depots: Vec<DepotRef>,
    offline_manifest: Option<String>,
    file_size: u64,
}

#[derive(Debug, Clone)]
struct ChunkInfo {
    path: PathBuf,
    md5: [u8; 16],
    hex: String,
    size: u64,
    product_id: u64,
}

/// Pack a mirrored `{input}/v2/{meta,store}` tree into `output` (part 0)
/// plus `{stem}.part{n}.rgog` siblings as the part-size limit requires.
pub fn pack(input_root: &Path, output: &Path, opts: &PackOptions) -> Result<PackSummary> {
    let v2_dir = input_root.join("v2");
    let meta_dir = v2_dir.join("meta");
    let store_dir = v2_dir.join("store");
    if !meta_dir.is_dir() {
        return Err(Error::invalid_input(format!(
            "meta directory not found: {}",
            meta_dir.display()
        )));
    }
    if !store_dir.is_dir() {
        return Err(Error::invalid_input(format!(
            "store directory not found: {}",
            store_dir.display()
        )));
    }

    // Scan phase: identify repositories, collect builds and chunks.
    let mut repositories = scan_repositories(&meta_dir)?;
    if let Some(wanted) = opts.build_id {
        repositories.retain(|r| r.build_id == wanted);
        if repositories.is_empty() {
            return Err(Error::BuildNotFound { build_id: wanted });
        }
    }
    if repositories.is_empty() {
        return Err(Error::invalid_input("no repository files in meta tree"));
    }

    let mut builds: BTreeMap<u64, RepositoryInfo> = BTreeMap::new();
    for repo in repositories {
        builds.insert(repo.build_id, repo);
    }

    let chunks = if opts.build_id.is_some() {
        let repo = builds.values().next().map(|r| r.clone());
        chunks_for_build(
            &meta_dir,
            &store_dir,
            repo.as_ref().ok_or_else(|| Error::invalid_input("no build"))?,
        )?
    } else {
        scan_chunks(&store_dir)?
    };
    info!("pack scan: {} builds, {} chunks", builds.len(), chunks.len());

    // Resolve the depot manifest files every build references, placed
    // after the repositories in hex order.
    let mut manifest_files: BTreeMap<String, (PathBuf, u64)> = BTreeMap::new();
    for repo in builds.values() {
        for depot in &repo.depots {
            if manifest_files.contains_key(&depot.manifest) {
                continue;
            }
            let path = meta_dir.join(galaxy_path(&depot.manifest));
            match path.metadata() {
                Ok(meta) => {
                    manifest_files.insert(depot.manifest.clone(), (path, meta.len()));
                }
                Err(_) => {
                    warn!("depot manifest {} not in meta tree, skipping", depot.manifest);
                }
            }
        }
    }

    // BuildFiles layout: repositories in hex order, then manifests.
    let mut repo_order: Vec<&RepositoryInfo> = builds.values().collect();
    repo_order.sort_by(|a, b| a.id_hex.cmp(&b.id_hex));

    let mut build_files_offsets: BTreeMap<String, (u64, u64)> = BTreeMap::new();
    let mut cursor = 0u64;
    for repo in &repo_order {
        build_files_offsets.insert(repo.id_hex.clone(), (cursor, repo.file_size));
        cursor += repo.file_size;
    }
    for (hex, (_, size)) in &manifest_files {
        build_files_offsets.insert(hex.clone(), (cursor, *size));
        cursor += *size;
    }
    let build_files_size = cursor;

    // Build records with the precomputed offsets.
    let mut build_records = Vec::with_capacity(builds.len());
    for repo in builds.values() {
        let (repository_offset, repository_size) = build_files_offsets[&repo.id_hex];
        let mut manifests = Vec::new();
        let mut depots = repo.depots.clone();
        depots.sort_by(|a, b| a.manifest.cmp(&b.manifest));
        depots.dedup_by(|a, b| a.manifest == b.manifest);
        for depot in depots {
            let Some((offset, size)) = build_files_offsets.get(&depot.manifest).copied() else {
                continue;
            };
            let depot_id = decode_md5(&depot.manifest)?;
            manifests.push(ManifestRecord {
                depot_id,
                offset,
                size,
                languages: LanguageSet::encode(&depot.languages),
            });
        }
        build_records.push(BuildRecord {
            build_id: repo.build_id,
            os: repo.os,
            repository_id: repo.id,
            repository_offset,
            repository_size,
            manifests,
        });
    }

    // Part assignment: walk chunks in global order; the budget counts data
    // bytes only. Part 0 starts charged with the BuildFiles bytes. A chunk
    // larger than the whole budget gets a part to itself.
    let mut parts: Vec<Vec<ChunkInfo>> = vec![Vec::new()];
    let mut used = build_files_size;
    for chunk in chunks {
        let fits = used + chunk.size <= opts.max_part_size;
        let empty_data_part = used == 0;
        if !fits && !empty_data_part {
            parts.push(Vec::new());
            used = 0;
        }
        used += chunk.size;
        parts
            .last_mut()
            .ok_or_else(|| Error::invalid_input("no part"))?
            .push(chunk);
    }
    let total_parts = parts.len() as u32;
    let total_chunks: usize = parts.iter().map(|p| p.len()).sum();
    let data_bytes =
        build_files_size + parts.iter().flatten().map(|c| c.size).sum::<u64>();

    let product = {
        let first = builds
            .values()
            .next()
            .ok_or_else(|| Error::invalid_input("no builds"))?;
        let name = opts.product_name.clone().unwrap_or_else(|| {
            input_root
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default()
        });
        ProductRecord {
            product_id: first.product_id,
            name,
        }
    };

    // Emission phase.
    let mut written_parts = Vec::with_capacity(parts.len());
    for (part_number, part_chunks) in parts.iter().enumerate() {
        let part_path = part_path_for(output, part_number as u32);
        if part_number == 0 {
            write_part_0(
                &part_path,
                opts.archive_type,
                total_parts,
                &product,
                &build_records,
                &repo_order,
                &manifest_files,
                build_files_size,
                total_chunks as u32,
                part_chunks,
            )?;
        } else {
            write_part_n(
                &part_path,
                opts.archive_type,
                part_number as u32,
                total_parts,
                build_records.len() as u16,
                total_chunks as u32,
                part_chunks,
            )?;
        }
        info!("wrote {}", part_path.display());
        written_parts.push(part_path);
    }

    Ok(PackSummary {
        parts: written_parts,
        builds: build_records.len(),
        chunks: total_chunks,
        data_bytes,
    })
}

/// Path of part `n`: part 0 keeps the output name, later parts become
/// `{stem}.part{n}.rgog`.
pub fn part_path_for(output: &Path, part_number: u32) -> PathBuf {
    if part_number == 0 {
        return output.to_path_buf();
    }
    let stem = output
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let stem = stem.strip_suffix(".rgog").unwrap_or(&stem);
    output.with_file_name(format!("{stem}.part{part_number}.rgog"))
}

#[allow(clippy::too_many_arguments)]
fn write_part_0(
    path: &Path,
    archive_type: u8,
    total_parts: u32,
    product: &ProductRecord,
    build_records: &[BuildRecord],
    repo_order: &[&RepositoryInfo],
    manifest_files: &BTreeMap<String, (PathBuf, u64)>,
    build_files_size: u64,
    total_chunks: u32,
    chunks: &[ChunkInfo],
) -> Result<()> {
    let product_metadata = Section {
        offset: HEADER_SIZE,
        size: product.byte_size(),
    };
    let build_metadata = Section {
        offset: align_up(product_metadata.end()),
        size: build_records.iter().map(|b| b.byte_size()).sum(),
    };
    let build_files = Section {
        offset: align_up(build_metadata.end()),
        size: build_files_size,
    };
    let chunk_metadata = Section {
        offset: align_up(build_files.end()),
        size: CHUNK_RECORD_SIZE * chunks.len() as u64,
    };
    let chunk_files = Section {
        offset: align_up(chunk_metadata.end()),
        size: chunks.iter().map(|c| c.size).sum(),
    };

    let header = RgogHeader {
        archive_type,
        part_number: 0,
        total_parts,
        total_build_count: build_records.len() as u16,
        total_chunk_count: total_chunks,
        local_chunk_count: chunks.len() as u32,
        product_metadata,
        build_metadata,
        build_files,
        chunk_metadata: zero_if_empty(chunk_metadata),
        chunk_files: zero_if_empty(chunk_files),
    };

    let file = File::create(path)?;
    let mut writer = CountingWriter::new(BufWriter::new(file));

    header.write_to(&mut writer)?;
    product.write_to(&mut writer)?;

    writer.pad_to(build_metadata.offset)?;
    for record in build_records {
        record.write_to(&mut writer)?;
    }

    writer.pad_to(build_files.offset)?;
    for repo in repo_order {
        copy_file(&repo.path, &mut writer)?;
    }
    for (path, _) in manifest_files.values() {
        copy_file(path, &mut writer)?;
    }
    debug_assert_eq!(writer.position(), build_files.end());

    if !chunks.is_empty() {
        writer.pad_to(chunk_metadata.offset)?;
        write_chunk_records(&mut writer, chunks)?;
        writer.pad_to(chunk_files.offset)?;
        for chunk in chunks {
            copy_file(&chunk.path, &mut writer)?;
        }
    }

    writer.into_inner().flush()?;
    Ok(())
}

fn write_part_n(
    path: &Path,
    archive_type: u8,
    part_number: u32,
    total_parts: u32,
    total_build_count: u16,
    total_chunks: u32,
    chunks: &[ChunkInfo],
) -> Result<()> {
    let chunk_metadata = Section {
        offset: HEADER_SIZE,
        size: CHUNK_RECORD_SIZE * chunks.len() as u64,
    };
    let chunk_files = Section {
        offset: align_up(chunk_metadata.end()),
        size: chunks.iter().map(|c| c.size).sum(),
    };

    let header = RgogHeader {
        archive_type,
        part_number,
        total_parts,
        total_build_count,
        total_chunk_count: total_chunks,
        local_chunk_count: chunks.len() as u32,
        product_metadata: Section::default(),
        build_metadata: Section::default(),
        build_files: Section::default(),
        chunk_metadata,
        chunk_files,
    };

    let file = File::create(path)?;
    let mut writer = CountingWriter::new(BufWriter::new(file));

    header.write_to(&mut writer)?;
    write_chunk_records(&mut writer, chunks)?;
    writer.pad_to(chunk_files.offset)?;
    for chunk in chunks {
        copy_file(&chunk.path, &mut writer)?;
    }

    writer.into_inner().flush()?;
    Ok(())
}

fn write_chunk_records<W: Write>(writer: &mut W, chunks: &[ChunkInfo]) -> Result<()> {
    let mut offset = 0u64;
    for chunk in chunks {
        ChunkRecord {
            compressed_md5: chunk.md5,
            offset,
            size: chunk.size,
            product_id: chunk.product_id,
        }
        .write_to(writer)?;
        offset += chunk.size;
    }
    Ok(())
}

fn zero_if_empty(section: Section) -> Section {
    if section.size == 0 {
        Section::default()
    } else {
        section
    }
}

/// Recursively scan the meta tree and keep the files that decode to
/// repository JSON (root-level `buildId` + `depots`). Depot manifests are
/// located later through the repositories that reference them.
fn scan_repositories(meta_dir: &Path) -> Result<Vec<RepositoryInfo>> {
    let mut repositories = Vec::new();

    for path in collect_files(meta_dir)? {
        let Some(name) = path.file_name().map(|n| n.to_string_lossy().into_owned()) else {
            continue;
        };
        let Ok(id) = decode_md5(&name) else {
            continue;
        };

        let compressed = std::fs::read(&path)?;
        let Ok(json) = inflate_json(&compressed) else {
            continue;
        };
        let (Some(build_id), Some(depots)) = (json.get("buildId"), json.get("depots")) else {
            continue;
        };
        let Some(build_id) = as_u64(build_id) else {
            warn!("{name}: non-numeric buildId, skipping repository");
            continue;
        };
        let product_id = json.get("baseProductId").and_then(as_u64).unwrap_or(0);
        let platform = json
            .get("platform")
            .and_then(|v| v.as_str())
            .unwrap_or_default();

        let mut depot_refs = Vec::new();
        if let Some(entries) = depots.as_array() {
            for entry in entries {
                let Some(manifest) = entry.get("manifest").and_then(|v| v.as_str()) else {
                    continue;
                };
                let languages = entry
                    .get("languages")
                    .and_then(|v| v.as_array())
                    .map(|l| {
                        l.iter()
                            .filter_map(|v| v.as_str().map(str::to_string))
                            .collect()
                    })
                    .unwrap_or_default();
                let depot_product = entry.get("productId").and_then(as_u64).unwrap_or(product_id);
                depot_refs.push(DepotRef {
                    manifest: manifest.to_lowercase(),
                    product_id: depot_product,
                    languages,
                });
            }
        }

        let offline_manifest = json
            .pointer("/offlineDepot/manifest")
            .and_then(|v| v.as_str())
            .map(|s| s.to_lowercase());

        debug!("repository {name}: build {build_id}, {} depots", depot_refs.len());
        repositories.push(RepositoryInfo {
            file_size: compressed.len() as u64,
            path,
            id,
            id_hex: name.to_lowercase(),
            build_id,
            product_id,
            os: OsCode::from_platform(platform),
            depots: depot_refs,
            offline_manifest,
        });
    }

    repositories.sort_by(|a, b| a.id_hex.cmp(&b.id_hex));
    Ok(repositories)
}

/// Scan every chunk of the store tree: `store/{pid}/{aa}/{bb}/{hash}`,
/// globally ordered by hash, deduplicated.
fn scan_chunks(store_dir: &Path) -> Result<Vec<ChunkInfo>> {
    let mut chunks: BTreeMap<String, ChunkInfo> = BTreeMap::new();

    for product_entry in std::fs::read_dir(store_dir)? {
        let product_entry = product_entry?;
        if !product_entry.file_type()?.is_dir() {
            continue;
        }
        let Ok(product_id) = product_entry
            .file_name()
            .to_string_lossy()
            .parse::<u64>()
        else {
            warn!(
                "store entry {:?} is not a product id, skipping",
                product_entry.file_name()
            );
            continue;
        };

        for path in collect_files(&product_entry.path())? {
            let Some(name) = path.file_name().map(|n| n.to_string_lossy().to_lowercase()) else {
                continue;
            };
            let Ok(md5) = decode_md5(&name) else {
                continue;
            };
            let size = path.metadata()?.len();
            chunks.entry(name.clone()).or_insert(ChunkInfo {
                path,
                md5,
                hex: name,
                size,
                product_id,
            });
        }
    }

    Ok(chunks.into_values().collect())
}

/// Chunks referenced by one build's depot manifests, in global hash
/// order. The offline depot is skipped: its chunks are not downloadable,
/// so they are never mirrored.
fn chunks_for_build(
    meta_dir: &Path,
    store_dir: &Path,
    repo: &RepositoryInfo,
) -> Result<Vec<ChunkInfo>> {
    let mut wanted: BTreeMap<String, u64> = BTreeMap::new();

    for depot in &repo.depots {
        if Some(&depot.manifest) == repo.offline_manifest.as_ref() {
            debug!("skipping offline depot {}", depot.manifest);
            continue;
        }
        let manifest_path = meta_dir.join(galaxy_path(&depot.manifest));
        let Ok(compressed) = std::fs::read(&manifest_path) else {
            warn!("depot manifest {} missing from meta tree", depot.manifest);
            continue;
        };
        let json = inflate_json(&compressed)?;
        for hex in manifest_chunk_ids(&json) {
            wanted.entry(hex).or_insert(depot.product_id);
        }
    }

    let mut chunks = Vec::with_capacity(wanted.len());
    for (hex, product_id) in wanted {
        let path = store_dir
            .join(product_id.to_string())
            .join(galaxy_path(&hex));
        let Ok(meta) = path.metadata() else {
            warn!("chunk {hex} not in store tree, skipping");
            continue;
        };
        chunks.push(ChunkInfo {
            md5: decode_md5(&hex)?,
            path,
            hex,
            size: meta.len(),
            product_id,
        });
    }

    Ok(chunks)
}

/// Every `compressedMd5` a depot manifest references, including the Small
/// Files Container's own chunks.
pub(crate) fn manifest_chunk_ids(manifest: &serde_json::Value) -> BTreeSet<String> {
    let mut ids = BTreeSet::new();
    let chunk_lists = manifest
        .pointer("/depot/items")
        .and_then(|v| v.as_array())
        .into_iter()
        .flatten()
        .chain(manifest.pointer("/depot/smallFilesContainer").into_iter());

    for item in chunk_lists {
        if let Some(chunks) = item.get("chunks").and_then(|v| v.as_array()) {
            for chunk in chunks {
                if let Some(hex) = chunk.get("compressedMd5").and_then(|v| v.as_str()) {
                    ids.insert(hex.to_lowercase());
                }
            }
        }
    }
    ids
}

fn collect_files(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    let mut stack = vec![dir.to_path_buf()];
    while let Some(current) = stack.pop() {
        for entry in std::fs::read_dir(&current)? {
            let entry = entry?;
            let file_type = entry.file_type()?;
            if file_type.is_dir() {
                stack.push(entry.path());
            } else if file_type.is_file() {
                files.push(entry.path());
            }
        }
    }
    files.sort();
    Ok(files)
}

fn inflate_json(compressed: &[u8]) -> Result<serde_json::Value> {
    if !galaxy_manifest::is_zlib(compressed) {
        return Err(Error::invalid_input("not a zlib stream"));
    }
    let mut decoder = ZlibDecoder::new(compressed);
    let mut plain = Vec::new();
    decoder.read_to_end(&mut plain)?;
    Ok(serde_json::from_slice(&plain)?)
}

fn as_u64(value: &serde_json::Value) -> Option<u64> {
    match value {
        serde_json::Value::Number(n) => n.as_u64(),
        serde_json::Value::String(s) => s.parse().ok(),
        _ => None,
    }
}

fn decode_md5(hex_str: &str) -> Result<[u8; 16]> {
    if hex_str.len() != 32 {
        return Err(Error::invalid_input(format!("not an MD5 name: {hex_str}")));
    }
    let decoded = hex::decode(hex_str)
        .map_err(|_| Error::invalid_input(format!("not an MD5 name: {hex_str}")))?;
    let mut out = [0u8; 16];
    out.copy_from_slice(&decoded);
    Ok(out)
}

fn copy_file<W: Write>(path: &Path, writer: &mut W) -> Result<()> {
    let mut file = File::open(path)?;
    std::io::copy(&mut file, writer)?;
    Ok(())
}

/// Writer that tracks its position so sections can be NUL-padded to their
/// precomputed offsets.
struct CountingWriter<W: Write> {
    inner: W,
    position: u64,
}

impl<W: Write> CountingWriter<W> {
    fn new(inner: W) -> Self {
        Self { inner, position: 0 }
    }

    fn position(&self) -> u64 {
        self.position
    }

    fn pad_to(&mut self, target: u64) -> Result<()> {
        if target < self.position {
            return Err(Error::invalid_archive(format!(
                "layout error: position {} past target {target}",
                self.position
            )));
        }
        let padding = (target - self.position) as usize;
        if padding > 0 {
            self.inner.write_all(&vec![0u8; padding])?;
            self.position = target;
        }
        Ok(())
    }

    fn into_inner(self) -> W {
        self.inner
    }
}

impl<W: Write> Write for CountingWriter<W> {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        let written = self.inner.write(buf)?;
        self.position += written as u64;
        Ok(written)
    }

    fn flush(&mut self) -> std::io::Result<()> {
        self.inner.flush()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_part_path_for() {
        let output = Path::new("/tmp/DREDGE.rgog");
        assert_eq!(part_path_for(output, 0), PathBuf::from("/tmp/DREDGE.rgog"));
        assert_eq!(
            part_path_for(output, 2),
            PathBuf::from("/tmp/DREDGE.part2.rgog")
        );
    }

    #[test]
    fn test_as_u64_accepts_both_shapes() {
        assert_eq!(as_u64(&serde_json::json!(42)), Some(42));
        assert_eq!(as_u64(&serde_json::json!("42")), Some(42));
        assert_eq!(as_u64(&serde_json::json!(null)), None);
    }

    #[test]
    fn test_decode_md5_rejects_garbage() {
        assert!(decode_md5("repository").is_err());
        assert!(decode_md5(&"zz".repeat(16)).is_err());
        assert!(decode_md5(&"ab".repeat(16)).is_ok());
    }

    #[test]
    fn test_manifest_chunk_ids_includes_sfc() {
        let manifest = serde_json::json!({
            "depot": {
                "smallFilesContainer": {
                    "chunks": [{"compressedMd5": "AA".repeat(16)}]
                },
                "items": [
                    {"chunks": [{"compressedMd5": "bb".repeat(16)},
                                {"compressedMd5": "cc".repeat(16)}]},
                    {"chunks": [{"compressedMd5": "bb".repeat(16)}]}
                ]
            }
        });
        let ids = manifest_chunk_ids(&manifest);
        assert_eq!(ids.len(), 3);
        assert!(ids.contains(&"aa".repeat(16)));
    }
}
