//! Pack/unpack round-trips, determinism and multi-part splitting

use std::fs;
use std::io::Write;
use std::path::Path;

use flate2::write::ZlibEncoder;
use flate2::Compression;
use serde_json::json;

use galaxy_manifest::{galaxy_path, md5_hex};
use rgog::{pack, Archive, Error, ExtractOptions, PackOptions, UnpackOptions};

fn zlib(data: &[u8]) -> Vec<u8> {
    let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(data).unwrap();
    encoder.finish().unwrap()
}

/// Store a compressed body content-addressed under `base`, returning its
/// hex name.
fn put_addressed(base: &Path, compressed: &[u8]) -> String {
    let hash = md5_hex(compressed);
    let dest = base.join(galaxy_path(&hash));
    fs::create_dir_all(dest.parent().unwrap()).unwrap();
    fs::write(dest, compressed).unwrap();
    hash
}

struct Tree {
    chunk_plain: Vec<u8>,
    chunk_hash: String,
    manifest_hash: String,
    repo_hash: String,
}

/// One build, one depot manifest, one chunk: the smallest complete tree.
fn make_tree(root: &Path) -> Tree {
    let meta = root.join("v2").join("meta");
    let store = root.join("v2").join("store").join("1234");

    let chunk_plain = b"the quick brown fox jumps over the lazy dog".to_vec();
    let chunk_compressed = zlib(&chunk_plain);
    let chunk_hash = put_addressed(&store, &chunk_compressed);

    let manifest = json!({
        "depot": {
            "items": [{
                "type": "DepotFile",
                "path": "game.exe",
                "md5": md5_hex(&chunk_plain),
                "chunks": [{
                    "compressedMd5": chunk_hash,
                    "md5": md5_hex(&chunk_plain),
                    "compressedSize": chunk_compressed.len(),
                    "size": chunk_plain.len()
                }]
            }]
        }
    });
    let manifest_hash = put_addressed(&meta, &zlib(manifest.to_string().as_bytes()));

    let repository = json!({
        "baseProductId": "1234",
        "buildId": 51,
        "platform": "windows",
        "depots": [{
            "productId": "1234",
            "manifest": manifest_hash,
            "languages": ["en-US"]
        }]
    });
    let repo_hash = put_addressed(&meta, &zlib(repository.to_string().as_bytes()));

    Tree {
        chunk_plain,
        chunk_hash,
        manifest_hash,
        repo_hash,
    }
}

/// Collect `relative path -> bytes` for every file under a root.
fn snapshot(root: &Path) -> std::collections::BTreeMap<String, Vec<u8>> {
    let mut files = std::collections::BTreeMap::new();
    let mut stack = vec![root.to_path_buf()];
    while let Some(dir) = stack.pop() {
        for entry in fs::read_dir(&dir).unwrap() {
            let entry = entry.unwrap();
            if entry.file_type().unwrap().is_dir() {
                stack.push(entry.path());
            } else {
                let relative = entry
                    .path()
                    .strip_prefix(root)
                    .unwrap()
                    .to_string_lossy()
                    .into_owned();
                files.insert(relative, fs::read(entry.path()).unwrap());
            }
        }
    }
    files
}

#[test]
fn pack_then_unpack_is_bitwise_identity() {
    let input = tempfile::tempdir().unwrap();
    let tree = make_tree(input.path());

    let out_dir = tempfile::tempdir().unwrap();
    let archive_path = out_dir.path().join("out.rgog");
    let summary = pack(
        input.path(),
        &archive_path,
        &PackOptions {
            max_part_size: 1024 * 1024,
            ..Default::default()
        },
    )
    .unwrap();
    assert_eq!(summary.parts.len(), 1);
    assert_eq!(summary.builds, 1);
    assert_eq!(summary.chunks, 1);

    let restored = tempfile::tempdir().unwrap();
    let archive = Archive::open(&archive_path).unwrap();
    archive
        .unpack(restored.path(), &UnpackOptions::default())
        .unwrap();

    let original = snapshot(&input.path().join("v2"));
    let roundtripped = snapshot(&restored.path().join("v2"));
    assert_eq!(original, roundtripped);
    // Keep the tree fields honest
    assert!(original
        .keys()
        .any(|k| k.ends_with(&tree.chunk_hash)));
    assert!(original.keys().any(|k| k.ends_with(&tree.repo_hash)));
}

#[test]
fn packing_is_deterministic() {
    let input = tempfile::tempdir().unwrap();
    make_tree(input.path());

    let out_dir = tempfile::tempdir().unwrap();
    let first = out_dir.path().join("a.rgog");
    let second = out_dir.path().join("b.rgog");
    let opts = PackOptions::default();

    pack(input.path(), &first, &opts).unwrap();
    pack(input.path(), &second, &opts).unwrap();

    assert_eq!(fs::read(first).unwrap(), fs::read(second).unwrap());
}

#[test]
fn tiny_part_limit_gives_each_chunk_its_own_part() {
    let input = tempfile::tempdir().unwrap();
    let meta = input.path().join("v2").join("meta");
    let store = input.path().join("v2").join("store").join("1234");

    // Three distinct chunks referenced by one manifest
    let mut chunk_entries = Vec::new();
    for seed in 0u8..3 {
        let plain: Vec<u8> = (0..500).map(|i| (i as u8).wrapping_add(seed)).collect();
        let compressed = zlib(&plain);
        let hash = put_addressed(&store, &compressed);
        chunk_entries.push(json!({
            "compressedMd5": hash,
            "md5": md5_hex(&plain),
            "compressedSize": compressed.len(),
            "size": plain.len()
        }));
    }
    let manifest = json!({"depot": {"items": [{
        "type": "DepotFile", "path": "big.pak", "chunks": chunk_entries
    }]}});
    let manifest_hash = put_addressed(&meta, &zlib(manifest.to_string().as_bytes()));
    let repository = json!({
        "baseProductId": "1234", "buildId": 7, "platform": "linux",
        "depots": [{"productId": "1234", "manifest": manifest_hash, "languages": ["*"]}]
    });
    put_addressed(&meta, &zlib(repository.to_string().as_bytes()));

    let out_dir = tempfile::tempdir().unwrap();
    let archive_path = out_dir.path().join("split.rgog");
    // Limit smaller than any single chunk: every chunk lands alone
    let summary = pack(
        input.path(),
        &archive_path,
        &PackOptions {
            max_part_size: 1,
            ..Default::default()
        },
    )
    .unwrap();

    assert_eq!(summary.chunks, 3);
    assert_eq!(summary.parts.len(), 4); // build files, then one part per chunk
    assert!(out_dir.path().join("split.part1.rgog").is_file());
    assert!(out_dir.path().join("split.part3.rgog").is_file());

    // The merged index still restores everything
    let restored = tempfile::tempdir().unwrap();
    let archive = Archive::open(&archive_path).unwrap();
    assert_eq!(archive.stats().indexed_chunks, 3);
    archive
        .unpack(restored.path(), &UnpackOptions::default())
        .unwrap();
    assert_eq!(
        snapshot(&input.path().join("v2")),
        snapshot(&restored.path().join("v2"))
    );
}

#[test]
fn listing_exposes_build_metadata() {
    let input = tempfile::tempdir().unwrap();
    let tree = make_tree(input.path());

    let out_dir = tempfile::tempdir().unwrap();
    let archive_path = out_dir.path().join("list.rgog");
    pack(input.path(), &archive_path, &PackOptions::default()).unwrap();

    let archive = Archive::open(&archive_path).unwrap();
    assert_eq!(archive.product().unwrap().product_id, 1234);

    let builds = archive.builds();
    assert_eq!(builds.len(), 1);
    assert_eq!(builds[0].build_id, 51);
    assert_eq!(builds[0].os.name(), "Windows");
    assert_eq!(hex::encode(builds[0].repository_id), tree.repo_hash);
    assert_eq!(builds[0].manifests.len(), 1);
    assert_eq!(hex::encode(builds[0].manifests[0].depot_id), tree.manifest_hash);
    assert_eq!(builds[0].manifests[0].languages.decode(), vec!["en-US"]);
}

#[test]
fn full_verify_catches_corrupted_chunk() {
    let input = tempfile::tempdir().unwrap();
    let tree = make_tree(input.path());

    let out_dir = tempfile::tempdir().unwrap();
    let archive_path = out_dir.path().join("verify.rgog");
    pack(input.path(), &archive_path, &PackOptions::default()).unwrap();

    let archive = Archive::open(&archive_path).unwrap();
    assert!(archive.verify(true).unwrap().passed());
    assert!(archive.verify(false).unwrap().passed());

    // Flip one byte inside the chunk body
    let location = archive.find_chunk(&tree.chunk_hash).unwrap();
    let mut raw = fs::read(&archive_path).unwrap();
    raw[location.offset as usize + 4] ^= 0xFF;
    fs::write(&archive_path, raw).unwrap();

    let corrupted = Archive::open(&archive_path).unwrap();
    assert!(corrupted.verify(true).unwrap().passed());
    let report = corrupted.verify(false).unwrap();
    assert!(!report.passed());
    assert!(report.errors[0].contains(&tree.chunk_hash));
}

#[test]
fn extract_reassembles_plaintext_files() {
    let input = tempfile::tempdir().unwrap();
    let tree = make_tree(input.path());

    let out_dir = tempfile::tempdir().unwrap();
    let archive_path = out_dir.path().join("extract.rgog");
    pack(input.path(), &archive_path, &PackOptions::default()).unwrap();

    let archive = Archive::open(&archive_path).unwrap();
    let game_dir = tempfile::tempdir().unwrap();
    archive
        .extract(
            game_dir.path(),
            &ExtractOptions {
                build_id: Some(51),
                reassemble: true,
                chunks_only: false,
            },
        )
        .unwrap();

    assert_eq!(
        fs::read(game_dir.path().join("game.exe")).unwrap(),
        tree.chunk_plain
    );
}

#[test]
fn extract_unknown_build_is_an_error() {
    let input = tempfile::tempdir().unwrap();
    make_tree(input.path());

    let out_dir = tempfile::tempdir().unwrap();
    let archive_path = out_dir.path().join("missing.rgog");
    pack(input.path(), &archive_path, &PackOptions::default()).unwrap();

    let archive = Archive::open(&archive_path).unwrap();
    let err = archive
        .extract(
            tempfile::tempdir().unwrap().path(),
            &ExtractOptions {
                build_id: Some(9999),
                ..Default::default()
            },
        )
        .unwrap_err();
    assert!(matches!(err, Error::BuildNotFound { build_id: 9999 }));
}

#[test]
fn reassembly_slices_sfc_members_from_container() {
    let input = tempfile::tempdir().unwrap();
    let meta = input.path().join("v2").join("meta");
    let store = input.path().join("v2").join("store").join("1234");

    let container: Vec<u8> = [vec![b'A'; 178], vec![b'B'; 241]].concat();
    let container_compressed = zlib(&container);
    let container_hash = put_addressed(&store, &container_compressed);

    let manifest = json!({
        "depot": {
            "smallFilesContainer": {
                "chunks": [{
                    "compressedMd5": container_hash,
                    "md5": md5_hex(&container),
                    "compressedSize": container_compressed.len(),
                    "size": container.len()
                }]
            },
            "items": [
                {"type": "DepotFile", "path": "a.txt",
                 "md5": md5_hex(&container[..178]),
                 "sfcRef": {"offset": 0, "size": 178}, "chunks": []},
                {"type": "DepotFile", "path": "b.txt",
                 "md5": md5_hex(&container[178..]),
                 "sfcRef": {"offset": 178, "size": 241}, "chunks": []}
            ]
        }
    });
    let manifest_hash = put_addressed(&meta, &zlib(manifest.to_string().as_bytes()));
    let repository = json!({
        "baseProductId": "1234", "buildId": 3, "platform": "windows",
        "depots": [{"productId": "1234", "manifest": manifest_hash, "languages": ["en-US"]}]
    });
    put_addressed(&meta, &zlib(repository.to_string().as_bytes()));

    let out_dir = tempfile::tempdir().unwrap();
    let archive_path = out_dir.path().join("sfc.rgog");
    pack(input.path(), &archive_path, &PackOptions::default()).unwrap();

    let archive = Archive::open(&archive_path).unwrap();
    let game_dir = tempfile::tempdir().unwrap();
    archive
        .extract(
            game_dir.path(),
            &ExtractOptions {
                build_id: None,
                reassemble: true,
                chunks_only: false,
            },
        )
        .unwrap();

    assert_eq!(
        fs::read(game_dir.path().join("a.txt")).unwrap(),
        vec![b'A'; 178]
    );
    assert_eq!(
        fs::read(game_dir.path().join("b.txt")).unwrap(),
        vec![b'B'; 241]
    );
}

#[test]
fn debug_unpack_writes_readable_json() {
    let input = tempfile::tempdir().unwrap();
    let tree = make_tree(input.path());

    let out_dir = tempfile::tempdir().unwrap();
    let archive_path = out_dir.path().join("debug.rgog");
    pack(input.path(), &archive_path, &PackOptions::default()).unwrap();

    let restored = tempfile::tempdir().unwrap();
    Archive::open(&archive_path)
        .unwrap()
        .unpack(
            restored.path(),
            &UnpackOptions {
                debug: true,
                chunks_only: false,
            },
        )
        .unwrap();

    let repo_debug = restored
        .path()
        .join("debug")
        .join(format!("{}_repository.json", tree.repo_hash));
    let parsed: serde_json::Value =
        serde_json::from_slice(&fs::read(repo_debug).unwrap()).unwrap();
    assert_eq!(parsed["buildId"], 51);

    let manifest_debug = restored
        .path()
        .join("debug")
        .join(format!("{}_manifest.json", tree.manifest_hash));
    assert!(manifest_debug.is_file());
}
