//! End-to-end downloader scenarios against a stubbed CDN

use std::io::Write;
use std::sync::Arc;

use flate2::write::ZlibEncoder;
use flate2::Compression;
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use galaxy_cdn::{CdnClient, CdnEndpoints, SecureLinkProvider, StaticTokenProvider};
use galaxy_dl::{DownloadOptions, Downloaded, Downloader, Error};
use galaxy_manifest::item::SFC_PATH;
use galaxy_manifest::{md5_hex, Chunk, DepotItem, SfcRef, V1Blob, V1File, V2File, V2Sfc};

fn zlib(data: &[u8]) -> Vec<u8> {
    let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(data).unwrap();
    encoder.finish().unwrap()
}

fn chunk_for(plain: &[u8]) -> (Chunk, Vec<u8>) {
    let compressed = zlib(plain);
    let chunk = Chunk {
        md5_compressed: md5_hex(&compressed),
        md5_uncompressed: md5_hex(plain),
        size_compressed: compressed.len() as u64,
        size_uncompressed: plain.len() as u64,
        offset_compressed: 0,
        offset_uncompressed: 0,
    };
    (chunk, compressed)
}

/// Mount the secure-link endpoint answering with one CDN template rooted
/// at `{server}/cdn{store_path}`.
async fn mount_secure_link(server: &MockServer, product_id: &str, store_path: &str) {
    let body = serde_json::json!({
        "urls": [{
            "endpoint_name": "test_cdn",
            "url_format": format!("{}/cdn{{path}}", server.uri()),
            "priority": 0,
            "parameters": {"path": store_path, "expires_at": 4_000_000_000u64}
        }]
    });
    Mock::given(method("GET"))
        .and(path(format!("/products/{product_id}/secure_link")))
        .respond_with(ResponseTemplate::new(200).set_body_json(body))
        .mount(server)
        .await;
}

fn downloader_for(server: &MockServer) -> Downloader {
    let client = CdnClient::builder()
        .endpoints(CdnEndpoints::single_host(server.uri()))
        .token_provider(Arc::new(StaticTokenProvider::new("tok")))
        .initial_backoff_ms(1)
        .max_attempts(2)
        .build()
        .unwrap();
    let links = Arc::new(SecureLinkProvider::new(client.clone()));
    Downloader::new(client, links).with_workers(4)
}

#[tokio::test]
async fn v2_single_chunk_file_assembles_and_verifies() {
    let server = MockServer::start().await;
    mount_secure_link(&server, "1234", "/store/1234").await;

    let plain = b"abcdefghij";
    let (chunk, compressed) = chunk_for(plain);
    assert_eq!(chunk.md5_uncompressed, "e80b5017098950fc58aad83c8c14978e");

    let hash = chunk.md5_compressed.clone();
    Mock::given(method("GET"))
        .and(path(format!(
            "/cdn/store/1234/{}/{}/{hash}",
            &hash[0..2],
            &hash[2..4]
        )))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(compressed))
        .expect(1)
        .mount(&server)
        .await;

    let item = DepotItem::V2File(V2File {
        product_id: "1234".into(),
        path: "game.exe".into(),
        md5: Some(chunk.md5_uncompressed.clone()),
        sha256: None,
        sfc_ref: None,
        flags: Vec::new(),
        total_size_compressed: chunk.size_compressed,
        total_size_uncompressed: 10,
        is_dependency: false,
        chunks: vec![chunk],
    });

    let dir = tempfile::tempdir().unwrap();
    let downloader = downloader_for(&server);
    let outcome = downloader
        .download_item(&item, dir.path(), &DownloadOptions::default())
        .await
        .unwrap();

    let Downloaded::File(path) = outcome else {
        panic!("expected a file");
    };
    assert_eq!(std::fs::read(path).unwrap(), plain);
}

#[tokio::test]
async fn v1_blob_downloads_via_single_range() {
    let server = MockServer::start().await;
    mount_secure_link(&server, "5678", "/windows/24085618").await;

    // 1 MiB blob: one 10 MiB task covers it with a single range request
    let blob: Vec<u8> = (0..1_048_576u32).map(|i| (i % 251) as u8).collect();
    let blob_md5 = md5_hex(&blob);

    Mock::given(method("GET"))
        .and(path("/cdn/windows/24085618/main.bin"))
        .and(header("range", "bytes=0-1048575"))
        .respond_with(ResponseTemplate::new(206).set_body_bytes(blob.clone()))
        .expect(1)
        .mount(&server)
        .await;

    let item = DepotItem::V1Blob(V1Blob {
        product_id: "5678".into(),
        blob_path: "main.bin".into(),
        total_size: blob.len() as u64,
        blob_md5: blob_md5.clone(),
    });

    let dir = tempfile::tempdir().unwrap();
    let downloader = downloader_for(&server);
    let outcome = downloader
        .download_item(&item, dir.path(), &DownloadOptions::default())
        .await
        .unwrap();

    let Downloaded::File(path) = outcome else {
        panic!("expected a file");
    };
    let written = std::fs::read(path).unwrap();
    assert_eq!(written.len(), blob.len());
    assert_eq!(md5_hex(&written), blob_md5);
}

#[tokio::test]
async fn v1_file_extracts_exact_byte_window() {
    let server = MockServer::start().await;
    mount_secure_link(&server, "5678", "/windows/24085618").await;

    let window: Vec<u8> = (100u32..150).map(|i| i as u8).collect();
    Mock::given(method("GET"))
        .and(path("/cdn/windows/24085618/main.bin"))
        .and(header("range", "bytes=100-149"))
        .respond_with(ResponseTemplate::new(206).set_body_bytes(window.clone()))
        .expect(1)
        .mount(&server)
        .await;

    let item = DepotItem::V1File(V1File {
        product_id: "5678".into(),
        path: "System/engine.u".into(),
        offset: 100,
        size: 50,
        md5: md5_hex(&window),
        blob_path: "main.bin".into(),
    });

    let dir = tempfile::tempdir().unwrap();
    let downloader = downloader_for(&server);
    downloader
        .download_item(&item, dir.path(), &DownloadOptions::default())
        .await
        .unwrap();

    let written = std::fs::read(dir.path().join("System/engine.u")).unwrap();
    assert_eq!(written, window);
}

#[tokio::test]
async fn sfc_members_are_sliced_without_fetching_their_chunks() {
    let server = MockServer::start().await;
    mount_secure_link(&server, "1234", "/store/1234").await;

    let container: Vec<u8> = [vec![b'A'; 178], vec![b'B'; 241]].concat();
    let (sfc_chunk, compressed) = chunk_for(&container);

    let hash = sfc_chunk.md5_compressed.clone();
    Mock::given(method("GET"))
        .and(path(format!(
            "/cdn/store/1234/{}/{}/{hash}",
            &hash[0..2],
            &hash[2..4]
        )))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(compressed))
        .expect(1)
        .mount(&server)
        .await;

    let sfc = DepotItem::V2Sfc(V2Sfc {
        product_id: "1234".into(),
        md5: Some(sfc_chunk.md5_uncompressed.clone()),
        total_size_compressed: sfc_chunk.size_compressed,
        total_size_uncompressed: container.len() as u64,
        is_dependency: false,
        chunks: vec![sfc_chunk],
    });

    // Member chunk lists are advisory; their hashes are never mounted, so
    // any attempt to fetch them would fail the test.
    let member = |name: &str, offset: u64, size: u64, body: &[u8]| {
        DepotItem::V2File(V2File {
            product_id: "1234".into(),
            path: name.into(),
            md5: Some(md5_hex(body)),
            sha256: None,
            sfc_ref: Some(SfcRef { offset, size }),
            flags: Vec::new(),
            total_size_compressed: 0,
            total_size_uncompressed: size,
            is_dependency: false,
            chunks: Vec::new(),
        })
    };
    let items = vec![
        sfc,
        member("a.txt", 0, 178, &container[..178]),
        member("b.txt", 178, 241, &container[178..]),
    ];

    let dir = tempfile::tempdir().unwrap();
    let downloader = downloader_for(&server);
    let results = downloader
        .download_items(&items, dir.path(), &DownloadOptions::default())
        .await
        .unwrap();

    assert_eq!(results.len(), 2);
    assert!(results["a.txt"].is_ok());
    assert!(results["b.txt"].is_ok());
    assert_eq!(std::fs::read(dir.path().join("a.txt")).unwrap(), vec![b'A'; 178]);
    assert_eq!(std::fs::read(dir.path().join("b.txt")).unwrap(), vec![b'B'; 241]);
    // The container file itself is transport, not a build file
    assert!(!dir.path().join(SFC_PATH).exists());
}

#[tokio::test]
async fn hash_mismatch_retries_three_times_then_fails() {
    let server = MockServer::start().await;
    mount_secure_link(&server, "1234", "/store/1234").await;

    let plain = b"abcdefghij";
    let (chunk, _) = chunk_for(plain);

    // Every response carries wrong bytes, so each attempt mismatches
    let hash = chunk.md5_compressed.clone();
    Mock::given(method("GET"))
        .and(path(format!(
            "/cdn/store/1234/{}/{}/{hash}",
            &hash[0..2],
            &hash[2..4]
        )))
        .respond_with(
            ResponseTemplate::new(200).set_body_bytes(vec![0u8; chunk.size_compressed as usize]),
        )
        .expect(3)
        .mount(&server)
        .await;

    let item = DepotItem::V2File(V2File {
        product_id: "1234".into(),
        path: "corrupt.bin".into(),
        md5: Some(chunk.md5_uncompressed.clone()),
        sha256: None,
        sfc_ref: None,
        flags: Vec::new(),
        total_size_compressed: chunk.size_compressed,
        total_size_uncompressed: 10,
        is_dependency: false,
        chunks: vec![chunk],
    });

    let dir = tempfile::tempdir().unwrap();
    let downloader = downloader_for(&server);
    let err = downloader
        .download_item(&item, dir.path(), &DownloadOptions::default())
        .await
        .unwrap_err();
    assert!(matches!(err, Error::HashMismatch { .. }));
}

#[tokio::test]
async fn failed_item_does_not_abort_siblings() {
    let server = MockServer::start().await;
    mount_secure_link(&server, "1234", "/store/1234").await;

    let plain = b"good bytes";
    let (good_chunk, compressed) = chunk_for(plain);
    let hash = good_chunk.md5_compressed.clone();
    Mock::given(method("GET"))
        .and(path(format!(
            "/cdn/store/1234/{}/{}/{hash}",
            &hash[0..2],
            &hash[2..4]
        )))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(compressed))
        .mount(&server)
        .await;
    // Any other chunk path is missing
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    let good = DepotItem::V2File(V2File {
        product_id: "1234".into(),
        path: "good.bin".into(),
        md5: Some(good_chunk.md5_uncompressed.clone()),
        sha256: None,
        sfc_ref: None,
        flags: Vec::new(),
        total_size_compressed: good_chunk.size_compressed,
        total_size_uncompressed: plain.len() as u64,
        is_dependency: false,
        chunks: vec![good_chunk],
    });
    let missing_chunk = Chunk {
        md5_compressed: "ee".repeat(16),
        md5_uncompressed: "ff".repeat(16),
        size_compressed: 5,
        size_uncompressed: 5,
        offset_compressed: 0,
        offset_uncompressed: 0,
    };
    let missing = DepotItem::V2File(V2File {
        product_id: "1234".into(),
        path: "missing.bin".into(),
        md5: None,
        sha256: None,
        sfc_ref: None,
        flags: Vec::new(),
        total_size_compressed: 5,
        total_size_uncompressed: 5,
        is_dependency: false,
        chunks: vec![missing_chunk],
    });

    let dir = tempfile::tempdir().unwrap();
    let downloader = downloader_for(&server);
    let results = downloader
        .download_items(&[good, missing], dir.path(), &DownloadOptions::default())
        .await
        .unwrap();

    assert!(results["good.bin"].is_ok());
    assert!(results["missing.bin"].as_ref().unwrap_err().is_not_found());
}

#[tokio::test]
async fn zero_size_item_makes_no_requests() {
    let server = MockServer::start().await;
    mount_secure_link(&server, "1234", "/store/1234").await;

    let item = DepotItem::V2File(V2File {
        product_id: "1234".into(),
        path: "empty.cfg".into(),
        md5: None,
        sha256: None,
        sfc_ref: None,
        flags: Vec::new(),
        total_size_compressed: 0,
        total_size_uncompressed: 0,
        is_dependency: false,
        chunks: Vec::new(),
    });

    let dir = tempfile::tempdir().unwrap();
    let downloader = downloader_for(&server);
    downloader
        .download_item(&item, dir.path(), &DownloadOptions::default())
        .await
        .unwrap();

    let metadata = std::fs::metadata(dir.path().join("empty.cfg")).unwrap();
    assert_eq!(metadata.len(), 0);
}

#[tokio::test]
async fn repeated_download_verifies_without_refetching() {
    let server = MockServer::start().await;
    mount_secure_link(&server, "1234", "/store/1234").await;

    let plain = b"abcdefghij";
    let (chunk, compressed) = chunk_for(plain);
    let hash = chunk.md5_compressed.clone();
    Mock::given(method("GET"))
        .and(path(format!(
            "/cdn/store/1234/{}/{}/{hash}",
            &hash[0..2],
            &hash[2..4]
        )))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(compressed))
        .expect(1)
        .mount(&server)
        .await;

    let item = DepotItem::V2File(V2File {
        product_id: "1234".into(),
        path: "stable.bin".into(),
        md5: Some(chunk.md5_uncompressed.clone()),
        sha256: None,
        sfc_ref: None,
        flags: Vec::new(),
        total_size_compressed: chunk.size_compressed,
        total_size_uncompressed: 10,
        is_dependency: false,
        chunks: vec![chunk],
    });

    let dir = tempfile::tempdir().unwrap();
    let downloader = downloader_for(&server);
    let opts = DownloadOptions::default();

    downloader.download_item(&item, dir.path(), &opts).await.unwrap();
    // Second run short-circuits on the verified on-disk file; the mock's
    // expect(1) would fail the test on a second fetch.
    downloader.download_item(&item, dir.path(), &opts).await.unwrap();
}

#[tokio::test]
async fn raw_mode_stores_compressed_chunks_content_addressed() {
    let server = MockServer::start().await;
    mount_secure_link(&server, "1234", "/store/1234").await;

    let plain = b"raw archival bytes";
    let (chunk, compressed) = chunk_for(plain);
    let hash = chunk.md5_compressed.clone();
    Mock::given(method("GET"))
        .and(path(format!(
            "/cdn/store/1234/{}/{}/{hash}",
            &hash[0..2],
            &hash[2..4]
        )))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(compressed.clone()))
        .mount(&server)
        .await;

    let item = DepotItem::V2File(V2File {
        product_id: "1234".into(),
        path: "archived.bin".into(),
        md5: Some(chunk.md5_uncompressed.clone()),
        sha256: None,
        sfc_ref: None,
        flags: Vec::new(),
        total_size_compressed: chunk.size_compressed,
        total_size_uncompressed: plain.len() as u64,
        is_dependency: false,
        chunks: vec![chunk],
    });

    let dir = tempfile::tempdir().unwrap();
    let downloader = downloader_for(&server);
    let opts = DownloadOptions {
        raw_mode: true,
        ..Default::default()
    };
    let outcome = downloader.download_item(&item, dir.path(), &opts).await.unwrap();

    let Downloaded::RawChunks(paths) = outcome else {
        panic!("expected raw chunks");
    };
    assert_eq!(paths.len(), 1);
    let expected = dir
        .path()
        .join("v2/store/1234")
        .join(&hash[0..2])
        .join(&hash[2..4])
        .join(&hash);
    assert_eq!(paths[0], expected);
    // Stored bytes are the compressed body, untouched
    assert_eq!(std::fs::read(&expected).unwrap(), compressed);
}
