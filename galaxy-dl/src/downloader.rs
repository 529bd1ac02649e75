//! Parallel verified downloader
//!
//! One worker pool of N permits serves every transfer the downloader runs:
//! chunks of a single multi-chunk item are fetched by several workers
//! cooperating on that item, and `download_items` additionally runs items
//! against each other. Every write targets a disjoint byte interval
//! computed at dispatch time, so completion order never affects the
//! assembled bytes.

use bytes::Bytes;
use flate2::read::ZlibDecoder;
use futures_util::stream::{self, StreamExt};
use std::collections::HashMap;
use std::io::{Read, SeekFrom};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt};
use tokio::sync::Semaphore;
use tracing::{debug, info, warn};

use galaxy_cdn::secure_link::GALAXY_PATH_TOKEN;
use galaxy_cdn::{CdnClient, SecureLinkProvider};
use galaxy_manifest::item::SFC_PATH;
use galaxy_manifest::{galaxy_path, md5_hex, Chunk, DepotItem, SfcRef, V1Blob, V1File, V2File, V2Sfc};

use crate::cancel::CancelToken;
use crate::error::{Error, Result};

/// Default worker pool size
const DEFAULT_WORKERS: usize = 4;

/// Upper bound on the worker pool size
const MAX_WORKERS: usize = 32;

/// Task size for V1 blob range requests
const V1_TASK_SIZE: u64 = 10 * 1024 * 1024;

/// Attempts per chunk when the downloaded hash does not match
const HASH_ATTEMPTS: usize = 3;

/// Progress callback: `(bytes_done_delta, total_bytes)`, invoked from any
/// worker. Callers aggregate the deltas; the sum is monotonic.
pub type ProgressFn = Arc<dyn Fn(u64, u64) + Send + Sync>;

/// Options for a download operation.
#[derive(Clone, Default)]
pub struct DownloadOptions {
    /// Skip hash verification when false
    pub no_verify: bool,
    /// Store compressed chunks under `v2/store/…` instead of assembling
    /// files (archival mirror mode)
    pub raw_mode: bool,
    /// Progress callback
    pub progress: Option<ProgressFn>,
    /// Cancellation token
    pub cancel: CancelToken,
    /// Decompressed Small Files Container for `sfc_ref` members
    pub sfc_data: Option<Arc<Vec<u8>>>,
    /// Abort sibling items on the first failure in `download_items`
    pub fail_fast: bool,
}

impl DownloadOptions {
    fn verify(&self) -> bool {
        !self.no_verify
    }

    fn report(&self, delta: u64, total: u64) {
        if let Some(progress) = &self.progress {
            progress(delta, total);
        }
    }
}

/// Outcome of a single item download.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Downloaded {
    /// Assembled plaintext file
    File(PathBuf),
    /// Compressed chunks stored as-is (raw mode)
    RawChunks(Vec<PathBuf>),
}

/// Parallel downloader for depot items.
///
/// Owns its worker pool for its lifetime; there is no global pool.
pub struct Downloader {
    cdn: CdnClient,
    links: Arc<SecureLinkProvider>,
    workers: usize,
    permits: Arc<Semaphore>,
}

impl Downloader {
    /// Create a downloader with the default pool size.
    pub fn new(cdn: CdnClient, links: Arc<SecureLinkProvider>) -> Self {
        Self {
            cdn,
            links,
            workers: DEFAULT_WORKERS,
            permits: Arc::new(Semaphore::new(DEFAULT_WORKERS)),
        }
    }

    /// Set the worker pool size (clamped to 1–32).
    pub fn with_workers(mut self, workers: usize) -> Self {
        let workers = workers.clamp(1, MAX_WORKERS);
        self.workers = workers;
        self.permits = Arc::new(Semaphore::new(workers));
        self
    }

    /// Download one depot item into `out_dir`.
    ///
    /// Dispatches on the item tag: V1 blobs are fetched as parallel byte
    /// ranges, V1 files as a single range, V2 files chunk by chunk with
    /// inflation, and Small Files Containers as chunked files. In raw mode
    /// compressed chunks are stored under `v2/store/{product}/…` instead.
    pub async fn download_item(
        &self,
        item: &DepotItem,
        out_dir: &Path,
        opts: &DownloadOptions,
    ) -> Result<Downloaded> {
        if opts.cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }

        match item {
            DepotItem::V1Blob(blob) => self
                .download_v1_blob(blob, out_dir, opts)
                .await
                .map(Downloaded::File),
            DepotItem::V1File(file) => self
                .download_v1_file(file, out_dir, opts)
                .await
                .map(Downloaded::File),
            DepotItem::V2Sfc(sfc) => {
                if opts.raw_mode {
                    self.download_chunks_raw(&sfc.product_id, &sfc.chunks, out_dir, opts, false)
                        .await
                        .map(Downloaded::RawChunks)
                } else {
                    self.assemble_v2(
                        &sfc.product_id,
                        SFC_PATH,
                        &sfc.chunks,
                        sfc.md5.as_deref(),
                        sfc.total_size_uncompressed,
                        out_dir,
                        opts,
                    )
                    .await
                    .map(Downloaded::File)
                }
            }
            DepotItem::V2File(file) => {
                if opts.raw_mode {
                    // Chunks of SFC members may or may not exist as CDN
                    // objects; missing ones are tolerated because the
                    // container already carries the bytes.
                    let tolerate_missing = file.sfc_ref.is_some();
                    self.download_chunks_raw(
                        &file.product_id,
                        &file.chunks,
                        out_dir,
                        opts,
                        tolerate_missing,
                    )
                    .await
                    .map(Downloaded::RawChunks)
                } else if let (Some(sfc_ref), Some(buffer)) = (file.sfc_ref, &opts.sfc_data) {
                    self.write_sfc_member(file, sfc_ref, buffer, out_dir, opts)
                        .await
                        .map(Downloaded::File)
                } else {
                    self.assemble_v2(
                        &file.product_id,
                        &file.path,
                        &file.chunks,
                        file.md5.as_deref(),
                        file.total_size_uncompressed,
                        out_dir,
                        opts,
                    )
                    .await
                    .map(Downloaded::File)
                }
            }
        }
    }

    /// Download many items, collecting per-item results keyed by path.
    ///
    /// A Small Files Container among the items is fetched first and held
    /// in memory; its members are then sliced out of the buffer instead of
    /// fetching their phantom chunks. A failed item does not abort its
    /// siblings unless `fail_fast` is set.
    pub async fn download_items(
        &self,
        items: &[DepotItem],
        out_dir: &Path,
        opts: &DownloadOptions,
    ) -> Result<HashMap<String, Result<Downloaded>>> {
        let mut opts = opts.clone();

        // Containers come first so members can be sliced from memory.
        if !opts.raw_mode && opts.sfc_data.is_none() {
            if let Some(DepotItem::V2Sfc(sfc)) = items
                .iter()
                .find(|item| matches!(item, DepotItem::V2Sfc(_)))
            {
                let buffer = self.download_sfc_buffer(sfc, &opts).await?;
                opts.sfc_data = Some(Arc::new(buffer));
            }
        }

        let mut results = HashMap::new();
        let mut stream = stream::iter(items.iter().filter(|item| {
            // The container itself is transport, not a build file
            opts.raw_mode || !matches!(item, DepotItem::V2Sfc(_))
        }))
        .map(|item| {
            let opts = opts.clone();
            async move {
                let outcome = self.download_item(item, out_dir, &opts).await;
                (item.path().to_string(), outcome)
            }
        })
        .buffer_unordered(self.workers);

        while let Some((path, outcome)) = stream.next().await {
            match outcome {
                Err(e) if opts.fail_fast => {
                    opts.cancel.cancel();
                    drop(stream);
                    return Err(e);
                }
                Err(e) => {
                    warn!("{path}: {e}");
                    results.insert(path, Err(e));
                }
                Ok(done) => {
                    results.insert(path, Ok(done));
                }
            }
        }

        Ok(results)
    }

    /// Download a Small Files Container and return its decompressed body.
    pub async fn download_sfc_buffer(
        &self,
        sfc: &V2Sfc,
        opts: &DownloadOptions,
    ) -> Result<Vec<u8>> {
        let urls = self.store_urls(&sfc.product_id).await?;
        let total_compressed: u64 = sfc.chunks.iter().map(|c| c.size_compressed).sum();

        let mut pieces: Vec<(usize, Vec<u8>)> =
            stream::iter(sfc.chunks.iter().enumerate().map(|(index, chunk)| {
                let urls = urls.clone();
                let opts = opts.clone();
                async move {
                    let _permit = acquire(&self.permits).await?;
                    let data = self.fetch_chunk(&urls, chunk, &opts).await?;
                    let plain = inflate_chunk(&data, chunk)?;
                    opts.report(chunk.size_compressed, total_compressed);
                    Ok::<_, Error>((index, plain))
                }
            }))
            .buffer_unordered(self.workers)
            .collect::<Vec<_>>()
            .await
            .into_iter()
            .collect::<Result<Vec<_>>>()?;

        pieces.sort_by_key(|(index, _)| *index);
        let mut buffer = Vec::with_capacity(sfc.total_size_uncompressed as usize);
        for (_, piece) in pieces {
            buffer.extend_from_slice(&piece);
        }

        if opts.verify() {
            if let Some(expected) = &sfc.md5 {
                let actual = md5_hex(&buffer);
                if &actual != expected {
                    return Err(Error::hash_mismatch(SFC_PATH, expected, actual));
                }
            }
        }

        Ok(buffer)
    }

    /// Save one compressed chunk exactly as served (archival).
    pub async fn download_raw_chunk(
        &self,
        md5_compressed: &str,
        dest_path: &Path,
        product_id: &str,
    ) -> Result<()> {
        let urls = self.store_urls(product_id).await?;
        let chunk = Chunk {
            md5_compressed: md5_compressed.to_lowercase(),
            md5_uncompressed: String::new(),
            size_compressed: 0,
            size_uncompressed: 0,
            offset_compressed: 0,
            offset_uncompressed: 0,
        };
        let opts = DownloadOptions::default();
        let data = self.fetch_chunk(&urls, &chunk, &opts).await?;

        if let Some(parent) = dest_path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(dest_path, &data).await?;
        Ok(())
    }

    /// Mirror a V2 meta object (compressed, as served) into
    /// `{out_dir}/v2/meta/{galaxy path}` and return the stored path.
    pub async fn mirror_v2_meta(&self, hash: &str, out_dir: &Path) -> Result<PathBuf> {
        let body = self.cdn.v2_manifest_raw(hash).await?;
        let dest = out_dir.join("v2").join("meta").join(galaxy_path(hash));
        if let Some(parent) = dest.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&dest, &body).await?;
        Ok(dest)
    }

    // ---- V2 assembly ----

    #[allow(clippy::too_many_arguments)]
    async fn assemble_v2(
        &self,
        product_id: &str,
        path: &str,
        chunks: &[Chunk],
        md5: Option<&str>,
        total_uncompressed: u64,
        out_dir: &Path,
        opts: &DownloadOptions,
    ) -> Result<PathBuf> {
        let out_path = out_dir.join(path);

        // Re-running against a populated directory re-verifies instead of
        // re-downloading.
        if opts.verify() && md5.is_some() && out_path.is_file() {
            if let Some(expected) = md5 {
                if file_md5(&out_path).await? == expected {
                    debug!("{path}: already present and verified, skipping");
                    return Ok(out_path);
                }
            }
        }

        preallocate(&out_path, total_uncompressed).await?;
        if total_uncompressed == 0 || chunks.is_empty() {
            return Ok(out_path);
        }

        let urls = self.store_urls(product_id).await?;
        let total_compressed: u64 = chunks.iter().map(|c| c.size_compressed).sum();
        debug!("{path}: {} chunks, {} compressed bytes", chunks.len(), total_compressed);

        let outcomes: Vec<Result<()>> = stream::iter(chunks.iter().map(|chunk| {
            let urls = urls.clone();
            let opts = opts.clone();
            let out_path = out_path.clone();
            async move {
                let _permit = acquire(&self.permits).await?;
                if opts.cancel.is_cancelled() {
                    return Err(Error::Cancelled);
                }
                let data = self.fetch_chunk(&urls, chunk, &opts).await?;
                let plain = inflate_chunk(&data, chunk)?;
                write_at(&out_path, chunk.offset_uncompressed, &plain).await?;
                opts.report(chunk.size_compressed, total_compressed);
                Ok(())
            }
        }))
        .buffer_unordered(self.workers)
        .collect()
        .await;

        for outcome in outcomes {
            outcome?;
        }

        if opts.verify() {
            if let Some(expected) = md5 {
                let actual = file_md5(&out_path).await?;
                if actual != expected {
                    return Err(Error::hash_mismatch(path, expected, actual));
                }
            }
        }

        info!("{path}: downloaded {total_uncompressed} bytes");
        Ok(out_path)
    }

    async fn write_sfc_member(
        &self,
        file: &V2File,
        sfc_ref: SfcRef,
        buffer: &Arc<Vec<u8>>,
        out_dir: &Path,
        opts: &DownloadOptions,
    ) -> Result<PathBuf> {
        let end = sfc_ref
            .offset
            .checked_add(sfc_ref.size)
            .filter(|end| *end <= buffer.len() as u64)
            .ok_or_else(|| {
                Error::invalid_item(format!(
                    "{}: sfc reference {}+{} outside container of {} bytes",
                    file.path,
                    sfc_ref.offset,
                    sfc_ref.size,
                    buffer.len()
                ))
            })?;
        let slice = &buffer[sfc_ref.offset as usize..end as usize];

        if opts.verify() {
            if let Some(expected) = &file.md5 {
                let actual = md5_hex(slice);
                if &actual != expected {
                    return Err(Error::hash_mismatch(&file.path, expected, actual));
                }
            }
        }

        let out_path = out_dir.join(&file.path);
        if let Some(parent) = out_path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&out_path, slice).await?;
        opts.report(sfc_ref.size, sfc_ref.size);
        Ok(out_path)
    }

    // ---- V1 range downloads ----

    async fn download_v1_blob(
        &self,
        blob: &V1Blob,
        out_dir: &Path,
        opts: &DownloadOptions,
    ) -> Result<PathBuf> {
        let out_path = out_dir.join(&blob.blob_path);

        if opts.verify() && !blob.blob_md5.is_empty() && out_path.is_file() {
            if file_md5(&out_path).await? == blob.blob_md5 {
                debug!("{}: already present and verified, skipping", blob.blob_path);
                return Ok(out_path);
            }
        }

        preallocate(&out_path, blob.total_size).await?;
        if blob.total_size == 0 {
            return Ok(out_path);
        }

        let urls = self.store_urls_for_generation(&blob.product_id, 1).await?;
        let task_count = blob.total_size.div_ceil(V1_TASK_SIZE);
        info!(
            "{}: {} bytes in {} range tasks",
            blob.blob_path, blob.total_size, task_count
        );

        let outcomes: Vec<Result<()>> = stream::iter((0..task_count).map(|index| {
            let urls = urls.clone();
            let opts = opts.clone();
            let out_path = out_path.clone();
            let blob_path = blob.blob_path.clone();
            let total = blob.total_size;
            async move {
                let _permit = acquire(&self.permits).await?;
                if opts.cancel.is_cancelled() {
                    return Err(Error::Cancelled);
                }
                let offset = index * V1_TASK_SIZE;
                let size = V1_TASK_SIZE.min(total - offset);
                let data = self.fetch_range(&urls, &blob_path, offset, size, &opts).await?;
                write_at(&out_path, offset, &data).await?;
                opts.report(size, total);
                Ok(())
            }
        }))
        .buffer_unordered(self.workers)
        .collect()
        .await;

        for outcome in outcomes {
            outcome?;
        }

        if opts.verify() && !blob.blob_md5.is_empty() {
            let actual = file_md5(&out_path).await?;
            if actual != blob.blob_md5 {
                return Err(Error::hash_mismatch(&blob.blob_path, &blob.blob_md5, actual));
            }
        }

        Ok(out_path)
    }

    async fn download_v1_file(
        &self,
        file: &V1File,
        out_dir: &Path,
        opts: &DownloadOptions,
    ) -> Result<PathBuf> {
        let out_path = out_dir.join(&file.path);

        if opts.verify() && !file.md5.is_empty() && out_path.is_file() {
            if file_md5(&out_path).await? == file.md5 {
                debug!("{}: already present and verified, skipping", file.path);
                return Ok(out_path);
            }
        }

        if let Some(parent) = out_path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        if file.size == 0 {
            tokio::fs::write(&out_path, b"").await?;
            return Ok(out_path);
        }

        let urls = self.store_urls_for_generation(&file.product_id, 1).await?;
        let _permit = acquire(&self.permits).await?;
        let data = self
            .fetch_range(&urls, &file.blob_path, file.offset, file.size, opts)
            .await?;

        if opts.verify() && !file.md5.is_empty() {
            let actual = md5_hex(&data);
            if actual != file.md5 {
                return Err(Error::hash_mismatch(&file.path, &file.md5, actual));
            }
        }

        tokio::fs::write(&out_path, &data).await?;
        opts.report(file.size, file.size);
        Ok(out_path)
    }

    // ---- Raw chunk mirror ----

    async fn download_chunks_raw(
        &self,
        product_id: &str,
        chunks: &[Chunk],
        out_dir: &Path,
        opts: &DownloadOptions,
        tolerate_missing: bool,
    ) -> Result<Vec<PathBuf>> {
        if chunks.is_empty() {
            return Ok(Vec::new());
        }

        let urls = self.store_urls(product_id).await?;
        let store_root = out_dir.join("v2").join("store").join(product_id);
        let total_compressed: u64 = chunks.iter().map(|c| c.size_compressed).sum();

        let mut stored: Vec<(usize, Option<PathBuf>)> =
            stream::iter(chunks.iter().enumerate().map(|(index, chunk)| {
                let urls = urls.clone();
                let opts = opts.clone();
                let dest = store_root.join(galaxy_path(&chunk.md5_compressed));
                async move {
                    let _permit = acquire(&self.permits).await?;
                    if opts.cancel.is_cancelled() {
                        return Err(Error::Cancelled);
                    }

                    if dest.is_file() {
                        let existing = tokio::fs::read(&dest).await?;
                        if md5_hex(&existing) == chunk.md5_compressed {
                            opts.report(chunk.size_compressed, total_compressed);
                            return Ok((index, Some(dest)));
                        }
                    }

                    match self.fetch_chunk(&urls, chunk, &opts).await {
                        Ok(data) => {
                            if let Some(parent) = dest.parent() {
                                tokio::fs::create_dir_all(parent).await?;
                            }
                            tokio::fs::write(&dest, &data).await?;
                            opts.report(chunk.size_compressed, total_compressed);
                            Ok((index, Some(dest)))
                        }
                        Err(e) if tolerate_missing && e.is_not_found() => {
                            debug!("{}: not on CDN, member served by its container", chunk.md5_compressed);
                            Ok((index, None))
                        }
                        Err(e) => Err(e),
                    }
                }
            }))
            .buffer_unordered(self.workers)
            .collect::<Vec<_>>()
            .await
            .into_iter()
            .collect::<Result<Vec<_>>>()?;

        stored.sort_by_key(|(index, _)| *index);
        Ok(stored.into_iter().filter_map(|(_, path)| path).collect())
    }

    // ---- Transport ----

    async fn store_urls(&self, product_id: &str) -> Result<Vec<String>> {
        self.store_urls_for_generation(product_id, 2).await
    }

    async fn store_urls_for_generation(
        &self,
        product_id: &str,
        generation: u8,
    ) -> Result<Vec<String>> {
        Ok(self.links.store_urls(product_id, generation).await?)
    }

    /// Fetch one chunk, rotating CDN URLs on transport failure and hash
    /// mismatch. A 404 is permanent; hash mismatches are retried up to
    /// three times against different CDNs before surfacing.
    async fn fetch_chunk(
        &self,
        urls: &[String],
        chunk: &Chunk,
        opts: &DownloadOptions,
    ) -> Result<Bytes> {
        let chunk_path = galaxy_path(&chunk.md5_compressed);
        let rounds = urls.len().max(HASH_ATTEMPTS);
        let mut hash_attempts = 0usize;
        let mut last_err: Option<Error> = None;

        for round in 0..rounds {
            if opts.cancel.is_cancelled() {
                return Err(Error::Cancelled);
            }
            let url = merge_cdn_url(&urls[round % urls.len()], &chunk_path);

            match self.fetch_body(&url, None, opts).await {
                Ok(data) => {
                    if chunk.size_compressed > 0 && data.len() as u64 != chunk.size_compressed {
                        warn!(
                            "{}: body truncated ({} of {} bytes)",
                            chunk.md5_compressed,
                            data.len(),
                            chunk.size_compressed
                        );
                        last_err = Some(Error::size_mismatch(
                            &chunk.md5_compressed,
                            chunk.size_compressed,
                            data.len() as u64,
                        ));
                        continue;
                    }

                    if opts.verify() {
                        let actual = md5_hex(&data);
                        if actual != chunk.md5_compressed {
                            hash_attempts += 1;
                            warn!(
                                "{}: hash mismatch from {url} (attempt {hash_attempts})",
                                chunk.md5_compressed
                            );
                            let err =
                                Error::hash_mismatch(&chunk.md5_compressed, &chunk.md5_compressed, actual);
                            if hash_attempts >= HASH_ATTEMPTS {
                                return Err(err);
                            }
                            last_err = Some(err);
                            continue;
                        }
                    }

                    return Ok(data);
                }
                Err(e) if e.is_not_found() => return Err(e),
                Err(Error::Cancelled) => return Err(Error::Cancelled),
                Err(e) => {
                    warn!("{url}: {e}");
                    last_err = Some(e);
                }
            }
        }

        Err(last_err
            .unwrap_or_else(|| Error::invalid_item("no CDN urls available for chunk fetch")))
    }

    /// Fetch a byte range of a blob, rotating CDN URLs on failure.
    async fn fetch_range(
        &self,
        urls: &[String],
        blob_path: &str,
        offset: u64,
        size: u64,
        opts: &DownloadOptions,
    ) -> Result<Bytes> {
        let mut last_err: Option<Error> = None;

        for url in urls {
            if opts.cancel.is_cancelled() {
                return Err(Error::Cancelled);
            }
            let url = merge_cdn_url(url, blob_path);

            match self.fetch_body(&url, Some((offset, size)), opts).await {
                Ok(data) => {
                    if data.len() as u64 != size {
                        last_err =
                            Some(Error::size_mismatch(blob_path, size, data.len() as u64));
                        continue;
                    }
                    return Ok(data);
                }
                Err(e) if e.is_not_found() => return Err(e),
                Err(Error::Cancelled) => return Err(Error::Cancelled),
                Err(e) => {
                    warn!("{url}: {e}");
                    last_err = Some(e);
                }
            }
        }

        Err(last_err
            .unwrap_or_else(|| Error::invalid_item("no CDN urls available for range fetch")))
    }

    /// Execute a GET and collect the body, observing the cancellation
    /// token at body-chunk boundaries.
    async fn fetch_body(
        &self,
        url: &str,
        range: Option<(u64, u64)>,
        opts: &DownloadOptions,
    ) -> Result<Bytes> {
        let response = self.cdn.get_with_retry(url, false, range).await?;
        let mut body = Vec::new();
        let mut stream = response.bytes_stream();
        while let Some(piece) = stream.next().await {
            if opts.cancel.is_cancelled() {
                return Err(Error::Cancelled);
            }
            body.extend_from_slice(&piece.map_err(galaxy_cdn::Error::from)?);
        }
        Ok(Bytes::from(body))
    }
}

/// Acquire a worker permit. Fails only if the pool was torn down, which a
/// live downloader never does.
async fn acquire(permits: &Semaphore) -> Result<tokio::sync::SemaphorePermit<'_>> {
    permits
        .acquire()
        .await
        .map_err(|_| Error::invalid_item("worker pool closed"))
}

/// Substitute the galaxy-path placeholder of a secure-link template.
fn merge_cdn_url(template: &str, relative: &str) -> String {
    template.replace(
        GALAXY_PATH_TOKEN,
        &format!("/{}", relative.trim_start_matches('/')),
    )
}

/// Inflate a chunk body. Chunks whose compressed and uncompressed sizes
/// are equal are stored verbatim on the CDN.
fn inflate_chunk(data: &[u8], chunk: &Chunk) -> Result<Vec<u8>> {
    if chunk.size_compressed == chunk.size_uncompressed {
        return Ok(data.to_vec());
    }
    let mut decoder = ZlibDecoder::new(data);
    let mut out = Vec::with_capacity(chunk.size_uncompressed as usize);
    decoder.read_to_end(&mut out)?;
    if chunk.size_uncompressed > 0 && out.len() as u64 != chunk.size_uncompressed {
        return Err(Error::size_mismatch(
            &chunk.md5_compressed,
            chunk.size_uncompressed,
            out.len() as u64,
        ));
    }
    Ok(out)
}

/// Create a file of `size` bytes with a single sparse write.
async fn preallocate(path: &Path, size: u64) -> Result<()> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    let mut file = tokio::fs::OpenOptions::new()
        .create(true)
        .write(true)
        .truncate(true)
        .open(path)
        .await?;
    if size > 0 {
        file.seek(SeekFrom::Start(size - 1)).await?;
        file.write_all(&[0u8]).await?;
    }
    file.flush().await?;
    Ok(())
}

/// Positional write: each caller opens its own handle, so there is no
/// shared cursor between workers.
async fn write_at(path: &Path, offset: u64, data: &[u8]) -> Result<()> {
    let mut file = tokio::fs::OpenOptions::new().write(true).open(path).await?;
    file.seek(SeekFrom::Start(offset)).await?;
    file.write_all(data).await?;
    file.flush().await?;
    Ok(())
}

/// Streaming MD5 of a file.
pub async fn file_md5(path: &Path) -> Result<String> {
    let mut file = tokio::fs::File::open(path).await?;
    let mut context = md5::Context::new();
    let mut buf = vec![0u8; 64 * 1024];
    loop {
        let n = file.read(&mut buf).await?;
        if n == 0 {
            break;
        }
        context.consume(&buf[..n]);
    }
    Ok(hex::encode(context.compute().0))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chunk(compressed: u64, uncompressed: u64) -> Chunk {
        Chunk {
            md5_compressed: "aa".repeat(16),
            md5_uncompressed: "bb".repeat(16),
            size_compressed: compressed,
            size_uncompressed: uncompressed,
            offset_compressed: 0,
            offset_uncompressed: 0,
        }
    }

    #[test]
    fn test_merge_cdn_url() {
        assert_eq!(
            merge_cdn_url("https://cdn.example/store/1234{GALAXY_PATH}?t=sig", "aa/bb/hash"),
            "https://cdn.example/store/1234/aa/bb/hash?t=sig"
        );
        // Leading slashes on the relative part never double up
        assert_eq!(
            merge_cdn_url("https://cdn.example{GALAXY_PATH}", "/main.bin"),
            "https://cdn.example/main.bin"
        );
    }

    #[test]
    fn test_inflate_chunk_passthrough_when_sizes_equal() {
        let data = b"stored verbatim";
        let c = chunk(data.len() as u64, data.len() as u64);
        assert_eq!(inflate_chunk(data, &c).unwrap(), data);
    }

    #[test]
    fn test_inflate_chunk_inflates() {
        use flate2::write::ZlibEncoder;
        use flate2::Compression;
        use std::io::Write;

        let plain = b"abcdefghij";
        let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(plain).unwrap();
        let compressed = encoder.finish().unwrap();

        let c = chunk(compressed.len() as u64, plain.len() as u64);
        assert_eq!(inflate_chunk(&compressed, &c).unwrap(), plain);
    }

    #[test]
    fn test_inflate_chunk_rejects_wrong_size() {
        use flate2::write::ZlibEncoder;
        use flate2::Compression;
        use std::io::Write;

        let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(b"abcdefghij").unwrap();
        let compressed = encoder.finish().unwrap();

        let c = chunk(compressed.len() as u64, 4);
        assert!(inflate_chunk(&compressed, &c).is_err());
    }

    #[tokio::test]
    async fn test_preallocate_and_write_at() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sub").join("file.bin");

        preallocate(&path, 10).await.unwrap();
        assert_eq!(tokio::fs::metadata(&path).await.unwrap().len(), 10);

        write_at(&path, 3, b"xyz").await.unwrap();
        let content = tokio::fs::read(&path).await.unwrap();
        assert_eq!(&content[3..6], b"xyz");
        assert_eq!(content.len(), 10);
    }

    #[tokio::test]
    async fn test_file_md5() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("f");
        tokio::fs::write(&path, b"abcdefghij").await.unwrap();
        assert_eq!(
            file_md5(&path).await.unwrap(),
            "e80b5017098950fc58aad83c8c14978e"
        );
    }
}
