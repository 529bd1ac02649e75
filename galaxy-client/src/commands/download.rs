//! `download`: mirror a build's CDN objects to disk
//!
//! Produces the archival tree the `pack` command consumes: repositories
//! and depot manifests under `v2/meta/…` exactly as served, chunks under
//! `v2/store/{pid}/…` keyed by compressed MD5. Generation 1 builds are
//! mirrored as `v1/manifests/…/repository.json` plus the `main.bin` blob.

use clap::Args;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

use galaxy_cdn::SecureLinkProvider;
use galaxy_dl::{BuildResolver, DownloadOptions, Downloader};
use galaxy_manifest::{BuildInfo, DepotItem, Platform};

use crate::commands::{authenticated_client, CommandResult};

#[derive(Args)]
pub struct DownloadArgs {
    /// Product id
    pub product_id: String,

    /// Output directory for the mirrored tree
    #[arg(short, long)]
    pub output: PathBuf,

    /// Platform to download
    #[arg(long, default_value = "windows")]
    pub platform: String,

    /// Build id (or newest-first index); latest when omitted
    #[arg(long)]
    pub build: Option<String>,

    /// Language filter for depots
    #[arg(long, default_value = "en-US")]
    pub language: String,

    /// Worker pool size
    #[arg(long, default_value_t = 4)]
    pub workers: usize,

    /// Skip hash verification
    #[arg(long)]
    pub no_verify: bool,
}

pub async fn handle(args: DownloadArgs, auth_file: Option<PathBuf>) -> CommandResult {
    let platform: Platform = args.platform.parse()?;
    let client = authenticated_client(auth_file).await?;
    let resolver = BuildResolver::new(client.clone());
    let links = Arc::new(SecureLinkProvider::new(client.clone()));
    let downloader = Downloader::new(client.clone(), links).with_workers(args.workers);

    let builds = resolver
        .list_all_builds(&args.product_id, platform)
        .await?;
    let build = select_build(&builds, args.build.as_deref())?;
    info!(
        "selected build {} (generation {})",
        build.build_id, build.generation
    );

    let manifest = resolver
        .manifest_from_build(&args.product_id, build, platform)
        .await?;

    let opts = DownloadOptions {
        no_verify: args.no_verify,
        raw_mode: manifest.generation == 2,
        ..Default::default()
    };

    if manifest.generation == 1 {
        mirror_v1(&client, &downloader, &args, &manifest, platform, &opts).await?;
    } else {
        mirror_v2(&resolver, &downloader, &args, build, &manifest, &opts).await?;
    }

    println!("Mirrored build {} into {}", build.build_id, args.output.display());
    Ok(())
}

fn select_build<'a>(
    builds: &'a [BuildInfo],
    selector: Option<&str>,
) -> Result<&'a BuildInfo, Box<dyn std::error::Error>> {
    let Some(selector) = selector else {
        return builds
            .first()
            .ok_or_else(|| galaxy_cdn::Error::not_found("no builds for product").into());
    };

    if let Some(build) = builds.iter().find(|b| b.build_id == selector) {
        return Ok(build);
    }
    // Legacy numeric selector: index into the newest-first listing
    if let Ok(index) = selector.parse::<usize>() {
        if let Some(build) = builds.get(index) {
            return Ok(build);
        }
    }
    Err(galaxy_cdn::Error::not_found(format!("build {selector}")).into())
}

async fn mirror_v1(
    client: &galaxy_cdn::CdnClient,
    downloader: &Downloader,
    args: &DownloadArgs,
    manifest: &galaxy_manifest::Manifest,
    platform: Platform,
    opts: &DownloadOptions,
) -> CommandResult {
    let repository_id = manifest
        .repository_id
        .clone()
        .ok_or_else(|| galaxy_manifest::Error::invalid_manifest("V1 build without repository id"))?;

    // Repository JSON exactly as served
    let repo_url = client.endpoints().v1_manifest_url(
        &args.product_id,
        platform,
        &repository_id,
        "repository",
    );
    let repo_body = client.get_raw(&repo_url, false).await?;
    let repo_dest = args
        .output
        .join("v1")
        .join("manifests")
        .join(&args.product_id)
        .join(platform.as_str())
        .join(&repository_id)
        .join("repository.json");
    if let Some(parent) = repo_dest.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(&repo_dest, &repo_body)?;

    // The blob itself
    let depot_dir = args
        .output
        .join("v1")
        .join("depots")
        .join(&args.product_id)
        .join(platform.as_str())
        .join(&repository_id);
    for item in &manifest.items {
        if matches!(item, DepotItem::V1Blob(_)) {
            downloader.download_item(item, &depot_dir, opts).await?;
        }
    }
    Ok(())
}

async fn mirror_v2(
    resolver: &BuildResolver,
    downloader: &Downloader,
    args: &DownloadArgs,
    build: &BuildInfo,
    manifest: &galaxy_manifest::Manifest,
    opts: &DownloadOptions,
) -> CommandResult {
    // Repository manifest, content-addressed by the tail of the link
    if let Some(repo_hash) = build
        .link
        .as_deref()
        .and_then(|l| l.rsplit('/').next())
        .filter(|h| h.len() == 32)
    {
        downloader.mirror_v2_meta(repo_hash, &args.output).await?;
    }

    let product_ids: Vec<String> = vec![manifest.base_product_id.clone()];
    let depots = manifest.filtered_depots(Some(&args.language), None, Some(&product_ids));
    info!("{} depots after filtering", depots.len());

    for depot in depots {
        if depot.is_offline {
            // Offline-depot chunks are not downloadable; keep only the
            // manifest for fidelity
            downloader.mirror_v2_meta(&depot.manifest, &args.output).await?;
            continue;
        }
        downloader.mirror_v2_meta(&depot.manifest, &args.output).await?;
        let items = resolver.depot_items(depot).await?;
        let results = downloader
            .download_items(&items, &args.output, opts)
            .await?;
        for (path, outcome) in results {
            if let Err(e) = outcome {
                eprintln!("{path}: {e}");
            }
        }
    }
    Ok(())
}
