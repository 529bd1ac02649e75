//! `info`: product build listing, or archive metadata

use clap::Args;
use std::path::{Path, PathBuf};

use galaxy_dl::BuildResolver;
use galaxy_manifest::Platform;
use rgog::Archive;

use crate::commands::{authenticated_client, CommandResult};
use crate::output::format_size;

#[derive(Args)]
pub struct InfoArgs {
    /// Product id, or path to an RGOG archive
    pub target: String,

    /// Platform for product queries
    #[arg(long, default_value = "windows")]
    pub platform: String,

    /// Print aggregate statistics for archives
    #[arg(long)]
    pub stats: bool,
}

pub async fn handle(args: InfoArgs, auth_file: Option<PathBuf>) -> CommandResult {
    let as_path = Path::new(&args.target);
    if as_path.is_file() {
        return archive_info(as_path, args.stats);
    }
    product_info(&args, auth_file).await
}

/// Builds of a product as TSV: `index  build_id  generation  date  version`.
async fn product_info(args: &InfoArgs, auth_file: Option<PathBuf>) -> CommandResult {
    let platform: Platform = args.platform.parse()?;
    let client = authenticated_client(auth_file).await?;
    let resolver = BuildResolver::new(client);

    let builds = resolver.list_all_builds(&args.target, platform).await?;
    for (index, build) in builds.iter().enumerate() {
        println!(
            "{index}\t{}\t{}\t{}\t{}",
            build.build_id, build.generation, build.date_published, build.version_name
        );
    }
    Ok(())
}

fn archive_info(path: &Path, stats: bool) -> CommandResult {
    let archive = Archive::open(path)?;
    let header = archive.header();

    println!("Archive: {}", path.display());
    println!("  Type: {}", if header.archive_type == rgog::TYPE_BASE {
        "base builds"
    } else {
        "patch collection"
    });
    println!("  Parts: {}", header.total_parts);
    println!("  Builds: {}", header.total_build_count);
    println!("  Chunks: {}", header.total_chunk_count);
    if let Some(product) = archive.product() {
        println!("  Product: {} ({})", product.name, product.product_id);
    }

    if stats {
        let s = archive.stats();
        println!("  Parts present: {}/{}", s.present_parts, s.total_parts);
        println!("  Indexed chunks: {}", s.indexed_chunks);
        println!("  Chunk data: {}", format_size(s.chunk_bytes));
        println!("  Build files: {}", format_size(s.build_files_bytes));
    }
    Ok(())
}
