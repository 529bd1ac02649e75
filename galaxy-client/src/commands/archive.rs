//! Archive subcommands: pack, unpack, list, extract, verify

use clap::Args;
use std::path::PathBuf;

use rgog::{pack as rgog_pack, Archive, ExtractOptions, PackOptions, UnpackOptions};

use crate::commands::{CommandResult, VerificationFailed};
use crate::output::{format_size, parse_size};

#[derive(Args)]
pub struct PackArgs {
    /// Input directory holding the mirrored `v2/` tree
    pub input_dir: PathBuf,

    /// Output archive path (part 0)
    #[arg(short, long)]
    pub output: PathBuf,

    /// Data bytes per part, e.g. `2GiB`, `500MB` or plain bytes
    #[arg(long, default_value = "2GiB")]
    pub max_part_size: String,

    /// Pack only this build
    #[arg(long)]
    pub build: Option<u64>,

    /// Product name stored in the archive (defaults to the input
    /// directory name)
    #[arg(long)]
    pub product_name: Option<String>,
}

#[derive(Args)]
pub struct UnpackArgs {
    /// Archive to unpack (part 0)
    pub archive: PathBuf,

    /// Output directory
    #[arg(short, long)]
    pub output: PathBuf,

    /// Also write pretty-printed JSON copies under `debug/`
    #[arg(long)]
    pub debug: bool,

    /// Restore chunks only, no metadata
    #[arg(long)]
    pub chunks_only: bool,
}

#[derive(Args)]
pub struct ListArgs {
    /// Archive to list (part 0)
    pub archive: PathBuf,

    /// Show repositories, manifests and languages per build
    #[arg(long)]
    pub detailed: bool,

    /// Show only this build
    #[arg(long)]
    pub build: Option<u64>,
}

#[derive(Args)]
pub struct ExtractArgs {
    /// Archive to extract from (part 0)
    pub archive: PathBuf,

    /// Output directory
    #[arg(short, long)]
    pub output: PathBuf,

    /// Extract only this build
    #[arg(long)]
    pub build: Option<u64>,

    /// Reassemble plaintext files at their install paths
    #[arg(long)]
    pub reassemble: bool,

    /// Extract chunks only, no metadata
    #[arg(long)]
    pub chunks_only: bool,
}

#[derive(Args)]
pub struct VerifyArgs {
    /// Archive to verify (part 0)
    pub archive: PathBuf,

    /// Structural checks only, skip checksums
    #[arg(long)]
    pub quick: bool,

    /// Require this build to be present
    #[arg(long)]
    pub build: Option<u64>,
}

pub fn pack(args: PackArgs) -> CommandResult {
    let max_part_size = parse_size(&args.max_part_size)?;
    let summary = rgog_pack(
        &args.input_dir,
        &args.output,
        &PackOptions {
            max_part_size,
            build_id: args.build,
            product_name: args.product_name,
            ..Default::default()
        },
    )?;

    println!(
        "Packed {} build(s), {} chunk(s), {} of data into {} part(s):",
        summary.builds,
        summary.chunks,
        format_size(summary.data_bytes),
        summary.parts.len()
    );
    for part in &summary.parts {
        println!("  {}", part.display());
    }
    Ok(())
}

pub fn unpack(args: UnpackArgs) -> CommandResult {
    let archive = Archive::open(&args.archive)?;
    archive.unpack(
        &args.output,
        &UnpackOptions {
            debug: args.debug,
            chunks_only: args.chunks_only,
        },
    )?;
    println!("Unpacked to {}", args.output.display());
    Ok(())
}

pub fn list(args: ListArgs) -> CommandResult {
    let archive = Archive::open(&args.archive)?;

    if let Some(product) = archive.product() {
        println!("Product: {} ({})", product.name, product.product_id);
    }
    println!(
        "Builds: {}  Chunks: {}  Parts: {}",
        archive.header().total_build_count,
        archive.header().total_chunk_count,
        archive.header().total_parts
    );

    for build in archive.builds() {
        if let Some(wanted) = args.build {
            if build.build_id != wanted {
                continue;
            }
        }
        println!("Build {} ({})", build.build_id, build.os.name());
        if args.detailed {
            println!(
                "  repository {} ({})",
                hex::encode(build.repository_id),
                format_size(build.repository_size)
            );
            for manifest in &build.manifests {
                let languages = manifest.languages.decode();
                let languages = if languages.is_empty() {
                    "no languages".to_string()
                } else {
                    languages.join(", ")
                };
                println!(
                    "  depot {} ({}, {languages})",
                    hex::encode(manifest.depot_id),
                    format_size(manifest.size)
                );
            }
        } else {
            println!("  manifests: {}", build.manifests.len());
        }
    }
    Ok(())
}

pub fn extract(args: ExtractArgs) -> CommandResult {
    let archive = Archive::open(&args.archive)?;
    archive.extract(
        &args.output,
        &ExtractOptions {
            build_id: args.build,
            reassemble: args.reassemble,
            chunks_only: args.chunks_only,
        },
    )?;
    println!("Extracted to {}", args.output.display());
    Ok(())
}

pub fn verify(args: VerifyArgs) -> CommandResult {
    let archive = Archive::open(&args.archive)?;

    if let Some(build_id) = args.build {
        if !archive.builds().iter().any(|b| b.build_id == build_id) {
            return Err(rgog::Error::BuildNotFound { build_id }.into());
        }
    }

    let report = archive.verify(args.quick)?;
    if report.passed() {
        println!("OK: archive passed {} verification", if args.quick {
            "quick"
        } else {
            "full"
        });
        Ok(())
    } else {
        for problem in &report.errors {
            eprintln!("{problem}");
        }
        Err(Box::new(VerificationFailed {
            problems: report.errors.len(),
        }))
    }
}
