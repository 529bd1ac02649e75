use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing::Level;

mod auth;
mod commands;
mod output;

/// Exit code: generic failure.
const EXIT_FAILURE: u8 = 1;
/// Exit code: authentication failure.
const EXIT_AUTH: u8 = 2;
/// Exit code: content not found on the CDN.
const EXIT_NOT_FOUND: u8 = 3;
/// Exit code: hash mismatch or verification failure.
const EXIT_VERIFY: u8 = 4;

#[derive(Parser)]
#[command(
    name = "galaxy-dl",
    about = "Download and archive GOG Galaxy builds",
    version,
    long_about = "A command-line tool for the GOG Galaxy content system: resolves \
                  builds across both manifest generations, downloads verified \
                  content from the CDN and packs it into deterministic RGOG \
                  archives."
)]
struct Cli {
    /// Set the logging level
    #[arg(short, long, value_enum, default_value = "warn")]
    log_level: LogLevel,

    /// Path to the auth credentials file
    #[arg(long, global = true)]
    auth_file: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::ValueEnum, Clone, Copy, Debug)]
enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

impl From<LogLevel> for Level {
    fn from(level: LogLevel) -> Self {
        match level {
            LogLevel::Trace => Level::TRACE,
            LogLevel::Debug => Level::DEBUG,
            LogLevel::Info => Level::INFO,
            LogLevel::Warn => Level::WARN,
            LogLevel::Error => Level::ERROR,
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Authenticate with an OAuth authorization code
    Login {
        /// Authorization code from the OAuth redirect URL
        #[arg(long)]
        code: Option<String>,
    },

    /// List owned product ids, one per line
    Library {
        /// Limit the number of products printed
        #[arg(long)]
        limit: Option<usize>,
    },

    /// Show builds of a product, or metadata of an archive file
    Info(commands::info::InfoArgs),

    /// Download a build into a mirrored CDN tree
    Download(commands::download::DownloadArgs),

    /// Pack a mirrored v2 tree into an RGOG archive
    Pack(commands::archive::PackArgs),

    /// Restore the v2 tree from an RGOG archive
    Unpack(commands::archive::UnpackArgs),

    /// List the builds inside an RGOG archive
    List(commands::archive::ListArgs),

    /// Extract builds or files from an RGOG archive
    Extract(commands::archive::ExtractArgs),

    /// Verify the integrity of an RGOG archive
    Verify(commands::archive::VerifyArgs),
}

#[tokio::main]
async fn main() -> std::process::ExitCode {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_max_level(Level::from(cli.log_level))
        .with_target(false)
        .init();

    let result = match cli.command {
        Commands::Login { code } => commands::login::handle(code, cli.auth_file).await,
        Commands::Library { limit } => commands::library::handle(limit, cli.auth_file).await,
        Commands::Info(args) => commands::info::handle(args, cli.auth_file).await,
        Commands::Download(args) => commands::download::handle(args, cli.auth_file).await,
        Commands::Pack(args) => commands::archive::pack(args),
        Commands::Unpack(args) => commands::archive::unpack(args),
        Commands::List(args) => commands::archive::list(args),
        Commands::Extract(args) => commands::archive::extract(args),
        Commands::Verify(args) => commands::archive::verify(args),
    };

    match result {
        Ok(()) => std::process::ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {e}");
            std::process::ExitCode::from(exit_code_for(e.as_ref()))
        }
    }
}

/// Map error kinds to the documented exit codes.
fn exit_code_for(error: &(dyn std::error::Error + 'static)) -> u8 {
    if let Some(e) = error.downcast_ref::<galaxy_dl::Error>() {
        return match e {
            galaxy_dl::Error::HashMismatch { .. } => EXIT_VERIFY,
            galaxy_dl::Error::Cdn(inner) => cdn_exit_code(inner),
            _ => EXIT_FAILURE,
        };
    }
    if let Some(e) = error.downcast_ref::<galaxy_cdn::Error>() {
        return cdn_exit_code(e);
    }
    if let Some(e) = error.downcast_ref::<rgog::Error>() {
        return match e {
            rgog::Error::VerifyFailed { .. } => EXIT_VERIFY,
            _ => EXIT_FAILURE,
        };
    }
    if error.downcast_ref::<commands::VerificationFailed>().is_some() {
        return EXIT_VERIFY;
    }
    if error.downcast_ref::<commands::NotAuthenticated>().is_some() {
        return EXIT_AUTH;
    }
    EXIT_FAILURE
}

fn cdn_exit_code(error: &galaxy_cdn::Error) -> u8 {
    match error {
        galaxy_cdn::Error::AuthExpired { .. } => EXIT_AUTH,
        galaxy_cdn::Error::NotFound { .. } => EXIT_NOT_FOUND,
        _ => EXIT_FAILURE,
    }
}
