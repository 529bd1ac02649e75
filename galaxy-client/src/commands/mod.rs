//! Command handlers

pub mod archive;
pub mod download;
pub mod info;
pub mod library;
pub mod login;

use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;

use crate::auth::AuthStore;
use galaxy_cdn::CdnClient;

/// Boxed result every handler returns; `main` maps errors to exit codes.
pub type CommandResult = Result<(), Box<dyn std::error::Error>>;

/// Marker error: a command needed credentials and none were stored.
#[derive(Debug, Error)]
#[error("not authenticated; run `galaxy-dl login` first")]
pub struct NotAuthenticated;

/// Marker error: an archive failed verification.
#[derive(Debug, Error)]
#[error("verification failed: {problems} problem(s) found")]
pub struct VerificationFailed {
    /// Number of problems reported
    pub problems: usize,
}

/// Build an authenticated CDN client from the stored credentials.
pub async fn authenticated_client(
    auth_file: Option<PathBuf>,
) -> Result<CdnClient, Box<dyn std::error::Error>> {
    let store = AuthStore::open(auth_file)?;
    if !store.is_authenticated().await {
        return Err(Box::new(NotAuthenticated));
    }
    let client = CdnClient::builder()
        .token_provider(Arc::new(store))
        .build()?;
    Ok(client)
}
