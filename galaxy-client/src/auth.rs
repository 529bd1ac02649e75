//! File-backed OAuth credentials and token refresh
//!
//! Credentials live in `auth.json` under the platform config directory
//! (`$XDG_CONFIG_HOME/galaxy-dl` on Linux, `%APPDATA%\galaxy-dl` on
//! Windows). The store implements the [`TokenProvider`] capability the
//! CDN client consumes: tokens are refreshed 60 seconds before expiry and
//! again on a 401.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::{SystemTime, UNIX_EPOCH};
use tokio::sync::Mutex;
use tracing::{debug, warn};

use galaxy_cdn::{Error, Result, TokenProvider};

/// Galaxy client OAuth id.
const CLIENT_ID: &str = "46899977096215655";
/// Galaxy client OAuth secret (public, embedded in every Galaxy client).
const CLIENT_SECRET: &str = "9d85c43b1482497dbbce61f6e4aa173a433796eeae2ca8c5f6129f2dc4de46d9";
/// OAuth redirect used by the code flow.
const REDIRECT_URI: &str = "https://embed.gog.com/on_login_success?origin=client";
/// Token endpoint.
const TOKEN_URL: &str = "https://auth.gog.com/token";
/// Refresh this many seconds before expiry.
const EXPIRY_MARGIN_SECS: u64 = 60;

/// Stored credentials.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Credentials {
    /// Current bearer token
    pub access_token: String,
    /// Long-lived refresh token
    pub refresh_token: String,
    /// Account id
    #[serde(default)]
    pub user_id: String,
    /// Unix timestamp the access token expires at
    pub expires_at: u64,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    refresh_token: String,
    #[serde(default)]
    user_id: String,
    expires_in: u64,
}

/// Credential store backed by `auth.json`.
pub struct AuthStore {
    path: PathBuf,
    http: reqwest::Client,
    token_url: String,
    credentials: Mutex<Option<Credentials>>,
}

impl AuthStore {
    /// Open the store at the default or an explicit path. Missing files
    /// are fine; the store is simply unauthenticated until `login`.
    pub fn open(path: Option<PathBuf>) -> Result<Self> {
        let path = match path {
            Some(p) => p,
            None => default_auth_path()?,
        };
        let credentials = match std::fs::read(&path) {
            Ok(raw) => match serde_json::from_slice(&raw) {
                Ok(creds) => Some(creds),
                Err(e) => {
                    warn!("ignoring unreadable credentials at {}: {e}", path.display());
                    None
                }
            },
            Err(_) => None,
        };

        Ok(Self {
            path,
            http: reqwest::Client::new(),
            token_url: TOKEN_URL.to_string(),
            credentials: Mutex::new(credentials),
        })
    }

    /// Where the credentials live.
    pub fn path(&self) -> &std::path::Path {
        &self.path
    }

    /// Override the token endpoint (tests).
    pub fn with_token_url(mut self, url: impl Into<String>) -> Self {
        self.token_url = url.into();
        self
    }

    /// Whether credentials are present at all.
    pub async fn is_authenticated(&self) -> bool {
        self.credentials.lock().await.is_some()
    }

    /// Exchange an OAuth authorization code for tokens and persist them.
    pub async fn login_with_code(&self, code: &str) -> Result<()> {
        let url = format!(
            "{}?client_id={CLIENT_ID}&client_secret={CLIENT_SECRET}\
             &grant_type=authorization_code&code={code}\
             &redirect_uri={}",
            self.token_url,
            urlencoding::encode(REDIRECT_URI)
        );
        let response = self.request_tokens(&url).await?;
        self.store(response).await
    }

    async fn request_tokens(&self, url: &str) -> Result<TokenResponse> {
        let response = self.http.get(url).send().await?;
        if !response.status().is_success() {
            return Err(Error::auth_expired(format!(
                "token endpoint answered {}",
                response.status()
            )));
        }
        let parsed: TokenResponse = response
            .json()
            .await
            .map_err(|e| Error::auth_expired(format!("malformed token response: {e}")))?;
        Ok(parsed)
    }

    async fn store(&self, response: TokenResponse) -> Result<()> {
        let credentials = Credentials {
            access_token: response.access_token,
            refresh_token: response.refresh_token,
            user_id: response.user_id,
            expires_at: unix_now() + response.expires_in,
        };

        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&self.path, serde_json::to_vec_pretty(&credentials)?)?;
        debug!("saved credentials to {}", self.path.display());

        *self.credentials.lock().await = Some(credentials);
        Ok(())
    }

    async fn refresh_locked(&self, refresh_token: &str) -> Result<Credentials> {
        let url = format!(
            "{}?client_id={CLIENT_ID}&client_secret={CLIENT_SECRET}\
             &grant_type=refresh_token&refresh_token={refresh_token}",
            self.token_url
        );
        let response = self.request_tokens(&url).await?;
        self.store(response).await?;
        let creds = self.credentials.lock().await;
        creds
            .clone()
            .ok_or_else(|| Error::auth_expired("refresh produced no credentials"))
    }
}

#[async_trait]
impl TokenProvider for AuthStore {
    async fn bearer_token(&self) -> Result<Option<String>> {
        let snapshot = self.credentials.lock().await.clone();
        let Some(creds) = snapshot else {
            return Ok(None);
        };

        if unix_now() >= creds.expires_at.saturating_sub(EXPIRY_MARGIN_SECS) {
            debug!("access token near expiry, refreshing");
            let refreshed = self.refresh_locked(&creds.refresh_token).await?;
            return Ok(Some(refreshed.access_token));
        }
        Ok(Some(creds.access_token))
    }

    async fn refresh(&self) -> Result<Option<String>> {
        let snapshot = self.credentials.lock().await.clone();
        let Some(creds) = snapshot else {
            return Ok(None);
        };
        let refreshed = self.refresh_locked(&creds.refresh_token).await?;
        Ok(Some(refreshed.access_token))
    }
}

/// Default credentials path: `{config_dir}/galaxy-dl/auth.json`.
pub fn default_auth_path() -> Result<PathBuf> {
    let config_dir = dirs::config_dir()
        .ok_or_else(|| Error::invalid_response("no config directory on this platform"))?;
    Ok(config_dir.join("galaxy-dl").join("auth.json"))
}

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_missing_file_is_unauthenticated() {
        let dir = tempfile::tempdir().unwrap();
        let store = AuthStore::open(Some(dir.path().join("auth.json"))).unwrap();
        assert!(!store.is_authenticated().await);
        assert_eq!(store.bearer_token().await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_fresh_token_served_without_refresh() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("auth.json");
        let creds = Credentials {
            access_token: "tok".into(),
            refresh_token: "ref".into(),
            user_id: "u".into(),
            expires_at: unix_now() + 3_600,
        };
        std::fs::write(&path, serde_json::to_vec(&creds).unwrap()).unwrap();

        let store = AuthStore::open(Some(path)).unwrap();
        assert_eq!(store.bearer_token().await.unwrap().as_deref(), Some("tok"));
    }

    #[tokio::test]
    async fn test_corrupt_file_is_tolerated() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("auth.json");
        std::fs::write(&path, b"not json").unwrap();

        let store = AuthStore::open(Some(path)).unwrap();
        assert!(!store.is_authenticated().await);
    }
}
