//! CDN client with retry, backoff and transparent zlib decoding

use bytes::Bytes;
use flate2::read::ZlibDecoder;
use reqwest::{Client, Response, StatusCode};
use serde_json::Value;
use std::io::Read;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, trace, warn};

use galaxy_manifest::{is_zlib, range_header, Platform};

use crate::auth::{AnonymousTokenProvider, TokenProvider};
use crate::endpoints::CdnEndpoints;
use crate::error::{Error, Result};

/// Default maximum attempts per request
const DEFAULT_MAX_ATTEMPTS: u32 = 5;

/// Default initial backoff in milliseconds
const DEFAULT_INITIAL_BACKOFF_MS: u64 = 500;

/// Default maximum backoff in milliseconds
const DEFAULT_MAX_BACKOFF_MS: u64 = 30_000;

/// Default backoff multiplier
const DEFAULT_BACKOFF_MULTIPLIER: f64 = 2.0;

/// Default jitter factor (0.0 to 1.0)
const DEFAULT_JITTER_FACTOR: f64 = 0.1;

/// Default connection timeout
const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 60;

/// Default per-chunk read timeout
const DEFAULT_READ_TIMEOUT_SECS: u64 = 10;

/// Default user agent
const DEFAULT_USER_AGENT: &str = concat!("galaxy-dl/", env!("CARGO_PKG_VERSION"));

/// Client for the content-system API and the public manifest CDN.
///
/// Owns the HTTP connection pool; clones share it. Transient failures
/// (connection errors, 5xx, 408, 429) are retried with exponential backoff
/// and jitter; a 401 triggers one token refresh through the injected
/// [`TokenProvider`] before the request is retried.
#[derive(Clone)]
pub struct CdnClient {
    http: Client,
    endpoints: CdnEndpoints,
    token: Arc<dyn TokenProvider>,
    max_attempts: u32,
    initial_backoff_ms: u64,
    max_backoff_ms: u64,
    backoff_multiplier: f64,
    jitter_factor: f64,
}

impl std::fmt::Debug for CdnClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CdnClient")
            .field("endpoints", &self.endpoints)
            .field("max_attempts", &self.max_attempts)
            .finish_non_exhaustive()
    }
}

impl CdnClient {
    /// Create a client with default configuration and no authentication.
    pub fn new() -> Result<Self> {
        Self::builder().build()
    }

    /// Create a builder for configuring the client.
    pub fn builder() -> CdnClientBuilder {
        CdnClientBuilder::new()
    }

    /// Endpoint hosts in use.
    pub fn endpoints(&self) -> &CdnEndpoints {
        &self.endpoints
    }

    /// Calculate backoff duration with exponential backoff and jitter.
    fn calculate_backoff(&self, attempt: u32) -> Duration {
        let base = self.initial_backoff_ms as f64 * self.backoff_multiplier.powi(attempt as i32);
        let capped = base.min(self.max_backoff_ms as f64);
        let jitter_range = capped * self.jitter_factor;
        let jitter = rand::random::<f64>() * 2.0 * jitter_range - jitter_range;
        Duration::from_millis((capped + jitter).max(0.0) as u64)
    }

    /// Execute a GET with the retry policy.
    ///
    /// `authenticated` controls the `Authorization` header; `range`
    /// requests a byte window with an HTTP `Range` header.
    pub async fn get_with_retry(
        &self,
        url: &str,
        authenticated: bool,
        range: Option<(u64, u64)>,
    ) -> Result<Response> {
        let mut refreshed = false;
        let mut attempt = 0u32;

        loop {
            if attempt > 0 {
                let backoff = self.calculate_backoff(attempt - 1);
                debug!("retrying {url} (attempt {}) after {backoff:?}", attempt + 1);
                sleep(backoff).await;
            }

            let mut request = self.http.get(url);
            if authenticated {
                if let Some(token) = self.token.bearer_token().await? {
                    request = request.bearer_auth(token);
                }
            }
            if let Some((offset, size)) = range {
                request = request.header(reqwest::header::RANGE, range_header(offset, size));
            }

            match request.send().await {
                Ok(response) => {
                    let status = response.status();
                    trace!("{url} -> {status}");

                    if status.is_success() {
                        return Ok(response);
                    }

                    if status == StatusCode::NOT_FOUND {
                        return Err(Error::not_found(url));
                    }

                    if status == StatusCode::UNAUTHORIZED {
                        if refreshed || !authenticated {
                            return Err(Error::auth_expired(format!("401 from {url}")));
                        }
                        debug!("401 from {url}, refreshing token");
                        self.token
                            .refresh()
                            .await
                            .map_err(|e| Error::auth_expired(e.to_string()))?;
                        refreshed = true;
                        // The refresh retry does not consume a backoff slot
                        continue;
                    }

                    let transient = status.is_server_error()
                        || status == StatusCode::REQUEST_TIMEOUT
                        || status == StatusCode::TOO_MANY_REQUESTS;
                    if transient && attempt + 1 < self.max_attempts {
                        warn!("transient {status} from {url}, will retry");
                        attempt += 1;
                        continue;
                    }
                    if transient {
                        return Err(Error::network_failed(url, self.max_attempts));
                    }

                    return Err(Error::Http(response.error_for_status().unwrap_err()));
                }
                Err(e) => {
                    let retryable = e.is_connect() || e.is_timeout() || e.is_request();
                    if retryable && attempt + 1 < self.max_attempts {
                        warn!("request to {url} failed ({e}), will retry");
                        attempt += 1;
                        continue;
                    }
                    if retryable {
                        return Err(Error::network_failed(url, self.max_attempts));
                    }
                    return Err(Error::Http(e));
                }
            }
        }
    }

    /// GET a URL and return the body bytes exactly as served.
    pub async fn get_raw(&self, url: &str, authenticated: bool) -> Result<Bytes> {
        let response = self.get_with_retry(url, authenticated, None).await?;
        Ok(response.bytes().await?)
    }

    /// GET a byte range of a URL.
    pub async fn get_range(&self, url: &str, offset: u64, size: u64) -> Result<Bytes> {
        let response = self.get_with_retry(url, false, Some((offset, size))).await?;
        Ok(response.bytes().await?)
    }

    /// GET a URL and decode the body as JSON, inflating zlib bodies first.
    pub async fn get_json(&self, url: &str, authenticated: bool) -> Result<Value> {
        let body = self.get_raw(url, authenticated).await?;
        decode_json(&body)
    }

    // ---- Endpoint operations ----

    /// Builds listing for a product. The response may contain builds of the
    /// other generation too; callers filter.
    pub async fn builds(
        &self,
        product_id: &str,
        platform: Platform,
        generation: u8,
    ) -> Result<Value> {
        let url = self.endpoints.builds_url(product_id, platform, generation);
        debug!("fetching builds for {product_id} (generation {generation})");
        self.get_json(&url, true).await
    }

    /// V1 manifest JSON (`repository` or a manifest uuid) under a
    /// repository id. Public, plain JSON.
    pub async fn v1_manifest(
        &self,
        product_id: &str,
        platform: Platform,
        repository_id: &str,
        name: &str,
    ) -> Result<Value> {
        let url = self
            .endpoints
            .v1_manifest_url(product_id, platform, repository_id, name);
        self.get_json(&url, false).await
    }

    /// V2 meta object (repository or depot manifest), inflated and parsed.
    pub async fn v2_manifest(&self, hash: &str) -> Result<Value> {
        let url = self.endpoints.v2_meta_url(hash);
        self.get_json(&url, false).await
    }

    /// V2 meta object exactly as served (zlib-compressed), for archival.
    pub async fn v2_manifest_raw(&self, hash: &str) -> Result<Bytes> {
        let url = self.endpoints.v2_meta_url(hash);
        self.get_raw(&url, false).await
    }

    /// V2 dependency meta object.
    pub async fn v2_dependency_manifest(&self, hash: &str) -> Result<Value> {
        let url = self.endpoints.v2_dependency_meta_url(hash);
        self.get_json(&url, false).await
    }

    /// Patch manifest meta object under the patches root.
    pub async fn patch_manifest(&self, hash: &str) -> Result<Value> {
        let url = self.endpoints.v2_patch_meta_url(hash);
        self.get_json(&url, false).await
    }

    /// Fetch a manifest by its exact URL (delisted/cached path, or the
    /// `link` field of a build record).
    pub async fn manifest_by_url(&self, url: &str) -> Result<Value> {
        self.get_json(url, false).await
    }

    /// Secure-link mint for a store path.
    pub async fn secure_link(
        &self,
        product_id: &str,
        path: &str,
        generation: u8,
    ) -> Result<Value> {
        let url = self.endpoints.secure_link_url(product_id, path, generation);
        debug!("minting secure link for {product_id} path {path}");
        self.get_json(&url, true).await
    }

    /// Secure-link mint for the patch store, using per-patch credentials.
    pub async fn patch_secure_link(
        &self,
        product_id: &str,
        client_id: &str,
        client_secret: &str,
    ) -> Result<Value> {
        let url = self
            .endpoints
            .patch_secure_link_url(product_id, client_id, client_secret);
        self.get_json(&url, true).await
    }

    /// Patch availability between two builds. The three valid states
    /// (error body, `{id, link}` body, empty manifest at the link) are left
    /// to the caller to distinguish.
    pub async fn patch_info(
        &self,
        product_id: &str,
        from_build: &str,
        to_build: &str,
    ) -> Result<Value> {
        let url = self
            .endpoints
            .patch_info_url(product_id, from_build, to_build);
        self.get_json(&url, true).await
    }

    /// Product ids owned by the authenticated user.
    pub async fn owned_games(&self) -> Result<Vec<u64>> {
        let url = self.endpoints.user_games_url();
        let response = self.get_json(&url, true).await?;
        let owned = response
            .get("owned")
            .and_then(|v| v.as_array())
            .ok_or_else(|| Error::invalid_response("missing 'owned' field"))?;
        Ok(owned.iter().filter_map(|v| v.as_u64()).collect())
    }
}

/// Inflate a body when it carries a zlib header, then parse JSON.
pub fn decode_json(body: &[u8]) -> Result<Value> {
    if is_zlib(body) {
        let mut decoder = ZlibDecoder::new(body);
        let mut inflated = Vec::new();
        decoder.read_to_end(&mut inflated)?;
        Ok(serde_json::from_slice(&inflated)?)
    } else {
        Ok(serde_json::from_slice(body)?)
    }
}

/// Builder for configuring [`CdnClient`].
pub struct CdnClientBuilder {
    endpoints: CdnEndpoints,
    token: Arc<dyn TokenProvider>,
    connect_timeout_secs: u64,
    read_timeout_secs: u64,
    max_attempts: u32,
    initial_backoff_ms: u64,
    max_backoff_ms: u64,
    backoff_multiplier: f64,
    jitter_factor: f64,
    user_agent: String,
}

impl CdnClientBuilder {
    /// Create a new builder with default values.
    pub fn new() -> Self {
        Self {
            endpoints: CdnEndpoints::default(),
            token: Arc::new(AnonymousTokenProvider),
            connect_timeout_secs: DEFAULT_CONNECT_TIMEOUT_SECS,
            read_timeout_secs: DEFAULT_READ_TIMEOUT_SECS,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            initial_backoff_ms: DEFAULT_INITIAL_BACKOFF_MS,
            max_backoff_ms: DEFAULT_MAX_BACKOFF_MS,
            backoff_multiplier: DEFAULT_BACKOFF_MULTIPLIER,
            jitter_factor: DEFAULT_JITTER_FACTOR,
            user_agent: DEFAULT_USER_AGENT.to_string(),
        }
    }

    /// Override the endpoint hosts.
    pub fn endpoints(mut self, endpoints: CdnEndpoints) -> Self {
        self.endpoints = endpoints;
        self
    }

    /// Install a token provider for authenticated endpoints.
    pub fn token_provider(mut self, token: Arc<dyn TokenProvider>) -> Self {
        self.token = token;
        self
    }

    /// Set the connection timeout in seconds.
    pub fn connect_timeout(mut self, secs: u64) -> Self {
        self.connect_timeout_secs = secs;
        self
    }

    /// Set the per-chunk read timeout in seconds.
    pub fn read_timeout(mut self, secs: u64) -> Self {
        self.read_timeout_secs = secs;
        self
    }

    /// Set the maximum attempts per request.
    pub fn max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = attempts.max(1);
        self
    }

    /// Set the initial backoff in milliseconds.
    pub fn initial_backoff_ms(mut self, ms: u64) -> Self {
        self.initial_backoff_ms = ms;
        self
    }

    /// Set the maximum backoff in milliseconds.
    pub fn max_backoff_ms(mut self, ms: u64) -> Self {
        self.max_backoff_ms = ms;
        self
    }

    /// Set the backoff multiplier.
    pub fn backoff_multiplier(mut self, multiplier: f64) -> Self {
        self.backoff_multiplier = multiplier;
        self
    }

    /// Set the jitter factor (clamped to 0.0–1.0).
    pub fn jitter_factor(mut self, factor: f64) -> Self {
        self.jitter_factor = factor.clamp(0.0, 1.0);
        self
    }

    /// Set a custom user agent string.
    pub fn user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = user_agent.into();
        self
    }

    /// Build the client.
    pub fn build(self) -> Result<CdnClient> {
        let http = Client::builder()
            .connect_timeout(Duration::from_secs(self.connect_timeout_secs))
            .read_timeout(Duration::from_secs(self.read_timeout_secs))
            .pool_max_idle_per_host(20)
            .user_agent(self.user_agent)
            .build()?;

        Ok(CdnClient {
            http,
            endpoints: self.endpoints,
            token: self.token,
            max_attempts: self.max_attempts,
            initial_backoff_ms: self.initial_backoff_ms,
            max_backoff_ms: self.max_backoff_ms,
            backoff_multiplier: self.backoff_multiplier,
            jitter_factor: self.jitter_factor,
        })
    }
}

impl Default for CdnClientBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::write::ZlibEncoder;
    use flate2::Compression;
    use std::io::Write;

    #[test]
    fn test_decode_json_plain() {
        let value = decode_json(br#"{"a": 1}"#).unwrap();
        assert_eq!(value["a"], 1);
    }

    #[test]
    fn test_decode_json_zlib() {
        let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(br#"{"buildId": "42"}"#).unwrap();
        let compressed = encoder.finish().unwrap();

        let value = decode_json(&compressed).unwrap();
        assert_eq!(value["buildId"], "42");
    }

    #[test]
    fn test_decode_json_garbage() {
        assert!(decode_json(b"not json at all").is_err());
    }

    #[test]
    fn test_backoff_progression() {
        let client = CdnClient::builder()
            .initial_backoff_ms(100)
            .max_backoff_ms(1_000)
            .backoff_multiplier(2.0)
            .jitter_factor(0.0)
            .build()
            .unwrap();

        assert_eq!(client.calculate_backoff(0).as_millis(), 100);
        assert_eq!(client.calculate_backoff(1).as_millis(), 200);
        assert_eq!(client.calculate_backoff(2).as_millis(), 400);
        // Capped at the maximum
        assert_eq!(client.calculate_backoff(6).as_millis(), 1_000);
    }

    #[test]
    fn test_max_attempts_floor() {
        let client = CdnClient::builder().max_attempts(0).build().unwrap();
        assert_eq!(client.max_attempts, 1);
    }
}
