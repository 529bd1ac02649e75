//! Secure-link minting and caching
//!
//! Secure links are signed, time-limited URL templates for the `/store`
//! and `/patches/store` CDN roots. Minting one costs an authenticated API
//! round-trip, so responses are cached per `(product_id, root_path)` and
//! refreshed shortly before their signature expires.

use parking_lot::RwLock;
use serde_json::Value;
use std::collections::HashMap;
use std::time::{SystemTime, UNIX_EPOCH};
use tokio::sync::Mutex;
use tracing::debug;

use crate::client::CdnClient;
use crate::error::{Error, Result};

/// Placeholder the downloader substitutes with a chunk's galaxy path.
pub const GALAXY_PATH_TOKEN: &str = "{GALAXY_PATH}";

/// Refresh this many seconds before the signature expires.
const EXPIRY_MARGIN_SECS: u64 = 60;

/// Lifetime assumed when the response does not declare one.
const DEFAULT_LIFETIME_SECS: u64 = 3_600;

#[derive(Debug, Clone)]
struct CachedLinks {
    urls: Vec<String>,
    expires_at: u64,
}

/// Caching provider of CDN URL templates.
///
/// Each cached entry is a priority-ordered vector of URL templates
/// containing the literal [`GALAXY_PATH_TOKEN`] at the chunk-path position.
/// A cache miss holds the refresh gate across the HTTP call so that
/// concurrent callers trigger exactly one mint (double-checked under the
/// gate); the map lock itself is only held for lookups and insertion.
pub struct SecureLinkProvider {
    client: CdnClient,
    cache: RwLock<HashMap<(String, String), CachedLinks>>,
    refresh_gate: Mutex<()>,
}

impl SecureLinkProvider {
    /// Wrap a CDN client.
    pub fn new(client: CdnClient) -> Self {
        Self {
            client,
            cache: RwLock::new(HashMap::new()),
            refresh_gate: Mutex::new(()),
        }
    }

    /// URL templates for the store root (`/`).
    pub async fn store_urls(&self, product_id: &str, generation: u8) -> Result<Vec<String>> {
        let key = (product_id.to_string(), "/".to_string());
        if let Some(urls) = self.cached(&key) {
            return Ok(urls);
        }

        let _gate = self.refresh_gate.lock().await;
        if let Some(urls) = self.cached(&key) {
            return Ok(urls);
        }

        debug!("secure-link cache miss for {product_id} root /");
        let response = self.client.secure_link(product_id, "/", generation).await?;
        let (urls, expires_at) = parse_link_response(&response)?;
        self.insert(key, urls.clone(), expires_at);
        Ok(urls)
    }

    /// URL templates for the patch store root
    /// (`/patches/store/{product_id}`), minted with per-patch credentials.
    pub async fn patch_store_urls(
        &self,
        product_id: &str,
        client_id: &str,
        client_secret: &str,
    ) -> Result<Vec<String>> {
        let root = format!("/patches/store/{product_id}");
        let key = (product_id.to_string(), root);
        if let Some(urls) = self.cached(&key) {
            return Ok(urls);
        }

        let _gate = self.refresh_gate.lock().await;
        if let Some(urls) = self.cached(&key) {
            return Ok(urls);
        }

        debug!("secure-link cache miss for {product_id} patch store");
        let response = self
            .client
            .patch_secure_link(product_id, client_id, client_secret)
            .await?;
        let (urls, expires_at) = parse_link_response(&response)?;
        self.insert(key, urls.clone(), expires_at);
        Ok(urls)
    }

    /// Drop every cached entry for a product.
    pub fn invalidate(&self, product_id: &str) {
        self.cache.write().retain(|(pid, _), _| pid != product_id);
    }

    fn cached(&self, key: &(String, String)) -> Option<Vec<String>> {
        let cache = self.cache.read();
        let entry = cache.get(key)?;
        if unix_now() >= entry.expires_at.saturating_sub(EXPIRY_MARGIN_SECS) {
            return None;
        }
        Some(entry.urls.clone())
    }

    fn insert(&self, key: (String, String), urls: Vec<String>, expires_at: Option<u64>) {
        let expires_at = expires_at.unwrap_or_else(|| unix_now() + DEFAULT_LIFETIME_SECS);
        self.cache
            .write()
            .insert(key, CachedLinks { urls, expires_at });
    }

    #[cfg(test)]
    fn insert_for_test(&self, key: (String, String), urls: Vec<String>, expires_at: u64) {
        self.cache
            .write()
            .insert(key, CachedLinks { urls, expires_at });
    }
}

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

/// Extract the prioritised URL templates from a secure-link response.
///
/// Entries are sorted ascending by their `priority` field (entries without
/// one keep their input order at the back), then each `url_format` has its
/// parameters merged in. Templates with a `{path}` placeholder get
/// [`GALAXY_PATH_TOKEN`] appended to the path parameter so the downloader
/// can substitute per-chunk galaxy paths.
///
/// Returns the templates plus the earliest `expires_at` found in the
/// parameters, if any.
pub fn parse_link_response(response: &Value) -> Result<(Vec<String>, Option<u64>)> {
    let entries = response
        .get("urls")
        .and_then(|v| v.as_array())
        .ok_or_else(|| Error::invalid_response("secure-link response without urls"))?;

    let mut ranked: Vec<(i64, usize, &Value)> = entries
        .iter()
        .enumerate()
        .map(|(idx, entry)| {
            let priority = entry
                .get("priority")
                .and_then(|p| p.as_i64())
                .unwrap_or(i64::MAX);
            (priority, idx, entry)
        })
        .collect();
    ranked.sort_by_key(|(priority, idx, _)| (*priority, *idx));

    let mut urls = Vec::with_capacity(ranked.len());
    let mut expires_at: Option<u64> = None;

    for (_, _, entry) in ranked {
        let template = entry
            .get("url_format")
            .and_then(|v| v.as_str())
            .unwrap_or_default();
        if template.is_empty() {
            continue;
        }

        let mut parameters: HashMap<String, String> = HashMap::new();
        if let Some(params) = entry.get("parameters").and_then(|v| v.as_object()) {
            for (k, v) in params {
                let value = match v {
                    Value::String(s) => s.clone(),
                    Value::Number(n) => n.to_string(),
                    Value::Bool(b) => b.to_string(),
                    _ => continue,
                };
                if k == "expires_at" {
                    if let Ok(ts) = value.parse::<u64>() {
                        expires_at = Some(expires_at.map_or(ts, |prev| prev.min(ts)));
                    }
                }
                parameters.insert(k.clone(), value);
            }
        }

        if template.contains("{path}") {
            let path = parameters.remove("path").unwrap_or_default();
            parameters.insert("path".to_string(), format!("{path}{GALAXY_PATH_TOKEN}"));
        }

        let mut url = template.to_string();
        for (key, value) in &parameters {
            url = url.replace(&format!("{{{key}}}"), value);
        }
        urls.push(url);
    }

    if urls.is_empty() {
        return Err(Error::invalid_response("secure-link response with no usable urls"));
    }

    Ok((urls, expires_at))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_sorts_by_priority() {
        let response = json!({
            "urls": [
                {"url_format": "https://b.example/{path}", "priority": 2,
                 "parameters": {"path": "/store"}},
                {"url_format": "https://a.example/{path}", "priority": 1,
                 "parameters": {"path": "/store"}}
            ]
        });

        let (urls, _) = parse_link_response(&response).unwrap();
        assert_eq!(urls[0], "https://a.example/store{GALAXY_PATH}");
        assert_eq!(urls[1], "https://b.example/store{GALAXY_PATH}");
    }

    #[test]
    fn test_parse_merges_parameters() {
        let response = json!({
            "urls": [{
                "url_format": "https://cdn.example/{path}?t={token}",
                "priority": 0,
                "parameters": {"path": "/store/1234", "token": "sig", "expires_at": 1900000000u64}
            }]
        });

        let (urls, expires) = parse_link_response(&response).unwrap();
        assert_eq!(urls[0], "https://cdn.example/store/1234{GALAXY_PATH}?t=sig");
        assert_eq!(expires, Some(1_900_000_000));
    }

    #[test]
    fn test_parse_rejects_missing_urls() {
        assert!(parse_link_response(&json!({})).is_err());
        assert!(parse_link_response(&json!({"urls": []})).is_err());
    }

    #[tokio::test]
    async fn test_cache_hit_before_expiry() {
        let client = CdnClient::new().unwrap();
        let provider = SecureLinkProvider::new(client);
        let key = ("1234".to_string(), "/".to_string());

        // Expires far in the future: the cached vector is served
        provider.insert_for_test(key.clone(), vec!["u1".into()], unix_now() + 3_600);
        assert_eq!(provider.cached(&key), Some(vec!["u1".to_string()]));

        // Within the 60 s margin: treated as expired
        provider.insert_for_test(key.clone(), vec!["u2".into()], unix_now() + 30);
        assert_eq!(provider.cached(&key), None);
    }

    #[test]
    fn test_invalidate_is_per_product() {
        let client = CdnClient::new().unwrap();
        let provider = SecureLinkProvider::new(client);
        provider.insert_for_test(("1".into(), "/".into()), vec!["a".into()], u64::MAX);
        provider.insert_for_test(("2".into(), "/".into()), vec!["b".into()], u64::MAX);

        provider.invalidate("1");
        assert!(provider.cached(&("1".into(), "/".into())).is_none());
        assert!(provider.cached(&("2".into(), "/".into())).is_some());
    }

    #[tokio::test]
    async fn test_concurrent_callers_trigger_exactly_one_refresh() {
        use std::sync::Arc;
        use wiremock::matchers::{method, path};
        use wiremock::{Mock, MockServer, ResponseTemplate};

        let server = MockServer::start().await;
        let body = serde_json::json!({
            "urls": [{
                "endpoint_name": "edge",
                "url_format": format!("{}/cdn{{path}}", server.uri()),
                "priority": 0,
                "parameters": {"path": "/store/1234", "expires_at": 4_000_000_000u64}
            }]
        });
        // The mint endpoint tolerates exactly one hit
        Mock::given(method("GET"))
            .and(path("/products/1234/secure_link"))
            .respond_with(ResponseTemplate::new(200).set_body_json(body))
            .expect(1)
            .mount(&server)
            .await;

        let client = CdnClient::builder()
            .endpoints(crate::CdnEndpoints::single_host(server.uri()))
            .token_provider(Arc::new(crate::StaticTokenProvider::new("tok")))
            .build()
            .unwrap();
        let provider = Arc::new(SecureLinkProvider::new(client));

        // Seed an entry inside the refresh margin: every caller below
        // observes a cache miss at the same time
        provider.insert_for_test(
            ("1234".into(), "/".into()),
            vec!["stale".into()],
            unix_now() + EXPIRY_MARGIN_SECS / 2,
        );

        let callers = (0..8).map(|_| {
            let provider = Arc::clone(&provider);
            async move { provider.store_urls("1234", 2).await }
        });
        let results = futures_util::future::join_all(callers).await;

        let expected = vec![format!("{}/cdn/store/1234{{GALAXY_PATH}}", server.uri())];
        for result in results {
            assert_eq!(result.unwrap(), expected);
        }
        // expect(1) on the mock: the 8 concurrent misses collapsed into a
        // single mint
        server.verify().await;
    }
}
