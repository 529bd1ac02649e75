//! Endpoint hosts and URL construction
//!
//! All hosts are overridable so tests can point the client at a stub
//! server and deployments can pin a CDN mirror.

use galaxy_manifest::galaxy_path;
use galaxy_manifest::Platform;

/// Default content-system API host.
pub const DEFAULT_CONTENT_SYSTEM: &str = "https://content-system.gog.com";
/// Default public CDN host for manifests.
pub const DEFAULT_CDN: &str = "https://cdn.gog.com";
/// Default embed host (library endpoints).
pub const DEFAULT_EMBED: &str = "https://embed.gog.com";
/// Default auth host (token exchange).
pub const DEFAULT_AUTH: &str = "https://auth.gog.com";

/// Endpoint hosts used by [`crate::CdnClient`].
#[derive(Debug, Clone)]
pub struct CdnEndpoints {
    /// content-system API host (builds, secure links, patches)
    pub content_system: String,
    /// Public CDN host (V1/V2 manifests)
    pub cdn: String,
    /// Embed host (owned-games listing)
    pub embed: String,
    /// Auth host (OAuth token endpoint)
    pub auth: String,
}

impl Default for CdnEndpoints {
    fn default() -> Self {
        Self {
            content_system: DEFAULT_CONTENT_SYSTEM.to_string(),
            cdn: DEFAULT_CDN.to_string(),
            embed: DEFAULT_EMBED.to_string(),
            auth: DEFAULT_AUTH.to_string(),
        }
    }
}

impl CdnEndpoints {
    /// Point every endpoint family at a single host. Used by tests with a
    /// stub HTTP server.
    pub fn single_host(host: impl Into<String>) -> Self {
        let host = host.into();
        Self {
            content_system: host.clone(),
            cdn: host.clone(),
            embed: host.clone(),
            auth: host,
        }
    }

    /// Builds listing for a product and generation.
    pub fn builds_url(&self, product_id: &str, platform: Platform, generation: u8) -> String {
        format!(
            "{}/products/{}/os/{}/builds?generation={}",
            self.content_system, product_id, platform, generation
        )
    }

    /// V1 manifest (`repository.json` or a named manifest) under a
    /// repository id.
    pub fn v1_manifest_url(
        &self,
        product_id: &str,
        platform: Platform,
        repository_id: &str,
        name: &str,
    ) -> String {
        format!(
            "{}/content-system/v1/manifests/{}/{}/{}/{}.json",
            self.cdn, product_id, platform, repository_id, name
        )
    }

    /// V2 meta object, content-addressed.
    pub fn v2_meta_url(&self, hash: &str) -> String {
        format!("{}/content-system/v2/meta/{}", self.cdn, galaxy_path(hash))
    }

    /// V2 dependency meta object.
    pub fn v2_dependency_meta_url(&self, hash: &str) -> String {
        format!(
            "{}/content-system/v2/dependencies/meta/{}",
            self.cdn,
            galaxy_path(hash)
        )
    }

    /// V2 patch manifest meta object.
    pub fn v2_patch_meta_url(&self, hash: &str) -> String {
        format!(
            "{}/content-system/v2/patches/meta/{}",
            self.cdn,
            galaxy_path(hash)
        )
    }

    /// Secure-link mint for the store root.
    ///
    /// Generation 1 secure links take a `type=depot` discriminator instead
    /// of a `generation` parameter.
    pub fn secure_link_url(&self, product_id: &str, path: &str, generation: u8) -> String {
        if generation == 1 {
            format!(
                "{}/products/{}/secure_link?_version=2&type=depot&path={}",
                self.content_system,
                product_id,
                urlencoding::encode(path)
            )
        } else {
            format!(
                "{}/products/{}/secure_link?_version=2&generation=2&path={}",
                self.content_system,
                product_id,
                urlencoding::encode(path)
            )
        }
    }

    /// Secure-link mint for the patch store root, credentialed per patch.
    pub fn patch_secure_link_url(
        &self,
        product_id: &str,
        client_id: &str,
        client_secret: &str,
    ) -> String {
        format!(
            "{}/products/{}/secure_link?generation=2&path={}&client_id={}&client_secret={}",
            self.content_system,
            product_id,
            urlencoding::encode(&format!("/patches/store/{product_id}")),
            client_id,
            client_secret
        )
    }

    /// Patch availability query between two builds.
    pub fn patch_info_url(&self, product_id: &str, from_build: &str, to_build: &str) -> String {
        format!(
            "{}/products/{}/patches?from_build_id={}&to_build_id={}",
            self.content_system, product_id, from_build, to_build
        )
    }

    /// Owned games of the authenticated user.
    pub fn user_games_url(&self) -> String {
        format!("{}/user/data/games", self.embed)
    }

    /// Game details from the user's library.
    pub fn game_details_url(&self, product_id: &str) -> String {
        format!("{}/account/gameDetails/{}.json", self.embed, product_id)
    }

    /// OAuth token endpoint.
    pub fn token_url(&self) -> String {
        format!("{}/token", self.auth)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builds_url() {
        let endpoints = CdnEndpoints::default();
        assert_eq!(
            endpoints.builds_url("1207658924", Platform::Windows, 2),
            "https://content-system.gog.com/products/1207658924/os/windows/builds?generation=2"
        );
    }

    #[test]
    fn test_v2_meta_url_uses_galaxy_path() {
        let endpoints = CdnEndpoints::default();
        assert_eq!(
            endpoints.v2_meta_url("e80b5017098950fc58aad83c8c14978e"),
            "https://cdn.gog.com/content-system/v2/meta/e8/0b/e80b5017098950fc58aad83c8c14978e"
        );
    }

    #[test]
    fn test_v1_manifest_url() {
        let endpoints = CdnEndpoints::default();
        assert_eq!(
            endpoints.v1_manifest_url("1207658924", Platform::Mac, "24085618", "repository"),
            "https://cdn.gog.com/content-system/v1/manifests/1207658924/osx/24085618/repository.json"
        );
    }

    #[test]
    fn test_secure_link_generations() {
        let endpoints = CdnEndpoints::default();
        assert!(endpoints
            .secure_link_url("1", "/", 2)
            .contains("generation=2"));
        assert!(endpoints
            .secure_link_url("1", "/", 1)
            .contains("type=depot"));
    }

    #[test]
    fn test_patch_secure_link_escapes_path() {
        let endpoints = CdnEndpoints::default();
        let url = endpoints.patch_secure_link_url("1234", "cid", "csecret");
        assert!(url.contains("path=%2Fpatches%2Fstore%2F1234"));
        assert!(url.contains("client_id=cid"));
    }
}
