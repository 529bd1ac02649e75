//! Build discovery and manifest resolution
//!
//! The builds endpoint behaves inconsistently across generations: each
//! generation's listing may carry builds the other omits, so complete
//! discovery queries both and merges. Delisted builds never appear in
//! either listing; [`BuildResolver::resolve_direct`] reaches their
//! manifests by repository id or exact URL instead.

use serde_json::Value;
use tracing::{debug, warn};

use galaxy_cdn::CdnClient;
use galaxy_manifest::{BuildInfo, Depot, DepotItem, Manifest, Platform};

use crate::error::{Error, Result};

/// Selector for [`BuildResolver::resolve_direct`]: how to reach a manifest
/// without the builds endpoint.
#[derive(Debug, Clone, Default)]
pub struct DirectSelector {
    /// Manifest generation; `None` auto-detects by trying V1 then V2
    pub generation: Option<u8>,
    /// V1 repository id, or the V2 repository manifest hash
    pub repository_id: Option<String>,
    /// Exact V2 manifest URL (takes precedence over `repository_id`)
    pub manifest_link: Option<String>,
    /// User-facing build id, recorded on the resolved manifest
    pub build_id: Option<String>,
}

/// Resolves product builds into normalised [`Manifest`] values.
#[derive(Debug, Clone)]
pub struct BuildResolver {
    cdn: CdnClient,
}

impl BuildResolver {
    /// Wrap a CDN client.
    pub fn new(cdn: CdnClient) -> Self {
        Self { cdn }
    }

    /// The underlying client.
    pub fn cdn(&self) -> &CdnClient {
        &self.cdn
    }

    /// All builds of a product: the union of both generation listings,
    /// deduplicated by build id and sorted newest-first by publication
    /// date.
    pub async fn list_all_builds(
        &self,
        product_id: &str,
        platform: Platform,
    ) -> Result<Vec<BuildInfo>> {
        let mut merged: Vec<BuildInfo> = Vec::new();

        for generation in [1u8, 2u8] {
            match self.cdn.builds(product_id, platform, generation).await {
                Ok(response) => {
                    let items = parse_build_items(&response);
                    debug!(
                        "generation={generation} listing returned {} builds",
                        items.len()
                    );
                    merged.extend(items);
                }
                Err(e) => {
                    warn!("generation={generation} builds query failed: {e}");
                }
            }
        }

        let mut unique: Vec<BuildInfo> = Vec::with_capacity(merged.len());
        for build in merged {
            if !unique.iter().any(|b| b.build_id == build.build_id) {
                unique.push(build);
            }
        }
        unique.sort_by(|a, b| b.date_published.cmp(&a.date_published));

        Ok(unique)
    }

    /// Resolve the newest build of a product.
    pub async fn resolve_latest(&self, product_id: &str, platform: Platform) -> Result<Manifest> {
        let builds = self.list_all_builds(product_id, platform).await?;
        let latest = builds
            .first()
            .ok_or_else(|| galaxy_cdn::Error::not_found(format!("builds of {product_id}")))?;
        self.manifest_from_build(product_id, latest, platform).await
    }

    /// Resolve a specific build by its user-facing build id. An unknown id
    /// is `NotFound`; the resolver does not guess.
    pub async fn resolve_by_build_id(
        &self,
        product_id: &str,
        build_id: &str,
        platform: Platform,
    ) -> Result<Manifest> {
        let builds = self.list_all_builds(product_id, platform).await?;
        let build = builds
            .iter()
            .find(|b| b.build_id == build_id)
            .ok_or_else(|| {
                galaxy_cdn::Error::not_found(format!("build {build_id} of {product_id}"))
            })?;
        self.manifest_from_build(product_id, build, platform).await
    }

    /// Resolve a build by its position in the newest-first listing
    /// (legacy numeric-selector behaviour).
    pub async fn resolve_by_index(
        &self,
        product_id: &str,
        index: usize,
        platform: Platform,
    ) -> Result<Manifest> {
        let builds = self.list_all_builds(product_id, platform).await?;
        let build = builds.get(index).ok_or_else(|| {
            galaxy_cdn::Error::not_found(format!("build index {index} of {product_id}"))
        })?;
        self.manifest_from_build(product_id, build, platform).await
    }

    /// Resolve a manifest without touching the builds endpoint, for
    /// delisted or externally cached builds.
    ///
    /// With `generation: None` the repository id is probed as a V1
    /// repository first and as a V2 content address second.
    pub async fn resolve_direct(
        &self,
        product_id: &str,
        selector: DirectSelector,
        platform: Platform,
    ) -> Result<Manifest> {
        match selector.generation {
            Some(1) => {
                let repository_id = selector.repository_id.as_deref().ok_or_else(|| {
                    Error::invalid_item("V1 direct resolution requires a repository id")
                })?;
                self.v1_manifest(product_id, repository_id, selector.build_id, platform)
                    .await
            }
            Some(2) => {
                let json = if let Some(link) = &selector.manifest_link {
                    self.cdn.manifest_by_url(link).await?
                } else if let Some(hash) = &selector.repository_id {
                    self.cdn.v2_manifest(hash).await?
                } else {
                    return Err(Error::invalid_item(
                        "V2 direct resolution requires a manifest link or hash",
                    ));
                };
                let mut manifest = Manifest::from_v2_json(json)?;
                if manifest.build_id.is_none() {
                    manifest.build_id = selector.build_id;
                }
                Ok(manifest)
            }
            Some(other) => Err(Error::invalid_item(format!("unknown generation {other}"))),
            None => {
                let repository_id = selector.repository_id.as_deref().ok_or_else(|| {
                    Error::invalid_item("generation auto-detection requires a repository id")
                })?;

                debug!("auto-detecting generation for {product_id}/{repository_id}");
                match self
                    .v1_manifest(product_id, repository_id, selector.build_id.clone(), platform)
                    .await
                {
                    Ok(manifest) => Ok(manifest),
                    Err(e) if e.is_not_found() => {
                        debug!("V1 probe missed, trying V2 content address");
                        let json = self.cdn.v2_manifest(repository_id).await?;
                        let mut manifest = Manifest::from_v2_json(json)?;
                        if manifest.build_id.is_none() {
                            manifest.build_id = selector.build_id;
                        }
                        Ok(manifest)
                    }
                    Err(e) => Err(e),
                }
            }
        }
    }

    /// Resolve the manifest behind a build record.
    pub async fn manifest_from_build(
        &self,
        product_id: &str,
        build: &BuildInfo,
        platform: Platform,
    ) -> Result<Manifest> {
        if build.generation == 1 {
            let repository_id = build.repository_id().ok_or_else(|| {
                galaxy_manifest::Error::invalid_manifest("V1 build without legacy_build_id")
            })?;
            let mut manifest = self
                .v1_manifest(product_id, &repository_id, None, platform)
                .await?;
            manifest.build_id = Some(build.build_id.clone());
            Ok(manifest)
        } else {
            let link = build.link.as_deref().ok_or_else(|| {
                galaxy_manifest::Error::invalid_manifest("V2 build without manifest link")
            })?;
            let json = self.cdn.manifest_by_url(link).await?;
            let mut manifest = Manifest::from_v2_json(json)?;
            if manifest.build_id.is_none() {
                manifest.build_id = Some(build.build_id.clone());
            }
            Ok(manifest)
        }
    }

    /// Fetch and parse the depot items of a V2 depot.
    pub async fn depot_items(&self, depot: &Depot) -> Result<Vec<DepotItem>> {
        let json = self.cdn.v2_manifest(&depot.manifest).await?;
        Ok(galaxy_manifest::item::parse_depot_items(
            &json,
            &depot.product_id,
            false,
        )?)
    }

    /// Fetch and parse the depot items of a dependency repository depot.
    pub async fn dependency_depot_items(&self, depot: &Depot) -> Result<Vec<DepotItem>> {
        let json = self.cdn.v2_dependency_manifest(&depot.manifest).await?;
        Ok(galaxy_manifest::item::parse_depot_items(
            &json,
            &depot.product_id,
            true,
        )?)
    }

    async fn v1_manifest(
        &self,
        product_id: &str,
        repository_id: &str,
        build_id: Option<String>,
        platform: Platform,
    ) -> Result<Manifest> {
        let json = self
            .cdn
            .v1_manifest(product_id, platform, repository_id, "repository")
            .await?;
        let mut manifest = Manifest::from_v1_json(json, product_id, repository_id)?;
        manifest.build_id = build_id;
        Ok(manifest)
    }
}

fn parse_build_items(response: &Value) -> Vec<BuildInfo> {
    response
        .get("items")
        .and_then(|v| v.as_array())
        .map(|items| {
            items
                .iter()
                .filter_map(|item| serde_json::from_value(item.clone()).ok())
                .collect()
        })
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_build_items() {
        let response = json!({
            "items": [
                {"build_id": "51", "generation": 2, "link": "https://x/51",
                 "date_published": "2023-01-01T00:00:00+0000", "version_name": "1.1"},
                {"build_id": "40", "generation": 1, "legacy_build_id": 24085618,
                 "date_published": "2019-01-01T00:00:00+0000", "version_name": "1.0"}
            ]
        });

        let items = parse_build_items(&response);
        assert_eq!(items.len(), 2);
        assert_eq!(items[0].build_id, "51");
        assert_eq!(items[1].repository_id().as_deref(), Some("24085618"));
    }

    #[test]
    fn test_parse_build_items_empty() {
        assert!(parse_build_items(&json!({})).is_empty());
        assert!(parse_build_items(&json!({"items": []})).is_empty());
    }
}
