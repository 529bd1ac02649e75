//! Patch resolution between two builds
//!
//! The patches API distinguishes three valid outcomes: an error body
//! (incompatible builds), a patch record whose linked root manifest is the
//! empty object (compatible builds, no patch), and a real root manifest
//! listing per-depot patch manifests. Only the last yields a [`Patch`].

use tracing::{debug, warn};

use galaxy_cdn::CdnClient;
use galaxy_manifest::patch::{parse_depot_diffs, PATCH_ALGORITHM};
use galaxy_manifest::{FilePatchDiff, Manifest, Patch};

use crate::error::{Error, Result};

/// Query patch availability between `old` and `new` and resolve the
/// per-file deltas.
///
/// Returns `None` when no patch path exists: either build is V1, a build
/// id is missing, the API answers with an error body, the root manifest is
/// the `{}` sentinel, or no depot matches the requested language and
/// product set. A root manifest with an algorithm other than xdelta3 is an
/// error rather than a silent fallback.
pub async fn get_patch(
    cdn: &CdnClient,
    new: &Manifest,
    old: &Manifest,
    language: &str,
    dlc_product_ids: &[String],
) -> Result<Option<Patch>> {
    // V1 builds have no patch support
    if new.generation == 1 || old.generation == 1 {
        return Ok(None);
    }

    let (Some(from_build), Some(to_build)) = (old.build_id.as_deref(), new.build_id.as_deref())
    else {
        return Ok(None);
    };

    let info = cdn
        .patch_info(&new.base_product_id, from_build, to_build)
        .await?;
    if info.get("error").is_some() {
        debug!("no patch between {from_build} and {to_build}: incompatible builds");
        return Ok(None);
    }
    let Some(link) = info.get("link").and_then(|v| v.as_str()) else {
        return Ok(None);
    };

    let root = cdn.manifest_by_url(link).await?;
    if root.as_object().is_some_and(|o| o.is_empty()) {
        debug!("empty patch manifest between {from_build} and {to_build}");
        return Ok(None);
    }

    let algorithm = root
        .get("algorithm")
        .and_then(|v| v.as_str())
        .unwrap_or_default();
    if algorithm != PATCH_ALGORITHM {
        return Err(Error::unsupported(format!(
            "patch algorithm {algorithm:?}"
        )));
    }

    let mut wanted_products: Vec<&str> = vec![new.base_product_id.as_str()];
    wanted_products.extend(dlc_product_ids.iter().map(|s| s.as_str()));

    let mut files: Vec<FilePatchDiff> = Vec::new();
    let depots = root
        .get("depots")
        .and_then(|v| v.as_array())
        .cloned()
        .unwrap_or_default();

    for depot in &depots {
        let product_id = depot
            .get("productId")
            .and_then(|v| v.as_str())
            .unwrap_or_default();
        if !wanted_products.contains(&product_id) {
            continue;
        }

        let languages: Vec<&str> = depot
            .get("languages")
            .and_then(|v| v.as_array())
            .map(|l| l.iter().filter_map(|v| v.as_str()).collect())
            .unwrap_or_default();
        if !languages.iter().any(|l| *l == "*" || l.eq_ignore_ascii_case(language)) {
            continue;
        }

        let Some(manifest_hash) = depot.get("manifest").and_then(|v| v.as_str()) else {
            continue;
        };

        match cdn.patch_manifest(manifest_hash).await {
            Ok(depot_patch) => {
                let diffs = parse_depot_diffs(&depot_patch)?;
                debug!("patch depot {manifest_hash}: {} file diffs", diffs.len());
                files.extend(diffs);
            }
            Err(e) if e.is_not_found() => {
                // A missing depot patch manifest degrades to full download
                warn!("patch depot manifest {manifest_hash} missing, skipping patch");
                return Ok(None);
            }
            Err(e) => return Err(e.into()),
        }
    }

    if files.is_empty() {
        return Ok(None);
    }

    Ok(Some(Patch {
        algorithm: algorithm.to_string(),
        files,
        client_id: root
            .get("clientId")
            .and_then(|v| v.as_str())
            .unwrap_or_default()
            .to_string(),
        client_secret: root
            .get("clientSecret")
            .and_then(|v| v.as_str())
            .unwrap_or_default()
            .to_string(),
        from_build_id: from_build.to_string(),
        to_build_id: to_build.to_string(),
    }))
}
