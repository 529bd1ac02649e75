//! Normalised build manifests for both content-system generations

use serde::Deserialize;
use serde_json::Value;
use std::fmt;
use std::str::FromStr;

use crate::depot::{Depot, DepotJson};
use crate::error::{Error, Result};
use crate::item::{DepotItem, V1Blob, V1File};
use crate::path::normalize_path;

/// Target platform of a build.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Platform {
    /// Windows (`windows` in CDN paths)
    #[default]
    Windows,
    /// macOS (`osx` in CDN paths)
    Mac,
    /// Linux (`linux` in CDN paths)
    Linux,
}

impl Platform {
    /// The identifier used in CDN URLs.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Windows => "windows",
            Self::Mac => "osx",
            Self::Linux => "linux",
        }
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Platform {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "windows" | "win" => Ok(Self::Windows),
            "osx" | "mac" | "macos" => Ok(Self::Mac),
            "linux" => Ok(Self::Linux),
            other => Err(Error::UnknownPlatform {
                platform: other.to_string(),
            }),
        }
    }
}

/// One entry of the builds listing.
#[derive(Debug, Clone, Deserialize)]
pub struct BuildInfo {
    /// User-facing build identifier
    #[serde(default)]
    pub build_id: String,
    /// Manifest generation, 1 or 2
    #[serde(default = "default_generation")]
    pub generation: u8,
    /// V1 repository id ("legacy build id"), numeric string
    #[serde(default)]
    pub legacy_build_id: Option<Value>,
    /// Exact V2 manifest URL
    #[serde(default)]
    pub link: Option<String>,
    /// Publication timestamp, ISO-8601
    #[serde(default)]
    pub date_published: String,
    /// Human-readable version
    #[serde(default)]
    pub version_name: String,
}

fn default_generation() -> u8 {
    2
}

impl BuildInfo {
    /// The V1 repository id as a string, regardless of JSON number/string
    /// representation.
    pub fn repository_id(&self) -> Option<String> {
        match &self.legacy_build_id {
            Some(Value::String(s)) => Some(s.clone()),
            Some(Value::Number(n)) => Some(n.to_string()),
            _ => None,
        }
    }
}

/// Normalised view of a build, independent of generation.
///
/// Invariants: `generation == 1` implies `repository_id` is present;
/// `generation == 2` implies every depot carries a manifest hash.
#[derive(Debug, Clone)]
pub struct Manifest {
    /// Base product id
    pub base_product_id: String,
    /// User-facing build id
    pub build_id: Option<String>,
    /// V1 repository id, the numeric "legacy build id" in V1 URLs
    pub repository_id: Option<String>,
    /// Manifest generation, 1 or 2
    pub generation: u8,
    /// Install directory name (empty for V1)
    pub install_directory: String,
    /// Ordered depot list
    pub depots: Vec<Depot>,
    /// Dependency repository ids
    pub dependencies: Vec<String>,
    /// Depot items. Populated eagerly for V1 (the repository inlines the
    /// file list); V2 items are fetched per depot through the resolver.
    pub items: Vec<DepotItem>,
    /// Raw decoded JSON, retained for archival fidelity
    pub raw: Value,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct V2ManifestJson {
    #[serde(default)]
    base_product_id: String,
    #[serde(default)]
    build_id: Option<String>,
    #[serde(default)]
    install_directory: String,
    #[serde(default)]
    depots: Vec<DepotJson>,
    offline_depot: Option<DepotJson>,
    #[serde(default)]
    dependencies: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct V1ManifestJson {
    #[serde(default)]
    depot: Option<V1DepotJson>,
}

#[derive(Debug, Deserialize)]
struct V1DepotJson {
    #[serde(default)]
    files: Vec<V1FileJson>,
}

#[derive(Debug, Deserialize)]
struct V1FileJson {
    #[serde(default)]
    path: String,
    #[serde(default)]
    offset: u64,
    #[serde(default)]
    size: u64,
    #[serde(default)]
    hash: String,
    #[serde(default)]
    url: Option<String>,
}

impl Manifest {
    /// Parse a generation 2 repository manifest.
    pub fn from_v2_json(json: Value) -> Result<Self> {
        let parsed: V2ManifestJson = serde_json::from_value(json.clone())
            .map_err(|e| Error::invalid_manifest(format!("v2 repository: {e}")))?;

        let mut depots: Vec<Depot> = parsed
            .depots
            .iter()
            .map(|d| Depot::from_json(d, false))
            .collect();
        if let Some(offline) = &parsed.offline_depot {
            depots.push(Depot::from_json(offline, true));
        }

        for depot in &depots {
            if depot.manifest.is_empty() {
                return Err(Error::invalid_manifest(
                    "v2 depot without a manifest hash",
                ));
            }
        }

        Ok(Self {
            base_product_id: parsed.base_product_id,
            build_id: parsed.build_id,
            repository_id: None,
            generation: 2,
            install_directory: parsed.install_directory,
            depots,
            dependencies: parsed.dependencies,
            items: Vec::new(),
            raw: json,
        })
    }

    /// Parse a generation 1 manifest (`repository.json` shape with
    /// `depot.files[]`).
    ///
    /// A single synthetic depot is created for the `main.bin` blob; every
    /// file entry becomes a [`DepotItem::V1File`] and one
    /// [`DepotItem::V1Blob`] describes the blob itself.
    pub fn from_v1_json(json: Value, product_id: &str, repository_id: &str) -> Result<Self> {
        let parsed: V1ManifestJson = serde_json::from_value(json.clone())
            .map_err(|e| Error::invalid_manifest(format!("v1 repository: {e}")))?;

        let mut items = Vec::new();
        let mut depot_size = 0u64;
        let mut blob_end = 0u64;
        let mut blob_path = "main.bin".to_string();

        if let Some(depot) = &parsed.depot {
            for file in &depot.files {
                if let Some(url) = &file.url {
                    blob_path = url.clone();
                }
                depot_size += file.size;
                blob_end = blob_end.max(file.offset + file.size);
                items.push(DepotItem::V1File(V1File {
                    product_id: product_id.to_string(),
                    path: normalize_path(&file.path),
                    offset: file.offset,
                    size: file.size,
                    md5: file.hash.to_lowercase(),
                    blob_path: file.url.clone().unwrap_or_else(|| "main.bin".to_string()),
                }));
            }
        }

        let depots = vec![Depot {
            product_id: product_id.to_string(),
            manifest: String::new(),
            languages: vec!["*".to_string()],
            os_bitness: Vec::new(),
            size: depot_size,
            compressed_size: 0,
            is_offline: false,
        }];

        // The blob md5 is not part of the file list; callers fill it in
        // from the repository metadata when available.
        items.insert(
            0,
            DepotItem::V1Blob(V1Blob {
                product_id: product_id.to_string(),
                blob_path,
                total_size: blob_end,
                blob_md5: String::new(),
            }),
        );

        Ok(Self {
            base_product_id: product_id.to_string(),
            build_id: None,
            repository_id: Some(repository_id.to_string()),
            generation: 1,
            install_directory: String::new(),
            depots,
            dependencies: Vec::new(),
            items,
            raw: json,
        })
    }

    /// Depots filtered by language, bitness and product ids.
    pub fn filtered_depots(
        &self,
        language: Option<&str>,
        bitness: Option<&str>,
        product_ids: Option<&[String]>,
    ) -> Vec<&Depot> {
        self.depots
            .iter()
            .filter(|d| {
                if let Some(ids) = product_ids {
                    if !d.product_id.is_empty() && !ids.contains(&d.product_id) {
                        return false;
                    }
                }
                d.matches(language, bitness)
            })
            .collect()
    }

    /// Serialize the retained raw JSON.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(&self.raw)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_v2_manifest_parse() {
        let json = json!({
            "baseProductId": "1207658924",
            "buildId": "51780516321570306",
            "installDirectory": "Unreal Gold",
            "dependencies": ["DOSBOX"],
            "depots": [
                {"productId": "1207658924", "manifest": "AB".repeat(16),
                 "languages": ["en-US"], "size": 100, "compressedSize": 60}
            ]
        });

        let manifest = Manifest::from_v2_json(json).unwrap();
        assert_eq!(manifest.generation, 2);
        assert_eq!(manifest.base_product_id, "1207658924");
        assert_eq!(manifest.depots.len(), 1);
        assert_eq!(manifest.depots[0].manifest, "ab".repeat(16));
        assert_eq!(manifest.dependencies, vec!["DOSBOX"]);
        assert!(manifest.raw.get("buildId").is_some());
    }

    #[test]
    fn test_v2_depot_without_hash_rejected() {
        let json = json!({
            "baseProductId": "1",
            "depots": [{"productId": "1", "manifest": ""}]
        });
        assert!(Manifest::from_v2_json(json).is_err());
    }

    #[test]
    fn test_v1_manifest_parse() {
        let json = json!({
            "depot": {
                "files": [
                    {"path": "/System/Unreal.ini", "offset": 0, "size": 1000,
                     "hash": "AA".repeat(16), "url": "1207658930/main.bin"},
                    {"path": "\\Maps\\DM.unr", "offset": 1000, "size": 500,
                     "hash": "bb".repeat(16)}
                ]
            }
        });

        let manifest = Manifest::from_v1_json(json, "1207658924", "24085618").unwrap();
        assert_eq!(manifest.generation, 1);
        assert_eq!(manifest.repository_id.as_deref(), Some("24085618"));
        assert_eq!(manifest.items.len(), 3);
        assert!(matches!(manifest.items[0], DepotItem::V1Blob(_)));

        let DepotItem::V1Blob(blob) = &manifest.items[0] else {
            unreachable!()
        };
        assert_eq!(blob.total_size, 1500);
        assert_eq!(blob.blob_path, "1207658930/main.bin");

        let DepotItem::V1File(file) = &manifest.items[2] else {
            panic!("expected V1File")
        };
        assert_eq!(file.path, "Maps/DM.unr");
        assert_eq!(file.offset, 1000);
    }

    #[test]
    fn test_platform_parse() {
        assert_eq!("windows".parse::<Platform>().unwrap(), Platform::Windows);
        assert_eq!("OSX".parse::<Platform>().unwrap(), Platform::Mac);
        assert_eq!("mac".parse::<Platform>().unwrap(), Platform::Mac);
        assert!("amiga".parse::<Platform>().is_err());
    }

    #[test]
    fn test_filtered_depots() {
        let json = json!({
            "baseProductId": "1",
            "depots": [
                {"productId": "1", "manifest": "aa".repeat(16), "languages": ["en-US"]},
                {"productId": "1", "manifest": "bb".repeat(16), "languages": ["de-DE"]},
                {"productId": "2", "manifest": "cc".repeat(16), "languages": ["*"]}
            ]
        });
        let manifest = Manifest::from_v2_json(json).unwrap();

        let base_only = vec!["1".to_string()];
        let depots = manifest.filtered_depots(Some("en-US"), None, Some(&base_only));
        assert_eq!(depots.len(), 1);
        assert_eq!(depots[0].manifest, "aa".repeat(16));

        let all = manifest.filtered_depots(Some("en-US"), None, None);
        assert_eq!(all.len(), 2);
    }

    #[test]
    fn test_build_info_repository_id() {
        let numeric: BuildInfo =
            serde_json::from_value(json!({"build_id": "1", "legacy_build_id": 24085618}))
                .unwrap();
        assert_eq!(numeric.repository_id().as_deref(), Some("24085618"));

        let string: BuildInfo =
            serde_json::from_value(json!({"build_id": "1", "legacy_build_id": "24085618"}))
                .unwrap();
        assert_eq!(string.repository_id().as_deref(), Some("24085618"));
    }
}
