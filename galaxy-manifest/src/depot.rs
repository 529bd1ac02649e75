//! Depot records: shippable slices of a build

use serde::Deserialize;
use serde_json::Value;

/// A depot groups the files of a build that share language and bitness
/// filters. Generation 2 depots reference their item list through a
/// content-addressed manifest hash; the synthetic generation 1 depot has no
/// manifest hash because V1 file lists are inlined in the repository JSON.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Depot {
    /// Product this depot belongs to (base product or DLC)
    pub product_id: String,
    /// Content hash of the depot manifest (32 hex chars, V2 only)
    pub manifest: String,
    /// Language tags; `"*"` matches every language
    pub languages: Vec<String>,
    /// OS bitness filter (`"32"` / `"64"`); empty means unrestricted
    pub os_bitness: Vec<String>,
    /// Uncompressed size in bytes
    pub size: u64,
    /// Compressed size in bytes
    pub compressed_size: u64,
    /// Whether this is the offline-installer depot (chunks not downloadable)
    pub is_offline: bool,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct DepotJson {
    #[serde(default)]
    pub product_id: String,
    #[serde(default)]
    pub manifest: String,
    #[serde(default)]
    pub languages: Vec<String>,
    #[serde(default)]
    pub os_bitness: Vec<String>,
    // V1 repositories carry sizes as strings, V2 as numbers
    #[serde(default)]
    pub size: Option<Value>,
    #[serde(default)]
    pub compressed_size: Option<Value>,
}

fn size_value(v: &Option<Value>) -> u64 {
    match v {
        Some(Value::Number(n)) => n.as_u64().unwrap_or(0),
        Some(Value::String(s)) => s.parse().unwrap_or(0),
        _ => 0,
    }
}

impl Depot {
    pub(crate) fn from_json(json: &DepotJson, is_offline: bool) -> Self {
        Self {
            product_id: json.product_id.clone(),
            manifest: json.manifest.to_lowercase(),
            languages: json.languages.clone(),
            os_bitness: json.os_bitness.clone(),
            size: size_value(&json.size),
            compressed_size: size_value(&json.compressed_size),
            is_offline,
        }
    }

    /// Check whether this depot matches the given language and bitness.
    ///
    /// `"*"` in either list acts as a wildcard; an empty bitness list on the
    /// depot means the depot is not bitness-restricted.
    pub fn matches(&self, language: Option<&str>, bitness: Option<&str>) -> bool {
        if let Some(lang) = language {
            let lang_match = self
                .languages
                .iter()
                .any(|l| l == "*" || l.eq_ignore_ascii_case(lang));
            if !lang_match {
                return false;
            }
        }

        if let Some(bits) = bitness {
            if !self.os_bitness.is_empty() {
                let bits_match = self.os_bitness.iter().any(|b| b == "*" || b == bits);
                if !bits_match {
                    return false;
                }
            }
        }

        true
    }
}
