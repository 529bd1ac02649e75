//! Manifest comparison: partition files into new / changed / patched / deleted

use std::collections::HashMap;
use std::fmt;

use crate::item::DepotItem;
use crate::manifest::Manifest;
use crate::patch::{FilePatchDiff, Patch};

/// The difference between two builds.
///
/// The four sets are disjoint: every file of the new manifest lands in
/// exactly one of `new`, `changed` or `patched` (or is skipped as
/// unchanged); every path present only in the old manifest lands in
/// `deleted`.
#[derive(Debug, Default, Clone)]
pub struct ManifestDiff {
    /// Files absent from the old manifest
    pub new: Vec<DepotItem>,
    /// Files whose content changed and need a full download
    pub changed: Vec<DepotItem>,
    /// Files updatable through delta patches
    pub patched: Vec<FilePatchDiff>,
    /// Paths present in the old manifest but not the new
    pub deleted: Vec<String>,
}

impl ManifestDiff {
    /// Compare two manifests, optionally routing changed files through a
    /// patch.
    ///
    /// With no old manifest every item is new. A changed file is moved to
    /// `patched` only when the patch carries a diff whose target path and
    /// both endpoint hashes line up; anything else falls back to a full
    /// download. Unchanged files (same md5, same uncompressed size) are
    /// dropped entirely.
    pub fn compare(new: &Manifest, old: Option<&Manifest>, patch: Option<&Patch>) -> Self {
        let mut diff = Self::default();

        let Some(old) = old else {
            diff.new = new.items.clone();
            return diff;
        };

        let by_path_old: HashMap<&str, &DepotItem> =
            old.items.iter().map(|i| (i.path(), i)).collect();
        let mut seen_in_new: Vec<&str> = Vec::with_capacity(new.items.len());

        for item in &new.items {
            let path = item.path();
            seen_in_new.push(path);

            let Some(old_item) = by_path_old.get(path) else {
                diff.new.push(item.clone());
                continue;
            };

            // Cross-generation updates always re-download: the two
            // generations hash different shapes of the same content.
            if old.generation == new.generation
                && item.md5().is_some()
                && item.md5() == old_item.md5()
                && item.total_size_uncompressed() == old_item.total_size_uncompressed()
            {
                continue;
            }

            let patched = patch.and_then(|p| p.diff_for(path)).filter(|fp| {
                Some(fp.md5_source.as_str()) == old_item.md5()
                    && Some(fp.md5_target.as_str()) == item.md5()
            });

            match patched {
                Some(fp) => diff.patched.push(fp.clone()),
                None => diff.changed.push(item.clone()),
            }
        }

        for old_item in &old.items {
            let path = old_item.path();
            if !seen_in_new.contains(&path) {
                diff.deleted.push(path.to_string());
            }
        }

        diff
    }

    /// Whether nothing needs downloading or deleting.
    pub fn is_empty(&self) -> bool {
        self.new.is_empty()
            && self.changed.is_empty()
            && self.patched.is_empty()
            && self.deleted.is_empty()
    }
}

impl fmt::Display for ManifestDiff {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut parts = Vec::new();
        if !self.new.is_empty() {
            parts.push(format!("{} new", self.new.len()));
        }
        if !self.changed.is_empty() {
            parts.push(format!("{} changed", self.changed.len()));
        }
        if !self.patched.is_empty() {
            parts.push(format!("{} patched", self.patched.len()));
        }
        if !self.deleted.is_empty() {
            parts.push(format!("{} deleted", self.deleted.len()));
        }
        if parts.is_empty() {
            f.write_str("no changes")
        } else {
            f.write_str(&parts.join(", "))
        }
    }
}
