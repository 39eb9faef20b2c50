//! Artifact hash manifest (`artifact_hashes.json`).

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::core::ids::sha256_hex;
use crate::io::workspace::{read_json, write_json};

/// Relative artifact path (forward slashes) → SHA-256 of the file bytes.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactManifest {
    pub hashes: BTreeMap<String, String>,
}

/// Paths whose hashes differ between two manifests.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManifestDiff {
    pub missing: Vec<String>,
    pub unexpected: Vec<String>,
    pub changed: Vec<String>,
}

impl ManifestDiff {
    pub fn is_empty(&self) -> bool {
        self.missing.is_empty() && self.unexpected.is_empty() && self.changed.is_empty()
    }

    /// Every differing path in sorted order.
    pub fn paths(&self) -> Vec<String> {
        let mut paths: Vec<String> = self
            .missing
            .iter()
            .chain(&self.unexpected)
            .chain(&self.changed)
            .cloned()
            .collect();
        paths.sort();
        paths
    }
}

impl ArtifactManifest {
    /// Diff `actual` against `self` as the expected manifest.
    pub fn diff(&self, actual: &ArtifactManifest) -> ManifestDiff {
        let mut diff = ManifestDiff::default();
        for (path, hash) in &self.hashes {
            match actual.hashes.get(path) {
                None => diff.missing.push(path.clone()),
                Some(other) if other != hash => diff.changed.push(path.clone()),
                Some(_) => {}
            }
        }
        for path in actual.hashes.keys() {
            if !self.hashes.contains_key(path) {
                diff.unexpected.push(path.clone());
            }
        }
        diff
    }
}

/// Hash every file under `dir` recursively. A missing directory hashes to an empty manifest.
pub fn hash_artifacts(dir: &Path) -> Result<ArtifactManifest> {
    let mut manifest = ArtifactManifest::default();
    if dir.exists() {
        hash_dir(dir, dir, &mut manifest.hashes)?;
    }
    Ok(manifest)
}

fn hash_dir(root: &Path, dir: &Path, out: &mut BTreeMap<String, String>) -> Result<()> {
    for entry in fs::read_dir(dir).with_context(|| format!("read {}", dir.display()))? {
        let entry = entry.context("read entry")?;
        let path = entry.path();
        if path.is_dir() {
            hash_dir(root, &path, out)?;
            continue;
        }
        let bytes = fs::read(&path).with_context(|| format!("read {}", path.display()))?;
        let relative = path
            .strip_prefix(root)
            .with_context(|| format!("relativize {}", path.display()))?;
        let key = relative
            .components()
            .map(|c| c.as_os_str().to_string_lossy().into_owned())
            .collect::<Vec<_>>()
            .join("/");
        out.insert(key, sha256_hex(&bytes));
    }
    Ok(())
}

pub fn write_manifest(path: &Path, manifest: &ArtifactManifest) -> Result<()> {
    write_json(path, manifest)
}

pub fn load_manifest(path: &Path) -> Result<ArtifactManifest> {
    read_json(path)
}
