use std::collections::BTreeMap;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::fingerprint::{self, DEPENDENCY_KIND, Fingerprint};

pub const MANIFEST_FILE: &str = "package.json";
pub const LOCK_FILE: &str = "package-lock.json";

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PackageManifest {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub version: Option<String>,
    #[serde(default)]
    pub dependencies: BTreeMap<String, String>,
    #[serde(default)]
    pub dev_dependencies: BTreeMap<String, String>,
}

impl PackageManifest {
    pub fn parse(content: &str) -> Result<Self> {
        serde_json::from_str(content).context("failed to parse package.json")
    }

    pub fn is_dev_dependency(&self, name: &str) -> bool {
        self.dev_dependencies.contains_key(name) && !self.dependencies.contains_key(name)
    }

    /// Runtime dependencies merged with dev dependencies unless `ignore_dev`.
    /// Runtime ranges win when a package appears in both.
    pub fn requires(&self, ignore_dev: bool) -> BTreeMap<String, String> {
        let mut merged = BTreeMap::new();
        if !ignore_dev {
            merged.extend(self.dev_dependencies.clone());
        }
        merged.extend(self.dependencies.clone());
        merged
    }

    /// One fingerprint per direct dependency keyed by package name, hashing the
    /// declared range so a published version can be compared against it.
    pub fn dependency_fingerprints(&self) -> Result<Vec<Fingerprint>> {
        self.requires(false)
            .into_iter()
            .map(|(name, range)| {
                let sha = fingerprint::hash(&range)?;
                let data = serde_json::json!({ "name": name, "version": range }).to_string();
                Ok(Fingerprint::new(DEPENDENCY_KIND, &name, sha, data))
            })
            .collect()
    }
}

/// Document submitted to the registry security audit endpoint.
#[derive(Debug, Clone, Serialize)]
pub struct AuditRequest {
    pub name: Option<String>,
    pub version: Option<String>,
    pub requires: BTreeMap<String, String>,
    pub dependencies: Value,
}

impl AuditRequest {
    pub fn new(manifest: &PackageManifest, lock: &Value, ignore_dev: bool) -> Self {
        Self {
            name: manifest.name.clone(),
            version: manifest.version.clone(),
            requires: manifest.requires(ignore_dev),
            dependencies: lock
                .get("dependencies")
                .cloned()
                .unwrap_or_else(|| Value::Object(Default::default())),
        }
    }
}
