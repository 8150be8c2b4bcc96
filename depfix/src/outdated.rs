use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tracing::error;

use crate::manifest::PackageManifest;
use crate::report::slice_report;

#[derive(Debug, Deserialize)]
struct RawOutdated {
    #[serde(default)]
    current: Option<String>,
    #[serde(default)]
    wanted: Option<String>,
    #[serde(default)]
    latest: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OutdatedDependency {
    pub name: String,
    pub current: Option<String>,
    pub wanted: String,
    pub latest: String,
    pub dev: bool,
}

/// Parse `npm outdated --json` output, keeping only dependencies whose wanted
/// version differs from the installed one. Malformed output yields nothing.
pub fn parse_outdated(output: &str, manifest: Option<&PackageManifest>) -> Vec<OutdatedDependency> {
    let json = slice_report(output);
    if json.is_empty() {
        return vec![];
    }
    let raw: BTreeMap<String, RawOutdated> = match serde_json::from_str(json) {
        Ok(r) => r,
        Err(e) => {
            error!(error = %e, "failed to parse outdated output");
            return vec![];
        }
    };

    raw.into_iter()
        .filter_map(|(name, entry)| {
            let wanted = entry.wanted?;
            if entry.current.as_deref() == Some(wanted.as_str()) {
                return None;
            }
            let dev = manifest.is_some_and(|m| m.is_dev_dependency(&name));
            Some(OutdatedDependency {
                latest: entry.latest.unwrap_or_else(|| wanted.clone()),
                name,
                current: entry.current,
                wanted,
                dev,
            })
        })
        .collect()
}

/// Dependencies eligible for the update track after exclusions.
pub fn select_updates(
    outdated: &[OutdatedDependency],
    excluded_packages: &[String],
    ignore_dev: bool,
) -> Vec<OutdatedDependency> {
    outdated
        .iter()
        .filter(|d| !excluded_packages.contains(&d.name))
        .filter(|d| !(ignore_dev && d.dev))
        .cloned()
        .collect()
}
