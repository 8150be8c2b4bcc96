use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};

/// Composite audit fingerprint recorded by the push pipeline.
pub const AUDIT_REPORT_KIND: &str = "npm-audit-report";
/// Composite audit fingerprint recorded by the fleet audit against the registry.
pub const REGISTRY_REPORT_KIND: &str = "npm-audit-registry";
/// One record per direct dependency, `sha = hash(range)`.
pub const DEPENDENCY_KIND: &str = "npm-dependencies";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Fingerprint {
    #[serde(rename = "type")]
    pub kind: String,
    pub name: String,
    pub sha: String,
    pub data: String,
}

impl Fingerprint {
    pub fn new(kind: &str, name: &str, sha: String, data: String) -> Self {
        Self {
            kind: kind.to_string(),
            name: name.to_string(),
            sha,
            data,
        }
    }
}

/// Hex SHA-256 of the canonical JSON form of `value`.
///
/// Object keys are sorted recursively before serialization, so two values that
/// only differ in field insertion order hash identically.
pub fn hash<T: Serialize + ?Sized>(value: &T) -> Result<String> {
    let value = serde_json::to_value(value).context("value is not JSON-serializable")?;
    let bytes = serde_json::to_vec(&canonicalize(value)).context("failed to encode canonical JSON")?;
    Ok(hex::encode(Sha256::digest(bytes)))
}

fn canonicalize(value: Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut entries: Vec<(String, Value)> = map.into_iter().collect();
            entries.sort_by(|a, b| a.0.cmp(&b.0));
            let mut sorted = Map::new();
            for (k, v) in entries {
                sorted.insert(k, canonicalize(v));
            }
            Value::Object(sorted)
        }
        Value::Array(items) => Value::Array(items.into_iter().map(canonicalize).collect()),
        other => other,
    }
}

/// Remove top-level run identifiers so re-runs over identical state hash equally.
pub fn strip_run_id(report: &mut Value) {
    if let Some(obj) = report.as_object_mut() {
        obj.remove("runId");
        obj.remove("run_id");
    }
}

/// Fingerprint of an audit report combined with the outdated dependency
/// delta. Run identifiers are stripped from the report first.
pub fn composite<T: Serialize + ?Sized>(kind: &str, mut report: Value, outdated: &T) -> Result<Fingerprint> {
    strip_run_id(&mut report);
    let data = serde_json::json!({ "audit": report, "outdated": outdated });
    let sha = hash(&data)?;
    Ok(Fingerprint::new(kind, "npm", sha, data.to_string()))
}
