use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::Mutex;
use tracing::{debug, info, instrument};

use crate::fingerprint::Fingerprint;
use crate::hosting::RepositoryHandle;

pub const STATE_VERSION: u32 = 1;

const STATE_FILE: &str = "audit-state.json";
const FINGERPRINT_FILE: &str = "fingerprints.json";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RepositoryState {
    /// Epoch milliseconds of the last audit attempt.
    pub processed: i64,
    #[serde(default)]
    pub excluded: bool,
}

/// Per-configuration fleet cursor.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditState {
    #[serde(default)]
    pub version: u32,
    /// Epoch milliseconds at which the last scheduled cycle started.
    #[serde(default)]
    pub last_cycle: Option<i64>,
    #[serde(default)]
    pub repositories: BTreeMap<String, RepositoryState>,
}

impl AuditState {
    pub fn new() -> Self {
        Self {
            version: STATE_VERSION,
            ..Self::default()
        }
    }

    /// Parse a persisted document. Legacy `lastRun`/`excludes` fields are
    /// discarded; the flag reports whether the shape changed.
    pub fn from_value(value: Value) -> Result<(Self, bool)> {
        let legacy = value.get("lastRun").is_some() || value.get("excludes").is_some();
        let mut state: AuditState = serde_json::from_value(value).context("malformed audit state")?;
        let migrated = legacy || state.version != STATE_VERSION;
        state.version = STATE_VERSION;
        Ok((state, migrated))
    }

    pub fn is_excluded(&self, repo_id: &str) -> bool {
        self.repositories.get(repo_id).is_some_and(|r| r.excluded)
    }

    /// Last processed time, zero for never.
    pub fn processed(&self, repo_id: &str) -> i64 {
        self.repositories.get(repo_id).map(|r| r.processed).unwrap_or(0)
    }

    pub fn record(&mut self, repo_id: &str, processed: i64, excluded: bool) {
        self.repositories
            .insert(repo_id.to_string(), RepositoryState { processed, excluded });
    }
}

#[async_trait]
pub trait StateStore: Send + Sync {
    /// State for `config`, empty when nothing was persisted yet.
    async fn load(&self, config: &str) -> Result<AuditState>;
    async fn save(&self, config: &str, state: &AuditState) -> Result<()>;
}

/// Commit a set of fingerprints is recorded against.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommitTarget {
    pub repo: RepositoryHandle,
    pub branch: String,
    pub sha: String,
    pub is_default_branch: bool,
}

/// Fingerprints of one kind at a default branch head.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeadFingerprint {
    pub repo: RepositoryHandle,
    pub branch: String,
    pub commit_sha: String,
    pub fingerprints: Vec<Fingerprint>,
}

#[async_trait]
pub trait FingerprintStore: Send + Sync {
    /// Most recent fingerprint of `kind` recorded for a repository branch.
    async fn latest(&self, repo_id: &str, branch: &str, kind: &str) -> Result<Option<Fingerprint>>;

    /// Replace the `kind` fingerprints of the target branch with `records`.
    async fn add_fingerprints(&self, target: &CommitTarget, kind: &str, records: Vec<Fingerprint>) -> Result<()>;

    /// Fingerprints of `kind` at every default branch head, optionally
    /// restricted to one fingerprint name. Heads without a match are omitted.
    async fn head_fingerprints(&self, kind: &str, name: Option<&str>) -> Result<Vec<HeadFingerprint>>;
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct BranchRecord {
    target: CommitTarget,
    #[serde(default)]
    kinds: BTreeMap<String, Vec<Fingerprint>>,
}

/// repo id -> branch -> record
type FingerprintIndex = BTreeMap<String, BTreeMap<String, BranchRecord>>;

/// State and fingerprint stores persisted as JSON documents under one
/// directory. Writes go through a temporary file and a rename.
pub struct JsonFileStore {
    dir: PathBuf,
    lock: Mutex<()>,
}

impl JsonFileStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            lock: Mutex::new(()),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    async fn read<T: DeserializeOwned + Default>(&self, file: &str) -> Result<T> {
        let path = self.dir.join(file);
        match tokio::fs::read_to_string(&path).await {
            Ok(content) => serde_json::from_str(&content).with_context(|| format!("failed to parse {}", path.display())),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(T::default()),
            Err(e) => Err(e).with_context(|| format!("failed to read {}", path.display())),
        }
    }

    async fn write<T: Serialize>(&self, file: &str, value: &T) -> Result<()> {
        tokio::fs::create_dir_all(&self.dir)
            .await
            .with_context(|| format!("failed to create {}", self.dir.display()))?;
        let path = self.dir.join(file);
        let tmp = self.dir.join(format!(".{file}.tmp"));
        let content = serde_json::to_string_pretty(value)?;
        tokio::fs::write(&tmp, content)
            .await
            .with_context(|| format!("failed to write {}", tmp.display()))?;
        tokio::fs::rename(&tmp, &path)
            .await
            .with_context(|| format!("failed to replace {}", path.display()))?;
        Ok(())
    }
}

#[async_trait]
impl StateStore for JsonFileStore {
    #[instrument(skip(self))]
    async fn load(&self, config: &str) -> Result<AuditState> {
        let _guard = self.lock.lock().await;
        let mut all: BTreeMap<String, Value> = self.read(STATE_FILE).await?;
        let Some(raw) = all.get(config).cloned() else {
            return Ok(AuditState::new());
        };
        let (state, migrated) = AuditState::from_value(raw)?;
        if migrated {
            info!(config, "migrated persisted audit state");
            all.insert(config.to_string(), serde_json::to_value(&state)?);
            self.write(STATE_FILE, &all).await?;
        }
        Ok(state)
    }

    #[instrument(skip(self, state), fields(repositories = state.repositories.len()))]
    async fn save(&self, config: &str, state: &AuditState) -> Result<()> {
        let _guard = self.lock.lock().await;
        let mut all: BTreeMap<String, Value> = self.read(STATE_FILE).await?;
        all.insert(config.to_string(), serde_json::to_value(state)?);
        self.write(STATE_FILE, &all).await
    }
}

#[async_trait]
impl FingerprintStore for JsonFileStore {
    async fn latest(&self, repo_id: &str, branch: &str, kind: &str) -> Result<Option<Fingerprint>> {
        let _guard = self.lock.lock().await;
        let index: FingerprintIndex = self.read(FINGERPRINT_FILE).await?;
        Ok(index
            .get(repo_id)
            .and_then(|branches| branches.get(branch))
            .and_then(|record| record.kinds.get(kind))
            .and_then(|fps| fps.first().cloned()))
    }

    #[instrument(skip(self, target, records), fields(repo = %target.repo, branch = %target.branch, count = records.len()))]
    async fn add_fingerprints(&self, target: &CommitTarget, kind: &str, records: Vec<Fingerprint>) -> Result<()> {
        let _guard = self.lock.lock().await;
        let mut index: FingerprintIndex = self.read(FINGERPRINT_FILE).await?;
        let record = index
            .entry(target.repo.repo_id.clone())
            .or_default()
            .entry(target.branch.clone())
            .or_insert_with(|| BranchRecord {
                target: target.clone(),
                kinds: BTreeMap::new(),
            });
        record.target = target.clone();
        record.kinds.insert(kind.to_string(), records);
        debug!(kind, "recorded fingerprints");
        self.write(FINGERPRINT_FILE, &index).await
    }

    async fn head_fingerprints(&self, kind: &str, name: Option<&str>) -> Result<Vec<HeadFingerprint>> {
        let _guard = self.lock.lock().await;
        let index: FingerprintIndex = self.read(FINGERPRINT_FILE).await?;
        Ok(index
            .into_values()
            .flat_map(BTreeMap::into_values)
            .filter(|record| record.target.is_default_branch)
            .filter_map(|record| {
                let fingerprints: Vec<Fingerprint> = record
                    .kinds
                    .get(kind)?
                    .iter()
                    .filter(|f| name.is_none_or(|n| f.name == n))
                    .cloned()
                    .collect();
                if fingerprints.is_empty() {
                    return None;
                }
                Some(HeadFingerprint {
                    repo: record.target.repo,
                    branch: record.target.branch,
                    commit_sha: record.target.sha,
                    fingerprints,
                })
            })
            .collect())
    }
}
