use std::fmt;
use std::path::Path;
use std::str::FromStr;

use anyhow::{Context, Result, bail};
use regex::Regex;
use serde::Deserialize;
use tracing::warn;

use crate::severity::Severity;

/// How detected changes are committed back into the repository.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PushStrategy {
    None,
    /// Pull request on any branch.
    #[serde(rename = "pr")]
    PullRequest,
    /// Pull request on the default branch only.
    #[serde(rename = "pr_default")]
    PullRequestDefault,
    /// Pull request on the default branch, direct commit elsewhere.
    #[serde(rename = "pr_default_commit")]
    PullRequestDefaultCommit,
    Commit,
    /// Direct commit on the default branch only.
    CommitDefault,
}

/// Concrete action a push strategy resolves to for one branch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PersistMode {
    PullRequest,
    Commit,
    Skip,
}

impl PushStrategy {
    pub fn is_enabled(&self) -> bool {
        *self != PushStrategy::None
    }

    pub fn resolve(&self, is_default_branch: bool) -> PersistMode {
        match (self, is_default_branch) {
            (PushStrategy::None, _) => PersistMode::Skip,
            (PushStrategy::PullRequest, _) => PersistMode::PullRequest,
            (PushStrategy::PullRequestDefault, true) => PersistMode::PullRequest,
            (PushStrategy::PullRequestDefault, false) => PersistMode::Skip,
            (PushStrategy::PullRequestDefaultCommit, true) => PersistMode::PullRequest,
            (PushStrategy::PullRequestDefaultCommit, false) => PersistMode::Commit,
            (PushStrategy::Commit, _) => PersistMode::Commit,
            (PushStrategy::CommitDefault, true) => PersistMode::Commit,
            (PushStrategy::CommitDefault, false) => PersistMode::Skip,
        }
    }
}

impl Default for PushStrategy {
    fn default() -> Self {
        PushStrategy::PullRequestDefaultCommit
    }
}

impl fmt::Display for PushStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            PushStrategy::None => "none",
            PushStrategy::PullRequest => "pr",
            PushStrategy::PullRequestDefault => "pr_default",
            PushStrategy::PullRequestDefaultCommit => "pr_default_commit",
            PushStrategy::Commit => "commit",
            PushStrategy::CommitDefault => "commit_default",
        };
        f.write_str(s)
    }
}

impl FromStr for PushStrategy {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "none" => Ok(PushStrategy::None),
            "pr" => Ok(PushStrategy::PullRequest),
            "pr_default" => Ok(PushStrategy::PullRequestDefault),
            "pr_default_commit" => Ok(PushStrategy::PullRequestDefaultCommit),
            "commit" => Ok(PushStrategy::Commit),
            "commit_default" => Ok(PushStrategy::CommitDefault),
            other => bail!(
                "unknown push strategy: {other} (valid: none, pr, pr_default, pr_default_commit, commit, commit_default)"
            ),
        }
    }
}

fn disabled() -> PushStrategy {
    PushStrategy::None
}

/// Repository scope as regular expressions over `owner/name`.
/// An empty include list admits every repository.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RepoScope {
    #[serde(default)]
    pub include: Vec<String>,
    #[serde(default)]
    pub exclude: Vec<String>,
}

impl RepoScope {
    pub fn matches(&self, owner: &str, name: &str) -> bool {
        let slug = format!("{owner}/{name}");
        let hit = |patterns: &[String]| {
            patterns.iter().any(|p| match Regex::new(p) {
                Ok(re) => re.is_match(&slug),
                Err(e) => {
                    warn!(pattern = %p, error = %e, "invalid repository pattern");
                    false
                }
            })
        };
        (self.include.is_empty() || hit(&self.include)) && !hit(&self.exclude)
    }

    fn validate(&self) -> Result<()> {
        for p in self.include.iter().chain(&self.exclude) {
            Regex::new(p).with_context(|| format!("invalid repository pattern {p:?}"))?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct AuditConfig {
    /// Configuration identity; keys persisted audit state.
    pub name: String,
    #[serde(default)]
    pub level: Option<Severity>,
    #[serde(default)]
    pub ignore_dev: bool,
    #[serde(default)]
    pub excluded_packages: Vec<String>,
    #[serde(default)]
    pub excluded_advisory_ids: Vec<String>,
    #[serde(default)]
    pub push: PushStrategy,
    #[serde(default)]
    pub force: bool,
    #[serde(default)]
    pub labels: Vec<String>,
    #[serde(default = "disabled")]
    pub update_push: PushStrategy,
    #[serde(default)]
    pub repos: RepoScope,
    #[serde(default)]
    pub webhook_secret: Option<String>,
}

impl AuditConfig {
    pub fn named(name: &str) -> Self {
        Self {
            name: name.to_string(),
            level: None,
            ignore_dev: false,
            excluded_packages: vec![],
            excluded_advisory_ids: vec![],
            push: PushStrategy::default(),
            force: false,
            labels: vec![],
            update_push: PushStrategy::None,
            repos: RepoScope::default(),
            webhook_secret: None,
        }
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        let config: AuditConfig = toml::from_str(content).context("failed to parse audit configuration")?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        Self::from_toml(&content)
    }

    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            bail!("configuration name must not be empty");
        }
        self.repos.validate()
    }
}
