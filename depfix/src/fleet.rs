use std::sync::Arc;

use anyhow::{Context, Result};
use futures::future::join_all;
use serde::Serialize;
use serde_json::Value;
use tokio::sync::{Mutex, Semaphore};
use tracing::{debug, info, instrument, warn};

use crate::config::{AuditConfig, RepoScope};
use crate::context::{RemediationContext, RunParams, Services};
use crate::fingerprint::{self, REGISTRY_REPORT_KIND};
use crate::hosting::{PushEvent, RepositoryHandle};
use crate::manifest::{AuditRequest, LOCK_FILE, MANIFEST_FILE, PackageManifest};
use crate::npm::outdated_args;
use crate::outdated::parse_outdated;
use crate::pipeline::Terminal;
use crate::stages::{RemediationPipeline, remediation_pipeline, run_remediation};
use crate::status::Status;
use crate::store::{AuditState, CommitTarget};

pub const MAX_REPOSITORIES: usize = 25;
pub const MAX_CONCURRENCY: usize = 2;

pub fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

#[derive(Debug, Clone)]
pub struct FleetOptions {
    pub max_repositories: usize,
    pub max_concurrency: usize,
    /// Restrict the cycle to one owner.
    pub owner: Option<String>,
    /// Restrict the cycle to one repository name.
    pub repo: Option<String>,
}

impl Default for FleetOptions {
    fn default() -> Self {
        Self {
            max_repositories: MAX_REPOSITORIES,
            max_concurrency: MAX_CONCURRENCY,
            owner: None,
            repo: None,
        }
    }
}

/// What happened to one repository in a cycle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum RepoOutcome {
    /// Registry report identical to the last recorded one.
    Unchanged,
    /// The remediation pipeline ran against the branch head.
    Triggered { status: Status },
    /// Manifest or lock file unavailable; skipped from now on.
    Excluded { reason: String },
    Failed { error: String },
}

#[derive(Debug, Clone, Serialize)]
pub struct RepoResult {
    pub repo: String,
    pub repo_id: String,
    #[serde(flatten)]
    pub outcome: RepoOutcome,
}

#[derive(Debug, Clone, Serialize)]
pub struct FleetReport {
    pub status: Status,
    pub results: Vec<RepoResult>,
}

impl FleetReport {
    pub(crate) fn quiet(message: &str) -> Self {
        Self {
            status: Status::success(message).hidden(),
            results: vec![],
        }
    }
}

/// Repositories to audit this cycle: filtered, never previously excluded,
/// least recently processed first, capped.
pub fn select_batch(
    repos: Vec<RepositoryHandle>,
    state: &AuditState,
    scope: &RepoScope,
    options: &FleetOptions,
) -> Vec<RepositoryHandle> {
    let mut selected: Vec<RepositoryHandle> = repos
        .into_iter()
        .filter(|r| options.owner.as_ref().is_none_or(|o| *o == r.owner))
        .filter(|r| options.repo.as_ref().is_none_or(|n| *n == r.name || *n == r.slug()))
        .filter(|r| scope.matches(&r.owner, &r.name))
        .filter(|r| !state.is_excluded(&r.repo_id))
        .collect();
    selected.sort_by(|a, b| {
        state
            .processed(&a.repo_id)
            .cmp(&state.processed(&b.repo_id))
            .then_with(|| a.repo_id.cmp(&b.repo_id))
    });
    selected.truncate(options.max_repositories);
    selected
}

/// Audits a fleet of repositories against the registry and triggers the
/// remediation pipeline where the result changed.
pub struct FleetAuditor {
    services: Services,
    config: Arc<AuditConfig>,
    options: FleetOptions,
    pipeline: RemediationPipeline,
}

impl FleetAuditor {
    pub fn new(services: Services, config: Arc<AuditConfig>, options: FleetOptions) -> Self {
        Self {
            services,
            config,
            options,
            pipeline: remediation_pipeline(),
        }
    }

    #[instrument(skip(self), fields(config = %self.config.name))]
    pub async fn run(&self) -> Result<FleetReport> {
        if !self.config.push.is_enabled() {
            return Ok(FleetReport::quiet("Push strategy disabled"));
        }

        let state = self.services.state.load(&self.config.name).await?;
        let repos = self.services.hosting.list_repositories().await?;
        let total = repos.len();
        let batch = select_batch(repos, &state, &self.config.repos, &self.options);
        info!(total, selected = batch.len(), "starting fleet audit");
        if batch.is_empty() {
            return Ok(FleetReport::quiet("No repositories to audit"));
        }

        let state = Arc::new(Mutex::new(state));
        let sem = Arc::new(Semaphore::new(self.options.max_concurrency.max(1)));

        let futures: Vec<_> = batch
            .into_iter()
            .map(|repo| {
                let sem = sem.clone();
                let state = state.clone();
                async move {
                    let outcome = match sem.acquire().await {
                        Ok(_permit) => match self.audit_repository(&repo).await {
                            Ok(outcome) => outcome,
                            Err(e) => {
                                warn!(repo = %repo, error = %e, "repository audit failed");
                                RepoOutcome::Failed {
                                    error: format!("{e:#}"),
                                }
                            }
                        },
                        Err(e) => RepoOutcome::Failed { error: e.to_string() },
                    };
                    self.record(&state, &repo, &outcome).await;
                    RepoResult {
                        repo: repo.slug(),
                        repo_id: repo.repo_id,
                        outcome,
                    }
                }
            })
            .collect();
        let results = join_all(futures).await;

        let triggered = results
            .iter()
            .filter(|r| matches!(r.outcome, RepoOutcome::Triggered { .. }))
            .count();
        let status = Status::success(format!(
            "Audited {} {}, remediation triggered on {triggered}",
            results.len(),
            if results.len() == 1 { "repository" } else { "repositories" }
        ));
        Ok(FleetReport { status, results })
    }

    /// Persist this repository's progress immediately.
    async fn record(&self, state: &Mutex<AuditState>, repo: &RepositoryHandle, outcome: &RepoOutcome) {
        let excluded = matches!(outcome, RepoOutcome::Excluded { .. });
        let mut state = state.lock().await;
        state.record(&repo.repo_id, now_ms(), excluded);
        if let Err(e) = self.services.state.save(&self.config.name, &state).await {
            warn!(repo = %repo, error = %e, "failed to persist audit state");
        }
    }

    #[instrument(skip(self, repo), fields(repo = %repo))]
    async fn audit_repository(&self, repo: &RepositoryHandle) -> Result<RepoOutcome> {
        let hosting = &self.services.hosting;
        let files = async {
            let manifest = hosting.file_content(repo, MANIFEST_FILE).await?;
            let lock = hosting.file_content(repo, LOCK_FILE).await?;
            anyhow::Ok((manifest, lock))
        };
        let (manifest_text, lock_text) = match files.await {
            Ok(files) => files,
            Err(e) => {
                debug!(error = %e, "excluding repository");
                return Ok(RepoOutcome::Excluded {
                    reason: format!("{e:#}"),
                });
            }
        };
        let (manifest, lock) = match parse_files(&manifest_text, &lock_text) {
            Ok(parsed) => parsed,
            Err(e) => {
                return Ok(RepoOutcome::Excluded {
                    reason: format!("{e:#}"),
                });
            }
        };

        let request = AuditRequest::new(&manifest, &lock, self.config.ignore_dev);
        let report = self.services.oracle.audit(&request).await?;

        let dir = tempfile::tempdir().context("failed to create scratch directory")?;
        tokio::fs::write(dir.path().join(MANIFEST_FILE), &manifest_text).await?;
        tokio::fs::write(dir.path().join(LOCK_FILE), &lock_text).await?;
        let outdated_run = self.services.npm.run(dir.path(), &outdated_args()).await?;
        let outdated = parse_outdated(&outdated_run.stdout, Some(&manifest));

        let fingerprint = fingerprint::composite(REGISTRY_REPORT_KIND, report, &outdated)?;
        let previous = self
            .services
            .fingerprints
            .latest(&repo.repo_id, &repo.branch, REGISTRY_REPORT_KIND)
            .await?;
        if previous.is_some_and(|p| p.sha == fingerprint.sha) {
            debug!("registry report unchanged");
            return Ok(RepoOutcome::Unchanged);
        }

        let sha = hosting.head_commit(repo, &repo.branch).await?;
        let event = PushEvent {
            repo: repo.clone(),
            branch: repo.branch.clone(),
            sha: sha.clone(),
            author: None,
        };
        let ctx = RemediationContext::new(event, self.config.clone(), self.services.clone());
        let mut params = RunParams::default();
        let report = run_remediation(&self.pipeline, &ctx, &mut params).await;
        info!(status = %report.status, "remediation pipeline finished");
        if report.terminal == Terminal::Failed {
            // Leave the registry fingerprint as it was so the next cycle retries.
            return Ok(RepoOutcome::Triggered { status: report.status });
        }

        self.services
            .fingerprints
            .add_fingerprints(
                &CommitTarget {
                    repo: repo.clone(),
                    branch: repo.branch.clone(),
                    sha,
                    is_default_branch: true,
                },
                REGISTRY_REPORT_KIND,
                vec![fingerprint],
            )
            .await?;

        Ok(RepoOutcome::Triggered { status: report.status })
    }
}

fn parse_files(manifest: &str, lock: &str) -> Result<(PackageManifest, Value)> {
    let manifest = PackageManifest::parse(manifest)?;
    let lock = serde_json::from_str(lock).context("failed to parse package-lock.json")?;
    Ok((manifest, lock))
}
