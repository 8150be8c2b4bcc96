use std::collections::BTreeSet;

use anyhow::Result;
use async_trait::async_trait;
use tracing::instrument;

use super::Track;
use crate::context::{RemediationContext, RunParams};
use crate::guards::{self, Guard, security_branch, update_branch};
use crate::persist::{Changes, commit_message, persist_changes};
use crate::pipeline::{Stage, StageOutcome};
use crate::render::{security_pr_body, update_pr_body};
use crate::report::Advisory;

/// Commit the working tree of a track and open or update its pull request.
pub struct PushPrStage {
    track: Track,
}

impl PushPrStage {
    pub fn new(track: Track) -> Self {
        Self { track }
    }

    fn guards(&self) -> &'static [Guard] {
        match self.track {
            Track::Security => &[
                Guard::SecurityPushConfigured,
                Guard::WorkingTreeDirty,
                Guard::NotBotBranch,
                Guard::ReportChanged,
            ],
            Track::Update => &[
                Guard::UpdatePushConfigured,
                Guard::WorkingTreeDirty,
                Guard::NotBotBranch,
                Guard::NoSecurityFixes,
                Guard::ReportChanged,
            ],
        }
    }

    async fn changes(&self, ctx: &RemediationContext, params: &RunParams) -> Result<Changes> {
        let branch = &ctx.event.branch;
        let cfg = &ctx.config;
        Ok(match self.track {
            Track::Security => {
                let sha = params.checkout()?.status().await?.sha;
                let (fixed, open) = fixed_and_open(params);
                let mut actions = params.actions.clone();
                actions.sort_by(|a, b| a.module.cmp(&b.module));
                Changes {
                    head: security_branch(branch),
                    title: "npm audit fixes".to_string(),
                    body: security_pr_body(
                        &params.vulnerabilities_before,
                        &params.vulnerabilities_after,
                        &sha,
                        &actions,
                        &fixed,
                        &open,
                    ),
                    labels: cfg.labels.clone(),
                    message: commit_message("npm audit fixes", &cfg.name),
                }
            }
            Track::Update => Changes {
                head: update_branch(branch),
                title: "npm dependency updates".to_string(),
                body: update_pr_body(&params.updated),
                labels: cfg.labels.clone(),
                message: commit_message("npm dependency updates", &cfg.name),
            },
        })
    }
}

/// Advisories resolved by an applied action, and those still open after the
/// re-audit.
fn fixed_and_open(params: &RunParams) -> (Vec<&Advisory>, Vec<&Advisory>) {
    let resolved: BTreeSet<u64> = params
        .actions
        .iter()
        .flat_map(|a| a.resolves.iter().map(|r| r.advisory_id))
        .collect();
    let fixed = params
        .advisories_before
        .iter()
        .filter(|a| resolved.contains(&a.id))
        .collect();
    let open = params.advisories_after.iter().collect();
    (fixed, open)
}

#[async_trait]
impl Stage<RemediationContext, RunParams> for PushPrStage {
    fn name(&self) -> &'static str {
        match self.track {
            Track::Security => "push-pr",
            Track::Update => "push-update-pr",
        }
    }

    async fn run_when(&self, ctx: &RemediationContext, params: &RunParams) -> Result<bool> {
        guards::all(self.guards(), ctx, params).await
    }

    #[instrument(skip_all, fields(repo = %ctx.event.repo, track = ?self.track))]
    async fn run(&self, ctx: &RemediationContext, params: &mut RunParams) -> Result<StageOutcome> {
        let strategy = match self.track {
            Track::Security => ctx.config.push,
            Track::Update => ctx.config.update_push,
        };
        let changes = self.changes(ctx, params).await?;
        let persisted = persist_changes(
            ctx.services.hosting.as_ref(),
            params.checkout()?,
            strategy,
            &ctx.event,
            changes,
        )
        .await?;
        Ok(match persisted.describe(&ctx.event.repo.slug()) {
            Some(message) => StageOutcome::Success(message),
            None => StageOutcome::Hidden,
        })
    }
}
