use anyhow::Result;
use async_trait::async_trait;
use tracing::{info, instrument};

use super::Track;
use crate::context::{RemediationContext, RunParams};
use crate::guards::{self, Guard, security_branch, update_branch};
use crate::pipeline::{Stage, StageOutcome};

/// Close the open remediation pull request of a track once the base branch
/// no longer needs it.
pub struct ClosePrStage {
    track: Track,
}

impl ClosePrStage {
    pub fn new(track: Track) -> Self {
        Self { track }
    }

    fn guards(&self) -> &'static [Guard] {
        match self.track {
            Track::Security => &[Guard::WorkingTreeClean, Guard::NotBotBranch, Guard::ReportChanged],
            Track::Update => &[
                Guard::WorkingTreeClean,
                Guard::NotBotBranch,
                Guard::NoSecurityFixes,
                Guard::ReportChanged,
            ],
        }
    }
}

#[async_trait]
impl Stage<RemediationContext, RunParams> for ClosePrStage {
    fn name(&self) -> &'static str {
        match self.track {
            Track::Security => "close-pr",
            Track::Update => "close-update-pr",
        }
    }

    async fn run_when(&self, ctx: &RemediationContext, params: &RunParams) -> Result<bool> {
        guards::all(self.guards(), ctx, params).await
    }

    #[instrument(skip_all, fields(repo = %ctx.event.repo, track = ?self.track))]
    async fn run(&self, ctx: &RemediationContext, _params: &mut RunParams) -> Result<StageOutcome> {
        let branch = &ctx.event.branch;
        let (head, comment) = match self.track {
            Track::Security => (
                security_branch(branch),
                "Closing pull request because security vulnerabilities were fixed in base branch",
            ),
            Track::Update => (
                update_branch(branch),
                "Closing pull request because outdated dependencies were updated in base branch",
            ),
        };
        let closed = ctx
            .services
            .hosting
            .close_pull_requests(&ctx.event.repo, branch, &head, comment)
            .await?;
        if closed > 0 {
            info!(closed, head = %head, "closed stale pull requests");
        }
        Ok(StageOutcome::Hidden)
    }
}
