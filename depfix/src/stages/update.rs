use anyhow::Result;
use async_trait::async_trait;
use tracing::{instrument, warn};

use crate::context::{RemediationContext, RunParams};
use crate::guards::{self, Guard};
use crate::npm::update_args;
use crate::pipeline::{Stage, StageOutcome};

/// Bump outdated dependencies within their declared ranges. Security fixes
/// applied in the same run suppress this track.
pub struct UpdateOutdatedStage;

const GUARDS: [Guard; 5] = [
    Guard::UpdatePushConfigured,
    Guard::NotBotBranch,
    Guard::NoSecurityFixes,
    Guard::HasOutdated,
    Guard::ReportChanged,
];

#[async_trait]
impl Stage<RemediationContext, RunParams> for UpdateOutdatedStage {
    fn name(&self) -> &'static str {
        "update-outdated"
    }

    async fn run_when(&self, ctx: &RemediationContext, params: &RunParams) -> Result<bool> {
        guards::all(&GUARDS, ctx, params).await
    }

    #[instrument(skip_all, fields(repo = %ctx.event.repo, outdated = params.outdated.len()))]
    async fn run(&self, ctx: &RemediationContext, params: &mut RunParams) -> Result<StageOutcome> {
        let path = params.checkout()?.path().to_path_buf();
        let output = ctx.services.npm.run(&path, &update_args(&params.outdated)).await?;
        if !output.success() {
            warn!(status = output.status, stderr = %output.stderr.trim(), "update failed");
            return Ok(StageOutcome::Failure("`npm update` failed".to_string()));
        }
        params.updated = params.outdated.clone();
        Ok(StageOutcome::Success(format!(
            "`npm update` updated {} outdated {} on {}",
            params.updated.len(),
            if params.updated.len() == 1 { "dependency" } else { "dependencies" },
            ctx.event.repo
        )))
    }
}
