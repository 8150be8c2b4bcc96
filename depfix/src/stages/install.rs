use anyhow::Result;
use async_trait::async_trait;
use tracing::{instrument, warn};

use crate::context::{RemediationContext, RunParams};
use crate::guards::{self, Guard};
use crate::manifest::LOCK_FILE;
use crate::npm::install_args;
use crate::pipeline::{Stage, StageOutcome};

/// Install dependencies so fixes can be applied on top.
pub struct InstallStage;

const GUARDS: [Guard; 4] = [
    Guard::SecurityPushConfigured,
    Guard::NotBotBranch,
    Guard::HasActions,
    Guard::ReportChanged,
];

#[async_trait]
impl Stage<RemediationContext, RunParams> for InstallStage {
    fn name(&self) -> &'static str {
        "install"
    }

    async fn run_when(&self, ctx: &RemediationContext, params: &RunParams) -> Result<bool> {
        guards::all(&GUARDS, ctx, params).await
    }

    #[instrument(skip_all, fields(repo = %ctx.event.repo))]
    async fn run(&self, ctx: &RemediationContext, params: &mut RunParams) -> Result<StageOutcome> {
        let path = params.checkout()?.path();
        let has_lock = path.join(LOCK_FILE).exists();
        let output = ctx.services.npm.run(path, &install_args(has_lock)).await?;
        if !output.success() {
            warn!(status = output.status, stderr = %output.stderr.trim(), "install failed");
            return Ok(StageOutcome::Failure("`npm install` failed".to_string()));
        }
        Ok(StageOutcome::Hidden)
    }
}
