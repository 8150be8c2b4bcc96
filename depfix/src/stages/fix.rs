use anyhow::Result;
use async_trait::async_trait;
use tracing::{debug, instrument, warn};

use crate::assess::assess;
use crate::context::{RemediationContext, RunParams};
use crate::guards::{self, Guard};
use crate::npm::{action_args, audit_args};
use crate::pipeline::{Stage, StageOutcome};
use crate::report::parse_report;

/// Apply remediation actions one at a time, then re-audit.
pub struct FixStage;

const GUARDS: [Guard; 4] = [
    Guard::SecurityPushConfigured,
    Guard::NotBotBranch,
    Guard::HasActions,
    Guard::ReportChanged,
];

#[async_trait]
impl Stage<RemediationContext, RunParams> for FixStage {
    fn name(&self) -> &'static str {
        "fix"
    }

    async fn run_when(&self, ctx: &RemediationContext, params: &RunParams) -> Result<bool> {
        guards::all(&GUARDS, ctx, params).await
    }

    #[instrument(skip_all, fields(repo = %ctx.event.repo, actions = params.actions.len()))]
    async fn run(&self, ctx: &RemediationContext, params: &mut RunParams) -> Result<StageOutcome> {
        let npm = &ctx.services.npm;
        let path = params.checkout()?.path().to_path_buf();

        params.security_applied = true;
        for action in &params.actions {
            let Some(args) = action_args(action) else {
                continue;
            };
            let output = npm.run(&path, &args).await?;
            if !output.success() {
                warn!(module = %action.module, status = output.status, "fix failed");
                return Ok(StageOutcome::Failure(format!(
                    "`npm audit fix` failed on {}",
                    action.module
                )));
            }
            debug!(module = %action.module, target = %action.target, "applied fix");
        }

        let cfg = &ctx.config;
        let audit = npm.run(&path, &audit_args(cfg.level, cfg.ignore_dev)).await?;
        let report = parse_report(&audit.stdout);
        params.advisories_after = assess(&report, cfg).included;
        params.vulnerabilities_after = report.vulnerabilities;

        Ok(StageOutcome::Success(format!(
            "`npm audit` fixed security vulnerabilities on {}",
            ctx.event.repo
        )))
    }
}
