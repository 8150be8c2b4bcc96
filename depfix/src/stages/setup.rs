use anyhow::{Context, Result};
use async_trait::async_trait;
use tracing::{info, instrument};

use crate::context::{RemediationContext, RunParams};
use crate::guards::is_bot_branch;
use crate::hosting::NewCheck;
use crate::manifest::{LOCK_FILE, MANIFEST_FILE};
use crate::pipeline::{Stage, StageOutcome};

pub const CHECK_NAME: &str = "npm-audit";

/// Acquire the working checkout and open the check run.
pub struct SetupStage;

#[async_trait]
impl Stage<RemediationContext, RunParams> for SetupStage {
    fn name(&self) -> &'static str {
        "setup"
    }

    #[instrument(skip_all, fields(repo = %ctx.event.repo, branch = %ctx.event.branch))]
    async fn run(&self, ctx: &RemediationContext, params: &mut RunParams) -> Result<StageOutcome> {
        let event = &ctx.event;
        if is_bot_branch(&event.branch) {
            return Ok(StageOutcome::Abort("Ignore generated branch".to_string()));
        }

        info!("starting npm audit");
        let services = &ctx.services;
        params.credential = services.hosting.credential(&event.repo).await?;

        let checkout = services
            .checkouts
            .checkout(&event.repo, &event.branch, &params.credential, ctx.in_place)
            .await?;

        if !checkout.path().join(LOCK_FILE).exists() {
            return Ok(StageOutcome::Abort("Ignore non-npm project".to_string()));
        }
        let manifest_path = checkout.path().join(MANIFEST_FILE);
        params.manifest = Some(
            tokio::fs::read_to_string(&manifest_path)
                .await
                .with_context(|| format!("failed to read {}", manifest_path.display()))?,
        );

        let status = checkout.status().await?;
        params.check = Some(
            services
                .hosting
                .create_check(
                    &event.repo,
                    &status.sha,
                    NewCheck {
                        name: CHECK_NAME.to_string(),
                        title: "npm audit".to_string(),
                        body: "Running `npm audit`".to_string(),
                    },
                )
                .await?,
        );
        params.checkout = Some(checkout);
        Ok(StageOutcome::Hidden)
    }
}
