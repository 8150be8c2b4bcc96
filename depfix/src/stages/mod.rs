pub mod audit;
pub mod close_pr;
pub mod fix;
pub mod install;
pub mod push_pr;
pub mod setup;
pub mod update;

pub use audit::AuditStage;
pub use close_pr::ClosePrStage;
pub use fix::FixStage;
pub use install::InstallStage;
pub use push_pr::PushPrStage;
pub use setup::SetupStage;
pub use update::UpdateOutdatedStage;

use tracing::{debug, warn};

use crate::context::{RemediationContext, RunParams};
use crate::fingerprint::AUDIT_REPORT_KIND;
use crate::pipeline::{Pipeline, PipelineBuilder, PipelineReport, Terminal};

/// Which remediation track a close/push stage serves.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Track {
    Security,
    Update,
}

pub type RemediationPipeline = Pipeline<RemediationContext, RunParams>;

/// Setup, audit, the security track, then the update track.
pub fn remediation_pipeline() -> RemediationPipeline {
    PipelineBuilder::new()
        .stage(SetupStage)
        .stage(AuditStage)
        .stage(InstallStage)
        .stage(FixStage)
        .stage(ClosePrStage::new(Track::Security))
        .stage(PushPrStage::new(Track::Security))
        .stage(UpdateOutdatedStage)
        .stage(ClosePrStage::new(Track::Update))
        .stage(PushPrStage::new(Track::Update))
        .build()
}

/// Run the pipeline, then record the run's audit fingerprint unless it failed.
/// A failed run keeps the previous fingerprint so the next run retries the
/// remediation.
pub async fn run_remediation(
    pipeline: &RemediationPipeline,
    ctx: &RemediationContext,
    params: &mut RunParams,
) -> PipelineReport {
    let report = pipeline.run(ctx, params).await;
    if report.terminal == Terminal::Failed {
        debug!("remediation failed; audit fingerprint not recorded");
        return report;
    }
    if let Some(fingerprint) = params.audit_fingerprint.take() {
        let target = audit::commit_target(ctx);
        if let Err(e) = ctx
            .services
            .fingerprints
            .add_fingerprints(&target, AUDIT_REPORT_KIND, vec![fingerprint])
            .await
        {
            warn!(repo = %ctx.event.repo, error = %e, "failed to record audit fingerprint");
        }
    }
    report
}
