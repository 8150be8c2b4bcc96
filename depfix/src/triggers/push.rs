use std::sync::Arc;

use tracing::{info, instrument};

use crate::config::AuditConfig;
use crate::context::{RemediationContext, RunParams, Services};
use crate::hosting::PushEvent;
use crate::pipeline::PipelineReport;
use crate::stages::{remediation_pipeline, run_remediation};

/// Run the remediation pipeline for one pushed commit. `in_place` reuses the
/// current working copy instead of cloning.
#[instrument(skip(services, config, event), fields(repo = %event.repo, branch = %event.branch, sha = %event.sha))]
pub async fn on_push(
    services: Services,
    config: Arc<AuditConfig>,
    event: PushEvent,
    in_place: bool,
) -> PipelineReport {
    let ctx = RemediationContext::new(event, config, services).in_place(in_place);
    let mut params = RunParams::default();
    let report = run_remediation(&remediation_pipeline(), &ctx, &mut params).await;
    info!(status = %report.status, terminal = ?report.terminal, "push pipeline finished");
    report
}
