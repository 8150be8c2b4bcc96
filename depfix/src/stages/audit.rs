use anyhow::Result;
use async_trait::async_trait;
use serde_json::Value;
use tracing::{debug, info, instrument, warn};

use crate::assess::assess;
use crate::context::{RemediationContext, RunParams};
use crate::fingerprint::{self, AUDIT_REPORT_KIND, DEPENDENCY_KIND};
use crate::hosting::{CheckConclusion, CheckUpdate};
use crate::manifest::{MANIFEST_FILE, PackageManifest};
use crate::npm::{audit_args, audit_flags, outdated_args};
use crate::outdated::{parse_outdated, select_updates};
use crate::pipeline::{Stage, StageOutcome};
use crate::render::{check_body_clean, check_body_findings, format_vulnerabilities, manifest_annotations};
use crate::report::{parse_report, slice_report};
use crate::store::CommitTarget;

/// Run the audit, record dependency fingerprints, compute remediation actions
/// and publish the findings on the check. The audit fingerprint is left in
/// `RunParams` for [`super::run_remediation`] to record.
pub struct AuditStage;

pub(crate) async fn update_check(ctx: &RemediationContext, params: &RunParams, update: CheckUpdate) -> Result<()> {
    match &params.check {
        Some(check) => ctx.services.hosting.update_check(&ctx.event.repo, check, update).await,
        None => Ok(()),
    }
}

pub(crate) fn commit_target(ctx: &RemediationContext) -> CommitTarget {
    CommitTarget {
        repo: ctx.event.repo.clone(),
        branch: ctx.event.branch.clone(),
        sha: ctx.event.sha.clone(),
        is_default_branch: ctx.event.is_default_branch(),
    }
}

#[async_trait]
impl Stage<RemediationContext, RunParams> for AuditStage {
    fn name(&self) -> &'static str {
        "audit"
    }

    #[instrument(skip_all, fields(repo = %ctx.event.repo, branch = %ctx.event.branch))]
    async fn run(&self, ctx: &RemediationContext, params: &mut RunParams) -> Result<StageOutcome> {
        let cfg = &ctx.config;
        let event = &ctx.event;
        let services = &ctx.services;
        let path = params.checkout()?.path().to_path_buf();

        let audit = services.npm.run(&path, &audit_args(cfg.level, cfg.ignore_dev)).await?;
        let report = parse_report(&audit.stdout);

        let manifest = params.manifest.as_deref().and_then(|m| match PackageManifest::parse(m) {
            Ok(m) => Some(m),
            Err(e) => {
                warn!(error = %e, "unreadable manifest");
                None
            }
        });
        let outdated_run = services.npm.run(&path, &outdated_args()).await?;
        let outdated = parse_outdated(&outdated_run.stdout, manifest.as_ref());

        let raw_report: Value = serde_json::from_str(slice_report(&audit.stdout)).unwrap_or(Value::Null);
        let composite = fingerprint::composite(AUDIT_REPORT_KIND, raw_report, &outdated)?;
        let previous = services
            .fingerprints
            .latest(&event.repo.repo_id, &event.branch, AUDIT_REPORT_KIND)
            .await?;
        params.report_changed = previous.is_none_or(|p| p.sha != composite.sha);
        debug!(changed = params.report_changed, sha = %composite.sha, "audit fingerprint");

        params.audit_fingerprint = Some(composite);
        if let Some(manifest) = &manifest {
            services
                .fingerprints
                .add_fingerprints(&commit_target(ctx), DEPENDENCY_KIND, manifest.dependency_fingerprints()?)
                .await?;
        }

        params.outdated = select_updates(&outdated, &cfg.excluded_packages, cfg.ignore_dev);
        params.vulnerabilities_before = report.vulnerabilities;

        let flags = audit_flags(cfg.level, cfg.ignore_dev);
        let assessment = assess(&report, cfg);
        if assessment.is_clean() {
            update_check(
                ctx,
                params,
                CheckUpdate {
                    conclusion: CheckConclusion::Success,
                    body: check_body_clean(&flags),
                    annotations: vec![],
                },
            )
            .await?;
            return Ok(StageOutcome::Success(format!(
                "`npm audit` found no security vulnerabilities on {}",
                event.repo
            )));
        }

        params.actions = assessment.actions.clone();
        params.advisories_before = report.advisories.clone();
        info!(
            advisories = assessment.included.len(),
            excluded = assessment.excluded.len(),
            actions = params.actions.len(),
            "audit found advisories"
        );

        let annotations = params
            .manifest
            .as_deref()
            .map(|text| manifest_annotations(&assessment.roots, text, MANIFEST_FILE))
            .unwrap_or_default();
        let included: Vec<_> = assessment.included.iter().collect();
        let excluded: Vec<_> = assessment.excluded.iter().collect();
        update_check(
            ctx,
            params,
            CheckUpdate {
                conclusion: if included.is_empty() {
                    CheckConclusion::Neutral
                } else {
                    CheckConclusion::ActionRequired
                },
                body: check_body_findings(&report.vulnerabilities, &flags, &included, &excluded),
                annotations,
            },
        )
        .await?;

        Ok(StageOutcome::Success(format!(
            "`npm audit` found {} security vulnerabilities on {}",
            format_vulnerabilities(&report.vulnerabilities).message,
            event.repo
        )))
    }
}
