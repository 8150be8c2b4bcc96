use anyhow::Result;

use crate::context::{RemediationContext, RunParams};

/// Prefix shared by every branch this system pushes.
pub const BOT_BRANCH_PREFIX: &str = "remediation";

pub fn is_bot_branch(branch: &str) -> bool {
    branch.starts_with("remediation/") || branch.starts_with("remediation-")
}

pub fn security_branch(branch: &str) -> String {
    format!("{BOT_BRANCH_PREFIX}/{branch}")
}

pub fn update_branch(branch: &str) -> String {
    format!("{BOT_BRANCH_PREFIX}-update/{branch}")
}

pub fn install_branch(package: &str) -> String {
    format!("{BOT_BRANCH_PREFIX}-install/{}", package.replace('@', ""))
}

pub fn publish_branch(branch: &str, package: &str) -> String {
    format!("{BOT_BRANCH_PREFIX}-publish/{branch}/{}", package.replace('@', ""))
}

/// Reusable stage gates, composed per stage with [`all`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Guard {
    SecurityPushConfigured,
    UpdatePushConfigured,
    NotBotBranch,
    HasActions,
    NoSecurityFixes,
    HasOutdated,
    WorkingTreeClean,
    WorkingTreeDirty,
    ReportChanged,
}

impl Guard {
    pub async fn holds(&self, ctx: &RemediationContext, params: &RunParams) -> Result<bool> {
        Ok(match self {
            Guard::SecurityPushConfigured => ctx.config.push.is_enabled(),
            Guard::UpdatePushConfigured => ctx.config.update_push.is_enabled(),
            Guard::NotBotBranch => !is_bot_branch(&ctx.event.branch),
            Guard::HasActions => !params.actions.is_empty(),
            Guard::NoSecurityFixes => !params.security_applied,
            Guard::HasOutdated => !params.outdated.is_empty(),
            Guard::WorkingTreeClean => params.checkout()?.status().await?.is_clean,
            Guard::WorkingTreeDirty => !params.checkout()?.status().await?.is_clean,
            Guard::ReportChanged => params.report_changed,
        })
    }
}

/// True when every guard holds. Evaluation stops at the first false guard.
pub async fn all(guards: &[Guard], ctx: &RemediationContext, params: &RunParams) -> Result<bool> {
    for guard in guards {
        if !guard.holds(ctx, params).await? {
            return Ok(false);
        }
    }
    Ok(true)
}
