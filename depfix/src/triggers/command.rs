use std::sync::Arc;

use anyhow::{Context, Result};
use regex::Regex;
use tracing::{info, instrument, warn};

use crate::config::AuditConfig;
use crate::context::Services;
use crate::fingerprint::DEPENDENCY_KIND;
use crate::fleet::{FleetAuditor, FleetOptions, FleetReport};
use crate::guards::install_branch;
use crate::status::Status;
use crate::triggers::{Bump, apply_bump};

/// On-demand fleet audit without the cycle cap.
pub async fn run_audit(
    services: Services,
    config: Arc<AuditConfig>,
    owner: Option<String>,
    repo: Option<String>,
) -> Result<FleetReport> {
    let options = FleetOptions {
        max_repositories: usize::MAX,
        owner,
        repo,
        ..FleetOptions::default()
    };
    FleetAuditor::new(services, config, options).run().await
}

#[derive(Debug, Clone, Default)]
pub struct InstallRequest {
    pub package: String,
    /// Defaults to `latest`.
    pub version: Option<String>,
    /// Exact `owner/name`.
    pub repo: Option<String>,
    /// Regular expression over `owner/name`.
    pub repos: Option<String>,
    /// Adds `--save-<kind>` to the install.
    pub save: Option<String>,
}

/// Install one package version across every repository that already depends
/// on it and matches the selection.
#[instrument(skip(services, config), fields(package = %request.package))]
pub async fn run_install(services: Services, config: Arc<AuditConfig>, request: InstallRequest) -> Result<Status> {
    let pattern = request
        .repos
        .as_deref()
        .map(|p| Regex::new(p).with_context(|| format!("invalid repository pattern {p:?}")))
        .transpose()?;
    if request.repo.is_none() && pattern.is_none() {
        return Ok(Status::success("No repository selected").hidden());
    }

    let heads = services
        .fingerprints
        .head_fingerprints(DEPENDENCY_KIND, Some(&request.package))
        .await?;
    let selected: Vec<_> = heads
        .into_iter()
        .filter(|h| {
            let slug = h.repo.slug();
            request.repo.as_ref().is_some_and(|r| *r == slug) || pattern.as_ref().is_some_and(|p| p.is_match(&slug))
        })
        .filter(|h| config.repos.matches(&h.repo.owner, &h.repo.name))
        .collect();
    if selected.is_empty() {
        return Ok(Status::success("No repository selected after applying repository filter").hidden());
    }

    let version = request.version.clone().unwrap_or_else(|| "latest".to_string());
    let bump = Bump {
        package: &request.package,
        spec: version.clone(),
        save: request.save.as_deref(),
        strategy: config.push,
        head: install_branch(&request.package),
        title: format!("Update {} > {version}", request.package),
        body: install_body,
    };

    let mut installed = 0;
    for head in &selected {
        match apply_bump(&services, &config, head, &bump).await {
            Ok(Some(_)) => installed += 1,
            Ok(None) => {}
            Err(e) => warn!(repo = %head.repo, error = %e, "install failed"),
        }
    }
    info!(selected = selected.len(), installed, "install finished");

    Ok(Status::success(format!(
        "Installed `{}@{version}` on {installed} {}",
        request.package,
        if installed == 1 { "repository" } else { "repositories" }
    )))
}

fn install_body(package: &str, version: &str, _dev: bool) -> String {
    format!("Update dependency:\n\n * `{package}` > _{version}_")
}
