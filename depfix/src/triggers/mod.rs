//! Entry points deciding when the pipeline and the fleet audit run.

pub mod command;
pub mod push;
pub mod schedule;
pub mod webhook;

use anyhow::{Context, Result};
use tracing::{instrument, warn};

use crate::config::{AuditConfig, PushStrategy};
use crate::context::Services;
use crate::hosting::PushEvent;
use crate::manifest::{MANIFEST_FILE, PackageManifest};
use crate::npm::install_package_args;
use crate::persist::{Changes, Persisted, commit_message, persist_changes};
use crate::store::HeadFingerprint;

/// A single dependency installation pushed back to a repository.
pub(crate) struct Bump<'a> {
    pub package: &'a str,
    /// Version or range handed to the installer.
    pub spec: String,
    pub save: Option<&'a str>,
    pub strategy: PushStrategy,
    pub head: String,
    pub title: String,
    /// Pull request body given whether the package is a dev dependency.
    pub body: fn(&str, &str, bool) -> String,
}

/// Clone the head, install the package and persist the change. `None` when
/// the installer fails.
#[instrument(skip_all, fields(repo = %target.repo, package = bump.package))]
pub(crate) async fn apply_bump(
    services: &Services,
    config: &AuditConfig,
    target: &HeadFingerprint,
    bump: &Bump<'_>,
) -> Result<Option<Persisted>> {
    let credential = services.hosting.credential(&target.repo).await?;
    let checkout = services
        .checkouts
        .checkout(&target.repo, &target.branch, &credential, false)
        .await?;

    let manifest_path = checkout.path().join(MANIFEST_FILE);
    let manifest = PackageManifest::parse(
        &tokio::fs::read_to_string(&manifest_path)
            .await
            .with_context(|| format!("failed to read {}", manifest_path.display()))?,
    )?;
    let dev = manifest.is_dev_dependency(bump.package);

    let args = install_package_args(bump.package, &bump.spec, dev, bump.save);
    let output = services.npm.run(checkout.path(), &args).await?;
    if !output.success() {
        warn!(status = output.status, stderr = %output.stderr.trim(), "install failed");
        return Ok(None);
    }

    let event = PushEvent {
        repo: target.repo.clone(),
        branch: target.branch.clone(),
        sha: target.commit_sha.clone(),
        author: None,
    };
    let persisted = persist_changes(
        services.hosting.as_ref(),
        checkout.as_ref(),
        bump.strategy,
        &event,
        Changes {
            head: bump.head.clone(),
            title: bump.title.clone(),
            body: (bump.body)(bump.package, &bump.spec, dev),
            labels: config.labels.clone(),
            message: commit_message(&bump.title, &config.name),
        },
    )
    .await?;
    Ok(Some(persisted))
}
