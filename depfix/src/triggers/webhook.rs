use std::collections::BTreeMap;
use std::sync::Arc;

use anyhow::{Context, Result, anyhow};
use hmac::{Hmac, Mac};
use serde::Deserialize;
use sha2::Sha256;
use tracing::{debug, info, instrument, warn};

use crate::config::{AuditConfig, PushStrategy};
use crate::context::Services;
use crate::fingerprint::{self, DEPENDENCY_KIND};
use crate::guards::publish_branch;
use crate::status::Status;
use crate::triggers::{Bump, apply_bump};

pub const SIGNATURE_HEADER: &str = "x-npm-signature";
pub const PUBLISH_EVENT: &str = "package:publish";

type HmacSha256 = Hmac<Sha256>;

/// `sha256=<hex>` signature of `body` under `secret`.
pub fn sign(secret: &str, body: &[u8]) -> Result<String> {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).map_err(|e| anyhow!("invalid webhook secret: {e}"))?;
    mac.update(body);
    Ok(format!("sha256={}", hex::encode(mac.finalize().into_bytes())))
}

/// Constant-time check of a `sha256=<hex>` header against the raw body.
pub fn verify_signature(secret: &str, body: &[u8], header: Option<&str>) -> bool {
    let Some(signature) = header.and_then(|h| h.trim().strip_prefix("sha256=")) else {
        return false;
    };
    let Ok(expected) = hex::decode(signature) else {
        return false;
    };
    let Ok(mut mac) = HmacSha256::new_from_slice(secret.as_bytes()) else {
        return false;
    };
    mac.update(body);
    mac.verify_slice(&expected).is_ok()
}

/// Registry hook delivery. Only the fields used here are modelled.
#[derive(Debug, Clone, Deserialize)]
pub struct RegistryHook {
    pub event: String,
    pub name: String,
    #[serde(default)]
    pub payload: HookPayload,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct HookPayload {
    #[serde(rename = "dist-tags", default)]
    pub dist_tags: BTreeMap<String, String>,
}

impl RegistryHook {
    pub fn parse(body: &[u8]) -> Result<Self> {
        serde_json::from_slice(body).context("failed to parse registry hook payload")
    }

    /// Newly published `latest` version, if this is a publish event.
    pub fn published_version(&self) -> Option<&str> {
        if self.event != PUBLISH_EVENT {
            return None;
        }
        self.payload.dist_tags.get("latest").map(String::as_str)
    }
}

/// A webhook delivery after verification and parsing, before any
/// remediation work.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Delivery {
    /// Signature missing or wrong.
    Rejected(Status),
    /// Nothing to do for this event.
    Ignored(Status),
    /// A new `latest` version to fan out with [`on_publish`].
    Publish { package: String, version: String },
}

/// Verify the signature of one delivery and decide what it asks for.
pub fn accept_webhook(config: &AuditConfig, signature: Option<&str>, body: &[u8]) -> Result<Delivery> {
    if let Some(secret) = &config.webhook_secret
        && !verify_signature(secret, body, signature)
    {
        warn!("rejecting webhook with invalid signature");
        return Ok(Delivery::Rejected(Status::failure("Incoming payload is not valid")));
    }
    let hook = RegistryHook::parse(body)?;
    match hook.published_version().map(str::to_string) {
        Some(version) => Ok(Delivery::Publish {
            package: hook.name,
            version,
        }),
        None => {
            debug!(event = %hook.event, "ignoring registry event");
            Ok(Delivery::Ignored(
                Status::success(format!("Ignored `{}` event", hook.event)).hidden(),
            ))
        }
    }
}

/// Verify and dispatch one webhook delivery, waiting for the publish fan-out.
pub async fn on_webhook(
    services: Services,
    config: Arc<AuditConfig>,
    signature: Option<&str>,
    body: &[u8],
) -> Result<Status> {
    match accept_webhook(&config, signature, body)? {
        Delivery::Rejected(status) | Delivery::Ignored(status) => Ok(status),
        Delivery::Publish { package, version } => on_publish(services, config, &package, &version).await,
    }
}

/// Open bump pull requests on every default branch whose declared range for
/// `package` is neither `version` nor `^version`.
#[instrument(skip(services, config), fields(config = %config.name))]
pub async fn on_publish(services: Services, config: Arc<AuditConfig>, package: &str, version: &str) -> Result<Status> {
    let exact = fingerprint::hash(version)?;
    let caret = fingerprint::hash(&format!("^{version}"))?;

    let heads = services.fingerprints.head_fingerprints(DEPENDENCY_KIND, Some(package)).await?;
    let stale: Vec<_> = heads
        .into_iter()
        .filter(|h| config.repos.matches(&h.repo.owner, &h.repo.name))
        .filter(|h| h.fingerprints.iter().any(|f| f.sha != exact && f.sha != caret))
        .collect();
    if stale.is_empty() {
        return Ok(Status::success(format!("No repository depends on an older `{package}`")).hidden());
    }

    let mut opened = 0;
    for head in &stale {
        let bump = Bump {
            package,
            spec: format!("^{version}"),
            save: None,
            strategy: PushStrategy::PullRequest,
            head: publish_branch(&head.branch, package),
            title: format!("Update {package} > {version}"),
            body: publish_body,
        };
        match apply_bump(&services, &config, head, &bump).await {
            Ok(Some(_)) => opened += 1,
            Ok(None) => debug!(repo = %head.repo, "skipping repository after failed install"),
            Err(e) => warn!(repo = %head.repo, error = %e, "dependency bump failed"),
        }
    }
    info!(candidates = stale.len(), opened, "publish handled");

    Ok(Status::success(format!(
        "Updated `{package}` to `{version}` on {opened} {}",
        if opened == 1 { "repository" } else { "repositories" }
    )))
}

fn publish_body(package: &str, spec: &str, dev: bool) -> String {
    let section = if dev { "Development Dependency" } else { "Dependency" };
    format!(
        "A new version of `{package}` was published.\n\n### {section}\n\n * `{package}` > _{}_",
        spec.trim_start_matches('^')
    )
}
