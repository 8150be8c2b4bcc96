use std::sync::Arc;

use anyhow::{Context, Result};

use crate::config::AuditConfig;
use crate::fingerprint::Fingerprint;
use crate::git::{Checkout, CheckoutProvider};
use crate::hosting::{CheckHandle, Credential, Hosting, PushEvent};
use crate::npm::PackageManager;
use crate::oracle::AuditOracle;
use crate::outdated::OutdatedDependency;
use crate::report::{Advisory, RemediationAction, VulnerabilityCounts};
use crate::store::{FingerprintStore, StateStore};

/// Collaborators shared by every pipeline run and fleet cycle.
#[derive(Clone)]
pub struct Services {
    pub hosting: Arc<dyn Hosting>,
    pub checkouts: Arc<dyn CheckoutProvider>,
    pub npm: Arc<dyn PackageManager>,
    pub oracle: Arc<dyn AuditOracle>,
    pub fingerprints: Arc<dyn FingerprintStore>,
    pub state: Arc<dyn StateStore>,
}

/// Read-only inputs of one remediation pipeline run.
#[derive(Clone)]
pub struct RemediationContext {
    pub event: PushEvent,
    pub config: Arc<AuditConfig>,
    pub services: Services,
    /// Reuse the working copy in place instead of cloning.
    pub in_place: bool,
}

impl RemediationContext {
    pub fn new(event: PushEvent, config: Arc<AuditConfig>, services: Services) -> Self {
        Self {
            event,
            config,
            services,
            in_place: false,
        }
    }

    pub fn in_place(mut self, in_place: bool) -> Self {
        self.in_place = in_place;
        self
    }
}

/// Mutable record threaded through the stages of one run.
///
/// Setup writes `checkout`, `credential`, `manifest` and `check`. Audit writes
/// `report_changed`, `audit_fingerprint`, `actions`, the `*_before` snapshots
/// and `outdated`. Fix writes `security_applied` and the `*_after` snapshots,
/// and UpdateOutdated writes `updated`. Every
/// field has an empty default so a stage whose writer was skipped reads
/// nothing rather than stale data.
#[derive(Default)]
pub struct RunParams {
    pub checkout: Option<Box<dyn Checkout>>,
    pub credential: Credential,
    pub check: Option<CheckHandle>,
    /// Raw `package.json` text of the checkout.
    pub manifest: Option<String>,
    pub report_changed: bool,
    /// Composite fingerprint of this run's audit, recorded once the run
    /// finishes without failing.
    pub audit_fingerprint: Option<Fingerprint>,
    pub actions: Vec<RemediationAction>,
    pub advisories_before: Vec<Advisory>,
    pub vulnerabilities_before: VulnerabilityCounts,
    pub advisories_after: Vec<Advisory>,
    pub vulnerabilities_after: VulnerabilityCounts,
    /// Security fixes were applied to the working tree in this run.
    pub security_applied: bool,
    pub outdated: Vec<OutdatedDependency>,
    pub updated: Vec<OutdatedDependency>,
}

impl RunParams {
    pub fn checkout(&self) -> Result<&dyn Checkout> {
        self.checkout.as_deref().context("no working checkout acquired")
    }
}
