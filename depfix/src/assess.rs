use serde::Serialize;

use crate::config::AuditConfig;
use crate::render::{is_excluded, partition_by_exclusion};
use crate::report::{ActionKind, Advisory, AuditReport, RemediationAction, RootVulnerability};
use crate::severity::filter_by_level;

/// A normalized report judged against one configuration.
#[derive(Debug, Clone, Default, Serialize)]
pub struct Assessment {
    /// Advisories at or above the level that drive remediation.
    pub included: Vec<Advisory>,
    /// Advisories at or above the level that configuration excludes.
    pub excluded: Vec<Advisory>,
    pub actions: Vec<RemediationAction>,
    pub roots: Vec<RootVulnerability>,
}

impl Assessment {
    pub fn is_clean(&self) -> bool {
        self.included.is_empty() && self.excluded.is_empty()
    }
}

pub fn assess(report: &AuditReport, config: &AuditConfig) -> Assessment {
    let packages = &config.excluded_packages;
    let ids = &config.excluded_advisory_ids;
    let admitted = filter_by_level::<Advisory>(config.level);
    let admitted_root = filter_by_level::<RootVulnerability>(config.level);

    let (included, excluded) =
        partition_by_exclusion(report.advisories.iter().filter(|a| admitted(*a)), packages, ids);

    let roots = report
        .roots
        .iter()
        .filter(|r| admitted_root(*r))
        .filter(|r| !is_excluded(&r.top_level_module, r.advisory_id, packages, ids))
        .cloned()
        .collect();

    Assessment {
        included: included.into_iter().cloned().collect(),
        excluded: excluded.into_iter().cloned().collect(),
        actions: remediable_actions(report, config),
        roots,
    }
}

/// Actions safe to apply automatically: not for an excluded package, not only
/// resolving excluded advisories, not a major bump unless forced, and never a
/// manual review.
pub fn remediable_actions(report: &AuditReport, config: &AuditConfig) -> Vec<RemediationAction> {
    let packages = &config.excluded_packages;
    let ids = &config.excluded_advisory_ids;
    let advisory_excluded = |id: u64| {
        let module = report
            .advisories
            .iter()
            .find(|a| a.id == id)
            .map(|a| a.module.as_str())
            .unwrap_or("");
        is_excluded(module, id, packages, ids)
    };

    report
        .actions
        .iter()
        .filter(|a| !packages.contains(&a.module))
        .filter(|a| a.resolves.is_empty() || !a.resolves.iter().all(|r| advisory_excluded(r.advisory_id)))
        .filter(|a| !a.is_major || config.force)
        .filter(|a| a.action != ActionKind::Review)
        .cloned()
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::report::Resolution;
    use crate::severity::Severity;

    fn advisory(id: u64, module: &str, severity: Severity) -> Advisory {
        Advisory {
            id,
            module: module.into(),
            severity,
            details: String::new(),
            cves: vec![],
            updated: String::new(),
        }
    }

    fn action(module: &str, kind: ActionKind, is_major: bool, resolves: &[u64]) -> RemediationAction {
        RemediationAction {
            module: module.into(),
            action: kind,
            target: "1.0.0".into(),
            is_major,
            depth: None,
            resolves: resolves
                .iter()
                .map(|id| Resolution {
                    advisory_id: *id,
                    is_dev: false,
                })
                .collect(),
        }
    }

    fn report() -> AuditReport {
        AuditReport {
            advisories: vec![
                advisory(1, "lodash", Severity::Critical),
                advisory(2, "minimist", Severity::High),
                advisory(3, "debug", Severity::Info),
            ],
            actions: vec![
                action("lodash", ActionKind::Install, false, &[1]),
                action("mkdirp", ActionKind::Update, false, &[2]),
                action("mocha", ActionKind::Install, true, &[3]),
                action("request", ActionKind::Review, false, &[1]),
            ],
            ..AuditReport::default()
        }
    }

    #[test]
    fn level_and_exclusions_partition() {
        let mut cfg = AuditConfig::named("t");
        cfg.level = Some(Severity::High);
        cfg.excluded_packages = vec!["minimist".into()];
        let a = assess(&report(), &cfg);
        let ids = |v: &[Advisory]| v.iter().map(|a| a.id).collect::<Vec<_>>();
        assert_eq!(ids(&a.included), vec![1]);
        assert_eq!(ids(&a.excluded), vec![2]);
        assert!(!a.is_clean());
    }

    #[test]
    fn major_and_review_actions_dropped_unless_forced() {
        let cfg = AuditConfig::named("t");
        let modules = |v: Vec<RemediationAction>| v.into_iter().map(|a| a.module).collect::<Vec<_>>();
        assert_eq!(modules(remediable_actions(&report(), &cfg)), vec!["lodash", "mkdirp"]);

        let mut forced = AuditConfig::named("t");
        forced.force = true;
        assert_eq!(modules(remediable_actions(&report(), &forced)), vec!["lodash", "mkdirp", "mocha"]);
    }

    #[test]
    fn actions_resolving_only_excluded_advisories_dropped() {
        let mut cfg = AuditConfig::named("t");
        cfg.excluded_advisory_ids = vec!["2".into()];
        let actions = remediable_actions(&report(), &cfg);
        assert!(actions.iter().all(|a| a.module != "mkdirp"));

        let mut cfg = AuditConfig::named("t");
        cfg.excluded_packages = vec!["lodash".into()];
        let actions = remediable_actions(&report(), &cfg);
        assert!(actions.iter().all(|a| a.module != "lodash"));
    }
}
