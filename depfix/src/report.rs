use std::cmp::Reverse;
use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tracing::{error, warn};

use crate::render::{code_line, italic};
use crate::severity::{Rated, Severity};

// ─── Raw audit tool schema ───

#[derive(Debug, Deserialize)]
struct RawAuditReport {
    #[serde(default)]
    actions: Vec<RawAction>,
    #[serde(default)]
    advisories: BTreeMap<String, RawAdvisory>,
    #[serde(default)]
    metadata: Option<RawMetadata>,
}

#[derive(Debug, Deserialize)]
struct RawAdvisory {
    id: u64,
    module_name: String,
    #[serde(default)]
    vulnerable_versions: String,
    #[serde(default)]
    severity: String,
    #[serde(default)]
    title: String,
    #[serde(default)]
    findings: Vec<RawFinding>,
    #[serde(default)]
    cves: Vec<String>,
    #[serde(default)]
    url: String,
    #[serde(default)]
    recommendation: Option<String>,
    #[serde(default)]
    updated: String,
}

#[derive(Debug, Deserialize)]
struct RawFinding {
    #[serde(default)]
    version: String,
    #[serde(default)]
    paths: Vec<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawAction {
    #[serde(default)]
    is_major: bool,
    action: ActionKind,
    module: String,
    #[serde(default)]
    target: String,
    #[serde(default)]
    depth: Option<u32>,
    #[serde(default)]
    resolves: Vec<RawResolve>,
}

#[derive(Debug, Deserialize)]
struct RawResolve {
    id: u64,
    #[serde(default)]
    dev: bool,
}

#[derive(Debug, Deserialize)]
struct RawMetadata {
    #[serde(default)]
    vulnerabilities: VulnerabilityCounts,
}

// ─── Normalized report ───

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Advisory {
    pub id: u64,
    pub module: String,
    pub severity: Severity,
    pub details: String,
    pub cves: Vec<String>,
    pub updated: String,
}

impl Rated for Advisory {
    fn severity(&self) -> Severity {
        self.severity
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActionKind {
    Install,
    Update,
    Review,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Resolution {
    pub advisory_id: u64,
    pub is_dev: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RemediationAction {
    pub module: String,
    pub action: ActionKind,
    pub target: String,
    pub is_major: bool,
    pub depth: Option<u32>,
    pub resolves: Vec<Resolution>,
}

impl RemediationAction {
    /// True when none of the resolved advisories reach a runtime dependency.
    pub fn is_dev_only(&self) -> bool {
        !self.resolves.iter().any(|r| !r.is_dev)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RootVulnerability {
    pub advisory_id: u64,
    pub severity: Severity,
    pub top_level_module: String,
    pub vulnerable_module: String,
    pub vulnerable_version: String,
}

impl RootVulnerability {
    pub fn is_direct(&self) -> bool {
        self.top_level_module == self.vulnerable_module
    }
}

impl Rated for RootVulnerability {
    fn severity(&self) -> Severity {
        self.severity
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VulnerabilityCounts {
    #[serde(default)]
    pub info: u64,
    #[serde(default)]
    pub low: u64,
    #[serde(default)]
    pub moderate: u64,
    #[serde(default)]
    pub high: u64,
    #[serde(default)]
    pub critical: u64,
}

impl VulnerabilityCounts {
    pub fn get(&self, severity: Severity) -> u64 {
        match severity {
            Severity::Info => self.info,
            Severity::Low => self.low,
            Severity::Moderate => self.moderate,
            Severity::High => self.high,
            Severity::Critical => self.critical,
        }
    }

    pub fn total(&self) -> u64 {
        self.info + self.low + self.moderate + self.high + self.critical
    }

    /// Per-severity difference, clamped at zero.
    pub fn saturating_sub(&self, other: &Self) -> Self {
        Self {
            info: self.info.saturating_sub(other.info),
            low: self.low.saturating_sub(other.low),
            moderate: self.moderate.saturating_sub(other.moderate),
            high: self.high.saturating_sub(other.high),
            critical: self.critical.saturating_sub(other.critical),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct AuditReport {
    pub advisories: Vec<Advisory>,
    pub actions: Vec<RemediationAction>,
    pub roots: Vec<RootVulnerability>,
    pub vulnerabilities: VulnerabilityCounts,
}

/// Cut the JSON object out of tool output that may carry leading or trailing
/// diagnostics. Returns an empty slice when no braces are present.
pub fn slice_report(output: &str) -> &str {
    match (output.find('{'), output.rfind('}')) {
        (Some(start), Some(end)) if start <= end => &output[start..=end],
        _ => "",
    }
}

/// Parse raw audit output into a normalized report. Malformed input yields an
/// empty report rather than an error.
pub fn parse_report(output: &str) -> AuditReport {
    let json = slice_report(output);
    let raw: RawAuditReport = match serde_json::from_str(json) {
        Ok(r) => r,
        Err(e) => {
            error!(error = %e, output_len = output.len(), "failed to parse audit output");
            return AuditReport::default();
        }
    };

    let actions: Vec<RemediationAction> = raw
        .actions
        .into_iter()
        .map(|a| RemediationAction {
            module: a.module,
            action: a.action,
            target: a.target,
            is_major: a.is_major,
            depth: a.depth,
            resolves: a
                .resolves
                .into_iter()
                .map(|r| Resolution {
                    advisory_id: r.id,
                    is_dev: r.dev,
                })
                .collect(),
        })
        .collect();

    let mut advisories = Vec::with_capacity(raw.advisories.len());
    let mut roots = Vec::new();

    for adv in raw.advisories.values() {
        let severity = adv.severity.parse::<Severity>().unwrap_or_else(|e| {
            warn!(advisory = adv.id, error = %e, "unrecognized severity, treating as info");
            Severity::Info
        });
        let fixable = actions
            .iter()
            .any(|a| a.resolves.iter().any(|r| r.advisory_id == adv.id));

        advisories.push(Advisory {
            id: adv.id,
            module: adv.module_name.clone(),
            severity,
            details: render_details(adv, severity, fixable),
            cves: adv.cves.clone(),
            updated: adv.updated.clone(),
        });

        for finding in &adv.findings {
            for path in &finding.paths {
                let segments: Vec<&str> = path.split('>').collect();
                roots.push(RootVulnerability {
                    advisory_id: adv.id,
                    severity,
                    top_level_module: segments.first().copied().unwrap_or_default().to_string(),
                    vulnerable_module: segments.last().copied().unwrap_or_default().to_string(),
                    vulnerable_version: finding.version.clone(),
                });
            }
        }
    }

    // Critical first, then most recently updated first.
    advisories.sort_by(|a, b| {
        Reverse(a.severity)
            .cmp(&Reverse(b.severity))
            .then_with(|| b.updated.cmp(&a.updated))
    });

    AuditReport {
        advisories,
        actions,
        roots,
        vulnerabilities: raw.metadata.map(|m| m.vulnerabilities).unwrap_or_default(),
    }
}

fn render_details(adv: &RawAdvisory, severity: Severity, fixable: bool) -> String {
    let mut details = format!("[{}]({})", adv.title, adv.url);

    if let Some(recommendation) = adv.recommendation.as_deref() {
        let trimmed = recommendation.trim();
        let trimmed = trimmed.strip_suffix('.').unwrap_or(trimmed);
        if !trimmed.is_empty() {
            details.push(' ');
            details.push_str(&italic(trimmed));
        }
    }

    details.push_str(&format!("\n{severity} - {}", code_line(&adv.vulnerable_versions)));

    if !adv.cves.is_empty() {
        let links: Vec<String> = adv
            .cves
            .iter()
            .map(|c| format!("[{c}](https://nvd.nist.gov/vuln/detail/{c})"))
            .collect();
        details.push_str(" - ");
        details.push_str(&links.join(" "));
    }

    if fixable {
        details.push_str(" - automatic fix available");
    }

    let findings: Vec<String> = adv
        .findings
        .iter()
        .filter(|f| !f.paths.is_empty())
        .map(|f| {
            let mut paths = f.paths.clone();
            paths.sort();
            let items: Vec<String> = paths
                .iter()
                .map(|p| format!("  <li><code>{}</code></li>", p.replace('>', " > ")))
                .collect();
            format!(
                "\n<details>\n  <summary><code>{}@{}</code> - {} vulnerable {}</summary>\n{}\n</details>",
                adv.module_name,
                f.version,
                paths.len(),
                if paths.len() == 1 { "path" } else { "paths" },
                items.join("\n"),
            )
        })
        .collect();
    if !findings.is_empty() {
        details.push('\n');
        details.push_str(&findings.concat());
        details.push('\n');
    }

    details
}
