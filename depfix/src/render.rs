use std::collections::BTreeSet;

use crate::hosting::{Annotation, AnnotationLevel};
use crate::outdated::OutdatedDependency;
use crate::report::{Advisory, RemediationAction, RootVulnerability, VulnerabilityCounts};
use crate::severity::Severity;

pub fn code_line(text: &str) -> String {
    format!("`{text}`")
}

pub fn italic(text: &str) -> String {
    format!("_{text}_")
}

/// Join with commas, using "and" before the last element.
pub fn join_with_and(parts: &[String]) -> String {
    match parts {
        [] => String::new(),
        [only] => only.clone(),
        [init @ .., last] => format!("{} and {last}", init.join(", ")),
    }
}

fn plural<'a>(count: usize, one: &'a str, many: &'a str) -> &'a str {
    if count == 1 { one } else { many }
}

/// Split advisories into `(included, excluded)` by package name and advisory id.
pub fn partition_by_exclusion<'a>(
    advisories: impl IntoIterator<Item = &'a Advisory>,
    excluded_packages: &[String],
    excluded_advisory_ids: &[String],
) -> (Vec<&'a Advisory>, Vec<&'a Advisory>) {
    advisories
        .into_iter()
        .partition(|a| !is_excluded(&a.module, a.id, excluded_packages, excluded_advisory_ids))
}

pub fn is_excluded(
    module: &str,
    advisory_id: u64,
    excluded_packages: &[String],
    excluded_advisory_ids: &[String],
) -> bool {
    excluded_packages.iter().any(|p| p == module)
        || excluded_advisory_ids.iter().any(|id| id.trim() == advisory_id.to_string())
}

/// One `### module` section per module, in first-seen order, each listing the
/// advisories' rendered details. Sections are separated by a horizontal rule.
pub fn group_and_render(advisories: &[&Advisory]) -> String {
    let mut groups: Vec<(&str, Vec<&Advisory>)> = Vec::new();
    for adv in advisories.iter().copied() {
        match groups.iter_mut().find(|(m, _)| *m == adv.module) {
            Some((_, list)) => list.push(adv),
            None => groups.push((adv.module.as_str(), vec![adv])),
        }
    }
    groups
        .iter()
        .map(|(module, list)| {
            let details: Vec<&str> = list.iter().map(|a| a.details.as_str()).collect();
            format!("\n### {module}\n\n{}", details.join("\n\n"))
        })
        .collect::<Vec<_>>()
        .join("\n---\n")
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VulnerabilitySummary {
    pub parts: Vec<String>,
    pub message: String,
    pub count: u64,
}

/// "2 high and 1 low" style summary, highest severity first.
pub fn format_vulnerabilities(counts: &VulnerabilityCounts) -> VulnerabilitySummary {
    let mut parts = Vec::new();
    let mut count = 0;
    for severity in Severity::ALL {
        let n = counts.get(severity);
        if n > 0 {
            parts.push(format!("{n} {severity}"));
            count += n;
        }
    }
    VulnerabilitySummary {
        message: join_with_and(&parts),
        parts,
        count,
    }
}

pub fn check_body_clean(args: &[String]) -> String {
    format!(
        "`npm audit` found no security vulnerabilities.\n\n`$ npm audit {}`",
        args.join(" ")
    )
}

pub fn check_body_findings(
    counts: &VulnerabilityCounts,
    args: &[String],
    included: &[&Advisory],
    excluded: &[&Advisory],
) -> String {
    let summary = format_vulnerabilities(counts);
    let mut body = format!(
        "`npm audit` found {} security {}.\n\n`$ npm audit {}`\n\n---\n\nFollowing security {} found:\n{}",
        summary.message,
        plural(summary.count as usize, "vulnerability", "vulnerabilities"),
        args.join(" "),
        plural(included.len(), "advisory was", "advisories were"),
        group_and_render(included),
    );
    if !excluded.is_empty() {
        body.push_str(&format!(
            "\n---\n\nFollowing security {} excluded due to configuration:\n{}",
            plural(excluded.len(), "advisory was", "advisories were"),
            group_and_render(excluded),
        ));
    }
    body
}

/// Headline for a security pull request comparing before and after counts.
pub fn pr_headline(before: &VulnerabilityCounts, after: &VulnerabilityCounts, sha: &str) -> String {
    let short_sha: String = sha.chars().take(7).collect();
    let before_stats = format_vulnerabilities(before);
    let after_stats = format_vulnerabilities(after);
    if after_stats.count == 0 {
        return format!(
            "This pull request fixes all [{} security {}](#user-content-fixed-vul) open on {short_sha}.",
            before_stats.message,
            plural(before_stats.count as usize, "vulnerability", "vulnerabilities"),
        );
    }
    let diff_stats = format_vulnerabilities(&before.saturating_sub(after));
    format!(
        "This pull request fixes [{} security {}](#user-content-fixed-vul) open on {short_sha} but [{} {} manual review.",
        diff_stats.message,
        plural(diff_stats.count as usize, "vulnerability", "vulnerabilities"),
        after_stats.message,
        if after_stats.count == 1 {
            "vulnerability](#user-content-open-vul) remains open and needs"
        } else {
            "vulnerabilities](#user-content-open-vul) remain open and need"
        },
    )
}

/// Body of the security pull request.
pub fn security_pr_body(
    before: &VulnerabilityCounts,
    after: &VulnerabilityCounts,
    sha: &str,
    actions: &[RemediationAction],
    fixed: &[&Advisory],
    open: &[&Advisory],
) -> String {
    let updated: BTreeSet<String> = actions
        .iter()
        .map(|a| format!(" * {} > {}", code_line(&a.module), italic(&a.target)))
        .collect();

    let mut body = format!(
        "{}\n\n`npm audit fix` updated the following npm packages:\n\n{}\n\n---\n\n## <a id=\"fixed-vul\">Fixed vulnerabilities</a>\n\nFollowing security {} fixed:\n{}",
        pr_headline(before, after, sha),
        updated.into_iter().collect::<Vec<_>>().join("\n"),
        plural(fixed.len(), "vulnerability is", "vulnerabilities are"),
        group_and_render(fixed),
    );
    if !open.is_empty() {
        body.push_str(&format!(
            "\n---\n\n## <a id=\"open-vul\">Open vulnerabilities</a>\n\nFollowing security {} manual review:\n{}",
            plural(
                open.len(),
                "vulnerability remains open and needs",
                "vulnerabilities remain open and need"
            ),
            group_and_render(open),
        ));
    }
    body
}

/// Body of the routine dependency update pull request.
pub fn update_pr_body(updated: &[OutdatedDependency]) -> String {
    let line = |d: &OutdatedDependency| format!(" * {} > {}", code_line(&d.name), italic(&d.wanted));
    let runtime: Vec<String> = updated.iter().filter(|d| !d.dev).map(line).collect();
    let dev: Vec<String> = updated.iter().filter(|d| d.dev).map(line).collect();

    let mut body = String::from("`npm update` updated the following npm dependencies:");
    if !runtime.is_empty() {
        body.push_str(&format!("\n\n### Dependencies\n\n{}", runtime.join("\n")));
    }
    if !dev.is_empty() {
        body.push_str(&format!("\n\n### Development Dependencies\n\n{}", dev.join("\n")));
    }
    body
}

/// Line annotations on the manifest, one per vulnerable top-level dependency,
/// located by the first textual occurrence of the module name.
pub fn manifest_annotations(roots: &[RootVulnerability], manifest: &str, path: &str) -> Vec<Annotation> {
    let mut groups: Vec<(&str, Vec<&RootVulnerability>)> = Vec::new();
    for root in roots {
        match groups.iter_mut().find(|(m, _)| *m == root.top_level_module) {
            Some((_, list)) => list.push(root),
            None => groups.push((root.top_level_module.as_str(), vec![root])),
        }
    }

    let mut annotations: Vec<Annotation> = groups
        .into_iter()
        .filter_map(|(module, list)| {
            let needle = format!("\"{module}\"");
            let ix = manifest.find(&needle).or_else(|| manifest.find(module))?;
            let line = manifest[..ix].matches('\n').count() as u32 + 1;

            let direct = list.iter().any(|r| r.is_direct());
            let mut transitive: Vec<String> = Vec::new();
            for r in list.iter().filter(|r| !r.is_direct()) {
                let entry = format!("{}@{}", r.vulnerable_module, r.vulnerable_version);
                if !transitive.contains(&entry) {
                    transitive.push(entry);
                }
            }
            let through = || {
                format!(
                    "{} through its transitive dependencies to {}",
                    plural(transitive.len(), "a vulnerability", "vulnerabilities"),
                    join_with_and(&transitive),
                )
            };
            let message = match (direct, transitive.is_empty()) {
                (true, true) => format!("{module} is vulnerable"),
                (true, false) => format!("{module} is vulnerable and introduces {}", through()),
                (false, _) => format!("{module} introduces {}", through()),
            };

            Some(Annotation {
                path: path.to_string(),
                start_line: line,
                end_line: line,
                message,
                level: AnnotationLevel::Warning,
            })
        })
        .collect();

    annotations.sort_by_key(|a| a.start_line);
    annotations
}
