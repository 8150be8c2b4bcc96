use serde::Serialize;

use depfix::assess::Assessment;
use depfix::fleet::{FleetReport, RepoOutcome};
use depfix::pipeline::PipelineReport;
use depfix::render::{format_vulnerabilities, group_and_render};
use depfix::report::VulnerabilityCounts;
use depfix::status::Status;

/// Offline summary of one audit output.
#[derive(Serialize)]
pub struct ReportSummary {
    pub vulnerabilities: VulnerabilityCounts,
    pub summary: String,
    #[serde(flatten)]
    pub assessment: Assessment,
}

impl ReportSummary {
    pub fn new(vulnerabilities: VulnerabilityCounts, assessment: Assessment) -> Self {
        let summary = format_vulnerabilities(&vulnerabilities).message;
        Self {
            vulnerabilities,
            summary,
            assessment,
        }
    }
}

pub fn print_json<T: Serialize + ?Sized>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

pub fn print_status(status: &Status) {
    println!("{status}");
}

pub fn print_pipeline(report: &PipelineReport) {
    println!("{}", report.status);
    println!("  stages: {}", report.executed.join(", "));
    if !report.skipped.is_empty() {
        println!("  skipped: {}", report.skipped.join(", "));
    }
}

pub fn print_fleet(report: &FleetReport) {
    println!("{}", report.status);
    for result in &report.results {
        let outcome = match &result.outcome {
            RepoOutcome::Unchanged => "unchanged".to_string(),
            RepoOutcome::Triggered { status } => format!("triggered ({status})"),
            RepoOutcome::Excluded { reason } => format!("excluded: {reason}"),
            RepoOutcome::Failed { error } => format!("failed: {error}"),
        };
        println!("  {}: {outcome}", result.repo);
    }
}

pub fn print_report(summary: &ReportSummary) {
    let assessment = &summary.assessment;
    if assessment.is_clean() {
        println!("no security vulnerabilities");
        return;
    }
    if summary.summary.is_empty() {
        println!("security vulnerabilities found");
    } else {
        println!("{} security vulnerabilities", summary.summary);
    }
    if !assessment.included.is_empty() {
        let included: Vec<_> = assessment.included.iter().collect();
        println!("\n## Vulnerabilities\n{}", group_and_render(&included));
    }
    if !assessment.excluded.is_empty() {
        let excluded: Vec<_> = assessment.excluded.iter().collect();
        println!("\n## Excluded\n{}", group_and_render(&excluded));
    }
    if !assessment.actions.is_empty() {
        println!("\n## Fixes");
        for action in &assessment.actions {
            println!(" * {} > {}", action.module, action.target);
        }
    }
}
