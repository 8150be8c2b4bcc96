use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};
use clap_verbosity_flag::{InfoLevel, Verbosity};

use depfix::severity::Severity;

/// Audit npm repositories and push dependency fixes back
#[derive(Parser)]
#[command(name = "depfix", version)]
pub struct Cli {
    /// Audit configuration (TOML)
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Directory holding persisted audit state and fingerprints
    #[arg(long, global = true, default_value = ".depfix")]
    pub state_dir: PathBuf,

    /// GitHub token used for the API and for cloning
    #[arg(long, global = true, env = "GITHUB_TOKEN", hide_env_values = true)]
    pub github_token: Option<String>,

    /// Output results as JSON; logs are emitted as JSON too
    #[arg(long, global = true)]
    pub json: bool,

    #[command(flatten)]
    pub verbosity: Verbosity<InfoLevel>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Run the remediation pipeline for one pushed commit
    Push(PushArgs),
    /// Audit every accessible repository against the registry
    Audit(AuditArgs),
    /// Install a package version across dependent repositories
    Install(InstallArgs),
    /// Summarize a saved `npm audit --json` output
    Report(ReportArgs),
}

#[derive(Args)]
pub struct PushArgs {
    /// Repository as owner/name
    #[arg(long)]
    pub repo: String,

    /// Stable repository id; defaults to owner/name
    #[arg(long)]
    pub repo_id: Option<String>,

    /// Branch the commit was pushed to
    #[arg(long)]
    pub branch: String,

    /// Default branch of the repository
    #[arg(long, default_value = "main")]
    pub default_branch: String,

    /// Pushed commit sha
    #[arg(long)]
    pub sha: String,

    /// Use the current directory instead of cloning
    #[arg(long)]
    pub in_place: bool,
}

#[derive(Args)]
pub struct AuditArgs {
    /// Only audit repositories of this owner
    #[arg(long)]
    pub owner: Option<String>,

    /// Only audit this repository (name or owner/name)
    #[arg(long)]
    pub repo: Option<String>,
}

#[derive(Args)]
pub struct InstallArgs {
    /// Package to install
    pub package: String,

    /// Version or dist-tag to install
    #[arg(long)]
    pub version: Option<String>,

    /// Exact repository as owner/name
    #[arg(long)]
    pub repo: Option<String>,

    /// Regular expression over owner/name
    #[arg(long)]
    pub repos: Option<String>,

    /// Save as this dependency kind (e.g. `dev`, `optional`)
    #[arg(long)]
    pub save: Option<String>,
}

#[derive(Args)]
pub struct ReportArgs {
    /// File holding the audit output; may contain surrounding noise
    pub file: PathBuf,

    /// Minimum severity to report; overrides the configuration
    #[arg(long)]
    pub level: Option<Severity>,

    /// Package to exclude; repeatable
    #[arg(long = "exclude-package")]
    pub excluded_packages: Vec<String>,

    /// Advisory id to exclude; repeatable
    #[arg(long = "exclude-advisory")]
    pub excluded_advisories: Vec<String>,
}
