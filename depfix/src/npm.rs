use std::path::Path;
use std::process::Stdio;

use anyhow::{Context, Result};
use async_trait::async_trait;
use tokio::process::Command;
use tracing::{debug, instrument};

use crate::outdated::OutdatedDependency;
use crate::report::{ActionKind, RemediationAction};
use crate::severity::Severity;

/// Captured result of one package manager invocation. A nonzero status from
/// `audit` or `outdated` means findings, not a tool failure.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    pub status: i32,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.status == 0
    }
}

#[async_trait]
pub trait PackageManager: Send + Sync {
    async fn run(&self, cwd: &Path, args: &[String]) -> Result<CommandOutput>;
}

const QUIET_FLAGS: [&str; 3] = ["--ignore-scripts", "--no-audit", "--no-fund"];

/// Runs the `npm` executable with lifecycle scripts and telemetry disabled.
#[derive(Debug, Clone)]
pub struct NpmCli {
    program: String,
}

impl NpmCli {
    pub fn new() -> Self {
        Self {
            program: "npm".to_string(),
        }
    }

    pub fn with_program(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
        }
    }
}

impl Default for NpmCli {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl PackageManager for NpmCli {
    #[instrument(skip(self, cwd), fields(cwd = %cwd.display()))]
    async fn run(&self, cwd: &Path, args: &[String]) -> Result<CommandOutput> {
        let output = Command::new(&self.program)
            .args(args)
            .current_dir(cwd)
            .env("npm_config_ignore_scripts", "true")
            .env("npm_config_audit", "false")
            .env("npm_config_fund", "false")
            .env("npm_config_update_notifier", "false")
            .env("NO_UPDATE_NOTIFIER", "1")
            .env("NODE_ENV", "development")
            .stdin(Stdio::null())
            .output()
            .await
            .with_context(|| format!("failed to spawn {} {}", self.program, args.join(" ")))?;

        let status = output.status.code().unwrap_or(-1);
        debug!(status, "npm finished");
        Ok(CommandOutput {
            status,
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }
}

fn strings(args: &[&str]) -> Vec<String> {
    args.iter().map(|s| s.to_string()).collect()
}

/// Flags shared by every audit invocation, without the subcommand.
pub fn audit_flags(level: Option<Severity>, ignore_dev: bool) -> Vec<String> {
    let mut args = Vec::new();
    if ignore_dev {
        args.push("--production".to_string());
    }
    if let Some(level) = level {
        args.push(format!("--audit-level={level}"));
    }
    args
}

pub fn audit_args(level: Option<Severity>, ignore_dev: bool) -> Vec<String> {
    let mut args = vec!["audit".to_string()];
    args.extend(audit_flags(level, ignore_dev));
    args.push("--json".to_string());
    args
}

pub fn outdated_args() -> Vec<String> {
    strings(&["outdated", "--json"])
}

/// `npm ci` when a lock file is present, a fresh install otherwise.
pub fn install_args(has_lock: bool) -> Vec<String> {
    let mut args = vec![if has_lock { "ci" } else { "install" }.to_string()];
    args.extend(strings(&QUIET_FLAGS));
    args
}

/// Command applying one remediation action; `None` for review actions.
pub fn action_args(action: &RemediationAction) -> Option<Vec<String>> {
    let mut args = match action.action {
        ActionKind::Install => {
            let mut args = vec![
                "install".to_string(),
                format!("{}@{}", action.module, action.target),
                "--save-exact".to_string(),
            ];
            if action.is_dev_only() {
                args.push("--save-dev".to_string());
            }
            args
        }
        ActionKind::Update => vec![
            "update".to_string(),
            action.module.clone(),
            "--depth".to_string(),
            action.depth.unwrap_or(1).to_string(),
        ],
        ActionKind::Review => return None,
    };
    args.extend(strings(&QUIET_FLAGS));
    Some(args)
}

pub fn update_args(deps: &[OutdatedDependency]) -> Vec<String> {
    let mut args = vec!["update".to_string(), "--save".to_string()];
    args.extend(deps.iter().map(|d| d.name.clone()));
    args.extend(strings(&QUIET_FLAGS));
    args
}

/// Install `package@spec`, keeping it a dev dependency when it is one and
/// honoring an explicit `--save-<kind>`.
pub fn install_package_args(package: &str, spec: &str, dev: bool, save: Option<&str>) -> Vec<String> {
    let mut args = vec!["install".to_string(), format!("{package}@{spec}")];
    if dev {
        args.push("--save-dev".to_string());
    }
    if let Some(kind) = save {
        args.push(format!("--save-{kind}"));
    }
    args.extend(strings(&QUIET_FLAGS));
    args
}
