mod cli;
mod output;

use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use clap::Parser;
use tracing::debug;
use tracing_subscriber::EnvFilter;

use cli::{Cli, Command, InstallArgs, PushArgs, ReportArgs};
use depfix::assess::assess;
use depfix::config::AuditConfig;
use depfix::hosting::{PushEvent, RepositoryHandle};
use depfix::report::parse_report;
use depfix::status::Status;
use depfix::triggers::command::{InstallRequest, run_audit, run_install};
use depfix::triggers::push::on_push;
use output::ReportSummary;

fn init_tracing(cli: &Cli) {
    let filter = EnvFilter::builder()
        .with_default_directive(cli.verbosity.tracing_level_filter().into())
        .from_env_lossy();
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    if cli.json {
        builder.json().init();
    } else {
        builder.init();
    }
}

fn load_config(cli: &Cli) -> Result<AuditConfig> {
    match &cli.config {
        Some(path) => AuditConfig::load(path),
        None => Ok(AuditConfig::named("default")),
    }
}

fn push_event(args: &PushArgs) -> Result<PushEvent> {
    let Some((owner, name)) = args.repo.split_once('/') else {
        bail!("--repo must be owner/name, got {:?}", args.repo);
    };
    Ok(PushEvent {
        repo: RepositoryHandle {
            owner: owner.to_string(),
            owner_id: owner.to_string(),
            repo_id: args.repo_id.clone().unwrap_or_else(|| args.repo.clone()),
            name: name.to_string(),
            branch: args.default_branch.clone(),
        },
        branch: args.branch.clone(),
        sha: args.sha.clone(),
        author: None,
    })
}

fn report(cli: &Cli, args: &ReportArgs, mut config: AuditConfig) -> Result<Status> {
    let raw = std::fs::read_to_string(&args.file)
        .with_context(|| format!("file not found: {}", args.file.display()))?;
    if args.level.is_some() {
        config.level = args.level;
    }
    config.excluded_packages.extend(args.excluded_packages.iter().cloned());
    config.excluded_advisory_ids.extend(args.excluded_advisories.iter().cloned());

    let report = parse_report(&raw);
    let summary = ReportSummary::new(report.vulnerabilities, assess(&report, &config));
    if cli.json {
        output::print_json(&summary)?;
    } else {
        output::print_report(&summary);
    }
    Ok(Status::success(summary.summary))
}

fn install_request(args: &InstallArgs) -> InstallRequest {
    InstallRequest {
        package: args.package.clone(),
        version: args.version.clone(),
        repo: args.repo.clone(),
        repos: args.repos.clone(),
        save: args.save.clone(),
    }
}

async fn run(cli: Cli) -> Result<Status> {
    let config = load_config(&cli)?;
    debug!(config = %config.name, "loaded configuration");

    let services = || {
        let workdir = std::env::current_dir().context("failed to resolve working directory")?;
        depfix::production_services(cli.github_token.clone(), &cli.state_dir, workdir)
    };

    match &cli.command {
        Command::Report(args) => report(&cli, args, config),
        Command::Push(args) => {
            let report = on_push(services()?, Arc::new(config), push_event(args)?, args.in_place).await;
            if cli.json {
                output::print_json(&report.status)?;
            } else {
                output::print_pipeline(&report);
            }
            Ok(report.status)
        }
        Command::Audit(args) => {
            let report = run_audit(services()?, Arc::new(config), args.owner.clone(), args.repo.clone()).await?;
            if cli.json {
                output::print_json(&report)?;
            } else {
                output::print_fleet(&report);
            }
            Ok(report.status)
        }
        Command::Install(args) => {
            let status = run_install(services()?, Arc::new(config), install_request(args)).await?;
            if cli.json {
                output::print_json(&status)?;
            } else {
                output::print_status(&status);
            }
            Ok(status)
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(&cli);

    match run(cli).await {
        Ok(status) if status.is_success() => ExitCode::SUCCESS,
        Ok(_) => ExitCode::FAILURE,
        Err(e) => {
            eprintln!("error: {e:#}");
            ExitCode::FAILURE
        }
    }
}
