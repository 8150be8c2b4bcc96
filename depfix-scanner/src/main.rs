use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use clap_verbosity_flag::{InfoLevel, Verbosity};
use tokio::sync::watch;
use tracing::info;
use tracing_subscriber::EnvFilter;

use depfix_scanner::config::{LogFormat, ScannerConfig};
use depfix_scanner::scheduler::Scheduler;
use depfix_scanner::server::{AppState, router};

/// Scheduled npm fleet audits plus the registry webhook endpoint
#[derive(Parser)]
#[command(name = "depfix-scanner", version)]
struct Args {
    /// Scanner configuration (TOML)
    #[arg(short, long)]
    config: PathBuf,

    /// GitHub token used for the API and for cloning
    #[arg(long, env = "GITHUB_TOKEN", hide_env_values = true)]
    github_token: Option<String>,

    #[command(flatten)]
    verbosity: Verbosity<InfoLevel>,
}

fn init_tracing(args: &Args, format: LogFormat) {
    let filter = EnvFilter::builder()
        .with_default_directive(args.verbosity.tracing_level_filter().into())
        .from_env_lossy();
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    match format {
        LogFormat::Json => builder.json().init(),
        LogFormat::Text => builder.init(),
    }
}

async fn shutdown_signal(tx: watch::Sender<bool>) {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "failed to listen for shutdown signal");
    }
    info!("shutdown requested");
    let _ = tx.send(true);
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let config = ScannerConfig::load(&args.config)?;
    init_tracing(&args, config.log_format);

    let workdir = std::env::current_dir().context("failed to resolve working directory")?;
    let services = depfix::production_services(args.github_token.clone(), &config.state_dir, workdir)?;
    let audit = Arc::new(config.audit.clone());

    let (tx, rx) = watch::channel(false);
    let scheduler = Scheduler {
        schedule: config.cron()?,
        services: services.clone(),
        config: audit.clone(),
        options: config.fleet_options(),
        min_interval: config.min_interval(),
    };
    let scheduler = tokio::spawn(scheduler.run(rx));

    let listener = tokio::net::TcpListener::bind(config.listen)
        .await
        .with_context(|| format!("failed to bind {}", config.listen))?;
    info!(listen = %config.listen, schedule = %config.schedule, "depfix scanner started");

    axum::serve(listener, router(AppState { services, config: audit }))
        .with_graceful_shutdown(shutdown_signal(tx))
        .await
        .context("server error")?;

    scheduler.await.context("scheduler task panicked")?;
    Ok(())
}
