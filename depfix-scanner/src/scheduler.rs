use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use cron::Schedule;
use tokio::sync::watch;
use tracing::{error, info, warn};

use depfix::config::AuditConfig;
use depfix::context::Services;
use depfix::fleet::FleetOptions;
use depfix::triggers::schedule::on_schedule;

/// Time until the next fire of `schedule` after `now`.
pub fn next_delay(schedule: &Schedule, now: DateTime<Utc>) -> Option<Duration> {
    let next = schedule.after(&now).next()?;
    (next - now).to_std().ok()
}

pub struct Scheduler {
    pub schedule: Schedule,
    pub services: Services,
    pub config: Arc<AuditConfig>,
    pub options: FleetOptions,
    pub min_interval: Duration,
}

impl Scheduler {
    /// Fire scheduled cycles until `shutdown` flips to true. A failed cycle is
    /// logged and the next one still runs.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        loop {
            let Some(delay) = next_delay(&self.schedule, Utc::now()) else {
                warn!("schedule has no upcoming fire time; stopping scheduler");
                return;
            };
            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = shutdown.changed() => {
                    info!("scheduler shutting down");
                    return;
                }
            }
            if *shutdown.borrow() {
                return;
            }
            self.tick().await;
        }
    }

    pub async fn tick(&self) {
        let result = on_schedule(
            self.services.clone(),
            self.config.clone(),
            self.options.clone(),
            self.min_interval,
        )
        .await;
        match result {
            Ok(report) if report.status.hidden => info!(status = %report.status, "scheduled cycle skipped"),
            Ok(report) => info!(status = %report.status, repositories = report.results.len(), "scheduled cycle finished"),
            Err(e) => error!(error = %e, "scheduled cycle failed"),
        }
    }
}
