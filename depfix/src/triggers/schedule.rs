use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use tracing::{debug, instrument};

use crate::config::AuditConfig;
use crate::context::Services;
use crate::fleet::{FleetAuditor, FleetOptions, FleetReport, now_ms};

/// Minimum time between two scheduled cycles of one configuration.
pub const DEFAULT_MIN_INTERVAL: Duration = Duration::from_secs(24 * 60 * 60);

/// Scheduled fleet cycle. Ends quietly when the previous cycle started less
/// than `min_interval` ago; otherwise records the cycle start and audits.
#[instrument(skip(services, config, options), fields(config = %config.name))]
pub async fn on_schedule(
    services: Services,
    config: Arc<AuditConfig>,
    options: FleetOptions,
    min_interval: Duration,
) -> Result<FleetReport> {
    if !config.push.is_enabled() {
        return Ok(FleetReport::quiet("Push strategy disabled"));
    }

    let mut state = services.state.load(&config.name).await?;
    let now = now_ms();
    let interval = i64::try_from(min_interval.as_millis()).unwrap_or(i64::MAX);
    if let Some(last) = state.last_cycle
        && now.saturating_sub(last) < interval
    {
        debug!(last, now, "idle window not elapsed");
        return Ok(FleetReport::quiet("Not passed the required idle time"));
    }
    state.last_cycle = Some(now);
    services.state.save(&config.name, &state).await?;

    FleetAuditor::new(services, config, options).run().await
}
