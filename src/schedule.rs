//! Cron-driven chain start.
//!
//! At each fire time a fresh chain starts at cursor 0 through the same
//! runner the HTTP endpoint uses. Later slices are chained by the runner's
//! continuation trigger, not by this ticker.

use std::str::FromStr;
use std::sync::Arc;

use chrono::Utc;
use cron::Schedule;
use tracing::{error, info, warn};

use crate::error::ConfigError;
use crate::pipeline::runner::DigestRunner;

/// Parse a cron expression. Five-field (minute-first) expressions get a
/// leading seconds field of `0`.
pub fn parse_schedule(expr: &str) -> Result<Schedule, ConfigError> {
    let expr = expr.trim();
    let normalized = if expr.split_whitespace().count() == 5 {
        format!("0 {expr}")
    } else {
        expr.to_string()
    };

    Schedule::from_str(&normalized).map_err(|e| ConfigError::InvalidValue {
        key: "DIGEST_SCHEDULE".into(),
        message: format!("invalid cron expression '{expr}': {e}"),
    })
}

/// Spawn the ticker. Runs until the schedule has no upcoming fire time.
pub fn spawn_digest_schedule(
    runner: Arc<DigestRunner>,
    schedule: Schedule,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            let Some(next) = schedule.upcoming(Utc).next() else {
                warn!("Digest schedule has no upcoming fire times; stopping");
                return;
            };
            let wait = (next - Utc::now()).to_std().unwrap_or_default();
            info!(next = %next, "Next scheduled digest run");
            tokio::time::sleep(wait).await;

            match runner.run(Some(0)).await {
                Ok(report) => info!(
                    run_id = %report.run_id,
                    status = %report.results.status,
                    "Scheduled digest run finished"
                ),
                Err(aborted) => error!(
                    run_id = %aborted.report.run_id,
                    error = %aborted,
                    "Scheduled digest run aborted"
                ),
            }
        }
    })
}
