use std::sync::Arc;
use std::time::Duration as StdDuration;

use alertwatch_common::config::ScheduleConfig;
use chrono::{DateTime, Duration, NaiveTime, Utc};
use tokio::time::{interval, sleep, MissedTickBehavior};
use tracing::{error, info, warn};

use super::coordinator::{Coordinator, CoordinatorError};
use crate::reports::Reports;

/// Periodic driver: incremental polls, overdue checks and the daily summary,
/// until Ctrl-C.
pub struct Scheduler {
    coordinator: Arc<Coordinator>,
    reports: Arc<Reports>,
    config: ScheduleConfig,
}

impl Scheduler {
    pub fn new(coordinator: Arc<Coordinator>, reports: Arc<Reports>, config: ScheduleConfig) -> Self {
        Self {
            coordinator,
            reports,
            config,
        }
    }

    pub async fn run(&self) -> anyhow::Result<()> {
        let mut poll_tick = interval(StdDuration::from_secs(
            self.config.poll_interval_hours.max(1) * 3600,
        ));
        poll_tick.set_missed_tick_behavior(MissedTickBehavior::Skip);

        let mut overdue_tick = interval(StdDuration::from_secs(
            self.config.overdue_check_minutes.max(1) * 60,
        ));
        overdue_tick.set_missed_tick_behavior(MissedTickBehavior::Skip);

        info!(
            poll_interval_hours = self.config.poll_interval_hours,
            overdue_check_minutes = self.config.overdue_check_minutes,
            daily_summary_hour = self.config.daily_summary_hour,
            "Scheduler started"
        );

        loop {
            let until_summary = next_daily_at(Utc::now(), self.config.daily_summary_hour) - Utc::now();
            let summary_sleep = sleep(until_summary.to_std().unwrap_or(StdDuration::ZERO));
            tokio::pin!(summary_sleep);

            tokio::select! {
                _ = poll_tick.tick() => self.poll().await,
                _ = overdue_tick.tick() => self.check_overdue().await,
                _ = &mut summary_sleep => self.daily_summary().await,
                _ = tokio::signal::ctrl_c() => {
                    info!("Shutdown requested, scheduler stopping");
                    return Ok(());
                }
            }
        }
    }

    async fn poll(&self) {
        let now = Utc::now();
        match self.coordinator.poll(now).await {
            Ok(stats) => info!("{stats}"),
            Err(CoordinatorError::AlreadyRunning) => {
                info!("Skipping scheduled poll, a cycle is already running")
            }
            Err(CoordinatorError::Failed(e)) => {
                let message = format!("{e:#}");
                error!(error = %message, "Poll cycle failed, watermark unchanged");
                self.reports.report_error("Poll cycle", &e).await;
            }
        }
    }

    async fn check_overdue(&self) {
        if let Err(e) = self.reports.send_overdue_digest(Utc::now()).await {
            warn!(error = %e, "Overdue check failed");
        }
    }

    async fn daily_summary(&self) {
        if let Err(e) = self.reports.send_daily_summary(Utc::now()).await {
            warn!(error = %e, "Daily summary failed");
        }
    }
}

/// Next occurrence of `hour`:00 UTC strictly after `now`.
pub fn next_daily_at(now: DateTime<Utc>, hour: u32) -> DateTime<Utc> {
    let at = NaiveTime::from_hms_opt(hour.min(23), 0, 0).unwrap_or(NaiveTime::MIN);
    let today = now.date_naive().and_time(at).and_utc();
    if today > now {
        today
    } else {
        today + Duration::days(1)
    }
}
