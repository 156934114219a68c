use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use thiserror::Error;
use tokio::sync::Mutex;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::scout::{Scout, ScoutStats};
use crate::traits::IngestState;

/// Shared by polls and backfills: at most one of either runs at a time.
pub const INGEST_LOCK: &str = "ingest";

/// How often a running cycle refreshes the database lock. Must stay well
/// under the store's stale-lock window.
pub const LOCK_HEARTBEAT: Duration = Duration::from_secs(5 * 60);

#[derive(Debug, Error)]
pub enum CoordinatorError {
    /// Another poll or backfill holds the lock, here or in another process.
    #[error("An ingest cycle is already running")]
    AlreadyRunning,

    #[error(transparent)]
    Failed(#[from] anyhow::Error),
}

/// Single-flight guard around the scout's cycles.
///
/// An in-process mutex rejects overlapping triggers cheaply; the database
/// lock covers a second process against the same store. The lock is
/// refreshed while a cycle runs so a long backfill never looks abandoned.
pub struct Coordinator {
    scout: Arc<Scout>,
    state: Arc<dyn IngestState>,
    running: Mutex<()>,
    holder: String,
    heartbeat: Duration,
}

impl Coordinator {
    pub fn new(scout: Arc<Scout>, state: Arc<dyn IngestState>) -> Self {
        Self {
            scout,
            state,
            running: Mutex::new(()),
            holder: format!("alertwatch-{}", Uuid::new_v4()),
            heartbeat: LOCK_HEARTBEAT,
        }
    }

    pub fn with_heartbeat(mut self, every: Duration) -> Self {
        self.heartbeat = every;
        self
    }

    pub async fn poll(&self, now: DateTime<Utc>) -> Result<ScoutStats, CoordinatorError> {
        self.exclusive("poll", self.scout.poll(now)).await
    }

    pub async fn backfill(
        &self,
        years: i64,
        restart: bool,
        now: DateTime<Utc>,
    ) -> Result<ScoutStats, CoordinatorError> {
        self.exclusive("backfill", self.scout.backfill(years, restart, now))
            .await
    }

    async fn exclusive<T>(
        &self,
        job: &str,
        cycle: impl Future<Output = anyhow::Result<T>>,
    ) -> Result<T, CoordinatorError> {
        let Ok(_guard) = self.running.try_lock() else {
            info!(job, "Rejected: a cycle is already running in this process");
            return Err(CoordinatorError::AlreadyRunning);
        };

        if !self.state.try_acquire_lock(INGEST_LOCK, &self.holder).await? {
            info!(job, "Rejected: another process holds the ingest lock");
            return Err(CoordinatorError::AlreadyRunning);
        }

        let result = self.with_heartbeat_running(job, cycle).await;

        // Always release lock
        if let Err(e) = self.state.release_lock(INGEST_LOCK, &self.holder).await {
            error!(job, error = %e, "Failed to release ingest lock");
        }

        result.map_err(CoordinatorError::Failed)
    }

    async fn with_heartbeat_running<T>(
        &self,
        job: &str,
        cycle: impl Future<Output = anyhow::Result<T>>,
    ) -> anyhow::Result<T> {
        tokio::pin!(cycle);
        let mut heartbeat = interval(self.heartbeat.max(Duration::from_millis(1)));
        heartbeat.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // First tick completes immediately; the lock was just taken.
        heartbeat.tick().await;

        loop {
            tokio::select! {
                result = &mut cycle => return result,
                _ = heartbeat.tick() => {
                    match self.state.refresh_lock(INGEST_LOCK, &self.holder).await {
                        Ok(true) => {}
                        Ok(false) => warn!(job, "Ingest lock no longer held by this process"),
                        Err(e) => warn!(job, error = %e, "Failed to refresh ingest lock"),
                    }
                }
            }
        }
    }
}
