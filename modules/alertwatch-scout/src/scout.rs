use std::sync::Arc;

use alertwatch_common::config::SourceConfig;
use alertwatch_common::{AlertStatus, IngestOrigin, Relevance};
use anyhow::{ensure, Context, Result};
use chrono::{DateTime, Duration, Utc};
use futures::TryStreamExt;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::dedup::{DedupGate, Reconciled};
use crate::deps::ScoutDeps;
use crate::notify::{FlushStats, Notifier};
use crate::source::{candidate_pages, FetchOrder, PageQuery, SourcePage};
use crate::traits::{AlertSource, IngestState};
use crate::triage::RuleSet;

/// Ingest-state key for the incremental watermark.
pub const POLL_JOB: &str = "poll";
/// Ingest-state key for the backfill cursor.
pub const BACKFILL_JOB: &str = "backfill";

pub const MAX_BACKFILL_YEARS: i64 = 50;
pub const MAX_LOOKBACK_DAYS: i64 = 3650;

/// Stats from one poll or backfill cycle.
#[derive(Debug, Default, Clone)]
pub struct ScoutStats {
    pub pages: u32,
    pub candidates: u32,
    pub malformed: u32,
    pub partially_enriched: u32,
    pub inserted_relevant: u32,
    pub inserted_closed: u32,
    /// Inserted open without tags after a failed content lookup.
    pub inserted_held: u32,
    pub updated: u32,
    pub unchanged: u32,
    pub notifications: FlushStats,
}

impl ScoutStats {
    pub fn inserted(&self) -> u32 {
        self.inserted_relevant + self.inserted_closed + self.inserted_held
    }
}

impl std::fmt::Display for ScoutStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "\n=== Ingest Cycle Complete ===")?;
        writeln!(f, "Pages fetched:       {}", self.pages)?;
        writeln!(f, "Candidates:          {}", self.candidates)?;
        writeln!(f, "Malformed skipped:   {}", self.malformed)?;
        writeln!(f, "Partially enriched:  {}", self.partially_enriched)?;
        writeln!(f, "Inserted relevant:   {}", self.inserted_relevant)?;
        writeln!(f, "Inserted closed:     {}", self.inserted_closed)?;
        writeln!(f, "Held for review:     {}", self.inserted_held)?;
        writeln!(f, "Updated:             {}", self.updated)?;
        writeln!(f, "Unchanged:           {}", self.unchanged)?;
        writeln!(f, "Notifications:       {}", self.notifications)?;
        Ok(())
    }
}

/// Persisted backfill position. The window start is stored so a resumed run
/// covers the same span it began with.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackfillCursor {
    pub since: DateTime<Utc>,
    pub document_index: usize,
    pub offset: u32,
}

pub struct Scout {
    source: Arc<dyn AlertSource>,
    state: Arc<dyn IngestState>,
    gate: DedupGate,
    notifier: Notifier,
    config: SourceConfig,
}

impl Scout {
    pub fn new(deps: &ScoutDeps) -> Self {
        Self {
            source: deps.source.clone(),
            state: deps.state.clone(),
            gate: DedupGate::new(
                deps.store.clone(),
                deps.audit.clone(),
                RuleSet::from_config(&deps.config.triage),
            ),
            notifier: Notifier::new(
                deps.store.clone(),
                deps.backend.clone(),
                deps.config.notify.clone(),
            ),
            config: deps.config.source.clone(),
        }
    }

    /// One incremental cycle: newest first back to the watermark (less the
    /// look-back margin), then deliver any queued notifications.
    ///
    /// The watermark only moves once every document type has been read to
    /// its end. A failure leaves it where it was, and the next cycle re-reads
    /// the same window.
    pub async fn poll(&self, now: DateTime<Utc>) -> Result<ScoutStats> {
        let lookback_days = self.config.lookback_days;
        ensure!(
            (0..=MAX_LOOKBACK_DAYS).contains(&lookback_days),
            "lookback_days must be between 0 and {MAX_LOOKBACK_DAYS}, got {lookback_days}"
        );

        let mut stats = ScoutStats::default();
        let watermark = self
            .state
            .watermark(POLL_JOB)
            .await
            .context("Failed to read poll watermark")?;
        let since = watermark.unwrap_or(now) - Duration::days(lookback_days);
        info!(since = %since, watermark = ?watermark, "Starting poll");

        for document_type in &self.config.document_types {
            let query = PageQuery {
                document_type: document_type.clone(),
                order: FetchOrder::NewestFirst,
                since: Some(since),
                offset: 0,
                page_size: self.config.page_size,
            };
            let mut pages = Box::pin(candidate_pages(self.source.clone(), query));
            while let Some((_, page)) = pages
                .try_next()
                .await
                .with_context(|| format!("Poll of {document_type} failed"))?
            {
                self.reconcile_page(&page, IngestOrigin::Poll, now, &mut stats)
                    .await?;
            }
        }

        self.state
            .advance_watermark(POLL_JOB, now)
            .await
            .context("Failed to advance poll watermark")?;

        stats.notifications = self
            .notifier
            .flush_pending(now)
            .await
            .context("Failed to flush notifications")?;

        info!(
            inserted = stats.inserted(),
            updated = stats.updated,
            unchanged = stats.unchanged,
            malformed = stats.malformed,
            "Poll complete"
        );
        Ok(stats)
    }

    /// Historical ingestion, oldest first, over `years` back from `now`.
    /// Resumes from the saved cursor unless `restart` is set. Inserted
    /// alerts are flagged as backfilled and never notified.
    pub async fn backfill(&self, years: i64, restart: bool, now: DateTime<Utc>) -> Result<ScoutStats> {
        ensure!(
            (1..=MAX_BACKFILL_YEARS).contains(&years),
            "Backfill span must be between 1 and {MAX_BACKFILL_YEARS} years, got {years}"
        );

        if restart {
            self.state
                .clear_cursor(BACKFILL_JOB)
                .await
                .context("Failed to clear backfill cursor")?;
        }

        let cursor = match self.load_cursor().await? {
            Some(cursor) => {
                info!(
                    since = %cursor.since,
                    document_index = cursor.document_index,
                    offset = cursor.offset,
                    "Resuming backfill"
                );
                cursor
            }
            None => BackfillCursor {
                since: now - Duration::days(365 * years),
                document_index: 0,
                offset: 0,
            },
        };

        let mut stats = ScoutStats::default();
        let document_types = &self.config.backfill_document_types;

        for (index, document_type) in document_types.iter().enumerate().skip(cursor.document_index) {
            let offset = if index == cursor.document_index { cursor.offset } else { 0 };
            info!(document_type = %document_type, offset, "Backfilling document type");

            let query = PageQuery {
                document_type: document_type.clone(),
                order: FetchOrder::OldestFirst,
                since: Some(cursor.since),
                offset,
                page_size: self.config.page_size,
            };
            let mut pages = Box::pin(candidate_pages(self.source.clone(), query));
            while let Some((_, page)) = pages
                .try_next()
                .await
                .with_context(|| format!("Backfill of {document_type} failed"))?
            {
                self.reconcile_page(&page, IngestOrigin::Backfill, now, &mut stats)
                    .await?;

                // Committed: move the cursor past this page.
                let next = match &page.next {
                    Some(next) => BackfillCursor {
                        since: cursor.since,
                        document_index: index,
                        offset: next.offset,
                    },
                    None => BackfillCursor {
                        since: cursor.since,
                        document_index: index + 1,
                        offset: 0,
                    },
                };
                self.state
                    .save_cursor(BACKFILL_JOB, serde_json::to_value(&next)?)
                    .await
                    .context("Failed to save backfill cursor")?;
            }
        }

        self.state
            .clear_cursor(BACKFILL_JOB)
            .await
            .context("Failed to clear backfill cursor")?;
        info!(inserted = stats.inserted(), updated = stats.updated, "Backfill complete");
        Ok(stats)
    }

    async fn load_cursor(&self) -> Result<Option<BackfillCursor>> {
        let Some(raw) = self
            .state
            .cursor(BACKFILL_JOB)
            .await
            .context("Failed to read backfill cursor")?
        else {
            return Ok(None);
        };
        match serde_json::from_value(raw) {
            Ok(cursor) => Ok(Some(cursor)),
            Err(e) => {
                warn!(error = %e, "Discarding unreadable backfill cursor");
                Ok(None)
            }
        }
    }

    async fn reconcile_page(
        &self,
        page: &SourcePage,
        origin: IngestOrigin,
        now: DateTime<Utc>,
        stats: &mut ScoutStats,
    ) -> Result<()> {
        stats.pages += 1;
        stats.malformed += page.malformed as u32;
        stats.partially_enriched += page.partially_enriched as u32;

        for candidate in &page.candidates {
            stats.candidates += 1;
            let outcome = self
                .gate
                .reconcile(candidate, origin, now)
                .await
                .with_context(|| format!("Failed to reconcile {}", candidate.external_id))?;
            match outcome {
                Reconciled::Inserted(alert) => {
                    match (alert.status(), alert.classification.relevance) {
                        (AlertStatus::Closed, _) => stats.inserted_closed += 1,
                        (_, Relevance::Relevant) => stats.inserted_relevant += 1,
                        (_, Relevance::NotRelevant) => stats.inserted_held += 1,
                    }
                }
                Reconciled::Updated(_) => stats.updated += 1,
                Reconciled::Unchanged => stats.unchanged += 1,
            }
        }
        Ok(())
    }
}
