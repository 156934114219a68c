// Test mocks for the alert pipeline.
//
// One mock per trait boundary:
// - MockSource (AlertSource): in-memory candidates per document type, paged
//   like the Search API, with injectable failures and a pause gate
// - MockAlertStore (AlertStore + AuditLog + IngestState): stateful in-memory
//   store with identifier uniqueness, versioning and an insert-race switch
// - RecordingBackend (NotifyBackend): records deliveries, fails on demand
//
// Plus fixtures for candidates, alerts and alert summaries.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use alertwatch_common::{
    alert_reference, Alert, AlertCategory, AlertContent, AlertStatus, AuditEntry, CandidateRecord,
    Classification, EnrichmentStatus, Priority, Relevance, Severity, StoreError, StoreResult,
    WorkflowState,
};
use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use tokio::sync::Notify;
use uuid::Uuid;

use crate::dedup::content_from;
use crate::notify::{AlertSummary, Digest, NotifyBackend};
use crate::source::{FetchOrder, PageQuery, SourceError, SourcePage};
use crate::traits::{AlertSource, AlertStore, AuditLog, IngestState};

// ---------------------------------------------------------------------------
// Fixtures
// ---------------------------------------------------------------------------

/// Publication time used by fixtures unless a test overrides it.
pub fn fixture_time() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 3, 1, 9, 0, 0).unwrap()
}

/// A normalized candidate with a neutral title, so category detection only
/// reacts to what a test sets explicitly.
pub fn candidate(external_id: &str, tags: &[&str]) -> CandidateRecord {
    CandidateRecord {
        external_id: external_id.to_string(),
        url: format!("https://www.gov.uk/drug-device-alerts/{external_id}"),
        title: "Example product safety information".to_string(),
        description: None,
        document_type: "medical_safety_alert".to_string(),
        message_type: None,
        alert_type: None,
        tags: tags.iter().map(|t| t.to_string()).collect(),
        published_at: fixture_time(),
        issued_at: None,
        body: None,
        enrichment: EnrichmentStatus::NotNeeded,
    }
}

/// A stored, relevant, P3 alert in status New.
pub fn alert_fixture(external_id: &str) -> Alert {
    let content: AlertContent = content_from(&candidate(external_id, &["General practice"]));
    Alert {
        id: Uuid::new_v4(),
        external_id: external_id.to_string(),
        reference: alert_reference(external_id),
        content,
        classification: Classification {
            relevance: Relevance::Relevant,
            reason: "audience tag 'General practice'".to_string(),
            severity: Severity::Medium,
            priority: Priority::P3WithinWeek,
            category: AlertCategory::MedicalDeviceAlert,
            needs_manual_review: false,
        },
        enrichment: EnrichmentStatus::NotNeeded,
        workflow: WorkflowState::new(AlertStatus::New),
        notified: false,
        notified_at: None,
        backfilled: false,
        notes: Vec::new(),
        version: 1,
        created_at: fixture_time(),
        updated_at: fixture_time(),
    }
}

pub fn summary_fixture() -> AlertSummary {
    AlertSummary::from_alert(
        &alert_fixture("summary-1"),
        "http://localhost:3000",
        Some("Duty Pharmacist"),
    )
}

// ---------------------------------------------------------------------------
// MockSource
// ---------------------------------------------------------------------------

/// Pages through registered candidates the way the Search API does: filtered
/// by the since-bound, sorted by the requested order, sliced by offset.
pub struct MockSource {
    candidates: Mutex<HashMap<String, Vec<CandidateRecord>>>,
    failures: Mutex<HashSet<(String, u32)>>,
    malformed: Mutex<HashMap<String, usize>>,
    queries: Mutex<Vec<PageQuery>>,
    pause: Mutex<Option<Arc<Notify>>>,
    calls: AtomicUsize,
}

impl MockSource {
    pub fn new() -> Self {
        Self {
            candidates: Mutex::new(HashMap::new()),
            failures: Mutex::new(HashSet::new()),
            malformed: Mutex::new(HashMap::new()),
            queries: Mutex::new(Vec::new()),
            pause: Mutex::new(None),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn with_candidates(self, document_type: &str, items: Vec<CandidateRecord>) -> Self {
        self.set_candidates(document_type, items);
        self
    }

    /// The page request at `offset` fails as if retries were exhausted.
    pub fn fail_at(self, document_type: &str, offset: u32) -> Self {
        self.failures
            .lock()
            .unwrap()
            .insert((document_type.to_string(), offset));
        self
    }

    /// Report `count` malformed results on the first page of `document_type`.
    pub fn with_malformed(self, document_type: &str, count: usize) -> Self {
        self.malformed
            .lock()
            .unwrap()
            .insert(document_type.to_string(), count);
        self
    }

    /// Every fetch waits for a permit on `gate` before answering.
    pub fn paused_on(self, gate: Arc<Notify>) -> Self {
        *self.pause.lock().unwrap() = Some(gate);
        self
    }

    /// Lift the pause and wake a fetch that is already waiting.
    pub fn resume(&self) {
        if let Some(gate) = self.pause.lock().unwrap().take() {
            gate.notify_one();
        }
    }

    pub fn set_candidates(&self, document_type: &str, items: Vec<CandidateRecord>) {
        self.candidates
            .lock()
            .unwrap()
            .insert(document_type.to_string(), items);
    }

    pub fn clear_failures(&self) {
        self.failures.lock().unwrap().clear();
    }

    pub fn queries(&self) -> Vec<PageQuery> {
        self.queries.lock().unwrap().clone()
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl Default for MockSource {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl AlertSource for MockSource {
    async fn fetch_page(&self, query: &PageQuery) -> Result<SourcePage, SourceError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.queries.lock().unwrap().push(query.clone());

        let gate = self.pause.lock().unwrap().clone();
        if let Some(gate) = gate {
            gate.notified().await;
        }

        if self
            .failures
            .lock()
            .unwrap()
            .contains(&(query.document_type.clone(), query.offset))
        {
            return Err(SourceError::Transient {
                attempts: 3,
                message: format!("MockSource: {} at {} unavailable", query.document_type, query.offset),
            });
        }

        let mut items: Vec<CandidateRecord> = self
            .candidates
            .lock()
            .unwrap()
            .get(&query.document_type)
            .cloned()
            .unwrap_or_default()
            .into_iter()
            .filter(|c| query.since.map_or(true, |since| c.published_at >= since))
            .collect();
        match query.order {
            FetchOrder::OldestFirst => items.sort_by_key(|c| c.published_at),
            FetchOrder::NewestFirst => items.sort_by(|a, b| b.published_at.cmp(&a.published_at)),
        }

        let total = items.len();
        let start = (query.offset as usize).min(total);
        let end = (start + query.page_size as usize).min(total);
        let candidates = items[start..end].to_vec();

        let malformed = if query.offset == 0 {
            self.malformed
                .lock()
                .unwrap()
                .get(&query.document_type)
                .copied()
                .unwrap_or(0)
        } else {
            0
        };

        Ok(SourcePage {
            partially_enriched: candidates
                .iter()
                .filter(|c| c.enrichment == EnrichmentStatus::Partial)
                .count(),
            candidates,
            malformed,
            next: (end < total).then(|| query.at_offset(end as u32)),
        })
    }
}

// ---------------------------------------------------------------------------
// MockAlertStore
// ---------------------------------------------------------------------------

/// In-memory alert store, audit log and ingest state.
pub struct MockAlertStore {
    alerts: Mutex<Vec<Alert>>,
    audit: Mutex<Vec<AuditEntry>>,
    watermarks: Mutex<HashMap<String, DateTime<Utc>>>,
    cursors: Mutex<HashMap<String, serde_json::Value>>,
    locks: Mutex<HashMap<String, String>>,
    race_next_insert: AtomicBool,
    notified_marks: AtomicU32,
    lock_refreshes: AtomicU32,
}

impl MockAlertStore {
    pub fn new() -> Self {
        Self {
            alerts: Mutex::new(Vec::new()),
            audit: Mutex::new(Vec::new()),
            watermarks: Mutex::new(HashMap::new()),
            cursors: Mutex::new(HashMap::new()),
            locks: Mutex::new(HashMap::new()),
            race_next_insert: AtomicBool::new(false),
            notified_marks: AtomicU32::new(0),
            lock_refreshes: AtomicU32::new(0),
        }
    }

    /// The next insert loses to a concurrent writer: the same alert lands
    /// under another id and the call fails with `DuplicateIdentity`.
    pub fn race_next_insert(self) -> Self {
        self.race_next_insert.store(true, Ordering::SeqCst);
        self
    }

    pub fn seed(&self, alert: Alert) {
        self.alerts.lock().unwrap().push(alert);
    }

    pub fn alerts(&self) -> Vec<Alert> {
        self.alerts.lock().unwrap().clone()
    }

    pub fn audit_entries(&self) -> Vec<AuditEntry> {
        self.audit.lock().unwrap().clone()
    }

    /// How many times a notified flag went from false to true.
    pub fn notified_marks(&self) -> u32 {
        self.notified_marks.load(Ordering::SeqCst)
    }

    /// Successful lock refreshes by the current holder.
    pub fn lock_refreshes(&self) -> u32 {
        self.lock_refreshes.load(Ordering::SeqCst)
    }

    pub fn hold_lock(&self, name: &str, holder: &str) {
        self.locks
            .lock()
            .unwrap()
            .insert(name.to_string(), holder.to_string());
    }

    fn modify<T>(&self, id: Uuid, f: impl FnOnce(&mut Alert) -> StoreResult<T>) -> StoreResult<T> {
        let mut alerts = self.alerts.lock().unwrap();
        let alert = alerts
            .iter_mut()
            .find(|a| a.id == id)
            .ok_or_else(|| StoreError::NotFound(id.to_string()))?;
        f(alert)
    }
}

impl Default for MockAlertStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl AlertStore for MockAlertStore {
    async fn find_by_external_id(&self, external_id: &str) -> StoreResult<Option<Alert>> {
        Ok(self
            .alerts
            .lock()
            .unwrap()
            .iter()
            .find(|a| a.external_id == external_id)
            .cloned())
    }

    async fn get(&self, id: Uuid) -> StoreResult<Alert> {
        self.alerts
            .lock()
            .unwrap()
            .iter()
            .find(|a| a.id == id)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(id.to_string()))
    }

    async fn insert(&self, alert: &Alert) -> StoreResult<Alert> {
        let mut alerts = self.alerts.lock().unwrap();
        let duplicate = || StoreError::DuplicateIdentity {
            external_id: alert.external_id.clone(),
        };
        if self.race_next_insert.swap(false, Ordering::SeqCst) {
            let mut winner = alert.clone();
            winner.id = Uuid::new_v4();
            alerts.push(winner);
            return Err(duplicate());
        }
        if alerts.iter().any(|a| a.external_id == alert.external_id) {
            return Err(duplicate());
        }
        alerts.push(alert.clone());
        Ok(alert.clone())
    }

    async fn update_content_fields(
        &self,
        id: Uuid,
        content: &AlertContent,
        classification: &Classification,
        enrichment: EnrichmentStatus,
        note: Option<&str>,
    ) -> StoreResult<Alert> {
        self.modify(id, |alert| {
            alert.content = content.clone();
            alert.classification = classification.clone();
            alert.enrichment = enrichment;
            if let Some(note) = note {
                alert.notes.push(note.to_string());
            }
            alert.version += 1;
            alert.updated_at = Utc::now();
            Ok(alert.clone())
        })
    }

    async fn update_workflow_fields(
        &self,
        id: Uuid,
        expected_version: i64,
        workflow: &WorkflowState,
        note: Option<&str>,
    ) -> StoreResult<Alert> {
        self.modify(id, |alert| {
            if alert.version != expected_version {
                return Err(StoreError::VersionConflict {
                    id,
                    expected: expected_version,
                });
            }
            alert.workflow = workflow.clone();
            if let Some(note) = note {
                alert.notes.push(note.to_string());
            }
            alert.version += 1;
            alert.updated_at = Utc::now();
            Ok(alert.clone())
        })
    }

    async fn list_by_status(&self, status: AlertStatus) -> StoreResult<Vec<Alert>> {
        Ok(self
            .alerts
            .lock()
            .unwrap()
            .iter()
            .filter(|a| a.status() == status)
            .cloned()
            .collect())
    }

    async fn list_pending_notifications(&self, limit: i64) -> StoreResult<Vec<Alert>> {
        Ok(self
            .alerts
            .lock()
            .unwrap()
            .iter()
            .filter(|a| a.awaiting_notification())
            .take(limit.max(0) as usize)
            .cloned()
            .collect())
    }

    async fn mark_notified(&self, id: Uuid, at: DateTime<Utc>) -> StoreResult<bool> {
        self.modify(id, |alert| {
            if alert.notified {
                return Ok(false);
            }
            alert.notified = true;
            alert.notified_at = Some(at);
            self.notified_marks.fetch_add(1, Ordering::SeqCst);
            Ok(true)
        })
    }

    async fn list_created_since(&self, since: DateTime<Utc>) -> StoreResult<Vec<Alert>> {
        Ok(self
            .alerts
            .lock()
            .unwrap()
            .iter()
            .filter(|a| a.created_at >= since)
            .cloned()
            .collect())
    }
}

#[async_trait]
impl AuditLog for MockAlertStore {
    async fn append(&self, entry: &AuditEntry) -> Result<()> {
        self.audit.lock().unwrap().push(entry.clone());
        Ok(())
    }
}

#[async_trait]
impl IngestState for MockAlertStore {
    async fn watermark(&self, job: &str) -> Result<Option<DateTime<Utc>>> {
        Ok(self.watermarks.lock().unwrap().get(job).copied())
    }

    async fn advance_watermark(&self, job: &str, to: DateTime<Utc>) -> Result<()> {
        let mut watermarks = self.watermarks.lock().unwrap();
        let entry = watermarks.entry(job.to_string()).or_insert(to);
        if to > *entry {
            *entry = to;
        }
        Ok(())
    }

    async fn cursor(&self, job: &str) -> Result<Option<serde_json::Value>> {
        Ok(self.cursors.lock().unwrap().get(job).cloned())
    }

    async fn save_cursor(&self, job: &str, cursor: serde_json::Value) -> Result<()> {
        self.cursors.lock().unwrap().insert(job.to_string(), cursor);
        Ok(())
    }

    async fn clear_cursor(&self, job: &str) -> Result<()> {
        self.cursors.lock().unwrap().remove(job);
        Ok(())
    }

    async fn try_acquire_lock(&self, name: &str, holder: &str) -> Result<bool> {
        let mut locks = self.locks.lock().unwrap();
        if locks.contains_key(name) {
            return Ok(false);
        }
        locks.insert(name.to_string(), holder.to_string());
        Ok(true)
    }

    async fn refresh_lock(&self, name: &str, holder: &str) -> Result<bool> {
        let held = self.locks.lock().unwrap().get(name).is_some_and(|h| h == holder);
        if held {
            self.lock_refreshes.fetch_add(1, Ordering::SeqCst);
        }
        Ok(held)
    }

    async fn release_lock(&self, name: &str, holder: &str) -> Result<()> {
        let mut locks = self.locks.lock().unwrap();
        if locks.get(name).is_some_and(|h| h == holder) {
            locks.remove(name);
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// RecordingBackend
// ---------------------------------------------------------------------------

/// Records every accepted delivery. The first `n` calls of any kind fail.
pub struct RecordingBackend {
    failures_left: AtomicU32,
    attempts: AtomicU32,
    alerts: Mutex<Vec<AlertSummary>>,
    digests: Mutex<Vec<Digest>>,
    errors: Mutex<Vec<(String, String)>>,
}

impl RecordingBackend {
    pub fn new() -> Self {
        Self {
            failures_left: AtomicU32::new(0),
            attempts: AtomicU32::new(0),
            alerts: Mutex::new(Vec::new()),
            digests: Mutex::new(Vec::new()),
            errors: Mutex::new(Vec::new()),
        }
    }

    pub fn failing_first(self, n: u32) -> Self {
        self.failures_left.store(n, Ordering::SeqCst);
        self
    }

    pub fn always_failing(self) -> Self {
        self.failing_first(u32::MAX)
    }

    pub fn recover(&self) {
        self.failures_left.store(0, Ordering::SeqCst);
    }

    pub fn alerts(&self) -> Vec<AlertSummary> {
        self.alerts.lock().unwrap().clone()
    }

    pub fn digests(&self) -> Vec<Digest> {
        self.digests.lock().unwrap().clone()
    }

    pub fn errors(&self) -> Vec<(String, String)> {
        self.errors.lock().unwrap().clone()
    }

    /// Every call, accepted or failed.
    pub fn attempts(&self) -> u32 {
        self.attempts.load(Ordering::SeqCst)
    }

    fn attempt(&self) -> Result<()> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        let failing = self
            .failures_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            anyhow::bail!("RecordingBackend: simulated delivery failure");
        }
        Ok(())
    }
}

impl Default for RecordingBackend {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl NotifyBackend for RecordingBackend {
    async fn send_alert(&self, summary: &AlertSummary) -> Result<()> {
        self.attempt()?;
        self.alerts.lock().unwrap().push(summary.clone());
        Ok(())
    }

    async fn send_digest(&self, digest: &Digest) -> Result<()> {
        self.attempt()?;
        self.digests.lock().unwrap().push(digest.clone());
        Ok(())
    }

    async fn send_error(&self, context: &str, message: &str) -> Result<()> {
        self.attempt()?;
        self.errors
            .lock()
            .unwrap()
            .push((context.to_string(), message.to_string()));
        Ok(())
    }
}
