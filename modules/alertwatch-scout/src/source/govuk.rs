use std::time::Duration;

use alertwatch_common::config::SourceConfig;
use alertwatch_common::{normalize_tags, CandidateRecord, EnrichmentStatus};
use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use govuk_client::{
    parse_timestamp, public_url, ContentItem, GovUkClient, GovUkError, SearchParams,
    SearchResponse, SearchResult, SortOrder,
};
use tracing::{debug, warn};

use super::{FetchOrder, PageQuery, SourceError, SourcePage};
use crate::infra::retry::{Exhausted, RetryPolicy};
use crate::traits::AlertSource;

/// Discovery against the GOV.UK Search API, with per-item enrichment from
/// the Content API.
pub struct GovUkSource {
    client: GovUkClient,
    organisation: String,
    retry: RetryPolicy,
    enrichment_concurrency: usize,
}

impl GovUkSource {
    pub fn from_config(config: &SourceConfig) -> anyhow::Result<Self> {
        let client = GovUkClient::with_endpoints(
            &config.search_url,
            &config.content_url,
            Duration::from_secs(config.request_timeout_secs),
        )?;
        Ok(Self {
            client,
            organisation: config.organisation.clone(),
            retry: RetryPolicy::new(config.max_attempts, Duration::from_secs(config.retry_base_secs)),
            enrichment_concurrency: config.enrichment_concurrency.max(1),
        })
    }

    /// Fill tags, category fields and issue date from the Content API.
    /// A failed lookup never fails the batch; the candidate is marked partial.
    async fn enrich(&self, mut candidate: CandidateRecord) -> CandidateRecord {
        if !candidate.tags.is_empty() {
            candidate.enrichment = EnrichmentStatus::NotNeeded;
            return candidate;
        }

        let link = candidate.url.clone();
        let result = self
            .retry
            .run("govuk_content", GovUkError::is_transient, || self.client.content(&link))
            .await;

        settle_enrichment(candidate, result)
    }
}

#[async_trait]
impl AlertSource for GovUkSource {
    async fn fetch_page(&self, query: &PageQuery) -> Result<SourcePage, SourceError> {
        let params = SearchParams {
            document_type: query.document_type.clone(),
            organisation: self.organisation.clone(),
            order: match query.order {
                FetchOrder::NewestFirst => SortOrder::Descending,
                FetchOrder::OldestFirst => SortOrder::Ascending,
            },
            start: query.offset,
            count: query.page_size,
            from_date: query.since.map(|s| s.date_naive()),
        };

        let response = self
            .retry
            .run("govuk_search", GovUkError::is_transient, || self.client.search(&params))
            .await
            .map_err(search_error)?;

        let Screened {
            accepted,
            malformed,
            reached_since,
        } = screen(&response.results, query);
        let mut page = SourcePage {
            malformed,
            ..SourcePage::default()
        };

        page.candidates = stream::iter(accepted)
            .map(|c| self.enrich(c))
            .buffered(self.enrichment_concurrency)
            .collect()
            .await;
        page.partially_enriched = page
            .candidates
            .iter()
            .filter(|c| c.enrichment == EnrichmentStatus::Partial)
            .count();

        page.next = next_query(&response, query, reached_since);

        debug!(
            document_type = %query.document_type,
            offset = query.offset,
            candidates = page.candidates.len(),
            malformed = page.malformed,
            "Fetched page"
        );
        Ok(page)
    }
}

/// Search hits that passed the malformed and since-bound checks.
#[derive(Debug, Default)]
struct Screened {
    accepted: Vec<CandidateRecord>,
    malformed: usize,
    /// A newest-first page crossed the since-bound; nothing after it is wanted.
    reached_since: bool,
}

fn screen(results: &[SearchResult], query: &PageQuery) -> Screened {
    let mut screened = Screened::default();
    for result in results {
        let candidate = match normalize(result, &query.document_type) {
            Ok(candidate) => candidate,
            Err(e) => {
                warn!(error = %e, document_type = %query.document_type, "Skipping search result");
                screened.malformed += 1;
                continue;
            }
        };
        if query.since.is_some_and(|since| candidate.published_at < since) {
            if query.order == FetchOrder::NewestFirst {
                screened.reached_since = true;
                break;
            }
            continue;
        }
        screened.accepted.push(candidate);
    }
    screened
}

fn next_query(response: &SearchResponse, query: &PageQuery, reached_since: bool) -> Option<PageQuery> {
    if reached_since {
        return None;
    }
    response
        .next_start(query.offset, query.page_size)
        .map(|offset| query.at_offset(offset))
}

fn search_error(e: Exhausted<GovUkError>) -> SourceError {
    if e.error.is_transient() {
        SourceError::Transient {
            attempts: e.attempts,
            message: e.error.to_string(),
        }
    } else {
        SourceError::Fatal(e.error.to_string())
    }
}

fn settle_enrichment(
    mut candidate: CandidateRecord,
    lookup: Result<ContentItem, Exhausted<GovUkError>>,
) -> CandidateRecord {
    match lookup {
        Ok(item) => {
            apply_content(&mut candidate, item);
            candidate.enrichment = EnrichmentStatus::Enriched;
        }
        Err(e) => {
            warn!(
                external_id = %candidate.external_id,
                attempts = e.attempts,
                error = %e.error,
                "Enrichment failed, keeping search fields only"
            );
            candidate.enrichment = EnrichmentStatus::Partial;
        }
    }
    candidate
}

/// Turn a search hit into a candidate, or say which required field is missing.
pub fn normalize(result: &SearchResult, document_type: &str) -> Result<CandidateRecord, SourceError> {
    let required = |value: &Option<String>, name: &str| {
        value
            .as_deref()
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .map(str::to_string)
            .ok_or_else(|| SourceError::Malformed(format!("missing {name}")))
    };

    let external_id = required(&result.content_id, "content_id")?;
    let title = required(&result.title, "title")?;
    let link = required(&result.link, "link")?;
    let raw_ts = required(&result.public_timestamp, "public_timestamp")?;
    let published_at = parse_timestamp(&raw_ts).ok_or_else(|| {
        SourceError::Malformed(format!("{external_id}: unparseable public_timestamp {raw_ts}"))
    })?;

    Ok(CandidateRecord {
        external_id,
        url: public_url(&link),
        title,
        description: result
            .description
            .as_deref()
            .map(str::trim)
            .filter(|d| !d.is_empty())
            .map(str::to_string),
        document_type: document_type.to_string(),
        message_type: None,
        alert_type: None,
        tags: Vec::new(),
        published_at,
        issued_at: None,
        body: None,
        enrichment: EnrichmentStatus::NotNeeded,
    })
}

fn apply_content(candidate: &mut CandidateRecord, item: ContentItem) {
    let metadata = item.details.metadata;
    candidate.tags = normalize_tags(metadata.medical_specialism);
    candidate.message_type = metadata.message_type;
    candidate.alert_type = metadata.alert_type;
    candidate.issued_at = metadata.issued_date.as_deref().and_then(parse_timestamp);
    candidate.body = item.details.body;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hit() -> SearchResult {
        SearchResult {
            content_id: Some("5f1c0e2a-0000-4000-8000-000000000001".into()),
            title: Some("Class 2 Medicines Recall: Example Tablets".into()),
            link: Some("/drug-device-alerts/example".into()),
            description: Some("  ".into()),
            public_timestamp: Some("2025-03-04T10:15:00Z".into()),
        }
    }

    #[test]
    fn normalizes_complete_hit() {
        let c = normalize(&hit(), "medical_safety_alert").unwrap();
        assert_eq!(c.url, "https://www.gov.uk/drug-device-alerts/example");
        assert_eq!(c.document_type, "medical_safety_alert");
        assert!(c.description.is_none());
        assert!(c.tags.is_empty());
    }

    #[test]
    fn missing_identifier_is_malformed() {
        let mut h = hit();
        h.content_id = None;
        let err = normalize(&h, "medical_safety_alert").unwrap_err();
        assert!(matches!(err, SourceError::Malformed(m) if m.contains("content_id")));
    }

    #[test]
    fn bad_timestamp_is_malformed() {
        let mut h = hit();
        h.public_timestamp = Some("last tuesday".into());
        assert!(matches!(
            normalize(&h, "medical_safety_alert"),
            Err(SourceError::Malformed(_))
        ));
    }

    #[test]
    fn content_fills_enrichment_fields() {
        let mut c = normalize(&hit(), "medical_safety_alert").unwrap();
        let item: ContentItem = serde_json::from_value(serde_json::json!({
            "content_id": "5f1c0e2a-0000-4000-8000-000000000001",
            "details": {
                "body": "<p>Batch: AB123</p>",
                "metadata": {
                    "alert_type": "medicines-recall",
                    "medical_specialism": ["pharmacy", "general-practice", "pharmacy"],
                    "issued_date": "2025-03-04"
                }
            }
        }))
        .unwrap();
        apply_content(&mut c, item);
        assert_eq!(c.tags, vec!["general-practice", "pharmacy"]);
        assert_eq!(c.alert_type.as_deref(), Some("medicines-recall"));
        assert!(c.issued_at.is_some());
        assert!(c.body.is_some());
    }

    fn hit_at(id: &str, ts: &str) -> SearchResult {
        SearchResult {
            content_id: Some(id.into()),
            public_timestamp: Some(ts.into()),
            ..hit()
        }
    }

    fn query(order: FetchOrder, since: Option<&str>) -> PageQuery {
        PageQuery {
            document_type: "medical_safety_alert".into(),
            order,
            since: since.and_then(parse_timestamp),
            offset: 0,
            page_size: 3,
        }
    }

    fn response(results: Vec<SearchResult>, total: u64) -> SearchResponse {
        SearchResponse { results, total, start: 0 }
    }

    fn exhausted(error: GovUkError) -> Exhausted<GovUkError> {
        Exhausted { attempts: 3, error }
    }

    #[test]
    fn newest_first_stops_at_since_bound_and_ends_paging() {
        let results = vec![
            hit_at("a", "2025-03-06T09:00:00Z"),
            hit_at("b", "2025-02-01T09:00:00Z"),
            hit_at("c", "2025-03-05T09:00:00Z"),
        ];
        let q = query(FetchOrder::NewestFirst, Some("2025-03-01T00:00:00Z"));

        let screened = screen(&results, &q);
        let ids: Vec<_> = screened.accepted.iter().map(|c| c.external_id.as_str()).collect();
        assert_eq!(ids, vec!["a"]);
        assert!(screened.reached_since);

        // The listing has more pages, but none of them are wanted.
        let resp = response(results, 50);
        assert!(next_query(&resp, &q, screened.reached_since).is_none());
    }

    #[test]
    fn oldest_first_skips_older_hits_and_keeps_paging() {
        let results = vec![
            hit_at("a", "2025-02-01T09:00:00Z"),
            hit_at("b", "2025-03-02T09:00:00Z"),
            hit_at("c", "2025-03-03T09:00:00Z"),
        ];
        let q = query(FetchOrder::OldestFirst, Some("2025-03-01T00:00:00Z"));

        let screened = screen(&results, &q);
        let ids: Vec<_> = screened.accepted.iter().map(|c| c.external_id.as_str()).collect();
        assert_eq!(ids, vec!["b", "c"]);
        assert!(!screened.reached_since);

        let next = next_query(&response(results, 50), &q, false).unwrap();
        assert_eq!(next.offset, 3);
        assert_eq!(next.order, FetchOrder::OldestFirst);
    }

    #[test]
    fn malformed_hits_are_counted_not_fatal() {
        let mut broken = hit_at("b", "2025-03-05T09:00:00Z");
        broken.title = None;
        let results = vec![
            hit_at("a", "2025-03-06T09:00:00Z"),
            broken,
            hit_at("c", "not a date"),
        ];

        let screened = screen(&results, &query(FetchOrder::NewestFirst, None));
        assert_eq!(screened.accepted.len(), 1);
        assert_eq!(screened.malformed, 2);
        assert!(!screened.reached_since);
    }

    #[test]
    fn last_page_has_no_next() {
        let results = vec![hit_at("a", "2025-03-06T09:00:00Z")];
        let q = query(FetchOrder::NewestFirst, None);
        assert!(next_query(&response(results, 1), &q, false).is_none());
    }

    #[test]
    fn retryable_search_failure_is_transient() {
        let err = search_error(exhausted(GovUkError::Api {
            status: 503,
            message: "unavailable".into(),
        }));
        assert!(matches!(err, SourceError::Transient { attempts: 3, ref message } if message.contains("503")));

        let err = search_error(exhausted(GovUkError::Timeout("30s".into())));
        assert!(matches!(err, SourceError::Transient { .. }));
    }

    #[test]
    fn client_and_parse_failures_are_fatal() {
        let err = search_error(exhausted(GovUkError::Api {
            status: 404,
            message: "not found".into(),
        }));
        assert!(matches!(err, SourceError::Fatal(ref m) if m.contains("404")));

        let err = search_error(exhausted(GovUkError::Parse("expected value".into())));
        assert!(matches!(err, SourceError::Fatal(_)));
    }

    #[test]
    fn failed_lookup_keeps_search_fields_and_marks_partial() {
        let c = normalize(&hit(), "medical_safety_alert").unwrap();
        let settled = settle_enrichment(c.clone(), Err(exhausted(GovUkError::Network("reset".into()))));
        assert_eq!(settled.enrichment, EnrichmentStatus::Partial);
        assert!(settled.tags.is_empty());
        assert_eq!(settled.title, c.title);
        assert_eq!(settled.url, c.url);
        assert_eq!(settled.published_at, c.published_at);
    }

    #[test]
    fn successful_lookup_marks_enriched() {
        let c = normalize(&hit(), "medical_safety_alert").unwrap();
        let item: ContentItem = serde_json::from_value(serde_json::json!({
            "content_id": "5f1c0e2a-0000-4000-8000-000000000001",
            "details": { "metadata": { "medical_specialism": ["general-practice"] } }
        }))
        .unwrap();
        let settled = settle_enrichment(c, Ok(item));
        assert_eq!(settled.enrichment, EnrichmentStatus::Enriched);
        assert_eq!(settled.tags, vec!["general-practice"]);
    }

    fn unreachable_source() -> GovUkSource {
        GovUkSource::from_config(&SourceConfig {
            search_url: "http://127.0.0.1:9/api/search.json".into(),
            content_url: "http://127.0.0.1:9/api/content".into(),
            request_timeout_secs: 2,
            max_attempts: 1,
            retry_base_secs: 0,
            ..SourceConfig::default()
        })
        .unwrap()
    }

    #[tokio::test]
    async fn tagged_candidate_skips_lookup() {
        let mut c = normalize(&hit(), "medical_safety_alert").unwrap();
        c.tags = vec!["general-practice".into()];
        let enriched = unreachable_source().enrich(c).await;
        assert_eq!(enriched.enrichment, EnrichmentStatus::NotNeeded);
        assert_eq!(enriched.tags, vec!["general-practice"]);
    }

    #[tokio::test]
    async fn unreachable_content_api_yields_partial() {
        let c = normalize(&hit(), "medical_safety_alert").unwrap();
        let enriched = unreachable_source().enrich(c).await;
        assert_eq!(enriched.enrichment, EnrichmentStatus::Partial);
        assert!(enriched.tags.is_empty());
    }

    #[tokio::test]
    async fn unreachable_search_api_is_transient() {
        let err = unreachable_source()
            .fetch_page(&query(FetchOrder::NewestFirst, None))
            .await
            .unwrap_err();
        assert!(matches!(err, SourceError::Transient { attempts: 1, .. }));
    }
}
