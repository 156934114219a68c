//! Candidate discovery.
//!
//! A source serves one page of candidates per call. [`candidate_pages`] turns
//! that into a lazy, finite stream that can be resumed from any page's cursor.

pub mod govuk;

pub use govuk::GovUkSource;

use std::sync::Arc;

use alertwatch_common::CandidateRecord;
use chrono::{DateTime, Utc};
use futures::stream::{self, Stream};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::traits::AlertSource;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FetchOrder {
    /// Newest first, stopping at the since-bound. Used by incremental polls.
    NewestFirst,
    /// Oldest first from the since-bound. Used by backfills so an interrupted
    /// run resumes at the oldest unseen record.
    OldestFirst,
}

/// One page request. Also serves as the resume cursor: persist it and pass
/// it back to continue where a run stopped.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageQuery {
    pub document_type: String,
    pub order: FetchOrder,
    pub since: Option<DateTime<Utc>>,
    pub offset: u32,
    pub page_size: u32,
}

impl PageQuery {
    pub fn at_offset(&self, offset: u32) -> Self {
        Self {
            offset,
            ..self.clone()
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct SourcePage {
    pub candidates: Vec<CandidateRecord>,
    /// Results skipped for missing required fields.
    pub malformed: usize,
    /// Candidates whose content lookup failed.
    pub partially_enriched: usize,
    /// Query for the following page, if any.
    pub next: Option<PageQuery>,
}

#[derive(Debug, Error)]
pub enum SourceError {
    /// Network trouble or a 5xx that outlasted every retry.
    #[error("Source unavailable after {attempts} attempts: {message}")]
    Transient { attempts: u32, message: String },

    /// A single result missing a required field. Skipped, never fatal.
    #[error("Malformed candidate: {0}")]
    Malformed(String),

    /// A non-retryable failure of the page request itself.
    #[error("Source request failed: {0}")]
    Fatal(String),
}

/// Lazily page through a query, starting at `query.offset`. Ends after the
/// last page or at the first error.
pub fn candidate_pages(
    source: Arc<dyn AlertSource>,
    query: PageQuery,
) -> impl Stream<Item = Result<(PageQuery, SourcePage), SourceError>> {
    stream::try_unfold(Some(query), move |next| {
        let source = source.clone();
        async move {
            let Some(query) = next else {
                return Ok(None);
            };
            let page = source.fetch_page(&query).await?;
            let following = page.next.clone();
            Ok(Some(((query, page), following)))
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{candidate, MockSource};
    use futures::TryStreamExt;

    fn query(page_size: u32) -> PageQuery {
        PageQuery {
            document_type: "medical_safety_alert".into(),
            order: FetchOrder::OldestFirst,
            since: None,
            offset: 0,
            page_size,
        }
    }

    #[tokio::test]
    async fn pages_until_exhausted() {
        let items = (0..5).map(|i| candidate(&format!("id-{i}"), &[])).collect();
        let source = Arc::new(MockSource::new().with_candidates("medical_safety_alert", items));

        let pages: Vec<_> = candidate_pages(source, query(2)).try_collect().await.unwrap();
        let offsets: Vec<u32> = pages.iter().map(|(q, _)| q.offset).collect();
        assert_eq!(offsets, vec![0, 2, 4]);
        let total: usize = pages.iter().map(|(_, p)| p.candidates.len()).sum();
        assert_eq!(total, 5);
    }

    #[tokio::test]
    async fn resumes_from_cursor_offset() {
        let items = (0..5).map(|i| candidate(&format!("id-{i}"), &[])).collect();
        let source = Arc::new(MockSource::new().with_candidates("medical_safety_alert", items));

        let pages: Vec<_> = candidate_pages(source, query(2).at_offset(4))
            .try_collect()
            .await
            .unwrap();
        assert_eq!(pages.len(), 1);
        assert_eq!(pages[0].1.candidates[0].external_id, "id-4");
    }

    #[tokio::test]
    async fn stops_at_first_error() {
        let items = (0..5).map(|i| candidate(&format!("id-{i}"), &[])).collect();
        let source = Arc::new(
            MockSource::new()
                .with_candidates("medical_safety_alert", items)
                .fail_at("medical_safety_alert", 2),
        );

        let mut stream = Box::pin(candidate_pages(source, query(2)));
        assert!(stream.try_next().await.unwrap().is_some());
        assert!(stream.try_next().await.is_err());
    }
}
