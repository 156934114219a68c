use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

/// Fields requested from the Search API for every result.
pub const SEARCH_FIELDS: &str = "title,link,public_timestamp,description,content_id";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SortOrder {
    /// Newest first.
    Descending,
    /// Oldest first.
    Ascending,
}

impl SortOrder {
    pub fn as_param(&self) -> &'static str {
        match self {
            SortOrder::Descending => "-public_timestamp",
            SortOrder::Ascending => "public_timestamp",
        }
    }
}

/// One page of a Search API query.
#[derive(Debug, Clone)]
pub struct SearchParams {
    pub document_type: String,
    pub organisation: String,
    pub order: SortOrder,
    pub start: u32,
    pub count: u32,
    /// Lower bound on `public_timestamp`, inclusive, at day granularity.
    pub from_date: Option<NaiveDate>,
}

impl SearchParams {
    pub fn query_pairs(&self) -> Vec<(&'static str, String)> {
        let mut pairs = vec![
            ("filter_content_store_document_type", self.document_type.clone()),
            ("filter_organisations", self.organisation.clone()),
            ("order", self.order.as_param().to_string()),
            ("count", self.count.to_string()),
            ("start", self.start.to_string()),
            ("fields", SEARCH_FIELDS.to_string()),
        ];
        if let Some(from) = self.from_date {
            pairs.push((
                "filter_public_timestamp",
                format!("from:{}", from.format("%Y-%m-%d")),
            ));
        }
        pairs
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct SearchResponse {
    #[serde(default)]
    pub results: Vec<SearchResult>,
    #[serde(default)]
    pub total: u64,
    #[serde(default)]
    pub start: u64,
}

impl SearchResponse {
    /// Offset of the following page, if the result set extends past this one.
    pub fn next_start(&self, requested_start: u32, requested_count: u32) -> Option<u32> {
        let next = requested_start as u64 + requested_count as u64;
        if self.results.is_empty() || next >= self.total {
            None
        } else {
            u32::try_from(next).ok()
        }
    }
}

/// A search hit. Every field is optional on the wire; callers decide which
/// absences make a result unusable.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct SearchResult {
    pub content_id: Option<String>,
    pub title: Option<String>,
    pub link: Option<String>,
    pub description: Option<String>,
    pub public_timestamp: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ContentItem {
    pub content_id: Option<String>,
    pub title: Option<String>,
    pub document_type: Option<String>,
    #[serde(default)]
    pub details: ContentDetails,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ContentDetails {
    #[serde(default)]
    pub metadata: ContentMetadata,
    pub body: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ContentMetadata {
    pub message_type: Option<String>,
    pub alert_type: Option<String>,
    #[serde(default)]
    pub medical_specialism: Vec<String>,
    #[serde(alias = "issue_date")]
    pub issued_date: Option<String>,
}

/// Parse a GOV.UK timestamp. The APIs mix RFC 3339 timestamps with bare
/// `YYYY-MM-DD` dates; bare dates are taken as midnight UTC.
pub fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }
    if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
        return Some(ts.with_timezone(&Utc));
    }
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|dt| dt.and_utc())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn search_response_deserializes_sparse_results() {
        let raw = serde_json::json!({
            "results": [
                {
                    "content_id": "5f1c0e2a-0000-4000-8000-000000000001",
                    "title": "Class 2 Medicines Recall: Example Tablets",
                    "link": "/drug-device-alerts/class-2-medicines-recall-example",
                    "public_timestamp": "2025-03-04T10:15:00.000+00:00"
                },
                { "title": "No identifier" }
            ],
            "total": 250,
            "start": 0
        });
        let resp: SearchResponse = serde_json::from_value(raw).unwrap();
        assert_eq!(resp.results.len(), 2);
        assert_eq!(resp.total, 250);
        assert!(resp.results[1].content_id.is_none());
        assert!(resp.results[0].description.is_none());
    }

    #[test]
    fn next_start_stops_at_total() {
        let resp = SearchResponse {
            results: vec![SearchResult::default(); 100],
            total: 250,
            start: 0,
        };
        assert_eq!(resp.next_start(0, 100), Some(100));
        assert_eq!(resp.next_start(100, 100), Some(200));
        assert_eq!(resp.next_start(200, 100), None);
    }

    #[test]
    fn next_start_stops_on_empty_page() {
        let resp = SearchResponse { results: vec![], total: 500, start: 100 };
        assert_eq!(resp.next_start(100, 100), None);
    }

    #[test]
    fn content_metadata_reads_specialisms_and_issue_date() {
        let raw = serde_json::json!({
            "content_id": "abc",
            "title": "Example",
            "document_type": "medical_safety_alert",
            "details": {
                "body": "<p>Stop supplying</p>",
                "metadata": {
                    "alert_type": "medicines-recall",
                    "medical_specialism": ["general-practice", "pharmacy"],
                    "issue_date": "2025-03-04"
                }
            }
        });
        let item: ContentItem = serde_json::from_value(raw).unwrap();
        assert_eq!(item.details.metadata.medical_specialism.len(), 2);
        assert_eq!(item.details.metadata.issued_date.as_deref(), Some("2025-03-04"));
        assert!(item.details.metadata.message_type.is_none());
    }

    #[test]
    fn content_without_details_still_parses() {
        let item: ContentItem =
            serde_json::from_value(serde_json::json!({ "content_id": "abc" })).unwrap();
        assert!(item.details.metadata.medical_specialism.is_empty());
        assert!(item.details.body.is_none());
    }

    #[test]
    fn parses_both_timestamp_shapes() {
        let full = parse_timestamp("2025-03-04T10:15:00Z").unwrap();
        assert_eq!(full, Utc.with_ymd_and_hms(2025, 3, 4, 10, 15, 0).unwrap());

        let offset = parse_timestamp("2025-03-04T11:15:00+01:00").unwrap();
        assert_eq!(offset, full);

        let bare = parse_timestamp("2025-03-04").unwrap();
        assert_eq!(bare, Utc.with_ymd_and_hms(2025, 3, 4, 0, 0, 0).unwrap());

        assert!(parse_timestamp("").is_none());
        assert!(parse_timestamp("yesterday").is_none());
    }

    #[test]
    fn query_pairs_include_date_filter_only_when_bounded() {
        let mut params = SearchParams {
            document_type: "medical_safety_alert".into(),
            organisation: "medicines-and-healthcare-products-regulatory-agency".into(),
            order: SortOrder::Ascending,
            start: 200,
            count: 100,
            from_date: None,
        };
        let pairs = params.query_pairs();
        assert!(pairs.iter().all(|(k, _)| *k != "filter_public_timestamp"));
        assert!(pairs.contains(&("order", "public_timestamp".to_string())));
        assert!(pairs.contains(&("start", "200".to_string())));

        params.from_date = NaiveDate::from_ymd_opt(2025, 1, 2);
        let pairs = params.query_pairs();
        assert!(pairs.contains(&("filter_public_timestamp", "from:2025-01-02".to_string())));
    }
}
