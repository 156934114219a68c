pub mod error;
pub mod types;

pub use error::{GovUkError, Result};
pub use types::{
    parse_timestamp, ContentDetails, ContentItem, ContentMetadata, SearchParams, SearchResponse,
    SearchResult, SortOrder,
};

use std::time::Duration;

use serde::de::DeserializeOwned;

pub const DEFAULT_SEARCH_URL: &str = "https://www.gov.uk/api/search.json";
pub const DEFAULT_CONTENT_URL: &str = "https://www.gov.uk/api/content";

const USER_AGENT: &str = concat!("alertwatch/", env!("CARGO_PKG_VERSION"));

/// Thin client over the GOV.UK Search and Content APIs. One request per
/// call; retry policy belongs to the caller.
#[derive(Clone)]
pub struct GovUkClient {
    client: reqwest::Client,
    search_url: String,
    content_url: String,
}

impl GovUkClient {
    pub fn new(timeout: Duration) -> Result<Self> {
        Self::with_endpoints(DEFAULT_SEARCH_URL, DEFAULT_CONTENT_URL, timeout)
    }

    pub fn with_endpoints(search_url: &str, content_url: &str, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(USER_AGENT)
            .build()?;
        Ok(Self {
            client,
            search_url: search_url.to_string(),
            content_url: content_url.trim_end_matches('/').to_string(),
        })
    }

    /// Run one page of a Search API query.
    pub async fn search(&self, params: &SearchParams) -> Result<SearchResponse> {
        tracing::debug!(
            document_type = %params.document_type,
            start = params.start,
            count = params.count,
            "GOV.UK search"
        );
        let url = url::Url::parse_with_params(&self.search_url, params.query_pairs())?;
        self.get_json(url.as_str()).await
    }

    /// Fetch the structured content item behind a search result link.
    pub async fn content(&self, link: &str) -> Result<ContentItem> {
        let url = format!("{}{}", self.content_url, content_path(link));
        tracing::debug!(url = %url, "GOV.UK content lookup");
        self.get_json(&url).await
    }

    async fn get_json<T: DeserializeOwned>(&self, url: &str) -> Result<T> {
        let resp = self.client.get(url).send().await?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(GovUkError::Api {
                status: status.as_u16(),
                message: body,
            });
        }

        let bytes = resp.bytes().await?;
        Ok(serde_json::from_slice(&bytes)?)
    }
}

/// Reduce a search link (absolute or relative) to the path the Content API expects.
pub fn content_path(link: &str) -> String {
    let path = link
        .strip_prefix("https://www.gov.uk")
        .or_else(|| link.strip_prefix("http://www.gov.uk"))
        .unwrap_or(link);
    if path.starts_with('/') {
        path.to_string()
    } else {
        format!("/{path}")
    }
}

/// Canonical public URL for a search link.
pub fn public_url(link: &str) -> String {
    if link.starts_with("http://") || link.starts_with("https://") {
        link.to_string()
    } else {
        format!("https://www.gov.uk{}", content_path(link))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn content_path_strips_gov_uk_domain() {
        assert_eq!(
            content_path("https://www.gov.uk/drug-device-alerts/example"),
            "/drug-device-alerts/example"
        );
        assert_eq!(content_path("/drug-device-alerts/example"), "/drug-device-alerts/example");
        assert_eq!(content_path("drug-device-alerts/example"), "/drug-device-alerts/example");
    }

    #[test]
    fn public_url_is_absolute() {
        assert_eq!(
            public_url("/drug-device-alerts/example"),
            "https://www.gov.uk/drug-device-alerts/example"
        );
        assert_eq!(
            public_url("https://www.gov.uk/drug-device-alerts/example"),
            "https://www.gov.uk/drug-device-alerts/example"
        );
    }

    #[test]
    fn client_builds_with_custom_endpoints() {
        let client = GovUkClient::with_endpoints(
            "http://localhost:9999/search.json",
            "http://localhost:9999/content/",
            Duration::from_secs(5),
        )
        .unwrap();
        assert_eq!(client.content_url, "http://localhost:9999/content");
    }
}
