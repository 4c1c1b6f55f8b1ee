//! Web search used by the planner for inspiration and facts

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Default endpoint, Brave Search compatible
pub const DEFAULT_SEARCH_URL: &str = "https://api.search.brave.com/res/v1/web/search";

#[derive(Debug, thiserror::Error)]
pub enum SearchError {
    #[error("Search request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("Search API error ({status}): {message}")]
    Api { status: u16, message: String },
    #[error("Search query cannot be empty")]
    EmptyQuery,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchHit {
    pub title: String,
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub snippet: Option<String>,
}

#[async_trait]
pub trait SearchProvider: Send + Sync {
    async fn search(&self, query: &str, max_results: usize) -> Result<Vec<SearchHit>, SearchError>;
}

/// JSON-over-HTTP search API with a subscription-token header
#[derive(Clone)]
pub struct HttpSearch {
    client: Client,
    endpoint: String,
    api_key: String,
}

impl HttpSearch {
    pub fn new(endpoint: impl Into<String>, api_key: impl Into<String>, timeout: Duration) -> Self {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_else(|_| Client::new());
        Self {
            client,
            endpoint: endpoint.into(),
            api_key: api_key.into(),
        }
    }
}

#[async_trait]
impl SearchProvider for HttpSearch {
    async fn search(&self, query: &str, max_results: usize) -> Result<Vec<SearchHit>, SearchError> {
        let query = query.trim();
        if query.is_empty() {
            return Err(SearchError::EmptyQuery);
        }
        let count = max_results.clamp(1, 20).to_string();

        let response = self
            .client
            .get(&self.endpoint)
            .header("Accept", "application/json")
            .header("X-Subscription-Token", &self.api_key)
            .query(&[("q", query), ("count", count.as_str())])
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let message = response
                .text()
                .await
                .unwrap_or_else(|_| "Failed to read search error body".to_string());
            return Err(SearchError::Api { status, message });
        }

        let payload: Value = response.json().await?;
        Ok(extract_hits(&payload, max_results))
    }
}

/// Pull hits from `web.results[]`, or a top-level `results[]`
fn extract_hits(root: &Value, max_results: usize) -> Vec<SearchHit> {
    let results = root
        .pointer("/web/results")
        .or_else(|| root.get("results"))
        .and_then(Value::as_array);
    let Some(results) = results else {
        return Vec::new();
    };

    results
        .iter()
        .filter_map(|r| {
            let url = r.get("url").and_then(Value::as_str)?;
            let title = r.get("title").and_then(Value::as_str).unwrap_or(url);
            let snippet = r
                .get("description")
                .or_else(|| r.get("snippet"))
                .and_then(Value::as_str)
                .map(str::to_string);
            Some(SearchHit {
                title: title.to_string(),
                url: url.to_string(),
                snippet,
            })
        })
        .take(max_results)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_extract_hits_from_web_results() {
        let payload = json!({
            "web": {"results": [
                {"title": "Bread 101", "url": "https://a.example", "description": "Sourdough basics"},
                {"url": "https://b.example"},
                {"title": "no url"}
            ]}
        });
        let hits = extract_hits(&payload, 5);
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].snippet.as_deref(), Some("Sourdough basics"));
        assert_eq!(hits[1].title, "https://b.example");
    }

    #[test]
    fn test_extract_hits_respects_limit() {
        let payload = json!({"results": [
            {"url": "https://1.example"}, {"url": "https://2.example"}, {"url": "https://3.example"}
        ]});
        assert_eq!(extract_hits(&payload, 2).len(), 2);
        assert!(extract_hits(&json!({}), 2).is_empty());
    }

    #[tokio::test]
    async fn test_empty_query_rejected() {
        let search = HttpSearch::new("http://127.0.0.1:9", "key", Duration::from_secs(1));
        assert!(matches!(search.search("  ", 3).await, Err(SearchError::EmptyQuery)));
    }
}
