use futures::future::BoxFuture;
use serde_json::json;
use tracing::debug;

use ragloop_core::error::{RagError, Result};
use ragloop_core::traits::WebSearch;
use ragloop_core::types::EvidenceItem;

const TAVILY_API_URL: &str = "https://api.tavily.com/search";

/// Tavily search API client returning `WEB:<url>` evidence.
pub struct TavilySearch {
    api_key: String,
    base_url: String,
    http: reqwest::Client,
}

impl TavilySearch {
    pub fn new(api_key: &str) -> Self {
        Self {
            api_key: api_key.to_string(),
            base_url: TAVILY_API_URL.to_string(),
            http: reqwest::Client::new(),
        }
    }

    pub fn with_base_url(mut self, url: &str) -> Self {
        self.base_url = url.to_string();
        self
    }
}

/// Map a Tavily response body to evidence items. Results without a URL are
/// skipped.
fn parse_results(body: &serde_json::Value) -> Vec<EvidenceItem> {
    let Some(results) = body["results"].as_array() else {
        return Vec::new();
    };
    results
        .iter()
        .filter_map(|r| {
            let url = r["url"].as_str().unwrap_or("").trim();
            if url.is_empty() {
                return None;
            }
            let mut item = EvidenceItem::web(url, r["content"].as_str().unwrap_or(""));
            if let Some(title) = r["title"].as_str().filter(|t| !t.trim().is_empty()) {
                item = item.with_title(title);
            }
            if let Some(score) = r["score"].as_f64() {
                item = item.with_score(score);
            }
            Some(item)
        })
        .collect()
}

impl WebSearch for TavilySearch {
    fn query<'a>(&'a self, text: &'a str, k: usize) -> BoxFuture<'a, Result<Vec<EvidenceItem>>> {
        Box::pin(async move {
            let resp = self
                .http
                .post(&self.base_url)
                .json(&json!({
                    "api_key": self.api_key,
                    "query": text,
                    "max_results": k,
                }))
                .send()
                .await
                .map_err(|e| RagError::retrieval("tavily", e))?;

            if !resp.status().is_success() {
                let status = resp.status();
                let body = resp.text().await.unwrap_or_default();
                return Err(RagError::retrieval("tavily", format!("HTTP {status}: {body}")));
            }

            let body: serde_json::Value = resp
                .json()
                .await
                .map_err(|e| RagError::retrieval("tavily", e))?;

            let mut items = parse_results(&body);
            items.truncate(k);
            debug!(query = %text, results = items.len(), "Tavily search");
            Ok(items)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_results() {
        let body = json!({
            "query": "rust",
            "results": [
                {"title": "Rust", "url": "https://www.rust-lang.org", "content": "A language", "score": 0.91},
                {"title": "", "url": "", "content": "no url"},
                {"url": "https://doc.rust-lang.org/book", "content": "The book"}
            ]
        });
        let items = parse_results(&body);
        assert_eq!(items.len(), 2);
        assert_eq!(items[0].source, "WEB:https://www.rust-lang.org");
        assert_eq!(items[0].title.as_deref(), Some("Rust"));
        assert_eq!(items[0].relevance_score, Some(0.91));
        assert_eq!(items[1].title, None);
        assert_eq!(items[1].content, "The book");
    }

    #[test]
    fn test_parse_results_missing_array() {
        assert!(parse_results(&json!({"error": "quota"})).is_empty());
    }
}
