//! # Web Search
//!
//! Tavily-backed discovery used when the registry does not point at
//! documentation or release notes.

use async_trait::async_trait;
use reqwest::header::AUTHORIZATION;
use serde_json::{json, Value};

use super::{SearchHit, ToolError, WebSearch};

const TAVILY_API: &str = "https://api.tavily.com";

pub struct TavilySearch {
    client: reqwest::Client,
    api_key: String,
    api_base: String,
}

impl TavilySearch {
    pub fn new(client: reqwest::Client, api_key: impl Into<String>) -> Self {
        Self {
            client,
            api_key: api_key.into(),
            api_base: TAVILY_API.to_string(),
        }
    }

    /// Reads `TAVILY_API_KEY`; `None` when unset or empty
    pub fn from_env(client: reqwest::Client) -> Option<Self> {
        std::env::var("TAVILY_API_KEY")
            .ok()
            .filter(|k| !k.trim().is_empty())
            .map(|key| Self::new(client, key))
    }
}

/// Hits from a Tavily response, skipping entries without a URL
pub fn parse_search_results(json: &Value, max_results: usize) -> Vec<SearchHit> {
    json.get("results")
        .and_then(|r| r.as_array())
        .map(|results| {
            results
                .iter()
                .filter_map(|r| {
                    let url = r.get("url")?.as_str()?.trim();
                    if url.is_empty() {
                        return None;
                    }
                    Some(SearchHit {
                        title: r.get("title").and_then(|t| t.as_str()).unwrap_or("").to_string(),
                        url: url.to_string(),
                        snippet: r.get("content").and_then(|c| c.as_str()).unwrap_or("").to_string(),
                    })
                })
                .take(max_results)
                .collect()
        })
        .unwrap_or_default()
}

#[async_trait]
impl WebSearch for TavilySearch {
    async fn search(&self, query: &str, max_results: usize) -> Result<Vec<SearchHit>, ToolError> {
        if max_results == 0 {
            return Ok(Vec::new());
        }
        let body = json!({
            "query": query,
            "max_results": max_results,
            "search_depth": "advanced",
        });
        let response = self
            .client
            .post(format!("{}/search", self.api_base))
            .header(AUTHORIZATION, format!("Bearer {}", self.api_key))
            .json(&body)
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(ToolError::Transport(format!(
                "web search returned {}",
                response.status()
            )));
        }
        let json: Value = response.json().await?;
        let hits = parse_search_results(&json, max_results);
        tracing::debug!(query = %query, hits = hits.len(), "Web search");
        Ok(hits)
    }
}
