//! Wikipedia article search through the MediaWiki search API.
//!
//! Snippets arrive as HTML fragments and get stripped; article URLs are
//! reconstructed from titles. Wikipedia is classified tertiary on
//! purpose: good for definitions and background, never sole support for
//! a contested number.

use std::time::Duration;

use async_trait::async_trait;
use evigate_core::claim::SourceClass;
use evigate_core::error::ToolError;
use evigate_core::evidence::SourceHit;
use evigate_core::retrieval::{SearchConstraints, Topic};

use crate::registry::RetrievalTool;
use crate::sources::{apply_constraints, build_client, strip_markup, truncate_extract};

const ID: &str = "wikipedia";
const API_BASE: &str = "https://en.wikipedia.org/w/api.php";

#[derive(Default)]
pub struct WikipediaTool;

impl WikipediaTool {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl RetrievalTool for WikipediaTool {
    fn id(&self) -> &str {
        ID
    }

    fn description(&self) -> &str {
        "Wikipedia article search; best for definitions and settled background"
    }

    fn topics(&self) -> &[Topic] {
        &[Topic::Encyclopedia]
    }

    fn timeout(&self) -> Duration {
        Duration::from_secs(15)
    }

    async fn search(
        &self,
        query: &str,
        constraints: &SearchConstraints,
    ) -> Result<Vec<SourceHit>, ToolError> {
        if query.trim().is_empty() {
            return Err(ToolError::InvalidQuery {
                id: ID.to_string(),
                reason: "empty query".to_string(),
            });
        }

        let limit = constraints.results_per_query.clamp(1, 10);
        let client = build_client(ID, Duration::from_secs(10))?;
        let url = format!(
            "{API_BASE}?action=query&list=search&srsearch={}&srlimit={limit}&srprop=snippet%7Ctimestamp&format=json",
            urlencoding::encode(query)
        );
        let response = client
            .get(&url)
            .send()
            .await
            .map_err(|e| ToolError::RequestFailed {
                id: ID.to_string(),
                message: format!("search request failed: {e}"),
            })?;
        let body: serde_json::Value = response.json().await.map_err(|e| ToolError::Decode {
            id: ID.to_string(),
            message: format!("response was not JSON: {e}"),
        })?;

        Ok(apply_constraints(parse_search_results(&body), constraints))
    }
}

fn parse_search_results(body: &serde_json::Value) -> Vec<SourceHit> {
    let Some(results) = body.pointer("/query/search").and_then(|v| v.as_array()) else {
        return Vec::new();
    };

    let mut hits = Vec::new();
    for result in results {
        let Some(title) = result.get("title").and_then(|v| v.as_str()) else {
            continue;
        };
        let snippet = result.get("snippet").and_then(|v| v.as_str()).unwrap_or("");
        let mut hit = SourceHit::new(
            title,
            article_url(title),
            "Wikipedia",
            SourceClass::Tertiary,
            truncate_extract(&strip_markup(snippet)),
        );
        // Timestamp is the last-edit time, the closest thing a wiki
        // article has to a publication date.
        if let Some(timestamp) = result.get("timestamp").and_then(|v| v.as_str()) {
            hit.date = timestamp.chars().take(10).collect();
        }
        hits.push(hit);
    }
    hits
}

/// "TLS 1.3" becomes "https://en.wikipedia.org/wiki/TLS_1.3".
fn article_url(title: &str) -> String {
    format!(
        "https://en.wikipedia.org/wiki/{}",
        urlencoding::encode(&title.replace(' ', "_"))
    )
}
