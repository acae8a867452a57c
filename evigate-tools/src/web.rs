//! General web search through the DuckDuckGo instant-answer API.
//!
//! No API key, no tracking, and abstracts come with an attributable
//! source URL, which matters more here than result breadth: a hit
//! without a real URL is useless to the evidence pipeline.

use std::time::Duration;

use async_trait::async_trait;
use evigate_core::error::ToolError;
use evigate_core::evidence::SourceHit;
use evigate_core::retrieval::{SearchConstraints, Topic};

use crate::registry::RetrievalTool;
use crate::sources::{apply_constraints, build_client, classify_source, publisher_for_url, truncate_extract};

const ID: &str = "web_search";

#[derive(Default)]
pub struct DuckDuckGoTool;

impl DuckDuckGoTool {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl RetrievalTool for DuckDuckGoTool {
    fn id(&self) -> &str {
        ID
    }

    fn description(&self) -> &str {
        "General web search via DuckDuckGo instant answers; fallback for every topic"
    }

    fn topics(&self) -> &[Topic] {
        &[Topic::General]
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

        let client = build_client(ID, Duration::from_secs(10))?;
        let url = format!(
            "https://api.duckduckgo.com/?q={}&format=json&no_html=1&skip_disambig=1",
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

        Ok(apply_constraints(parse_instant_answer(&body), constraints))
    }
}

/// Pull hits out of an instant-answer payload: the abstract first, then
/// plain results and related topics. Entries without a URL are skipped.
fn parse_instant_answer(body: &serde_json::Value) -> Vec<SourceHit> {
    let mut hits = Vec::new();

    if let Some(abstract_text) = body.get("AbstractText").and_then(|v| v.as_str())
        && !abstract_text.is_empty()
        && let Some(url) = body.get("AbstractURL").and_then(|v| v.as_str())
        && !url.is_empty()
    {
        let heading = body
            .get("Heading")
            .and_then(|v| v.as_str())
            .filter(|h| !h.is_empty())
            .unwrap_or(url);
        let source = body
            .get("AbstractSource")
            .and_then(|v| v.as_str())
            .unwrap_or("");
        let publisher = if source.is_empty() {
            publisher_for_url(url)
        } else {
            source.to_string()
        };
        hits.push(SourceHit::new(
            heading,
            url,
            publisher,
            classify_source(url),
            truncate_extract(abstract_text),
        ));
    }

    for key in ["Results", "RelatedTopics"] {
        let Some(entries) = body.get(key).and_then(|v| v.as_array()) else {
            continue;
        };
        for entry in entries {
            // Disambiguation groups nest their entries under "Topics".
            let nested = entry.get("Topics").and_then(|v| v.as_array());
            let flat: &[serde_json::Value] = match &nested {
                Some(inner) => inner.as_slice(),
                None => std::slice::from_ref(entry),
            };
            for item in flat {
                let Some(text) = item.get("Text").and_then(|v| v.as_str()) else {
                    continue;
                };
                let Some(url) = item.get("FirstURL").and_then(|v| v.as_str()) else {
                    continue;
                };
                if text.is_empty() || url.is_empty() {
                    continue;
                }
                let title = text.split(" - ").next().unwrap_or(text);
                hits.push(SourceHit::new(
                    title,
                    url,
                    publisher_for_url(url),
                    classify_source(url),
                    truncate_extract(text),
                ));
            }
        }
    }

    hits
}
