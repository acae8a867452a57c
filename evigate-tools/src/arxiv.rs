//! arXiv preprint search through the export API.
//!
//! The API answers with an Atom feed. The feed's shape is fixed and
//! flat, so entries are parsed with plain substring scanning instead of
//! a full XML dependency.

use std::time::Duration;

use async_trait::async_trait;
use evigate_core::claim::SourceClass;
use evigate_core::error::ToolError;
use evigate_core::evidence::SourceHit;
use evigate_core::retrieval::{SearchConstraints, Topic};

use crate::registry::RetrievalTool;
use crate::sources::{apply_constraints, build_client, truncate_extract};

const ID: &str = "arxiv";
const API_BASE: &str = "https://export.arxiv.org/api/query";

#[derive(Default)]
pub struct ArxivTool;

impl ArxivTool {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl RetrievalTool for ArxivTool {
    fn id(&self) -> &str {
        ID
    }

    fn description(&self) -> &str {
        "arXiv preprint search; best for studies, benchmarks, and measurements"
    }

    fn topics(&self) -> &[Topic] {
        &[Topic::Scientific]
    }

    fn timeout(&self) -> Duration {
        Duration::from_secs(20)
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

        let limit = constraints.results_per_query.clamp(1, 20);
        // Fresh-first ordering when the ticket constrains recency.
        let sort_by = if constraints.recency_days.is_some() {
            "submittedDate"
        } else {
            "relevance"
        };
        let url = format!(
            "{API_BASE}?search_query={}&start=0&max_results={limit}&sortBy={sort_by}&sortOrder=descending",
            urlencoding::encode(&format!("all:{query}"))
        );

        let client = build_client(ID, Duration::from_secs(15))?;
        let response = client
            .get(&url)
            .send()
            .await
            .map_err(|e| ToolError::RequestFailed {
                id: ID.to_string(),
                message: format!("search request failed: {e}"),
            })?;
        let status = response.status();
        if !status.is_success() {
            return Err(ToolError::RequestFailed {
                id: ID.to_string(),
                message: format!("arXiv API returned status {status}"),
            });
        }
        let body = response.text().await.map_err(|e| ToolError::Decode {
            id: ID.to_string(),
            message: format!("failed to read response body: {e}"),
        })?;

        Ok(apply_constraints(parse_feed(&body), constraints))
    }
}

fn parse_feed(xml: &str) -> Vec<SourceHit> {
    entry_blocks(xml).into_iter().filter_map(parse_entry).collect()
}

fn parse_entry(entry: &str) -> Option<SourceHit> {
    let abs_url = tag_text(entry, "id")?;
    let title = normalize_whitespace(&tag_text(entry, "title")?);
    let summary = normalize_whitespace(&tag_text(entry, "summary").unwrap_or_default());

    let mut hit = SourceHit::new(
        title,
        abs_url,
        "arXiv",
        SourceClass::Secondary,
        truncate_extract(&summary),
    );
    if let Some(published) = tag_text(entry, "published") {
        hit.date = published.chars().take(10).collect();
    }
    hit.author = authors(entry).join(", ");
    Some(hit)
}

/// Slice out the `<entry>...</entry>` blocks of a feed.
fn entry_blocks(xml: &str) -> Vec<&str> {
    let mut blocks = Vec::new();
    let mut rest = xml;
    while let Some(start) = rest.find("<entry>") {
        let after = &rest[start + "<entry>".len()..];
        let Some(end) = after.find("</entry>") else {
            break;
        };
        blocks.push(&after[..end]);
        rest = &after[end + "</entry>".len()..];
    }
    blocks
}

/// Text content of the first `<tag>...</tag>` pair, entities decoded.
fn tag_text(xml: &str, tag: &str) -> Option<String> {
    let open = format!("<{tag}>");
    let close = format!("</{tag}>");
    let start = xml.find(&open)? + open.len();
    let end = xml[start..].find(&close)? + start;
    let raw = xml[start..end].trim();
    if raw.is_empty() {
        return None;
    }
    Some(
        raw.replace("&amp;", "&")
            .replace("&lt;", "<")
            .replace("&gt;", ">")
            .replace("&quot;", "\"")
            .replace("&#39;", "'"),
    )
}

fn authors(entry: &str) -> Vec<String> {
    let mut names = Vec::new();
    let mut rest = entry;
    while let Some(start) = rest.find("<author>") {
        let after = &rest[start + "<author>".len()..];
        let Some(end) = after.find("</author>") else {
            break;
        };
        if let Some(name) = tag_text(&after[..end], "name") {
            names.push(name);
        }
        rest = &after[end + "</author>".len()..];
    }
    names
}

/// Collapse the hard-wrapped whitespace arXiv puts inside titles and
/// abstracts.
fn normalize_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}
