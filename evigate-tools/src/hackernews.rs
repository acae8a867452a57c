//! Hacker News search through the Algolia index.
//!
//! Serves the community and news topics. The interesting part of a
//! story is usually the linked article, so hits carry the outbound URL
//! and its publisher when one exists; self posts fall back to the
//! discussion page itself.

use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use evigate_core::claim::SourceClass;
use evigate_core::error::ToolError;
use evigate_core::evidence::SourceHit;
use evigate_core::retrieval::{SearchConstraints, Topic};

use crate::registry::RetrievalTool;
use crate::sources::{
    apply_constraints, build_client, classify_source, publisher_for_url, strip_markup,
    truncate_extract,
};

const ID: &str = "hackernews";
const API_BASE: &str = "https://hn.algolia.com/api/v1/search";

#[derive(Default)]
pub struct HackerNewsTool;

impl HackerNewsTool {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl RetrievalTool for HackerNewsTool {
    fn id(&self) -> &str {
        ID
    }

    fn description(&self) -> &str {
        "Hacker News story search; practitioner experience and release chatter"
    }

    fn topics(&self) -> &[Topic] {
        &[Topic::Community, Topic::News]
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

        let limit = constraints.results_per_query.clamp(1, 20);
        let mut url = format!(
            "{API_BASE}?query={}&tags=story&hitsPerPage={limit}",
            urlencoding::encode(query)
        );
        if let Some(days) = constraints.recency_days {
            url.push_str(&format!(
                "&numericFilters={}",
                urlencoding::encode(&recency_filter(days, Utc::now().timestamp()))
            ));
        }

        let client = build_client(ID, Duration::from_secs(10))?;
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

        Ok(apply_constraints(parse_stories(&body), constraints))
    }
}

/// Algolia numeric filter for "created in the last N days".
fn recency_filter(days: u32, now: i64) -> String {
    let cutoff = now - i64::from(days) * 86_400;
    format!("created_at_i>{cutoff}")
}

fn parse_stories(body: &serde_json::Value) -> Vec<SourceHit> {
    let Some(stories) = body.get("hits").and_then(|v| v.as_array()) else {
        return Vec::new();
    };

    let mut hits = Vec::new();
    for story in stories {
        let Some(title) = story.get("title").and_then(|v| v.as_str()) else {
            continue;
        };
        let object_id = story.get("objectID").and_then(|v| v.as_str()).unwrap_or("");
        let linked = story.get("url").and_then(|v| v.as_str()).unwrap_or("");

        let (url, publisher, class) = if linked.is_empty() {
            if object_id.is_empty() {
                continue;
            }
            (
                format!("https://news.ycombinator.com/item?id={object_id}"),
                "Hacker News".to_string(),
                SourceClass::Tertiary,
            )
        } else {
            (
                linked.to_string(),
                publisher_for_url(linked),
                classify_source(linked),
            )
        };

        let points = story.get("points").and_then(|v| v.as_u64()).unwrap_or(0);
        let comments = story
            .get("num_comments")
            .and_then(|v| v.as_u64())
            .unwrap_or(0);
        // Self posts carry their own text; link posts only the vote tally.
        let extract = match story.get("story_text").and_then(|v| v.as_str()) {
            Some(text) if !text.is_empty() => truncate_extract(&strip_markup(text)),
            _ => format!("{points} points and {comments} comments on Hacker News"),
        };

        let mut hit = SourceHit::new(title, url, publisher, class, extract);
        if let Some(author) = story.get("author").and_then(|v| v.as_str()) {
            hit.author = author.to_string();
        }
        if let Some(created) = story.get("created_at").and_then(|v| v.as_str()) {
            hit.date = created.chars().take(10).collect();
        }
        hits.push(hit);
    }
    hits
}
