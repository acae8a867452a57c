//! Tool registry: registration, topic routing, and timeout-guarded
//! dispatch.
//!
//! The registry implements [`ToolDispatch`], which is the seam the
//! retrieval engine in evigate-core calls through. Routing is ordered:
//! tools registered earlier are tried first, and tools serving
//! [`Topic::General`] act as fallback for every specialist topic. A
//! failing tool is logged and skipped; its error only surfaces when no
//! candidate produced a single hit.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use evigate_core::error::ToolError;
use evigate_core::evidence::SourceHit;
use evigate_core::retrieval::{SearchConstraints, ToolDispatch, Topic};
use tracing::{debug, warn};

const DEFAULT_TIMEOUT_SECS: u64 = 20;

/// A search backend that serves one or more topics.
#[async_trait]
pub trait RetrievalTool: Send + Sync {
    /// Unique identifier, used in logs and error values.
    fn id(&self) -> &str;

    /// One-sentence description of what the tool is good for.
    fn description(&self) -> &str;

    /// Topics this tool serves. Listing [`Topic::General`] makes the
    /// tool a fallback candidate for every topic.
    fn topics(&self) -> &[Topic];

    /// Upper bound for one search call, enforced by the registry.
    fn timeout(&self) -> Duration {
        Duration::from_secs(DEFAULT_TIMEOUT_SECS)
    }

    /// Run the query and return normalized hits. An empty vec is a valid
    /// answer and means "nothing found", not failure.
    async fn search(
        &self,
        query: &str,
        constraints: &SearchConstraints,
    ) -> Result<Vec<SourceHit>, ToolError>;
}

/// Ordered collection of retrieval tools.
pub struct ToolRegistry {
    tools: Vec<Arc<dyn RetrievalTool>>,
    timeout_override: Option<Duration>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self {
            tools: Vec::new(),
            timeout_override: None,
        }
    }

    /// Registry that applies one configured timeout to every tool call
    /// instead of each tool's own default.
    pub fn with_timeout(secs: u64) -> Self {
        Self {
            tools: Vec::new(),
            timeout_override: Some(Duration::from_secs(secs)),
        }
    }

    pub fn register(&mut self, tool: Arc<dyn RetrievalTool>) -> Result<(), ToolError> {
        if self.tools.iter().any(|t| t.id() == tool.id()) {
            return Err(ToolError::AlreadyRegistered {
                id: tool.id().to_string(),
            });
        }
        debug!(tool = tool.id(), topics = ?tool.topics(), "Registered retrieval tool");
        self.tools.push(tool);
        Ok(())
    }

    pub fn get(&self, id: &str) -> Option<Arc<dyn RetrievalTool>> {
        self.tools.iter().find(|t| t.id() == id).cloned()
    }

    pub fn names(&self) -> Vec<String> {
        self.tools.iter().map(|t| t.id().to_string()).collect()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// Candidate tools for a topic, in dispatch order: specialists in
    /// registration order, then General-topic tools not already listed.
    pub fn tools_for_topic(&self, topic: Topic) -> Vec<Arc<dyn RetrievalTool>> {
        let mut out: Vec<Arc<dyn RetrievalTool>> = self
            .tools
            .iter()
            .filter(|t| t.topics().contains(&topic))
            .cloned()
            .collect();
        if topic != Topic::General {
            for tool in &self.tools {
                if tool.topics().contains(&Topic::General)
                    && !out.iter().any(|t| t.id() == tool.id())
                {
                    out.push(Arc::clone(tool));
                }
            }
        }
        out
    }

    fn effective_timeout(&self, tool: &dyn RetrievalTool) -> Duration {
        self.timeout_override.unwrap_or_else(|| tool.timeout())
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ToolDispatch for ToolRegistry {
    async fn search(
        &self,
        topic: Topic,
        query: &str,
        constraints: &SearchConstraints,
    ) -> Result<Vec<SourceHit>, ToolError> {
        let candidates = self.tools_for_topic(topic);
        if candidates.is_empty() {
            return Err(ToolError::NotFound {
                id: format!("topic:{topic}"),
            });
        }

        let mut last_error = None;
        for tool in candidates {
            let timeout = self.effective_timeout(tool.as_ref());
            let outcome = match tokio::time::timeout(timeout, tool.search(query, constraints)).await
            {
                Ok(result) => result,
                Err(_) => Err(ToolError::Timeout {
                    id: tool.id().to_string(),
                    timeout_secs: timeout.as_secs(),
                }),
            };
            match outcome {
                Ok(hits) if !hits.is_empty() => {
                    debug!(tool = tool.id(), query, count = hits.len(), "Search succeeded");
                    return Ok(hits);
                }
                Ok(_) => {
                    debug!(tool = tool.id(), query, "Tool returned no hits, trying next");
                }
                Err(e) => {
                    warn!(tool = tool.id(), query, error = %e, "Tool search failed, trying next");
                    last_error = Some(e);
                }
            }
        }

        // Every candidate came back empty or failed. An all-empty outcome
        // is a legitimate no-results answer; a failure is worth reporting
        // so the caller's retry policy can kick in.
        match last_error {
            Some(e) => Err(e),
            None => Ok(Vec::new()),
        }
    }
}
