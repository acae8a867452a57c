//! # Evigate Tools
//!
//! Retrieval tool implementations for the Evigate pipeline: web search,
//! Wikipedia, arXiv, and Hacker News, plus the registry that routes
//! topic-tagged queries to them and enforces per-call timeouts.
//!
//! The registry implements `evigate_core::retrieval::ToolDispatch`, so
//! wiring it into the pipeline is one `Arc::new`.

pub mod arxiv;
pub mod hackernews;
pub mod registry;
pub mod sources;
pub mod web;
pub mod wikipedia;

pub use registry::{RetrievalTool, ToolRegistry};

use std::sync::Arc;

/// Register the built-in tool set. Registration order is dispatch
/// order: specialists first, general web search as the fallback every
/// topic can reach.
pub fn register_builtin_tools(registry: &mut ToolRegistry) {
    let tools: Vec<Arc<dyn RetrievalTool>> = vec![
        Arc::new(arxiv::ArxivTool::new()),
        Arc::new(wikipedia::WikipediaTool::new()),
        Arc::new(hackernews::HackerNewsTool::new()),
        Arc::new(web::DuckDuckGoTool::new()),
    ];
    for tool in tools {
        if let Err(e) = registry.register(tool) {
            tracing::warn!("Failed to register built-in tool: {e}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use evigate_core::retrieval::Topic;

    #[test]
    fn test_register_all_builtin_tools() {
        let mut registry = ToolRegistry::new();
        register_builtin_tools(&mut registry);
        assert_eq!(registry.len(), 4);
        let names = registry.names();
        for expected in ["arxiv", "wikipedia", "hackernews", "web_search"] {
            assert!(names.contains(&expected.to_string()), "missing {expected}");
        }
    }

    #[test]
    fn test_every_topic_is_served() {
        let mut registry = ToolRegistry::new();
        register_builtin_tools(&mut registry);
        for topic in [
            Topic::Scientific,
            Topic::News,
            Topic::Community,
            Topic::Encyclopedia,
            Topic::General,
        ] {
            assert!(
                !registry.tools_for_topic(topic).is_empty(),
                "no tool serves {topic}"
            );
        }
    }

    #[test]
    fn test_specialists_rank_before_fallback() {
        let mut registry = ToolRegistry::new();
        register_builtin_tools(&mut registry);

        let scientific = registry.tools_for_topic(Topic::Scientific);
        assert_eq!(scientific[0].id(), "arxiv");
        assert_eq!(scientific.last().map(|t| t.id()), Some("web_search"));

        let news = registry.tools_for_topic(Topic::News);
        assert_eq!(news[0].id(), "hackernews");
    }
}
