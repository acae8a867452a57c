//! Typed progress events emitted while a run executes.
//!
//! Consumers (CLI, tests) receive events over an unbounded mpsc channel;
//! the stream closes when the run finishes and the last sender drops.
//! Emission never blocks and never fails the pipeline: a dropped receiver
//! just means nobody is watching.

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    /// Phase progress and human-readable state changes.
    Status,
    /// A retrieval tool is about to run.
    ToolCall,
    /// A retrieval tool returned.
    ToolResult,
    /// A model produced output worth surfacing.
    Response,
    /// Something went wrong; the run may still continue.
    Error,
}

/// One progress event from a pipeline stage.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineEvent {
    pub kind: EventKind,
    /// Stage name, e.g. "ClaimMiner" or "TargetedRetriever".
    pub agent: String,
    pub content: String,
    /// Optional structured payload for machine consumers.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
}

impl PipelineEvent {
    pub fn new(kind: EventKind, agent: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            kind,
            agent: agent.into(),
            content: content.into(),
            data: None,
        }
    }

    pub fn with_data(mut self, data: serde_json::Value) -> Self {
        self.data = Some(data);
        self
    }
}

/// Cloneable emitter handed to every pipeline stage.
#[derive(Clone)]
pub struct EventSender {
    tx: Option<mpsc::UnboundedSender<PipelineEvent>>,
}

impl EventSender {
    /// Create a connected sender/receiver pair.
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<PipelineEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx: Some(tx) }, rx)
    }

    /// An emitter that drops everything, for headless runs and tests.
    pub fn disabled() -> Self {
        Self { tx: None }
    }

    pub fn emit(&self, event: PipelineEvent) {
        if let Some(tx) = &self.tx {
            // Receiver gone means nobody is watching; not an error.
            let _ = tx.send(event);
        }
    }

    pub fn status(&self, agent: &str, content: impl Into<String>) {
        self.emit(PipelineEvent::new(EventKind::Status, agent, content));
    }

    pub fn status_with(&self, agent: &str, content: impl Into<String>, data: serde_json::Value) {
        self.emit(PipelineEvent::new(EventKind::Status, agent, content).with_data(data));
    }

    pub fn tool_call(&self, agent: &str, content: impl Into<String>, data: serde_json::Value) {
        self.emit(PipelineEvent::new(EventKind::ToolCall, agent, content).with_data(data));
    }

    pub fn tool_result(&self, agent: &str, content: impl Into<String>, data: serde_json::Value) {
        self.emit(PipelineEvent::new(EventKind::ToolResult, agent, content).with_data(data));
    }

    pub fn response(&self, agent: &str, content: impl Into<String>) {
        self.emit(PipelineEvent::new(EventKind::Response, agent, content));
    }

    pub fn error(&self, agent: &str, content: impl Into<String>) {
        self.emit(PipelineEvent::new(EventKind::Error, agent, content));
    }
}
