//! Error types for the Evigate pipeline core.
//!
//! Uses `thiserror` for public API error types with structured error variants
//! covering model calls, retrieval tools, structured-output parsing, pipeline
//! state, and configuration domains.

use std::path::PathBuf;

/// Top-level error type for the Evigate core library.
#[derive(Debug, thiserror::Error)]
pub enum EvigateError {
    #[error("Model error: {0}")]
    Model(#[from] ModelError),

    #[error("Tool error: {0}")]
    Tool(#[from] ToolError),

    #[error("Parse error: {0}")]
    Parse(#[from] ParseError),

    #[error("Pipeline error: {0}")]
    Pipeline(#[from] PipelineError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Errors from model backend interactions.
#[derive(Debug, thiserror::Error)]
pub enum ModelError {
    #[error("API request failed: {message}")]
    ApiRequest { message: String },

    #[error("API response parse error: {message}")]
    ResponseParse { message: String },

    #[error("Authentication failed for provider {provider}")]
    AuthFailed { provider: String },

    #[error("Rate limited by provider, retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    #[error("Request timed out after {timeout_secs}s")]
    Timeout { timeout_secs: u64 },

    #[error("Provider connection failed: {message}")]
    Connection { message: String },

    #[error("Provider returned an empty completion for role {role}")]
    EmptyResponse { role: String },

    #[error("Provider not supported: {provider}")]
    UnsupportedProvider { provider: String },
}

impl ModelError {
    /// Transient errors are worth retrying; auth and parse failures are not.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ModelError::RateLimited { .. }
                | ModelError::Connection { .. }
                | ModelError::Timeout { .. }
        )
    }
}

/// Errors from retrieval tool registration and execution.
#[derive(Debug, thiserror::Error)]
pub enum ToolError {
    #[error("Tool not found: {id}")]
    NotFound { id: String },

    #[error("Tool already registered: {id}")]
    AlreadyRegistered { id: String },

    #[error("Invalid query for tool '{id}': {reason}")]
    InvalidQuery { id: String, reason: String },

    #[error("Tool '{id}' request failed: {message}")]
    RequestFailed { id: String, message: String },

    #[error("Tool '{id}' timed out after {timeout_secs}s")]
    Timeout { id: String, timeout_secs: u64 },

    #[error("Tool '{id}' returned an undecodable payload: {message}")]
    Decode { id: String, message: String },
}

impl ToolError {
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ToolError::RequestFailed { .. } | ToolError::Timeout { .. }
        )
    }
}

/// Errors from decoding structured model output into typed artifacts.
///
/// These surface at the model boundary only; pipeline logic downstream of the
/// decode layer never sees raw JSON.
#[derive(Debug, thiserror::Error)]
pub enum ParseError {
    #[error("No JSON object found in model output")]
    NoJsonFound,

    #[error("JSON decode failed: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Missing required field: {field}")]
    MissingField { field: String },

    #[error("Invalid structured output: {reason}")]
    Invalid { reason: String },
}

/// Business-rule failures that terminate a pipeline run.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("Claim mining produced {got} claims, need at least {need}")]
    InsufficientClaims { got: usize, need: usize },

    #[error("No usable claims remain: {total} mined, none with fulfilled evidence")]
    InsufficientEvidence { total: usize },

    #[error("Review loop exhausted after {cycles} revision cycles and {rounds} research rounds")]
    LoopLimitExceeded { cycles: u32, rounds: u32 },

    #[error("Run was cancelled")]
    Cancelled,

    #[error("Invalid phase transition: {from} -> {to}")]
    InvalidTransition { from: String, to: String },

    #[error("Missing run artifact: {what}")]
    MissingArtifact { what: String },
}

/// Errors from the configuration system.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Configuration file not found: {path}")]
    FileNotFound { path: PathBuf },

    #[error("Invalid configuration: {message}")]
    Invalid { message: String },

    #[error("Missing required field: {field}")]
    MissingField { field: String },

    #[error("Environment variable not set: {var}")]
    EnvVarMissing { var: String },

    #[error("Configuration parse error: {message}")]
    ParseError { message: String },
}

/// A type alias for results using the top-level `EvigateError`.
pub type Result<T> = std::result::Result<T, EvigateError>;
