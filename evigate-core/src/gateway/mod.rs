//! Model access layer: role-addressed slots over provider backends.
//!
//! Pipeline stages never talk to a provider directly. Each stage addresses
//! a [`Role`] slot and the gateway resolves it to a configured backend,
//! applies the per-request timeout, retries transient failures with
//! exponential backoff, and truncates oversized replies at a sentence
//! boundary so downstream parsing stays bounded.

pub mod anthropic;
pub mod openai;

use crate::config::{ModelSlot, ModelTier, ModelsConfig, RetryConfig};
use crate::error::ModelError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

pub use anthropic::AnthropicBackend;
pub use openai::OpenAiBackend;

/// Pipeline roles that consume model completions.
///
/// Each role maps to a premium/budget slot pair in [`ModelsConfig`], so a
/// run can mix tiers per role (e.g., premium writer, budget reviewer).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    /// Question normalization, claim mining, and retrieval planning.
    Miner,
    /// Source paraphrasing, rating, and conflict detection.
    Rater,
    /// Drafting and revision.
    Writer,
    /// Editorial audit of drafts.
    Reviewer,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Miner => "miner",
            Role::Rater => "rater",
            Role::Writer => "writer",
            Role::Reviewer => "reviewer",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single-turn completion request: one system prompt, one user prompt.
///
/// The pipeline is deliberately stateless at the model boundary; every
/// stage assembles its full context into one request.
#[derive(Debug, Clone)]
pub struct ModelRequest {
    pub system: String,
    pub user: String,
    /// Override for the slot's configured max tokens.
    pub max_tokens: Option<usize>,
    /// Override for the slot's configured temperature.
    pub temperature: Option<f32>,
}

impl ModelRequest {
    pub fn new(system: impl Into<String>, user: impl Into<String>) -> Self {
        Self {
            system: system.into(),
            user: user.into(),
            max_tokens: None,
            temperature: None,
        }
    }

    pub fn with_max_tokens(mut self, max_tokens: usize) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }
}

/// A completed model reply with token accounting for run diagnostics.
#[derive(Debug, Clone)]
pub struct ModelReply {
    pub text: String,
    pub model: String,
    pub input_tokens: usize,
    pub output_tokens: usize,
}

impl ModelReply {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            model: "unknown".to_string(),
            input_tokens: 0,
            output_tokens: 0,
        }
    }
}

/// Trait for provider backends that perform completions.
#[async_trait]
pub trait ModelBackend: Send + Sync + fmt::Debug {
    /// Perform a full completion and return the reply.
    async fn complete(&self, request: &ModelRequest) -> Result<ModelReply, ModelError>;

    /// Return the model identifier this backend targets.
    fn model_name(&self) -> &str;
}

/// Build a backend for a configured slot.
///
/// Reads the API key from the environment variable the slot names;
/// returns `ModelError::AuthFailed` if it is not set.
pub fn backend_for_slot(slot: &ModelSlot) -> Result<Arc<dyn ModelBackend>, ModelError> {
    match slot.provider.as_str() {
        "anthropic" => Ok(Arc::new(AnthropicBackend::new(slot)?)),
        "openai" => Ok(Arc::new(OpenAiBackend::new(slot)?)),
        other => Err(ModelError::UnsupportedProvider {
            provider: other.to_string(),
        }),
    }
}

/// Role-addressed dispatch over configured backends.
pub struct ModelGateway {
    slots: HashMap<(Role, ModelTier), Arc<dyn ModelBackend>>,
    retry: RetryConfig,
    request_timeout: Duration,
    max_response_chars: usize,
}

impl ModelGateway {
    /// Build the gateway from configuration, instantiating one backend per
    /// role and tier. Fails fast if any referenced API key is missing.
    pub fn from_config(config: &ModelsConfig) -> Result<Self, ModelError> {
        let mut slots: HashMap<(Role, ModelTier), Arc<dyn ModelBackend>> = HashMap::new();
        let roles = [
            (Role::Miner, &config.miner),
            (Role::Rater, &config.rater),
            (Role::Writer, &config.writer),
            (Role::Reviewer, &config.reviewer),
        ];
        for (role, models) in roles {
            slots.insert((role, ModelTier::Premium), backend_for_slot(&models.premium)?);
            slots.insert((role, ModelTier::Budget), backend_for_slot(&models.budget)?);
        }

        Ok(Self {
            slots,
            retry: config.retry.clone(),
            request_timeout: Duration::from_secs(config.request_timeout_secs),
            max_response_chars: config.max_response_chars,
        })
    }

    /// Route every role and tier to the same backend.
    ///
    /// Intended for tests and dry runs with a scripted [`MockBackend`].
    pub fn single(backend: Arc<dyn ModelBackend>) -> Self {
        let mut gateway = Self {
            slots: HashMap::new(),
            retry: RetryConfig::default(),
            request_timeout: Duration::from_secs(120),
            max_response_chars: 60_000,
        };
        for role in [Role::Miner, Role::Rater, Role::Writer, Role::Reviewer] {
            for tier in [ModelTier::Premium, ModelTier::Budget] {
                gateway.slots.insert((role, tier), Arc::clone(&backend));
            }
        }
        gateway
    }

    /// Replace the backend for one role and tier.
    pub fn insert_backend(&mut self, role: Role, tier: ModelTier, backend: Arc<dyn ModelBackend>) {
        self.slots.insert((role, tier), backend);
    }

    pub fn with_retry_config(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_timeout_secs(mut self, secs: u64) -> Self {
        self.request_timeout = Duration::from_secs(secs);
        self
    }

    pub fn with_max_response_chars(mut self, max_response_chars: usize) -> Self {
        self.max_response_chars = max_response_chars;
        self
    }

    /// Return the model name serving a role at a tier, if configured.
    pub fn model_for(&self, role: Role, tier: ModelTier) -> Option<&str> {
        self.slots.get(&(role, tier)).map(|b| b.model_name())
    }

    /// Perform a completion for a role, with timeout, retry, and reply
    /// truncation applied.
    pub async fn complete(
        &self,
        role: Role,
        tier: ModelTier,
        request: &ModelRequest,
    ) -> Result<ModelReply, ModelError> {
        let backend = self.slots.get(&(role, tier)).ok_or_else(|| ModelError::ApiRequest {
            message: format!("no backend configured for role '{role}' at tier '{tier}'"),
        })?;

        tracing::debug!(
            role = %role,
            tier = %tier,
            model = backend.model_name(),
            "Dispatching completion"
        );

        let reply = with_retry(&self.retry, || {
            let request = request.clone();
            async move {
                match tokio::time::timeout(self.request_timeout, backend.complete(&request)).await {
                    Ok(result) => result,
                    Err(_) => Err(ModelError::Timeout {
                        timeout_secs: self.request_timeout.as_secs(),
                    }),
                }
            }
        })
        .await?;

        if reply.text.trim().is_empty() {
            return Err(ModelError::EmptyResponse {
                role: role.as_str().to_string(),
            });
        }

        let text = truncate_response(&reply.text, self.max_response_chars);
        Ok(ModelReply { text, ..reply })
    }
}

/// Execute an operation with retry and exponential backoff.
///
/// Only errors classified retryable by `ModelError::is_retryable` are
/// retried; everything else propagates immediately.
pub async fn with_retry<F, Fut, T>(config: &RetryConfig, mut operation: F) -> Result<T, ModelError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, ModelError>>,
{
    let mut attempt: u32 = 0;
    loop {
        match operation().await {
            Ok(value) => return Ok(value),
            Err(e) if e.is_retryable() && attempt < config.max_retries => {
                let backoff_ms = compute_backoff(config, attempt, &e);
                tracing::warn!(
                    attempt = attempt + 1,
                    max_retries = config.max_retries,
                    backoff_ms,
                    error = %e,
                    "Model request failed, retrying"
                );
                tokio::time::sleep(Duration::from_millis(backoff_ms)).await;
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}

/// Compute the backoff for a retry attempt.
///
/// A rate-limit error with a server-provided delay takes precedence over
/// the computed exponential backoff when it is longer.
fn compute_backoff(config: &RetryConfig, attempt: u32, error: &ModelError) -> u64 {
    let exponential = compute_exponential_backoff(config, attempt);
    if let ModelError::RateLimited { retry_after_secs } = error {
        (retry_after_secs * 1000).max(exponential)
    } else {
        exponential
    }
}

fn compute_exponential_backoff(config: &RetryConfig, attempt: u32) -> u64 {
    let exponential =
        config.initial_backoff_ms as f64 * config.backoff_multiplier.powi(attempt as i32);
    let capped = exponential.min(config.max_backoff_ms as f64);

    if config.jitter {
        // 75%..125% of the computed backoff.
        let jitter_factor = 0.75 + 0.5 * rand_simple();
        (capped * jitter_factor) as u64
    } else {
        capped as u64
    }
}

/// Cheap 0.0..1.0 pseudo-random value from the clock; good enough for
/// backoff jitter without pulling in a dependency.
fn rand_simple() -> f64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.subsec_nanos())
        .unwrap_or(0);
    (nanos % 1000) as f64 / 1000.0
}

/// Truncate an oversized reply at a sentence boundary.
///
/// Keeps up to `max_chars` characters, preferring to cut after the last
/// sentence terminator past the halfway point, and appends a marker so
/// callers can tell the reply was shortened.
pub fn truncate_response(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }

    let window: String = text.chars().take(max_chars).collect();
    let boundary = window
        .char_indices()
        .filter(|(_, c)| matches!(c, '.' | '!' | '?'))
        .map(|(i, c)| i + c.len_utf8())
        .next_back()
        .filter(|&end| end > window.len() / 2);

    let kept = match boundary {
        Some(end) => &window[..end],
        None => window.as_str(),
    };
    format!("{}\n[truncated]", kept.trim_end())
}

/// Scripted backend for tests.
///
/// Returns queued replies in order and records every request it sees.
/// When the queue runs dry it falls back to a canned reply so tests that
/// only care about earlier calls keep working.
#[derive(Debug)]
pub struct MockBackend {
    model: String,
    replies: std::sync::Mutex<Vec<Result<ModelReply, ModelError>>>,
    requests: std::sync::Mutex<Vec<ModelRequest>>,
}

impl MockBackend {
    pub fn new() -> Self {
        Self {
            model: "mock-model".to_string(),
            replies: std::sync::Mutex::new(Vec::new()),
            requests: std::sync::Mutex::new(Vec::new()),
        }
    }

    /// Create a MockBackend that always returns the given text.
    ///
    /// Queues multiple copies so it can serve repeated calls.
    pub fn with_response(text: &str) -> Self {
        let backend = Self::new();
        for _ in 0..20 {
            backend.queue_text(text);
        }
        backend
    }

    /// Queue a text reply for the next `complete` call.
    pub fn queue_text(&self, text: &str) {
        self.queue_reply(ModelReply {
            text: text.to_string(),
            model: "mock-model".to_string(),
            input_tokens: 100,
            output_tokens: 50,
        });
    }

    /// Queue a full reply for the next `complete` call.
    pub fn queue_reply(&self, reply: ModelReply) {
        self.replies.lock().unwrap().push(Ok(reply));
    }

    /// Queue a failure for the next `complete` call.
    pub fn queue_failure(&self, error: ModelError) {
        self.replies.lock().unwrap().push(Err(error));
    }

    /// Requests seen so far, in call order.
    pub fn requests(&self) -> Vec<ModelRequest> {
        self.requests.lock().unwrap().clone()
    }

    /// Number of `complete` calls served.
    pub fn call_count(&self) -> usize {
        self.requests.lock().unwrap().len()
    }
}

impl Default for MockBackend {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ModelBackend for MockBackend {
    async fn complete(&self, request: &ModelRequest) -> Result<ModelReply, ModelError> {
        self.requests.lock().unwrap().push(request.clone());
        let mut replies = self.replies.lock().unwrap();
        if replies.is_empty() {
            Ok(ModelReply::text("mock backend: no queued replies"))
        } else {
            replies.remove(0)
        }
    }

    fn model_name(&self) -> &str {
        &self.model
    }
}
