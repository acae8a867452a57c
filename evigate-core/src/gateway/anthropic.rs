//! Anthropic Messages API backend.
//!
//! Differences from OpenAI-style APIs that matter here:
//! - Auth via `x-api-key` header (not `Authorization: Bearer`)
//! - Required `anthropic-version` header
//! - System prompt is a top-level `system` field, not a message

use crate::config::ModelSlot;
use crate::error::ModelError;
use crate::gateway::{ModelBackend, ModelReply, ModelRequest};
use async_trait::async_trait;
use reqwest::Client;
use serde_json::Value;
use tracing::debug;

const DEFAULT_BASE_URL: &str = "https://api.anthropic.com/v1";

const ANTHROPIC_VERSION: &str = "2023-06-01";

/// Backend for the Anthropic Messages API.
#[derive(Debug)]
pub struct AnthropicBackend {
    client: Client,
    base_url: String,
    api_key: String,
    model: String,
    max_tokens: usize,
    temperature: f32,
}

impl AnthropicBackend {
    /// Create a backend from a configured slot.
    ///
    /// Reads the API key from the environment variable named in
    /// `slot.api_key_env`; returns `ModelError::AuthFailed` if unset.
    pub fn new(slot: &ModelSlot) -> Result<Self, ModelError> {
        let api_key = std::env::var(&slot.api_key_env).map_err(|_| ModelError::AuthFailed {
            provider: format!("anthropic (env var '{}' not set)", slot.api_key_env),
        })?;
        Ok(Self::new_with_key(slot, api_key))
    }

    /// Create a backend with an explicitly provided API key.
    pub fn new_with_key(slot: &ModelSlot, api_key: String) -> Self {
        let base_url = slot
            .base_url
            .clone()
            .unwrap_or_else(|| DEFAULT_BASE_URL.to_string());

        Self {
            client: Client::new(),
            base_url,
            api_key,
            model: slot.model.clone(),
            max_tokens: slot.max_tokens,
            temperature: slot.temperature,
        }
    }

    fn build_request_body(&self, request: &ModelRequest) -> Value {
        let max_tokens = request.max_tokens.unwrap_or(self.max_tokens);
        let temperature = request.temperature.unwrap_or(self.temperature);

        serde_json::json!({
            "model": self.model,
            "max_tokens": max_tokens,
            "temperature": temperature,
            "system": request.system,
            "messages": [{
                "role": "user",
                "content": request.user,
            }],
        })
    }

    /// Parse a Messages API response, concatenating all text blocks.
    fn parse_response(&self, body: &Value) -> Result<ModelReply, ModelError> {
        let blocks = body["content"]
            .as_array()
            .ok_or_else(|| ModelError::ResponseParse {
                message: "Missing 'content' array in response".to_string(),
            })?;

        let mut text = String::new();
        for block in blocks {
            if block["type"].as_str().unwrap_or("text") == "text" {
                text.push_str(block["text"].as_str().unwrap_or(""));
            } else {
                debug!(
                    block_type = block["type"].as_str().unwrap_or("?"),
                    "Ignoring non-text content block"
                );
            }
        }

        Ok(ModelReply {
            text,
            model: body["model"].as_str().unwrap_or(&self.model).to_string(),
            input_tokens: body["usage"]["input_tokens"].as_u64().unwrap_or(0) as usize,
            output_tokens: body["usage"]["output_tokens"].as_u64().unwrap_or(0) as usize,
        })
    }

    fn map_http_error(status: reqwest::StatusCode, body_text: &str) -> ModelError {
        match status.as_u16() {
            401 | 403 => ModelError::AuthFailed {
                provider: "anthropic".to_string(),
            },
            429 => {
                // Prefer a server-provided delay when the body carries one.
                let retry_after = serde_json::from_str::<Value>(body_text)
                    .ok()
                    .and_then(|v| v["error"]["retry_after_secs"].as_u64())
                    .unwrap_or(30);
                ModelError::RateLimited {
                    retry_after_secs: retry_after,
                }
            }
            _ => ModelError::ApiRequest {
                message: format!("HTTP {} from Anthropic API: {}", status, body_text),
            },
        }
    }
}

#[async_trait]
impl ModelBackend for AnthropicBackend {
    async fn complete(&self, request: &ModelRequest) -> Result<ModelReply, ModelError> {
        let body = self.build_request_body(request);
        let url = format!("{}/messages", self.base_url);

        debug!(
            model = self.model.as_str(),
            url = url.as_str(),
            "Sending Anthropic completion request"
        );

        let response = self
            .client
            .post(&url)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .header("content-type", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(|e| ModelError::Connection {
                message: format!("Request to Anthropic API failed: {}", e),
            })?;

        let status = response.status();
        let body_text = response
            .text()
            .await
            .map_err(|e| ModelError::ResponseParse {
                message: format!("Failed to read response body: {}", e),
            })?;

        if !status.is_success() {
            return Err(Self::map_http_error(status, &body_text));
        }

        let response_json: Value =
            serde_json::from_str(&body_text).map_err(|e| ModelError::ResponseParse {
                message: format!("Invalid JSON in response: {}", e),
            })?;

        self.parse_response(&response_json)
    }

    fn model_name(&self) -> &str {
        &self.model
    }
}
