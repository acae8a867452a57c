//! OpenAI Chat Completions backend.
//!
//! Also serves OpenAI-compatible servers via the slot's `base_url`
//! override, which is why the request body sticks to the widely
//! implemented subset of the API.

use crate::config::ModelSlot;
use crate::error::ModelError;
use crate::gateway::{ModelBackend, ModelReply, ModelRequest};
use async_trait::async_trait;
use reqwest::Client;
use serde_json::{Value, json};
use tracing::debug;

const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";

/// Backend for the OpenAI Chat Completions API.
#[derive(Debug)]
pub struct OpenAiBackend {
    client: Client,
    base_url: String,
    api_key: String,
    model: String,
    max_tokens: usize,
    temperature: f32,
}

impl OpenAiBackend {
    /// Create a backend from a configured slot.
    ///
    /// Reads the API key from the environment variable named in
    /// `slot.api_key_env`; returns `ModelError::AuthFailed` if unset.
    pub fn new(slot: &ModelSlot) -> Result<Self, ModelError> {
        let api_key = std::env::var(&slot.api_key_env).map_err(|_| ModelError::AuthFailed {
            provider: format!("openai (env var '{}' not set)", slot.api_key_env),
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
        json!({
            "model": self.model,
            "messages": [
                {"role": "system", "content": request.system},
                {"role": "user", "content": request.user},
            ],
            "max_tokens": request.max_tokens.unwrap_or(self.max_tokens),
            "temperature": request.temperature.unwrap_or(self.temperature),
            "stream": false,
        })
    }

    fn parse_response(&self, body: &Value) -> Result<ModelReply, ModelError> {
        let choice = body
            .get("choices")
            .and_then(|c| c.get(0))
            .ok_or_else(|| ModelError::ResponseParse {
                message: "No choices in response".to_string(),
            })?;

        let message = choice.get("message").ok_or_else(|| ModelError::ResponseParse {
            message: "No message in choice".to_string(),
        })?;

        let text = message
            .get("content")
            .and_then(|c| c.as_str())
            .unwrap_or("")
            .to_string();

        Ok(ModelReply {
            text,
            model: body["model"].as_str().unwrap_or(&self.model).to_string(),
            input_tokens: body["usage"]["prompt_tokens"].as_u64().unwrap_or(0) as usize,
            output_tokens: body["usage"]["completion_tokens"].as_u64().unwrap_or(0) as usize,
        })
    }

    fn map_http_error(status: reqwest::StatusCode, body: &str) -> ModelError {
        match status.as_u16() {
            401 | 403 => {
                debug!(body = %body, "Authentication failed");
                ModelError::AuthFailed {
                    provider: "openai".to_string(),
                }
            }
            429 => {
                // OpenAI reports the delay inside the error message,
                // e.g. "Rate limit reached ... try again in 20s".
                let retry_after = serde_json::from_str::<Value>(body)
                    .ok()
                    .and_then(|v| {
                        v.get("error")?
                            .get("message")?
                            .as_str()
                            .map(|s| s.to_string())
                    })
                    .and_then(|msg| {
                        msg.split("in ")
                            .nth(1)
                            .and_then(|rest| rest.split('s').next())
                            .and_then(|num| num.trim().parse::<u64>().ok())
                    })
                    .unwrap_or(30);
                ModelError::RateLimited {
                    retry_after_secs: retry_after,
                }
            }
            _ => ModelError::ApiRequest {
                message: format!("HTTP {} from OpenAI API: {}", status, body),
            },
        }
    }
}

#[async_trait]
impl ModelBackend for OpenAiBackend {
    async fn complete(&self, request: &ModelRequest) -> Result<ModelReply, ModelError> {
        let body = self.build_request_body(request);
        let url = format!("{}/chat/completions", self.base_url);

        debug!(
            model = self.model.as_str(),
            url = url.as_str(),
            "Sending OpenAI completion request"
        );

        let response = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(|e| ModelError::Connection {
                message: format!("Request to OpenAI API failed: {}", e),
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

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn make_slot() -> ModelSlot {
        ModelSlot {
            provider: "openai".to_string(),
            model: "gpt-5-mini".to_string(),
            api_key_env: "EVIGATE_TEST_OPENAI_KEY_UNSET".to_string(),
            base_url: None,
            max_tokens: 8192,
            temperature: 0.4,
        }
    }

    #[test]
    fn test_missing_api_key_is_auth_failure() {
        let err = OpenAiBackend::new(&make_slot()).unwrap_err();
        assert!(matches!(err, ModelError::AuthFailed { .. }));
    }

    #[test]
    fn test_request_body_uses_chat_message_roles() {
        let backend = OpenAiBackend::new_with_key(&make_slot(), "sk-test".to_string());
        let request = ModelRequest::new("You are a writer.", "Draft the section.");
        let body = backend.build_request_body(&request);

        assert_eq!(body["model"], "gpt-5-mini");
        assert_eq!(body["messages"][0]["role"], "system");
        assert_eq!(body["messages"][0]["content"], "You are a writer.");
        assert_eq!(body["messages"][1]["role"], "user");
        assert_eq!(body["stream"], false);
    }

    #[test]
    fn test_parse_response_extracts_choice_content() {
        let backend = OpenAiBackend::new_with_key(&make_slot(), "sk-test".to_string());
        let body = serde_json::json!({
            "model": "gpt-5-mini",
            "choices": [
                {"message": {"role": "assistant", "content": "Drafted text."}, "finish_reason": "stop"},
            ],
            "usage": {"prompt_tokens": 200, "completion_tokens": 80},
        });

        let reply = backend.parse_response(&body).unwrap();
        assert_eq!(reply.text, "Drafted text.");
        assert_eq!(reply.input_tokens, 200);
        assert_eq!(reply.output_tokens, 80);
    }

    #[test]
    fn test_parse_response_without_choices_fails() {
        let backend = OpenAiBackend::new_with_key(&make_slot(), "sk-test".to_string());
        let body = serde_json::json!({"model": "gpt-5-mini", "choices": []});
        let err = backend.parse_response(&body).unwrap_err();
        assert!(matches!(err, ModelError::ResponseParse { .. }));
    }

    #[test]
    fn test_map_http_error_parses_retry_delay_from_message() {
        let body = r#"{"error": {"message": "Rate limit reached, please try again in 20s."}}"#;
        let err = OpenAiBackend::map_http_error(reqwest::StatusCode::TOO_MANY_REQUESTS, body);
        assert!(matches!(err, ModelError::RateLimited { retry_after_secs: 20 }));

        let err = OpenAiBackend::map_http_error(reqwest::StatusCode::TOO_MANY_REQUESTS, "{}");
        assert!(matches!(err, ModelError::RateLimited { retry_after_secs: 30 }));
    }
}
