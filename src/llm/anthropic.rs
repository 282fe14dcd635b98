//! Anthropic Messages API provider implementation

use super::types::{LlmRequest, LlmResponse, Role, Usage};
use super::{LlmError, LlmService};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;

const DEFAULT_BASE_URL: &str = "https://api.anthropic.com/v1";
const API_VERSION: &str = "2023-06-01";

/// Anthropic service implementation
pub struct AnthropicService {
    client: Client,
    api_key: String,
    model: String,
    url: String,
}

impl AnthropicService {
    pub fn new(
        api_key: String,
        model: String,
        base_url: Option<&str>,
        timeout: Duration,
    ) -> Result<Self, LlmError> {
        let base = base_url.unwrap_or(DEFAULT_BASE_URL).trim_end_matches('/');
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| LlmError::network(format!("Failed to create HTTP client: {e}")))?;

        Ok(Self {
            client,
            api_key,
            model,
            url: format!("{base}/messages"),
        })
    }

    fn translate_request(&self, request: &LlmRequest) -> AnthropicRequest {
        let messages = request
            .dialogue()
            .into_iter()
            .map(|turn| AnthropicMessage {
                role: match turn.role {
                    Role::Assistant => "assistant",
                    Role::User | Role::System => "user",
                },
                content: turn.text,
            })
            .collect();

        AnthropicRequest {
            model: self.model.clone(),
            max_tokens: request.params.max_tokens,
            system: request.system_text(),
            messages,
        }
    }
}

pub(super) fn normalize_response(resp: AnthropicResponse) -> Result<LlmResponse, LlmError> {
    if resp.stop_reason.as_deref() == Some("refusal") {
        return Err(LlmError::blocked("Anthropic refused to answer (stop_reason=refusal)"));
    }

    let text = resp
        .content
        .into_iter()
        .filter_map(|block| match block {
            AnthropicContentBlock::Text { text } => Some(text),
            AnthropicContentBlock::Other => None,
        })
        .collect::<Vec<_>>()
        .join("");

    if text.trim().is_empty() {
        return Err(LlmError::empty(format!(
            "Anthropic returned no text (stop_reason={})",
            resp.stop_reason.as_deref().unwrap_or("none")
        )));
    }

    Ok(LlmResponse {
        text,
        usage: Usage {
            input_tokens: resp.usage.input_tokens,
            output_tokens: resp.usage.output_tokens,
        },
    })
}

fn error_detail(body: &str) -> String {
    serde_json::from_str::<AnthropicErrorResponse>(body)
        .map_or_else(|_| body.to_string(), |e| e.error.message)
}

#[async_trait]
impl LlmService for AnthropicService {
    async fn complete(&self, request: &LlmRequest) -> Result<LlmResponse, LlmError> {
        let anthropic_request = self.translate_request(request);

        let response = self
            .client
            .post(&self.url)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", API_VERSION)
            .header("content-type", "application/json")
            .json(&anthropic_request)
            .send()
            .await
            .map_err(|e| LlmError::from_transport(&e))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| LlmError::network(format!("Failed to read response: {e}")))?;

        if !status.is_success() {
            return Err(LlmError::from_status(status, &error_detail(&body)));
        }

        let anthropic_response: AnthropicResponse = serde_json::from_str(&body)
            .map_err(|e| LlmError::malformed(format!("Failed to parse response: {e} - body: {body}")))?;

        normalize_response(anthropic_response)
    }

    fn model_id(&self) -> &str {
        &self.model
    }
}

// Anthropic API types

#[derive(Debug, Serialize)]
struct AnthropicRequest {
    model: String,
    max_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<String>,
    messages: Vec<AnthropicMessage>,
}

#[derive(Debug, Serialize)]
struct AnthropicMessage {
    role: &'static str,
    content: String,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub(super) enum AnthropicContentBlock {
    Text { text: String },
    #[serde(other)]
    Other,
}

#[derive(Debug, Deserialize)]
pub(super) struct AnthropicResponse {
    pub content: Vec<AnthropicContentBlock>,
    pub stop_reason: Option<String>,
    #[serde(default)]
    pub usage: AnthropicUsage,
}

#[derive(Debug, Default, Deserialize)]
pub(super) struct AnthropicUsage {
    #[serde(default)]
    pub input_tokens: u64,
    #[serde(default)]
    pub output_tokens: u64,
}

#[derive(Debug, Deserialize)]
struct AnthropicErrorResponse {
    error: AnthropicErrorBody,
}

#[derive(Debug, Deserialize)]
struct AnthropicErrorBody {
    message: String,
}
