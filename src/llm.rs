//! Completion providers behind one trait
//!
//! Anthropic, OpenAI-compatible and Gemini backends all take the same ordered
//! turn list and return plain reply text.

mod anthropic;
mod error;
mod gemini;
mod openai;
mod registry;
mod types;

pub use anthropic::AnthropicService;
pub use error::{LlmError, LlmErrorKind};
pub use gemini::GeminiService;
pub use openai::OpenAIService;
pub use registry::{create_service, LlmConfig, Provider};
pub use types::*;

use async_trait::async_trait;
use std::sync::Arc;

/// A chat-completion backend
#[async_trait]
pub trait LlmService: Send + Sync {
    /// Send the ordered turns and return the reply text
    async fn complete(&self, request: &LlmRequest) -> Result<LlmResponse, LlmError>;

    /// Get the model ID
    fn model_id(&self) -> &str;
}

/// Decorator that records latency, token usage and failure class of every call
pub struct LoggingService {
    inner: Arc<dyn LlmService>,
    model_id: String,
}

impl LoggingService {
    pub fn new(inner: Arc<dyn LlmService>) -> Self {
        let model_id = inner.model_id().to_string();
        Self { inner, model_id }
    }
}

#[async_trait]
impl LlmService for LoggingService {
    async fn complete(&self, request: &LlmRequest) -> Result<LlmResponse, LlmError> {
        let started = tokio::time::Instant::now();
        let outcome = self.inner.complete(request).await;
        let elapsed_ms = started.elapsed().as_millis();

        match &outcome {
            Ok(response) => tracing::info!(
                model = %self.model_id,
                elapsed_ms = %elapsed_ms,
                turns = request.turns.len(),
                max_tokens = request.params.max_tokens,
                input_tokens = response.usage.input_tokens,
                output_tokens = response.usage.output_tokens,
                "Completion succeeded"
            ),
            // Retryable kinds log at warn
            Err(e) if e.kind.is_retryable() => tracing::warn!(
                model = %self.model_id,
                elapsed_ms = %elapsed_ms,
                kind = e.kind.as_str(),
                error = %e.message,
                "Completion failed (transient)"
            ),
            Err(e) => tracing::error!(
                model = %self.model_id,
                elapsed_ms = %elapsed_ms,
                kind = e.kind.as_str(),
                error = %e.message,
                "Completion failed"
            ),
        }

        outcome
    }

    fn model_id(&self) -> &str {
        &self.model_id
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Fixed(Result<LlmResponse, LlmError>);

    #[async_trait]
    impl LlmService for Fixed {
        async fn complete(&self, _request: &LlmRequest) -> Result<LlmResponse, LlmError> {
            self.0.clone()
        }

        fn model_id(&self) -> &str {
            "fixed-1"
        }
    }

    fn request() -> LlmRequest {
        LlmRequest {
            turns: vec![Turn::system("sys"), Turn::user("hi")],
            params: GenerationParams::default(),
        }
    }

    #[tokio::test]
    async fn test_logging_service_passes_through() {
        let ok = LoggingService::new(Arc::new(Fixed(Ok(LlmResponse {
            text: "hello".into(),
            usage: Usage::default(),
        }))));
        assert_eq!(ok.model_id(), "fixed-1");
        assert_eq!(ok.complete(&request()).await.unwrap().text, "hello");

        let failing = LoggingService::new(Arc::new(Fixed(Err(LlmError::auth("bad key")))));
        let err = failing.complete(&request()).await.unwrap_err();
        assert_eq!(err.kind, LlmErrorKind::Auth);
    }
}
