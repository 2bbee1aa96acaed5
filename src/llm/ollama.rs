//! Ollama provider — native `/api/chat` endpoint, non-streaming.
//!
//! Per-request sampling options map onto Ollama's `options` object
//! (`temperature`, `num_ctx`, `num_predict`).

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::LlmError;
use crate::llm::provider::{
    ChatMessage, CompletionRequest, CompletionResponse, FinishReason, LlmProvider,
};

const PROVIDER: &str = "ollama";

/// Provider for an Ollama server.
pub struct OllamaProvider {
    client: reqwest::Client,
    base_url: String,
    model: String,
}

impl OllamaProvider {
    /// Create a provider for `model` on the server at `base_url`.
    pub fn new(
        base_url: impl Into<String>,
        model: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, LlmError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| LlmError::RequestFailed {
                provider: PROVIDER.into(),
                reason: format!("Failed to build HTTP client: {e}"),
            })?;

        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            model: model.into(),
        })
    }

    fn chat_url(&self) -> String {
        format!("{}/api/chat", self.base_url)
    }
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    stream: bool,
    options: ChatOptions,
}

#[derive(Debug, Default, Serialize)]
struct ChatOptions {
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    num_ctx: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    num_predict: Option<u32>,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    message: Option<ResponseMessage>,
    #[serde(default)]
    done_reason: Option<String>,
    #[serde(default)]
    prompt_eval_count: u32,
    #[serde(default)]
    eval_count: u32,
}

#[derive(Debug, Deserialize)]
struct ResponseMessage {
    #[serde(default)]
    content: String,
}

#[async_trait]
impl LlmProvider for OllamaProvider {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse, LlmError> {
        let body = ChatRequest {
            model: &self.model,
            messages: &request.messages,
            stream: false,
            options: ChatOptions {
                temperature: request.temperature,
                num_ctx: request.context_window,
                num_predict: request.max_tokens,
            },
        };

        let resp = self
            .client
            .post(self.chat_url())
            .json(&body)
            .send()
            .await
            .map_err(|e| LlmError::RequestFailed {
                provider: PROVIDER.into(),
                reason: e.to_string(),
            })?;

        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            return Err(match status.as_u16() {
                404 => LlmError::ModelNotAvailable {
                    provider: PROVIDER.into(),
                    model: self.model.clone(),
                },
                429 => LlmError::RateLimited {
                    provider: PROVIDER.into(),
                    retry_after: None,
                },
                _ => LlmError::RequestFailed {
                    provider: PROVIDER.into(),
                    reason: format!("HTTP {status}: {text}"),
                },
            });
        }

        let parsed: ChatResponse = resp.json().await.map_err(|e| LlmError::InvalidResponse {
            provider: PROVIDER.into(),
            reason: format!("Failed to parse chat response: {e}"),
        })?;

        let message = parsed.message.ok_or_else(|| LlmError::InvalidResponse {
            provider: PROVIDER.into(),
            reason: "response has no message".into(),
        })?;

        let finish_reason = match parsed.done_reason.as_deref() {
            Some("stop") => FinishReason::Stop,
            Some("length") => FinishReason::Length,
            _ => FinishReason::Unknown,
        };

        tracing::debug!(
            model = %self.model,
            input_tokens = parsed.prompt_eval_count,
            output_tokens = parsed.eval_count,
            "Ollama completion returned"
        );

        Ok(CompletionResponse {
            content: message.content,
            input_tokens: parsed.prompt_eval_count,
            output_tokens: parsed.eval_count,
            finish_reason,
        })
    }
}
