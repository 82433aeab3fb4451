//! The language-model seam.
//!
//! [`NarrationModel`] turns a rendered [`Prompt`] into raw text.
//! [`generate_with_retry`] bounds every attempt with a timeout and gives up
//! after `generation.attempts` failures. [`OpenAiCompatModel`] talks to any
//! OpenAI-compatible `/chat/completions` endpoint.

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, warn};

use crate::config::GenerationConfig;
use crate::error::{EngineError, EngineResult};

/// A system instruction plus the player's words.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Prompt {
    pub system: String,
    pub user: String,
}

#[async_trait]
pub trait NarrationModel: Send + Sync {
    /// Produce raw output for one prompt. Errors are retried by
    /// [`generate_with_retry`].
    async fn generate(&self, prompt: &Prompt) -> Result<String>;
}

/// Call `model` up to `config.attempts` times, each bounded by
/// `config.timeout_secs`. Empty output counts as a failed attempt.
pub async fn generate_with_retry(
    model: &dyn NarrationModel,
    prompt: &Prompt,
    config: &GenerationConfig,
) -> EngineResult<String> {
    let attempts = config.attempts.max(1);
    let timeout = Duration::from_secs(config.timeout_secs.max(1));
    let mut last_error = String::from("no attempt made");

    for attempt in 1..=attempts {
        match tokio::time::timeout(timeout, model.generate(prompt)).await {
            Ok(Ok(text)) if !text.trim().is_empty() => {
                debug!(attempt, chars = text.len(), "generation succeeded");
                return Ok(text);
            }
            Ok(Ok(_)) => last_error = "empty response".to_string(),
            Ok(Err(e)) => last_error = format!("{e:#}"),
            Err(_) => last_error = format!("timed out after {}s", timeout.as_secs()),
        }
        warn!(attempt, attempts, error = %last_error, "generation attempt failed");
    }

    Err(EngineError::GenerationFailed {
        attempts,
        reason: last_error,
    })
}

#[derive(Debug, Serialize)]
struct ChatCompletionRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    temperature: f32,
    max_tokens: u32,
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ReplyMessage,
}

#[derive(Debug, Deserialize)]
struct ReplyMessage {
    content: Option<String>,
}

/// Client for OpenAI-compatible chat completion servers (LM Studio, Ollama,
/// vLLM, hosted APIs).
#[derive(Clone)]
pub struct OpenAiCompatModel {
    base_url: String,
    api_key: String,
    model: String,
    temperature: f32,
    max_tokens: u32,
    client: reqwest::Client,
}

impl OpenAiCompatModel {
    pub fn new(config: &GenerationConfig) -> Self {
        Self {
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
            model: config.model.clone(),
            temperature: config.temperature,
            max_tokens: config.max_tokens,
            client: reqwest::Client::new(),
        }
    }
}

#[async_trait]
impl NarrationModel for OpenAiCompatModel {
    async fn generate(&self, prompt: &Prompt) -> Result<String> {
        let url = format!("{}/chat/completions", self.base_url);
        let request = ChatCompletionRequest {
            model: &self.model,
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: &prompt.system,
                },
                ChatMessage {
                    role: "user",
                    content: &prompt.user,
                },
            ],
            temperature: self.temperature,
            max_tokens: self.max_tokens,
        };

        let mut req = self.client.post(&url).json(&request);
        if !self.api_key.is_empty() {
            req = req.bearer_auth(&self.api_key);
        }

        let response = req.send().await.context("failed to send chat request")?;
        if !response.status().is_success() {
            let status = response.status();
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "<unreadable body>".to_string());
            anyhow::bail!("model server returned {status}: {body}");
        }

        let completion: ChatCompletionResponse = response
            .json()
            .await
            .context("failed to parse chat completion")?;
        completion
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or_else(|| anyhow::anyhow!("model returned no choices"))
    }
}
