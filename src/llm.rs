use crate::config::{LlmConfig, RetryConfig};
use anyhow::Result;
use async_trait::async_trait;
use siumai::retry_api::{RetryBackend, RetryOptions, RetryPolicy};
use siumai::traits::ChatCapability;
use siumai::types::{ChatMessage, ChatRequest, ContentPart, MessageContent, Tool as SiumaiTool};

/// A tool invocation requested by the model.
#[derive(Debug, Clone)]
pub struct ToolInvocation {
    pub id: String,
    pub name: String,
    pub arguments: serde_json::Value,
}

/// One model turn: assistant text and/or tool invocations, plus the
/// assistant message to append to the conversation history.
#[derive(Clone)]
pub struct ChatTurn {
    pub text: Option<String>,
    pub reasoning: Vec<String>,
    pub tool_calls: Vec<ToolInvocation>,
    pub message: ChatMessage,
}

/// Seam between the agent loop and the completion provider. The production
/// implementation routes through siumai; tests script turns directly.
#[async_trait]
pub trait ChatBackend: Send + Sync {
    async fn chat_turn(&self, messages: Vec<ChatMessage>, tools: Vec<SiumaiTool>)
    -> Result<ChatTurn>;

    /// Plain text completion without tools (history compaction).
    async fn chat_text(&self, messages: Vec<ChatMessage>) -> Result<String>;
}

#[derive(Clone)]
pub struct LlmClient {
    inner: siumai::provider::Siumai,
}

impl LlmClient {
    pub async fn from_config(cfg: &LlmConfig) -> Result<Self> {
        // Normalize provider id: Groq and other OpenAI-compatible endpoints
        // route through the OpenAI provider with a custom base_url.
        let provider_lc = cfg.provider.to_lowercase();
        let provider_norm = match provider_lc.as_str() {
            "google" => "gemini",
            "groq" | "openai-compatible" => "openai",
            other => other,
        };

        let mut b = siumai::provider::Siumai::builder()
            .provider_id(provider_norm)
            .api_key(cfg.api_key.clone())
            .model(cfg.model.clone());
        if let Some(url) = &cfg.base_url {
            b = b.base_url(url.clone());
        }
        if let Some(options) = to_retry_options(&cfg.retry) {
            b = b.with_retry(options);
        }
        let client = match b.build().await {
            Ok(c) => c,
            Err(e) => {
                // Fallback: generic OpenAI-compatible path when a base_url is known
                if let Some(url) = &cfg.base_url {
                    let mut fb = siumai::provider::Siumai::builder()
                        .openai()
                        .api_key(cfg.api_key.clone())
                        .model(cfg.model.clone())
                        .base_url(url.clone());
                    if let Some(options) = to_retry_options(&cfg.retry) {
                        fb = fb.with_retry(options);
                    }
                    tracing::warn!(
                        "falling back to openai-compatible (openai + base_url) after provider build error: {}",
                        e
                    );
                    fb.build().await?
                } else {
                    return Err(anyhow::anyhow!(
                        "failed to build provider '{}': {}. Provide 'base_url' to use the openai-compatible fallback.",
                        provider_norm,
                        e
                    ));
                }
            }
        };
        Ok(Self { inner: client })
    }

    pub fn inner(&self) -> &siumai::provider::Siumai {
        &self.inner
    }
}

#[async_trait]
impl ChatBackend for LlmClient {
    async fn chat_turn(
        &self,
        messages: Vec<ChatMessage>,
        tools: Vec<SiumaiTool>,
    ) -> Result<ChatTurn> {
        let req = ChatRequest::new(messages).with_tools(tools);
        let response = self.inner.chat_request(req).await?;

        let mut reasoning = Vec::new();
        let (text, message) = match &response.content {
            MessageContent::Text(t) => {
                let text = if t.is_empty() { None } else { Some(t.clone()) };
                (text, ChatMessage::assistant(t.clone()).build())
            }
            MessageContent::MultiModal(parts) => {
                for r in response.reasoning() {
                    reasoning.push(r.to_string());
                }
                let text = parts
                    .iter()
                    .filter_map(|p| {
                        if let ContentPart::Text { text } = p {
                            Some(text.as_str())
                        } else {
                            None
                        }
                    })
                    .collect::<Vec<_>>()
                    .join("\n");
                let text = if text.is_empty() { None } else { Some(text) };
                (
                    text,
                    ChatMessage::assistant_with_content(parts.clone()).build(),
                )
            }
        };

        let mut tool_calls = Vec::new();
        if response.has_tool_calls() {
            for call in response.tool_calls() {
                if let Some(info) = call.as_tool_call() {
                    tool_calls.push(ToolInvocation {
                        id: info.tool_call_id.to_string(),
                        name: info.tool_name.to_string(),
                        arguments: info.arguments.clone(),
                    });
                }
            }
        }

        Ok(ChatTurn {
            text,
            reasoning,
            tool_calls,
            message,
        })
    }

    async fn chat_text(&self, messages: Vec<ChatMessage>) -> Result<String> {
        let resp = self.inner.chat(messages).await?;
        Ok(resp.content_text().unwrap_or("").to_string())
    }
}

fn to_retry_options(cfg: &RetryConfig) -> Option<RetryOptions> {
    if !cfg.enabled {
        return None;
    }
    let policy = RetryPolicy::new()
        .with_max_attempts(cfg.max_retries)
        .with_initial_delay(std::time::Duration::from_secs_f32(cfg.initial_delay))
        .with_max_delay(std::time::Duration::from_secs_f32(cfg.max_delay))
        .with_backoff_multiplier(cfg.exponential_base as f64)
        .with_jitter(true);
    Some(RetryOptions {
        backend: RetryBackend::Policy,
        provider: None,
        policy: Some(policy),
        retry_401: true,
        idempotent: true,
    })
}
