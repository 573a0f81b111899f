use super::models::Usage;
use super::retry::{RetryDecision, RetryPolicy};
use crate::config::ModelSettings;
use crate::protocol::{ModelClient, ModelResponse, PromptOptions};
use crate::util::truncate_str;
use anyhow::Context;
use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

/// OpenRouter chat completions endpoint (BYOK mode)
pub const OPENROUTER_URL: &str = "https://openrouter.ai/api/v1/chat/completions";

/// Transport-level timeout; per-call time limits are enforced above this.
const HTTP_TIMEOUT_SECS: u64 = 600;

/// Maximum length for error body content in error messages
const MAX_ERROR_CONTENT_LEN: usize = 200;

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<Message<'a>>,
    max_tokens: u32,
    stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
}

#[derive(Serialize)]
struct Message<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<Choice>,
    usage: Option<Usage>,
    model: Option<String>,
}

#[derive(Deserialize)]
struct Choice {
    message: MessageContent,
}

#[derive(Deserialize)]
struct MessageContent {
    content: Option<String>,
}

/// OpenRouter sometimes reports upstream failures with a 200 status
#[derive(Deserialize)]
struct OpenRouterError {
    error: OpenRouterErrorBody,
}

#[derive(Deserialize)]
struct OpenRouterErrorBody {
    message: String,
    code: Option<u16>,
}

#[derive(Debug, Error)]
enum CallError {
    #[error("{message}")]
    Transient {
        message: String,
        retry_after: Option<Duration>,
    },
    #[error("{0}")]
    Fatal(String),
}

impl CallError {
    fn transient(message: impl Into<String>) -> Self {
        CallError::Transient {
            message: message.into(),
            retry_after: None,
        }
    }

    fn decision(&self) -> RetryDecision {
        match self {
            CallError::Transient {
                retry_after: Some(after),
                ..
            } => RetryDecision::RetryAfter(*after),
            CallError::Transient { .. } => RetryDecision::Retry,
            CallError::Fatal(_) => RetryDecision::Stop,
        }
    }
}

/// Strip anything that looks like a credential out of an API error body.
fn sanitize_api_response(content: &str) -> String {
    const SECRET_PATTERNS: &[&str] = &["sk-", "bearer", "api_key", "apikey", "authorization"];
    let lower = content.to_lowercase();
    if SECRET_PATTERNS.iter().any(|p| lower.contains(p)) {
        return "(response redacted - may contain sensitive data)".to_string();
    }
    truncate_str(content, MAX_ERROR_CONTENT_LEN).to_string()
}

/// Extract retry-after hint from OpenRouter response (if present)
fn parse_retry_after(text: &str) -> Option<Duration> {
    // Look for patterns like "retry after X seconds" or "wait X seconds"
    let text_lower = text.to_lowercase();
    let pos = text_lower.find("retry").or_else(|| text_lower.find("wait"))?;
    text_lower[pos..]
        .split_whitespace()
        .skip(1)
        .take(5)
        .filter_map(|word| {
            word.trim_matches(|c: char| !c.is_ascii_digit())
                .parse::<u64>()
                .ok()
        })
        .find(|secs| *secs > 0 && *secs < 300)
        .map(Duration::from_secs)
}

/// Turn a completed HTTP exchange into content or a classified failure.
fn interpret_response(status: u16, text: &str) -> Result<(String, Option<String>), CallError> {
    if (200..300).contains(&status) {
        if let Ok(err_resp) = serde_json::from_str::<OpenRouterError>(text) {
            let message = format!(
                "OpenRouter error: {}",
                truncate_str(&err_resp.error.message, MAX_ERROR_CONTENT_LEN)
            );
            let retryable = err_resp.error.code.is_none_or(|c| c >= 500 || c == 429);
            return Err(if retryable {
                CallError::transient(message)
            } else {
                CallError::Fatal(message)
            });
        }

        let parsed: ChatResponse = serde_json::from_str(text).map_err(|e| {
            CallError::Fatal(format!(
                "Failed to parse OpenRouter response: {} ({})",
                e,
                sanitize_api_response(text)
            ))
        })?;

        if let Some(usage) = &parsed.usage {
            debug!(
                prompt_tokens = usage.prompt_tokens,
                completion_tokens = usage.completion_tokens,
                cost = usage.cost(),
                "model usage"
            );
        }

        let content = parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .unwrap_or_default();

        if content.trim().is_empty() {
            return Err(CallError::transient("model returned an empty response"));
        }
        return Ok((content, parsed.model));
    }

    match status {
        401 | 403 => Err(CallError::Fatal(
            "Invalid OpenRouter API key. Set OPENROUTER_API_KEY or store one in the keychain."
                .to_string(),
        )),
        429 => Err(CallError::Transient {
            message: "Rate limited by OpenRouter".to_string(),
            retry_after: parse_retry_after(text),
        }),
        500..=599 => Err(CallError::transient(format!(
            "OpenRouter server error ({}). The service may be temporarily unavailable.",
            status
        ))),
        _ => Err(CallError::Fatal(format!(
            "API error {}: {}",
            status,
            sanitize_api_response(text)
        ))),
    }
}

/// [`ModelClient`] backed by OpenRouter's chat completions API.
pub struct OpenRouterClient {
    http: reqwest::Client,
    api_key: String,
    url: String,
    default_model: String,
    max_tokens: u32,
    retry: RetryPolicy,
}

impl OpenRouterClient {
    pub fn new(api_key: String, settings: &ModelSettings) -> anyhow::Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(HTTP_TIMEOUT_SECS))
            .build()
            .context("Failed to create HTTP client")?;
        Ok(Self {
            http,
            api_key,
            url: settings
                .api_base
                .clone()
                .unwrap_or_else(|| OPENROUTER_URL.to_string()),
            default_model: settings.default.clone(),
            max_tokens: settings.max_tokens,
            retry: RetryPolicy::with_retries(settings.max_retries),
        })
    }

    async fn send_once(&self, request: &ChatRequest<'_>) -> Result<(String, Option<String>), CallError> {
        let response = self
            .http
            .post(&self.url)
            .header("Content-Type", "application/json")
            .header("X-Title", "pr-panel")
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(request)
            .send()
            .await
            .map_err(classify_network_error)?;

        let status = response.status().as_u16();
        let text = response.text().await.map_err(classify_network_error)?;
        interpret_response(status, &text)
    }
}

fn classify_network_error(err: reqwest::Error) -> CallError {
    if err.is_timeout() || err.is_connect() || err.is_request() {
        CallError::transient(format!("network error: {}", err))
    } else {
        CallError::Fatal(format!("request failed: {}", err))
    }
}

impl ModelClient for OpenRouterClient {
    fn prompt<'a>(
        &'a self,
        text: &'a str,
        options: &'a PromptOptions,
    ) -> BoxFuture<'a, anyhow::Result<ModelResponse>> {
        Box::pin(async move {
            let model = options.model.as_deref().unwrap_or(&self.default_model);
            let request = ChatRequest {
                model,
                messages: vec![Message {
                    role: "user",
                    content: text,
                }],
                max_tokens: self.max_tokens,
                stream: false,
                temperature: options.temperature,
            };

            let (response, served_by) = self
                .retry
                .run(
                    model,
                    |_| self.send_once(&request),
                    CallError::decision,
                )
                .await
                .map_err(|e| anyhow::anyhow!("{} ({})", e, model))?;

            Ok(ModelResponse {
                response,
                model: served_by,
            })
        })
    }
}
