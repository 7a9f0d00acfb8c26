//! Minimal OpenAI client for our use-cases.
//!
//! We only call chat.completions and request a strict JSON object back.
//! Calls are instrumented and log model names, latencies, and token usage (not contents).
//!
//! NOTE: We never log the API key and we keep payload truncations short to avoid PII leaks.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE, USER_AGENT};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, error, info, instrument, warn};

use crate::config::LlmSettings;
use crate::util::trunc_for_log;

/// Why a generation call did not produce a usable result. Callers treat every
/// variant the same way (degrade to the deterministic path) but log them apart.
#[derive(Debug, Error)]
pub enum GenerationError {
  #[error("generation service disabled")]
  Disabled,
  #[error("transport error: {0}")]
  Http(String),
  #[error("service returned HTTP {status}: {message}")]
  Status { status: u16, message: String },
  #[error("request timed out")]
  Timeout,
  #[error("malformed response: {0}")]
  Malformed(String),
  #[error("response violates schema: {0}")]
  Schema(String),
}

impl GenerationError {
  /// Transient failures worth one more try.
  pub fn is_retryable(&self) -> bool {
    match self {
      GenerationError::Http(_) | GenerationError::Timeout => true,
      GenerationError::Status { status, .. } => *status == 429 || *status >= 500,
      _ => false,
    }
  }
}

impl From<reqwest::Error> for GenerationError {
  fn from(e: reqwest::Error) -> Self {
    if e.is_timeout() {
      GenerationError::Timeout
    } else {
      GenerationError::Http(e.to_string())
    }
  }
}

/// Text in, JSON out. The seam between the task pipeline and the external
/// generation service.
#[async_trait]
pub trait LlmClient: Send + Sync {
  fn model(&self) -> &str;

  async fn chat_json(&self, system: &str, user: &str, temperature: f32) -> Result<serde_json::Value, GenerationError>;
}

#[derive(Clone)]
pub struct OpenAI {
  pub client: reqwest::Client,
  pub api_key: String,
  pub base_url: String,
  pub model: String,
  pub max_retries: u32,
}

impl OpenAI {
  /// Construct the client when an API key is configured and the service is
  /// enabled; otherwise return None (fallback-only mode).
  pub fn from_settings(llm: &LlmSettings) -> Option<Self> {
    if !llm.enabled {
      return None;
    }
    let api_key = llm.api_key.clone().filter(|k| !k.trim().is_empty())?;
    let client = reqwest::Client::builder()
      .timeout(Duration::from_secs(llm.timeout_secs.max(1)))
      .build()
      .map_err(|e| error!(target: "hurdle_reader", error = %e, "Failed to build HTTP client; LLM disabled"))
      .ok()?;

    Some(Self {
      client,
      api_key,
      base_url: llm.base_url.trim_end_matches('/').to_string(),
      model: llm.model.clone(),
      max_retries: llm.max_retries,
    })
  }

  async fn chat_once(&self, req: &ChatCompletionRequest) -> Result<serde_json::Value, GenerationError> {
    let url = format!("{}/chat/completions", self.base_url);
    let res = self.client.post(&url)
      .header(USER_AGENT, "hurdle-reader/0.1")
      .header(CONTENT_TYPE, "application/json")
      .header(AUTHORIZATION, format!("Bearer {}", self.api_key))
      .json(req).send().await?;

    if !res.status().is_success() {
      let status = res.status();
      let body = res.text().await.unwrap_or_default();
      let message = extract_openai_error(&body).unwrap_or_else(|| trunc_for_log(&body, 200));
      return Err(GenerationError::Status { status: status.as_u16(), message });
    }

    let body: ChatCompletionResponse = res.json().await.map_err(|e| GenerationError::Malformed(e.to_string()))?;
    if let Some(usage) = &body.usage {
      info!(prompt_tokens = ?usage.prompt_tokens, completion_tokens = ?usage.completion_tokens, total_tokens = ?usage.total_tokens, "OpenAI usage");
    }
    let text = body.choices.first()
      .and_then(|c| c.message.content.clone())
      .unwrap_or_default();
    debug!(response = %trunc_for_log(&text, 160), "OpenAI raw response");

    parse_json_content(&text)
  }
}

#[async_trait]
impl LlmClient for OpenAI {
  fn model(&self) -> &str {
    &self.model
  }

  /// JSON-object chat completion with one bounded retry on transient failures.
  #[instrument(level = "info", skip(self, system, user), fields(model = %self.model, user_len = user.len()))]
  async fn chat_json(&self, system: &str, user: &str, temperature: f32) -> Result<serde_json::Value, GenerationError> {
    let req = ChatCompletionRequest {
      model: self.model.clone(),
      messages: vec![
        ChatMessageReq { role: "system".into(), content: system.into() },
        ChatMessageReq { role: "user".into(), content: user.into() },
      ],
      temperature,
      response_format: Some(ResponseFormat { r#type: "json_object".into() }),
      max_tokens: None,
    };

    let mut attempt = 0;
    loop {
      let start = Instant::now();
      let result = self.chat_once(&req).await;
      let elapsed = start.elapsed();
      match result {
        Ok(v) => {
          info!(?elapsed, attempt, "Model response received");
          return Ok(v);
        }
        Err(e) if e.is_retryable() && attempt < self.max_retries => {
          warn!(?elapsed, attempt, error = %e, "Model call failed; retrying");
          attempt += 1;
        }
        Err(e) => {
          error!(?elapsed, attempt, error = %e, "Model call failed");
          return Err(e);
        }
      }
    }
  }
}

/// Models sometimes wrap JSON in a markdown fence even in JSON mode.
pub fn parse_json_content(text: &str) -> Result<serde_json::Value, GenerationError> {
  let t = text.trim();
  let t = t.strip_prefix("```json").or_else(|| t.strip_prefix("```")).unwrap_or(t);
  let t = t.strip_suffix("```").unwrap_or(t).trim();
  if t.is_empty() {
    return Err(GenerationError::Malformed("empty content".into()));
  }
  serde_json::from_str(t).map_err(|e| GenerationError::Malformed(format!("JSON parse error: {e}")))
}

// --- Chat DTOs ---

#[derive(Serialize)]
struct ChatCompletionRequest {
  model: String,
  messages: Vec<ChatMessageReq>,
  temperature: f32,
  #[serde(skip_serializing_if = "Option::is_none")]
  response_format: Option<ResponseFormat>,
  #[serde(skip_serializing_if = "Option::is_none")]
  max_tokens: Option<u32>,
}
#[derive(Serialize)]
struct ChatMessageReq { role: String, content: String }
#[derive(Serialize)]
struct ResponseFormat { #[serde(rename = "type")] r#type: String }

#[derive(Deserialize)]
struct ChatCompletionResponse {
  choices: Vec<ChatChoice>,
  #[serde(default)] usage: Option<Usage>,
}
#[derive(Deserialize)]
struct ChatChoice { message: ChatMessageResp }
#[derive(Deserialize)]
struct ChatMessageResp { content: Option<String> }
#[derive(Deserialize)]
struct Usage {
  #[serde(default)] prompt_tokens: Option<u32>,
  #[serde(default)] completion_tokens: Option<u32>,
  #[serde(default)] total_tokens: Option<u32>,
}

/// Try to extract a clean error message from OpenAI error body.
fn extract_openai_error(body: &str) -> Option<String> {
  #[derive(Deserialize)]
  struct EWrap { error: EObj }
  #[derive(Deserialize)]
  struct EObj { message: String }
  serde_json::from_str::<EWrap>(body).ok().map(|w| w.error.message)
}
