//! Unified LLM call surface: one retrying, telemetry-emitting client in
//! front of an OpenAI-compatible chat completions endpoint.

use crate::config::LlmConfig;
use crate::error::{Error, Result};
use crate::telemetry::{AiCallRecord, Telemetry};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    System,
    User,
    Assistant,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: ChatRole,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self { role: ChatRole::System, content: content.into() }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self { role: ChatRole::User, content: content.into() }
    }
}

#[derive(Debug, Clone, Default)]
pub struct TokenUsage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
}

const MAX_RETRIES: u32 = 3;

/// Thin wrapper over an OpenAI-compatible `/chat/completions` endpoint.
/// Retries transient failures with capped exponential backoff, never
/// retries a 4xx (the request itself is wrong, retrying won't help),
/// and forwards a record of every attempt to `Telemetry`.
pub struct LlmGateway {
    client: reqwest::Client,
    config: LlmConfig,
    telemetry: Option<Arc<Telemetry>>,
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    max_tokens: u32,
    temperature: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_format: Option<ResponseFormat>,
}

#[derive(Serialize)]
struct ResponseFormat {
    #[serde(rename = "type")]
    kind: &'static str,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
    #[serde(default)]
    usage: Option<Usage>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ResponseMessage,
}

#[derive(Deserialize)]
struct ResponseMessage {
    content: Option<String>,
}

#[derive(Deserialize)]
struct Usage {
    #[serde(default)]
    prompt_tokens: u32,
    #[serde(default)]
    completion_tokens: u32,
}

impl LlmGateway {
    pub fn new(config: LlmConfig, telemetry: Option<Arc<Telemetry>>) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(120))
            .build()
            .expect("reqwest client builder should not fail on static config");
        Self { client, config, telemetry }
    }

    /// Plain chat completion, returning the raw assistant text.
    pub async fn chat(
        &self,
        messages: &[ChatMessage],
        max_tokens: Option<u32>,
        temperature: Option<f32>,
    ) -> Result<(String, TokenUsage)> {
        self.call(messages, max_tokens, temperature, false, "chat").await
    }

    /// Chat completion in JSON mode, salvage-parsed into a `Value`.
    /// Returns `Ok(None)` rather than an error when the model's output
    /// cannot be coerced to JSON by any of the three salvage tiers —
    /// callers treat that as "extraction produced nothing usable", not
    /// as a transport failure.
    pub async fn chat_json(
        &self,
        messages: &[ChatMessage],
        max_tokens: Option<u32>,
        temperature: Option<f32>,
    ) -> Result<(Option<Value>, TokenUsage)> {
        let (content, usage) = self.call(messages, max_tokens, temperature, true, "chat_json").await?;
        Ok((parse_json_salvage(&content), usage))
    }

    async fn call(
        &self,
        messages: &[ChatMessage],
        max_tokens: Option<u32>,
        temperature: Option<f32>,
        json_mode: bool,
        call_type: &str,
    ) -> Result<(String, TokenUsage)> {
        let max_tokens = max_tokens.unwrap_or(self.config.max_tokens);
        let temperature = temperature.unwrap_or(self.config.temperature);
        let started = Instant::now();
        let mut last_error: Option<Error> = None;

        for attempt in 0..MAX_RETRIES {
            match self.try_once(messages, max_tokens, temperature, json_mode).await {
                Ok((content, usage)) => {
                    self.emit_telemetry(call_type, &usage, started, attempt, None);
                    return Ok((content, usage));
                }
                Err(err) => {
                    let transient = matches!(err, Error::LlmTransient(_) | Error::Http(_));
                    tracing::warn!(event = "llm_call_failed", attempt = attempt + 1, error = %err);
                    if !transient || attempt + 1 >= MAX_RETRIES {
                        last_error = Some(err);
                        break;
                    }
                    last_error = Some(err);
                    let backoff = Duration::from_secs(2u64.saturating_pow(attempt).min(30));
                    tokio::time::sleep(backoff).await;
                }
            }
        }

        let err = last_error.unwrap_or_else(|| Error::Internal("llm call exhausted retries with no error".to_string()));
        self.emit_telemetry(call_type, &TokenUsage::default(), started, MAX_RETRIES, Some(err.to_string()));
        Err(err)
    }

    async fn try_once(
        &self,
        messages: &[ChatMessage],
        max_tokens: u32,
        temperature: f32,
        json_mode: bool,
    ) -> Result<(String, TokenUsage)> {
        let request = ChatRequest {
            model: &self.config.model,
            messages,
            max_tokens,
            temperature,
            response_format: json_mode.then_some(ResponseFormat { kind: "json_object" }),
        };

        let url = format!("{}/chat/completions", self.config.base_url.trim_end_matches('/'));
        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.config.api_key)
            .json(&request)
            .send()
            .await
            .map_err(|e| Error::LlmTransient(e.to_string()))?;

        let status = response.status();
        if status.is_client_error() {
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Internal(format!("llm rejected request ({status}): {body}")));
        }
        if !status.is_success() {
            return Err(Error::LlmTransient(format!("llm returned {status}")));
        }

        let body: ChatResponse = response.json().await.map_err(|e| Error::LlmTransient(e.to_string()))?;
        let content = body
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .unwrap_or_default();
        let usage = body
            .usage
            .map(|u| TokenUsage { prompt_tokens: u.prompt_tokens, completion_tokens: u.completion_tokens })
            .unwrap_or_default();
        Ok((content, usage))
    }

    fn emit_telemetry(
        &self,
        call_type: &str,
        usage: &TokenUsage,
        started: Instant,
        retry_count: u32,
        error: Option<String>,
    ) {
        let Some(telemetry) = &self.telemetry else { return };
        let mut record = AiCallRecord::new(&self.config.model, call_type);
        record.prompt_tokens = usage.prompt_tokens;
        record.completion_tokens = usage.completion_tokens;
        record.duration_ms = started.elapsed().as_millis() as u64;
        record.retry_count = retry_count;
        record.error = error;
        telemetry.record(record);
    }
}

/// Three-tier salvage: strict parse, then a fenced ```json block, then
/// the first balanced `{...}` span. Models routinely wrap JSON in prose
/// or code fences despite being asked not to.
fn parse_json_salvage(content: &str) -> Option<Value> {
    if content.is_empty() {
        return None;
    }
    if let Ok(value) = serde_json::from_str(content) {
        return Some(value);
    }
    if let Some(fenced) = extract_fenced_block(content) {
        if let Ok(value) = serde_json::from_str(&fenced) {
            return Some(value);
        }
    }
    if let Some(braces) = extract_balanced_braces(content) {
        if let Ok(value) = serde_json::from_str(&braces) {
            return Some(value);
        }
    }
    tracing::warn!(event = "json_parse_failed", preview = %content.chars().take(200).collect::<String>());
    None
}

fn extract_fenced_block(content: &str) -> Option<String> {
    let start = content.find("```")?;
    let after_fence = &content[start + 3..];
    let after_fence = after_fence.strip_prefix("json").unwrap_or(after_fence);
    let end = after_fence.find("```")?;
    Some(after_fence[..end].trim().to_string())
}

fn extract_balanced_braces(content: &str) -> Option<String> {
    let open = content.find('{')?;
    let mut depth = 0i32;
    for (i, c) in content[open..].char_indices() {
        match c {
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(content[open..open + i + 1].to_string());
                }
            }
            _ => {}
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_json_salvage_strict() {
        let value = parse_json_salvage(r#"{"a": 1}"#).unwrap();
        assert_eq!(value["a"], 1);
    }

    #[test]
    fn test_parse_json_salvage_fenced() {
        let text = "Here you go:\n```json\n{\"a\": 2}\n```\nThanks.";
        let value = parse_json_salvage(text).unwrap();
        assert_eq!(value["a"], 2);
    }

    #[test]
    fn test_parse_json_salvage_bare_braces() {
        let text = "Sure, the result is {\"a\": 3} as requested.";
        let value = parse_json_salvage(text).unwrap();
        assert_eq!(value["a"], 3);
    }

    #[test]
    fn test_parse_json_salvage_gives_up_on_garbage() {
        assert!(parse_json_salvage("not json at all").is_none());
    }

    #[test]
    fn test_parse_json_salvage_empty_is_none() {
        assert!(parse_json_salvage("").is_none());
    }
}
