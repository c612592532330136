//! OpenAI-compatible chat-completions client acting as the relation oracle.
//!
//! The model is asked for a single JSON object per comparison; the reply
//! content is strictly validated by [`crate::parse_reply`] before anything
//! downstream sees it.

use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use optrack_core::AppConfig;
use reqwest::{header, Client, Response, StatusCode};
use serde::{Deserialize, Serialize};

use crate::error::OracleError;
use crate::prompt;
use crate::retry::{parse_retry_after, Backoff};
use crate::types::{parse_reply, OracleRequest, OracleVerdict};
use crate::RelationOracle;

pub const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";

#[derive(Debug, Clone)]
pub struct LlmOracleSettings {
    pub base_url: String,
    pub api_key: String,
    pub model: String,
    pub timeout_secs: u64,
    pub max_retries: u32,
    pub backoff_base_ms: u64,
}

impl LlmOracleSettings {
    /// Settings from the application config, or `None` when no API key is set.
    #[must_use]
    pub fn from_app_config(config: &AppConfig) -> Option<Self> {
        let api_key = config.oracle_api_key.clone()?;
        Some(Self {
            base_url: config.oracle_base_url.clone(),
            api_key,
            model: config.oracle_model.clone(),
            timeout_secs: config.oracle_timeout_secs,
            max_retries: config.oracle_max_retries,
            backoff_base_ms: config.oracle_retry_backoff_base_ms,
        })
    }
}

/// Relation oracle backed by a hosted language model.
pub struct LlmOracleClient {
    client: Client,
    endpoint: String,
    api_key: String,
    model: String,
    timeout_secs: u64,
    backoff: Backoff,
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    temperature: f32,
    response_format: ResponseFormat,
    messages: [ChatMessage<'a>; 2],
}

#[derive(Serialize)]
struct ResponseFormat {
    #[serde(rename = "type")]
    kind: &'static str,
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatReplyMessage,
}

#[derive(Deserialize)]
struct ChatReplyMessage {
    #[serde(default)]
    content: Option<String>,
}

impl LlmOracleClient {
    /// # Errors
    ///
    /// Returns [`OracleError::Http`] if the underlying `reqwest::Client`
    /// cannot be constructed.
    pub fn new(settings: LlmOracleSettings) -> Result<Self, OracleError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(settings.timeout_secs))
            .connect_timeout(Duration::from_secs(10))
            .user_agent("optrack/0.1 (opinion-consolidation)")
            .build()?;

        Ok(Self {
            client,
            endpoint: format!("{}/chat/completions", settings.base_url.trim_end_matches('/')),
            api_key: settings.api_key,
            model: settings.model,
            timeout_secs: settings.timeout_secs,
            backoff: Backoff::new(settings.max_retries, settings.backoff_base_ms),
        })
    }

    async fn call_once(&self, user_prompt: &str) -> Result<OracleVerdict, OracleError> {
        let body = ChatRequest {
            model: &self.model,
            temperature: 0.0,
            response_format: ResponseFormat {
                kind: "json_object",
            },
            messages: [
                ChatMessage {
                    role: "system",
                    content: prompt::SYSTEM_PROMPT,
                },
                ChatMessage {
                    role: "user",
                    content: user_prompt,
                },
            ],
        };

        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| self.classify_http(e))?;
        if let Some(throttled) = throttled(&response) {
            return Err(throttled);
        }
        let response = response.error_for_status()?;
        let text = response.text().await.map_err(|e| self.classify_http(e))?;

        let parsed: ChatResponse = serde_json::from_str(&text)
            .map_err(|e| OracleError::malformed(format!("completion envelope: {e}")))?;
        let content = parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or_else(|| OracleError::malformed("completion has no message content"))?;

        parse_reply(&content)
    }

    fn classify_http(&self, err: reqwest::Error) -> OracleError {
        if err.is_timeout() {
            OracleError::Timeout {
                after_secs: self.timeout_secs,
            }
        } else {
            OracleError::Http(err)
        }
    }
}

/// A 429 or 503 reply as [`OracleError::Throttled`], honouring `Retry-After`.
fn throttled(response: &Response) -> Option<OracleError> {
    let status = response.status();
    if status != StatusCode::TOO_MANY_REQUESTS && status != StatusCode::SERVICE_UNAVAILABLE {
        return None;
    }
    let retry_after = response
        .headers()
        .get(header::RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| parse_retry_after(v, Utc::now()));
    Some(OracleError::Throttled {
        status: status.as_u16(),
        retry_after,
    })
}

#[async_trait]
impl RelationOracle for LlmOracleClient {
    fn name(&self) -> &'static str {
        "llm"
    }

    async fn verify(&self, request: &OracleRequest) -> Result<OracleVerdict, OracleError> {
        let user_prompt = prompt::render(request);
        let verdict = self
            .backoff
            .retry(|| self.call_once(&user_prompt))
            .await?;
        tracing::debug!(
            model = %self.model,
            relation = ?verdict.relation,
            confidence = verdict.confidence,
            "oracle verdict"
        );
        Ok(verdict)
    }
}
