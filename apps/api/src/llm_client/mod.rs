//! LLM client, the single entry point for all language-model calls.
//!
//! Every module that needs model output goes through [`LlmClient`] or the
//! [`AnnouncementParser`] seam; nothing else talks to the API directly.
//! The endpoint is OpenAI-compatible chat completions, so self-hosted and
//! commercial providers are interchangeable via configuration.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::Client;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::Value;
use sqlx::types::Json as SqlJson;
use sqlx::{FromRow, PgPool};
use thiserror::Error;
use tracing::{debug, warn};

pub mod prompts;

const MAX_TOKENS: u32 = 8192;
const MAX_RETRIES: u32 = 3;
const CALL_TIMEOUT_SECS: u64 = 120;

#[derive(Debug, Error)]
pub enum LlmError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("API error (status {status}): {message}")]
    Api { status: u16, message: String },

    #[error("JSON parse error: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("rate limited after {retries} retries")]
    RateLimited { retries: u32 },

    #[error("model returned empty content")]
    EmptyContent,

    #[error("model output failed validation: {0}")]
    Invalid(String),
}

impl LlmError {
    /// Transport failures and provider overload retry; bad model output
    /// does not, since replaying the same content buys the same answer.
    pub fn is_transient(&self) -> bool {
        match self {
            LlmError::Http(_) | LlmError::RateLimited { .. } => true,
            LlmError::Api { status, .. } => *status == 429 || *status >= 500,
            LlmError::Parse(_) | LlmError::EmptyContent | LlmError::Invalid(_) => false,
        }
    }
}

/// A stored provider configuration. The row flagged `is_default` is used
/// unless a caller picks one explicitly.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct LlmConfigRecord {
    pub id: i64,
    pub name: String,
    pub provider: String,
    pub model: String,
    pub base_url: String,
    pub api_key: String,
    pub temperature: f64,
    pub timeout_secs: i32,
    pub max_tokens: i32,
    pub extra: SqlJson<Value>,
    pub is_default: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

pub async fn load_default_config(pool: &PgPool) -> Result<Option<LlmConfigRecord>, sqlx::Error> {
    sqlx::query_as::<_, LlmConfigRecord>(
        "SELECT * FROM llm_configs WHERE is_default ORDER BY updated_at DESC LIMIT 1",
    )
    .fetch_optional(pool)
    .await
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    max_tokens: u32,
    temperature: f64,
    messages: Vec<ChatMessage<'a>>,
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
pub struct ChatResponse {
    pub choices: Vec<ChatChoice>,
    #[serde(default)]
    pub usage: Option<ChatUsage>,
}

#[derive(Debug, Deserialize)]
pub struct ChatChoice {
    pub message: ChatResponseMessage,
}

#[derive(Debug, Deserialize)]
pub struct ChatResponseMessage {
    pub content: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct ChatUsage {
    #[serde(default)]
    pub prompt_tokens: u32,
    #[serde(default)]
    pub completion_tokens: u32,
}

impl ChatResponse {
    pub fn text(&self) -> Option<&str> {
        self.choices
            .first()
            .and_then(|c| c.message.content.as_deref())
            .filter(|t| !t.is_empty())
    }
}

#[derive(Debug, Deserialize)]
struct ApiErrorEnvelope {
    error: ApiErrorBody,
}

#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    message: String,
}

/// Chat-completions client with retry on 429/5xx.
#[derive(Clone)]
pub struct LlmClient {
    client: Client,
    base_url: String,
    api_key: String,
    model: String,
    temperature: f64,
}

impl LlmClient {
    pub fn new(base_url: String, api_key: String, model: String) -> Self {
        Self {
            client: Client::builder()
                .timeout(std::time::Duration::from_secs(CALL_TIMEOUT_SECS))
                .build()
                .expect("failed to build HTTP client"),
            base_url,
            api_key,
            model,
            temperature: 0.1,
        }
    }

    pub fn from_config(record: &LlmConfigRecord) -> Self {
        Self {
            client: Client::builder()
                .timeout(std::time::Duration::from_secs(record.timeout_secs.max(1) as u64))
                .build()
                .expect("failed to build HTTP client"),
            base_url: record.base_url.clone(),
            api_key: record.api_key.clone(),
            model: record.model.clone(),
            temperature: record.temperature,
        }
    }

    /// Makes a raw chat-completions call, retrying 429 and 5xx with
    /// exponential backoff.
    pub async fn call(&self, prompt: &str, system: &str) -> Result<ChatResponse, LlmError> {
        let request_body = ChatRequest {
            model: &self.model,
            max_tokens: MAX_TOKENS,
            temperature: self.temperature,
            messages: vec![
                ChatMessage { role: "system", content: system },
                ChatMessage { role: "user", content: prompt },
            ],
        };
        let url = format!("{}/chat/completions", self.base_url.trim_end_matches('/'));

        let mut last_error: Option<LlmError> = None;

        for attempt in 0..MAX_RETRIES {
            if attempt > 0 {
                // 1s, 2s, 4s
                let delay = std::time::Duration::from_millis(1000 * (1 << (attempt - 1)));
                warn!(
                    "LLM call attempt {} failed, retrying after {}ms...",
                    attempt,
                    delay.as_millis()
                );
                tokio::time::sleep(delay).await;
            }

            let response = self
                .client
                .post(&url)
                .bearer_auth(&self.api_key)
                .json(&request_body)
                .send()
                .await;

            let response = match response {
                Ok(r) => r,
                Err(e) => {
                    last_error = Some(LlmError::Http(e));
                    continue;
                }
            };

            let status = response.status();

            if status.as_u16() == 429 || status.is_server_error() {
                let body = response.text().await.unwrap_or_default();
                warn!("LLM API returned {}: {}", status, body);
                last_error = Some(LlmError::Api {
                    status: status.as_u16(),
                    message: body,
                });
                continue;
            }

            if !status.is_success() {
                let body = response.text().await.unwrap_or_default();
                let message = serde_json::from_str::<ApiErrorEnvelope>(&body)
                    .map(|e| e.error.message)
                    .unwrap_or(body);
                return Err(LlmError::Api {
                    status: status.as_u16(),
                    message,
                });
            }

            let chat_response: ChatResponse = response.json().await?;

            if let Some(usage) = &chat_response.usage {
                debug!(
                    "LLM call succeeded: prompt_tokens={}, completion_tokens={}",
                    usage.prompt_tokens, usage.completion_tokens
                );
            }

            return Ok(chat_response);
        }

        Err(last_error.unwrap_or(LlmError::RateLimited {
            retries: MAX_RETRIES,
        }))
    }

    /// Calls the model and deserializes the reply as JSON. The prompt must
    /// instruct the model to return valid JSON.
    pub async fn call_json<T: DeserializeOwned>(
        &self,
        prompt: &str,
        system: &str,
    ) -> Result<T, LlmError> {
        let response = self.call(prompt, system).await?;

        let text = response.text().ok_or(LlmError::EmptyContent)?;

        // Strip markdown code fences if the model wraps JSON in them
        let text = strip_json_fences(text);

        serde_json::from_str(text).map_err(LlmError::Parse)
    }
}

/// Structured result of parsing one announcement document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParsedAnnouncement {
    pub title: String,
    #[serde(default)]
    pub department: Option<String>,
    #[serde(default)]
    pub exam_type: Option<String>,
    #[serde(default)]
    pub year: Option<i32>,
    #[serde(default)]
    pub positions: Vec<crate::models::position::PositionUpsert>,
}

impl ParsedAnnouncement {
    /// Shape check on model output before anything is persisted.
    pub fn validate(&self) -> Result<(), LlmError> {
        if self.title.trim().is_empty() {
            return Err(LlmError::Invalid("announcement title is empty".into()));
        }
        for (i, p) in self.positions.iter().enumerate() {
            if p.position_id.trim().is_empty() {
                return Err(LlmError::Invalid(format!("position[{i}] has no position_id")));
            }
            if p.position_name.trim().is_empty() {
                return Err(LlmError::Invalid(format!("position[{i}] has no position_name")));
            }
            if let (Some(min), Some(max)) = (p.age_min, p.age_max) {
                if min > max {
                    return Err(LlmError::Invalid(format!(
                        "position[{i}] age range {min}-{max} is inverted"
                    )));
                }
            }
        }
        Ok(())
    }
}

/// Seam for announcement parsing, so the runner can be exercised without a
/// live model.
#[async_trait]
pub trait AnnouncementParser: Send + Sync {
    async fn parse_announcement(&self, content: &str) -> Result<ParsedAnnouncement, LlmError>;
}

#[async_trait]
impl AnnouncementParser for LlmClient {
    async fn parse_announcement(&self, content: &str) -> Result<ParsedAnnouncement, LlmError> {
        let prompt = prompts::announcement_prompt(content);
        let parsed: ParsedAnnouncement = self
            .call_json(&prompt, prompts::ANNOUNCEMENT_SYSTEM)
            .await?;
        parsed.validate()?;
        Ok(parsed)
    }
}

/// Strips ```json ... ``` or ``` ... ``` code fences from model output.
fn strip_json_fences(text: &str) -> &str {
    let text = text.trim();
    if let Some(stripped) = text.strip_prefix("```json") {
        stripped
            .trim_start()
            .strip_suffix("```")
            .map(|s| s.trim())
            .unwrap_or(stripped.trim_start())
    } else if let Some(stripped) = text.strip_prefix("```") {
        stripped
            .trim_start()
            .strip_suffix("```")
            .map(|s| s.trim())
            .unwrap_or(stripped.trim_start())
    } else {
        text
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strip_json_fences_with_json_tag() {
        let input = "```json\n{\"key\": \"value\"}\n```";
        assert_eq!(strip_json_fences(input), "{\"key\": \"value\"}");
    }

    #[test]
    fn test_strip_json_fences_without_tag() {
        let input = "```\n{\"key\": \"value\"}\n```";
        assert_eq!(strip_json_fences(input), "{\"key\": \"value\"}");
    }

    #[test]
    fn test_strip_json_fences_no_fences() {
        let input = "{\"key\": \"value\"}";
        assert_eq!(strip_json_fences(input), "{\"key\": \"value\"}");
    }

    #[test]
    fn test_transient_classification() {
        assert!(LlmError::Api { status: 429, message: String::new() }.is_transient());
        assert!(LlmError::Api { status: 503, message: String::new() }.is_transient());
        assert!(!LlmError::Api { status: 400, message: String::new() }.is_transient());
        assert!(!LlmError::EmptyContent.is_transient());
        assert!(!LlmError::Invalid("x".into()).is_transient());
    }

    #[test]
    fn test_parsed_announcement_validation() {
        let json = r#"{
            "title": "2025年度公务员招录公告",
            "positions": [
                {"position_id": "p-1", "position_name": "科员", "age_min": 18, "age_max": 35}
            ]
        }"#;
        let parsed: ParsedAnnouncement = serde_json::from_str(json).unwrap();
        assert!(parsed.validate().is_ok());
    }

    #[test]
    fn test_validation_rejects_missing_position_id() {
        let json = r#"{
            "title": "公告",
            "positions": [{"position_id": "", "position_name": "科员"}]
        }"#;
        let parsed: ParsedAnnouncement = serde_json::from_str(json).unwrap();
        assert!(matches!(parsed.validate(), Err(LlmError::Invalid(_))));
    }

    #[test]
    fn test_validation_rejects_inverted_age_range() {
        let json = r#"{
            "title": "公告",
            "positions": [{"position_id": "p-1", "position_name": "科员", "age_min": 40, "age_max": 35}]
        }"#;
        let parsed: ParsedAnnouncement = serde_json::from_str(json).unwrap();
        assert!(matches!(parsed.validate(), Err(LlmError::Invalid(_))));
    }

    #[test]
    fn test_empty_choices_is_empty_content() {
        let response = ChatResponse { choices: vec![], usage: None };
        assert!(response.text().is_none());
    }
}
