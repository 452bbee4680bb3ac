/// LLM Client: the single point of entry for calls to the external generator.
///
/// Speaks the OpenAI-compatible chat-completions protocol. No other module may
/// call the generator directly; the pipeline depends on the `Generator` trait so
/// tests can substitute a scripted fake.
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, warn};

use crate::models::enhancement::Language;

pub mod prompts;

/// Sentinel shipped in sample env files. A client configured with it is unavailable.
pub const PLACEHOLDER_API_KEY: &str = "your-openai-api-key-here";
pub const DEFAULT_API_BASE: &str = "https://api.openai.com/v1";
pub const DEFAULT_MODEL: &str = "gpt-3.5-turbo";
pub const DEFAULT_RETRY_BASE_DELAY: Duration = Duration::from_secs(1);
const MAX_RETRIES: u32 = 3;

#[derive(Debug, Error)]
pub enum GenerationError {
    #[error("Generator is not configured")]
    Unavailable,

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Generator timed out after {0}s")]
    Timeout(u64),

    #[error("API error (status {status}): {message}")]
    Api { status: u16, message: String },

    #[error("Malformed response envelope: {0}")]
    MalformedEnvelope(String),

    #[error("Generator returned empty content")]
    EmptyContent,

    #[error("Invalid suggestions payload: {0}")]
    InvalidSuggestions(String),
}

/// One generation job. Each variant maps to exactly one prompt.
#[derive(Debug, Clone, Copy)]
pub enum GenerationRequest<'a> {
    Enhance {
        source_text: &'a str,
        job_focus: Option<&'a str>,
        language: Language,
    },
    Translate {
        text: &'a str,
        language: Language,
    },
    Suggestions {
        structured: &'a Value,
        job_focus: Option<&'a str>,
    },
}

impl GenerationRequest<'_> {
    pub fn build_prompt(&self) -> String {
        match *self {
            GenerationRequest::Enhance {
                source_text,
                job_focus,
                language,
            } => prompts::enhance_prompt(source_text, job_focus, language),
            GenerationRequest::Translate { text, language } => {
                prompts::translate_prompt(text, language)
            }
            GenerationRequest::Suggestions {
                structured,
                job_focus,
            } => prompts::suggestions_prompt(structured, job_focus),
        }
    }

    fn label(&self) -> &'static str {
        match self {
            GenerationRequest::Enhance { .. } => "enhance",
            GenerationRequest::Translate { .. } => "translate",
            GenerationRequest::Suggestions { .. } => "suggestions",
        }
    }
}

/// The generator seam. Carried by the pipeline as `Arc<dyn Generator>`.
#[async_trait]
pub trait Generator: Send + Sync {
    /// Whether a call could possibly succeed (credentials configured).
    fn available(&self) -> bool;

    /// Returns the trimmed text of the first completion choice.
    async fn generate(&self, request: &GenerationRequest<'_>) -> Result<String, GenerationError>;
}

#[derive(Debug, Clone)]
pub struct LlmSettings {
    pub api_base: String,
    pub api_key: Option<String>,
    pub model: String,
    pub max_tokens: u32,
    pub temperature: f32,
    pub timeout: Duration,
    /// Delay before the first retry; doubled for each later one.
    pub retry_base_delay: Duration,
}

impl Default for LlmSettings {
    fn default() -> Self {
        Self {
            api_base: DEFAULT_API_BASE.to_string(),
            api_key: None,
            model: DEFAULT_MODEL.to_string(),
            max_tokens: 2000,
            temperature: 0.3,
            timeout: Duration::from_secs(60),
            retry_base_delay: DEFAULT_RETRY_BASE_DELAY,
        }
    }
}

#[derive(Debug, Serialize)]
struct ChatCompletionRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    max_tokens: u32,
    temperature: f32,
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
pub struct ChatCompletionResponse {
    #[serde(default)]
    pub choices: Vec<Choice>,
    pub usage: Option<Usage>,
}

#[derive(Debug, Deserialize)]
pub struct Choice {
    pub message: Option<ChoiceMessage>,
}

#[derive(Debug, Deserialize)]
pub struct ChoiceMessage {
    pub content: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct Usage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
}

impl ChatCompletionResponse {
    /// Content of the first choice's message. Later choices are ignored.
    pub fn first_message_text(&self) -> Option<&str> {
        self.choices
            .first()
            .and_then(|c| c.message.as_ref())
            .and_then(|m| m.content.as_deref())
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

/// Chat-completions client with bounded retries on 429 and 5xx.
#[derive(Clone)]
pub struct LlmClient {
    client: Client,
    settings: LlmSettings,
}

impl LlmClient {
    pub fn new(settings: LlmSettings) -> Result<Self> {
        let client = Client::builder()
            .timeout(settings.timeout)
            .build()
            .context("failed to build generator HTTP client")?;
        Ok(Self { client, settings })
    }

    pub fn model(&self) -> &str {
        &self.settings.model
    }

    fn completions_url(&self) -> String {
        format!(
            "{}/chat/completions",
            self.settings.api_base.trim_end_matches('/')
        )
    }

    /// Makes a raw chat-completions call and returns the decoded envelope.
    /// Retries on 429 (rate limit) and 5xx errors with exponential backoff.
    /// A timed-out attempt is not retried.
    pub async fn call(&self, prompt: &str) -> Result<ChatCompletionResponse, GenerationError> {
        let api_key = self.api_key().ok_or(GenerationError::Unavailable)?;
        let request_body = ChatCompletionRequest {
            model: &self.settings.model,
            messages: vec![ChatMessage {
                role: "user",
                content: prompt,
            }],
            max_tokens: self.settings.max_tokens,
            temperature: self.settings.temperature,
        };

        let url = self.completions_url();
        let mut last_error: Option<GenerationError> = None;

        for attempt in 0..MAX_RETRIES {
            if attempt > 0 {
                // Exponential backoff: base, then twice the base
                let delay = self.settings.retry_base_delay * (1 << (attempt - 1));
                warn!(
                    "Generator call attempt {} failed, retrying after {}ms...",
                    attempt,
                    delay.as_millis()
                );
                tokio::time::sleep(delay).await;
            }

            let response = self
                .client
                .post(&url)
                .bearer_auth(api_key)
                .json(&request_body)
                .send()
                .await;

            let response = match response {
                Ok(r) => r,
                Err(e) if e.is_timeout() => {
                    return Err(GenerationError::Timeout(self.settings.timeout.as_secs()));
                }
                Err(e) => {
                    last_error = Some(GenerationError::Http(e));
                    continue;
                }
            };

            let status = response.status();

            if status.as_u16() == 429 || status.is_server_error() {
                let body = response.text().await.unwrap_or_default();
                warn!("Generator API returned {}: {}", status, body);
                last_error = Some(GenerationError::Api {
                    status: status.as_u16(),
                    message: body,
                });
                continue;
            }

            let body = match response.text().await {
                Ok(body) => body,
                Err(e) if e.is_timeout() => {
                    return Err(GenerationError::Timeout(self.settings.timeout.as_secs()));
                }
                Err(e) => return Err(GenerationError::Http(e)),
            };

            if !status.is_success() {
                let message = serde_json::from_str::<ApiErrorEnvelope>(&body)
                    .map(|e| e.error.message)
                    .unwrap_or(body);
                return Err(GenerationError::Api {
                    status: status.as_u16(),
                    message,
                });
            }

            let envelope = decode_envelope(&body)?;
            if let Some(usage) = &envelope.usage {
                debug!(
                    "Generator call succeeded: prompt_tokens={}, completion_tokens={}",
                    usage.prompt_tokens, usage.completion_tokens
                );
            }
            return Ok(envelope);
        }

        Err(last_error.unwrap_or(GenerationError::Api {
            status: 429,
            message: format!("rate limited after {MAX_RETRIES} attempts"),
        }))
    }

    fn api_key(&self) -> Option<&str> {
        self.settings
            .api_key
            .as_deref()
            .map(str::trim)
            .filter(|key| !key.is_empty() && *key != PLACEHOLDER_API_KEY)
    }
}

#[async_trait]
impl Generator for LlmClient {
    fn available(&self) -> bool {
        self.api_key().is_some()
    }

    async fn generate(&self, request: &GenerationRequest<'_>) -> Result<String, GenerationError> {
        let prompt = request.build_prompt();
        debug!(
            "Calling generator for {} (prompt length {})",
            request.label(),
            prompt.len()
        );
        let envelope = self.call(&prompt).await?;
        first_choice_text(&envelope)
    }
}

pub fn decode_envelope(body: &str) -> Result<ChatCompletionResponse, GenerationError> {
    serde_json::from_str(body).map_err(|e| GenerationError::MalformedEnvelope(e.to_string()))
}

fn first_choice_text(envelope: &ChatCompletionResponse) -> Result<String, GenerationError> {
    if envelope.choices.is_empty() {
        return Err(GenerationError::MalformedEnvelope(
            "response has no choices".to_string(),
        ));
    }
    let text = envelope
        .first_message_text()
        .map(str::trim)
        .ok_or_else(|| {
            GenerationError::MalformedEnvelope("first choice has no message content".to_string())
        })?;
    if text.is_empty() {
        return Err(GenerationError::EmptyContent);
    }
    Ok(text.to_string())
}

/// Decodes a suggestions completion: `{"suggestions": ["...", ...]}`.
///
/// Models often answer with single-quoted pseudo-JSON, so single quotes are
/// rewritten to double quotes before parsing.
pub fn parse_suggestions(raw: &str) -> Result<Vec<String>, GenerationError> {
    let normalized = strip_json_fences(raw).replace('\'', "\"");
    let value: Value = serde_json::from_str(&normalized)
        .map_err(|e| GenerationError::InvalidSuggestions(e.to_string()))?;

    let items = value
        .get("suggestions")
        .and_then(Value::as_array)
        .ok_or_else(|| {
            GenerationError::InvalidSuggestions("missing 'suggestions' array".to_string())
        })?;

    let suggestions = items
        .iter()
        .map(|item| {
            item.as_str()
                .map(|s| s.trim().to_string())
                .ok_or_else(|| {
                    GenerationError::InvalidSuggestions(format!("non-string suggestion: {item}"))
                })
        })
        .collect::<Result<Vec<_>, _>>()?;

    if suggestions.iter().all(|s| s.is_empty()) {
        return Err(GenerationError::InvalidSuggestions(
            "no suggestions returned".to_string(),
        ));
    }
    Ok(suggestions.into_iter().filter(|s| !s.is_empty()).collect())
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
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use axum::{
        http::StatusCode,
        response::IntoResponse,
        routing::post,
        Json, Router,
    };
    use serde_json::json;

    use crate::testing::serve_local;

    fn client_with_key(key: Option<&str>) -> LlmClient {
        LlmClient::new(LlmSettings {
            api_key: key.map(str::to_string),
            ..LlmSettings::default()
        })
        .unwrap()
    }

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
    fn test_availability_requires_real_key() {
        assert!(!client_with_key(None).available());
        assert!(!client_with_key(Some("")).available());
        assert!(!client_with_key(Some(PLACEHOLDER_API_KEY)).available());
        assert!(client_with_key(Some("sk-test")).available());
    }

    #[tokio::test]
    async fn test_unavailable_client_fails_without_network() {
        let client = client_with_key(None);
        let err = client
            .generate(&GenerationRequest::Translate {
                text: "hello",
                language: Language::Fr,
            })
            .await
            .unwrap_err();
        assert!(matches!(err, GenerationError::Unavailable));
    }

    #[test]
    fn test_first_choice_content_is_extracted() {
        let body = r#"{
            "choices": [
                {"message": {"role": "assistant", "content": "  first  "}},
                {"message": {"role": "assistant", "content": "second"}}
            ],
            "usage": {"prompt_tokens": 10, "completion_tokens": 2}
        }"#;
        let envelope = decode_envelope(body).unwrap();
        assert_eq!(first_choice_text(&envelope).unwrap(), "first");
    }

    #[test]
    fn test_missing_choices_is_malformed() {
        let envelope = decode_envelope(r#"{"id": "x"}"#).unwrap();
        assert!(matches!(
            first_choice_text(&envelope),
            Err(GenerationError::MalformedEnvelope(_))
        ));

        let envelope = decode_envelope(r#"{"choices": [{"finish_reason": "stop"}]}"#).unwrap();
        assert!(matches!(
            first_choice_text(&envelope),
            Err(GenerationError::MalformedEnvelope(_))
        ));

        assert!(matches!(
            decode_envelope("not json"),
            Err(GenerationError::MalformedEnvelope(_))
        ));
    }

    #[test]
    fn test_blank_content_is_empty() {
        let envelope =
            decode_envelope(r#"{"choices": [{"message": {"content": "   "}}]}"#).unwrap();
        assert!(matches!(
            first_choice_text(&envelope),
            Err(GenerationError::EmptyContent)
        ));
    }

    #[test]
    fn test_parse_suggestions_accepts_single_quotes_and_fences() {
        let raw = "```json\n{'suggestions': ['Learn Kubernetes', 'Quantify impact']}\n```";
        assert_eq!(
            parse_suggestions(raw).unwrap(),
            vec!["Learn Kubernetes".to_string(), "Quantify impact".to_string()]
        );
    }

    #[test]
    fn test_parse_suggestions_rejects_bad_shapes() {
        for raw in [
            "plain prose",
            r#"{"ideas": ["a"]}"#,
            r#"{"suggestions": "a"}"#,
            r#"{"suggestions": [1, 2]}"#,
            r#"{"suggestions": []}"#,
        ] {
            assert!(
                matches!(
                    parse_suggestions(raw),
                    Err(GenerationError::InvalidSuggestions(_))
                ),
                "expected rejection for {raw}"
            );
        }
    }

    #[test]
    fn test_build_prompt_dispatches_by_variant() {
        let structured = serde_json::json!({"skills": ["Go"]});
        let prompt = GenerationRequest::Suggestions {
            structured: &structured,
            job_focus: Some("Backend"),
        }
        .build_prompt();
        assert!(prompt.contains(r#""skills":["Go"]"#));
        assert!(prompt.contains("Backend"));
    }

    /// A client pointed at `app` served on a local port.
    async fn local_client(app: Router, timeout: Duration) -> LlmClient {
        let addr = serve_local(app).await;
        LlmClient::new(LlmSettings {
            api_base: format!("http://{addr}"),
            api_key: Some("sk-test".to_string()),
            timeout,
            retry_base_delay: Duration::from_millis(10),
            ..LlmSettings::default()
        })
        .unwrap()
    }

    fn translate() -> GenerationRequest<'static> {
        GenerationRequest::Translate {
            text: "hello",
            language: Language::Fr,
        }
    }

    /// Completions endpoint answering every call with `status` and `body`, counting hits.
    fn fixed_endpoint(status: StatusCode, body: &'static str) -> (Router, Arc<AtomicUsize>) {
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = hits.clone();
        let app = Router::new().route(
            "/chat/completions",
            post(move || {
                let counter = counter.clone();
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    (status, body)
                }
            }),
        );
        (app, hits)
    }

    #[tokio::test]
    async fn test_slow_generator_times_out_without_retry() {
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = hits.clone();
        let app = Router::new().route(
            "/chat/completions",
            post(move || {
                let counter = counter.clone();
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_secs(5)).await;
                    "too late"
                }
            }),
        );
        let client = local_client(app, Duration::from_millis(200)).await;

        let err = client.generate(&translate()).await.unwrap_err();
        assert!(matches!(err, GenerationError::Timeout(_)), "got {err:?}");
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_client_error_surfaces_api_message() {
        let (app, hits) = fixed_endpoint(
            StatusCode::BAD_REQUEST,
            r#"{"error": {"message": "model not found", "type": "invalid_request_error"}}"#,
        );
        let client = local_client(app, Duration::from_secs(5)).await;

        let err = client.generate(&translate()).await.unwrap_err();
        match err {
            GenerationError::Api { status, message } => {
                assert_eq!(status, 400);
                assert_eq!(message, "model not found");
            }
            other => panic!("expected API error, got {other:?}"),
        }
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_server_errors_are_retried_then_surfaced() {
        let (app, hits) = fixed_endpoint(StatusCode::SERVICE_UNAVAILABLE, "overloaded");
        let client = local_client(app, Duration::from_secs(5)).await;

        let err = client.generate(&translate()).await.unwrap_err();
        match err {
            GenerationError::Api { status, message } => {
                assert_eq!(status, 503);
                assert_eq!(message, "overloaded");
            }
            other => panic!("expected API error, got {other:?}"),
        }
        assert_eq!(hits.load(Ordering::SeqCst), MAX_RETRIES as usize);
    }

    #[tokio::test]
    async fn test_transient_server_error_recovers_on_retry() {
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = hits.clone();
        let app = Router::new().route(
            "/chat/completions",
            post(move || {
                let counter = counter.clone();
                async move {
                    if counter.fetch_add(1, Ordering::SeqCst) == 0 {
                        return (StatusCode::INTERNAL_SERVER_ERROR, "boom").into_response();
                    }
                    Json(json!({
                        "choices": [{"message": {"role": "assistant", "content": " Bonjour "}}],
                        "usage": {"prompt_tokens": 5, "completion_tokens": 1}
                    }))
                    .into_response()
                }
            }),
        );
        let client = local_client(app, Duration::from_secs(5)).await;

        assert_eq!(client.generate(&translate()).await.unwrap(), "Bonjour");
        assert_eq!(hits.load(Ordering::SeqCst), 2);
    }
}
