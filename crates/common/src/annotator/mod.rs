//! Annotation oracle abstraction
//!
//! Provides a unified interface for the services that score comments:
//! - OpenAI-compatible chat completion endpoints (DeepSeek by default)
//! - A deterministic mock for local runs and tests

use crate::config::AnnotationConfig;
use crate::domain::Annotation;
use crate::errors::{AppError, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

/// Input for a single oracle call
#[derive(Debug, Clone, Serialize)]
pub struct AnnotationRequest {
    pub content: String,
    pub video_title: String,
    pub video_description: String,
    pub is_reply: bool,
}

/// Trait for comment annotation
#[async_trait]
pub trait Annotator: Send + Sync {
    /// Score one comment. Each call is independent; callers isolate failures.
    async fn annotate(&self, request: &AnnotationRequest) -> Result<Annotation>;

    /// Get the model name
    fn model_name(&self) -> &str;
}

const SYSTEM_PROMPT: &str = "You analyse viewer comments posted under an online video. \
Reply with a single JSON object and nothing else, using exactly these keys: \
\"score\": sentiment from 0.0 (very negative) to 1.0 (very positive); \
\"relevance\": how closely the comment relates to the video content, from 0.0 to 1.0; \
\"tags\": up to three short topic tags in the comment's language.";

/// Chat-completion backed annotator
pub struct LlmAnnotator {
    client: reqwest::Client,
    api_key: String,
    model: String,
    base_url: String,
    temperature: f32,
    timeout: Duration,
}

#[derive(Serialize)]
struct ChatMessage {
    role: &'static str,
    content: String,
}

#[derive(Serialize)]
struct ResponseFormat {
    #[serde(rename = "type")]
    kind: &'static str,
}

#[derive(Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<ChatMessage>,
    temperature: f32,
    response_format: ResponseFormat,
}

#[derive(Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatMessageResponse,
}

#[derive(Deserialize)]
struct ChatMessageResponse {
    #[serde(default)]
    content: Option<String>,
}

/// Oracle payload; numeric fields may arrive as strings
#[derive(Deserialize)]
struct RawAnnotation {
    score: Option<serde_json::Value>,
    relevance: Option<serde_json::Value>,
    #[serde(default)]
    tags: Option<serde_json::Value>,
}

impl LlmAnnotator {
    /// Create a new chat-completion annotator
    pub fn new(config: &AnnotationConfig, api_key: String) -> Result<Self> {
        let timeout = Duration::from_secs(config.timeout_secs);
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| AppError::Internal {
                message: format!("Failed to create HTTP client: {}", e),
            })?;

        Ok(Self {
            client,
            api_key,
            model: config.model.clone(),
            base_url: config.api_base.trim_end_matches('/').to_string(),
            temperature: config.temperature,
            timeout,
        })
    }

    fn build_prompt(request: &AnnotationRequest) -> String {
        let position = if request.is_reply {
            "This comment is a reply inside another comment's thread; judge it in that conversational context."
        } else {
            "This comment is a top-level comment on the video."
        };

        format!(
            "Video title: {}\nVideo description: {}\n{}\n\nComment:\n{}",
            request.video_title, request.video_description, position, request.content
        )
    }

    async fn make_request(&self, request: &AnnotationRequest) -> Result<String> {
        let url = format!("{}/chat/completions", self.base_url);

        let body = ChatRequest {
            model: self.model.clone(),
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: SYSTEM_PROMPT.to_string(),
                },
                ChatMessage {
                    role: "user",
                    content: Self::build_prompt(request),
                },
            ],
            temperature: self.temperature,
            response_format: ResponseFormat { kind: "json_object" },
        };

        let response = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(&body)
            .send()
            .await
            .map_err(|e| self.transport_error(e))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(AppError::Annotation {
                message: format!("API error {}: {}", status, body),
            });
        }

        let chat: ChatResponse = response.json().await.map_err(|e| AppError::Annotation {
            message: format!("Failed to parse response: {}", e),
        })?;

        chat.choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or_else(|| AppError::Annotation {
                message: "Empty response from annotation service".to_string(),
            })
    }

    fn transport_error(&self, e: reqwest::Error) -> AppError {
        if e.is_timeout() {
            AppError::AnnotationTimeout {
                timeout_ms: self.timeout.as_millis() as u64,
            }
        } else {
            AppError::Annotation {
                message: format!("Request failed: {}", e),
            }
        }
    }
}

#[async_trait]
impl Annotator for LlmAnnotator {
    async fn annotate(&self, request: &AnnotationRequest) -> Result<Annotation> {
        let content = self.make_request(request).await?;
        parse_annotation(&content)
    }

    fn model_name(&self) -> &str {
        &self.model
    }
}

/// Decode the oracle's message body into an [`Annotation`].
///
/// Tolerates markdown code fences and text around the JSON object. A missing
/// or non-numeric `score` is malformed; a missing `relevance` is neutral.
pub fn parse_annotation(content: &str) -> Result<Annotation> {
    let malformed = |reason: &str| AppError::Annotation {
        message: format!("Malformed annotation ({}): {}", reason, truncate(content, 120)),
    };

    let start = content.find('{').ok_or_else(|| malformed("no JSON object"))?;
    let end = content.rfind('}').ok_or_else(|| malformed("no JSON object"))?;
    if end < start {
        return Err(malformed("no JSON object"));
    }

    let raw: RawAnnotation =
        serde_json::from_str(&content[start..=end]).map_err(|_| malformed("invalid JSON"))?;

    let score = raw
        .score
        .as_ref()
        .and_then(as_f64)
        .ok_or_else(|| malformed("missing score"))?;
    let relevance = raw
        .relevance
        .as_ref()
        .and_then(as_f64)
        .unwrap_or(crate::NEUTRAL_SENTIMENT);

    let tags: Vec<String> = match raw.tags {
        Some(serde_json::Value::Array(items)) => items
            .into_iter()
            .filter_map(|v| match v {
                serde_json::Value::String(s) => Some(s),
                _ => None,
            })
            .collect(),
        Some(serde_json::Value::String(joined)) => {
            joined.split([',', '，']).map(str::to_string).collect()
        }
        _ => Vec::new(),
    };

    Ok(Annotation::new(score, relevance, tags))
}

fn as_f64(value: &serde_json::Value) -> Option<f64> {
    match value {
        serde_json::Value::Number(n) => n.as_f64(),
        serde_json::Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn truncate(text: &str, max_chars: usize) -> String {
    text.chars().take(max_chars).collect()
}

/// Mock annotator for testing and offline runs
pub struct MockAnnotator {
    sentiment: f64,
    relevance: f64,
}

impl MockAnnotator {
    pub fn new() -> Self {
        Self {
            sentiment: crate::NEUTRAL_SENTIMENT,
            relevance: crate::NEUTRAL_SENTIMENT,
        }
    }

    pub fn with_scores(sentiment: f64, relevance: f64) -> Self {
        Self { sentiment, relevance }
    }
}

impl Default for MockAnnotator {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Annotator for MockAnnotator {
    async fn annotate(&self, request: &AnnotationRequest) -> Result<Annotation> {
        let kind = if request.is_reply { "reply" } else { "main" };
        Ok(Annotation::new(self.sentiment, self.relevance, [kind]))
    }

    fn model_name(&self) -> &str {
        "mock-annotator"
    }
}

/// Create an annotator based on configuration
pub fn create_annotator(config: &AnnotationConfig) -> Result<Arc<dyn Annotator>> {
    match config.provider.as_str() {
        "openai" | "deepseek" => {
            let key = config.api_key.clone().ok_or_else(|| AppError::Configuration {
                message: "annotation.api_key is required for the openai provider".to_string(),
            })?;
            Ok(Arc::new(LlmAnnotator::new(config, key)?))
        }
        "mock" => Ok(Arc::new(MockAnnotator::new())),
        other => {
            tracing::warn!(provider = other, "Unknown annotation provider, using mock");
            Ok(Arc::new(MockAnnotator::new()))
        }
    }
}
