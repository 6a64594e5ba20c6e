//! LLM backend adapter.
//!
//! Two wire flavors share one semantic contract (one prompt in, one summary
//! out): the flat OpenAI chat-completion shape, and the qwen shape with its
//! request nested under `input` and response under `output`. The flavor is
//! picked once from the model name; both responses funnel through the same
//! first-choice extraction.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::LlmSettings;
use crate::error::LlmError;

/// Model-name prefix selecting the qwen wire flavor.
pub const QWEN_MODEL_PREFIX: &str = "qwen";

/// Summarization backend seam; production impl is [`LlmClient`].
#[async_trait]
pub trait Summarizer: Send + Sync {
    /// Turn a fully-substituted prompt into a summary.
    async fn summarize(&self, prompt: &str) -> Result<String, LlmError>;
}

/// Wire encoding flavor, selected by model-name prefix.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendFlavor {
    OpenAiChat,
    Qwen,
}

impl BackendFlavor {
    pub fn for_model(model: &str) -> Self {
        if model.starts_with(QWEN_MODEL_PREFIX) {
            Self::Qwen
        } else {
            Self::OpenAiChat
        }
    }
}

/// One chat-style message, shared by both request and response shapes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    #[serde(default)]
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".to_string(),
            content: content.into(),
        }
    }
}

// ── Request shapes ──────────────────────────────────────────────────

#[derive(Debug, Serialize)]
struct OpenAiRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage>,
    user: &'a str,
}

#[derive(Debug, Serialize)]
struct QwenRequest<'a> {
    model: &'a str,
    input: QwenInput,
    parameters: QwenParameters,
}

#[derive(Debug, Serialize)]
struct QwenInput {
    messages: Vec<ChatMessage>,
}

#[derive(Debug, Serialize)]
struct QwenParameters {
    result_format: &'static str,
}

/// Build the request body for the given flavor: a single user-role
/// message carrying the prompt.
pub fn build_request(
    flavor: BackendFlavor,
    model: &str,
    prompt: &str,
) -> Result<serde_json::Value, serde_json::Error> {
    let messages = vec![ChatMessage::user(prompt)];
    match flavor {
        BackendFlavor::OpenAiChat => serde_json::to_value(OpenAiRequest {
            model,
            messages,
            user: "",
        }),
        BackendFlavor::Qwen => serde_json::to_value(QwenRequest {
            model,
            input: QwenInput { messages },
            parameters: QwenParameters {
                result_format: "message",
            },
        }),
    }
}

// ── Response shapes ─────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct Choice {
    message: ChatMessage,
}

#[derive(Debug, Deserialize)]
struct OpenAiResponse {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct QwenResponse {
    output: QwenOutput,
}

#[derive(Debug, Deserialize)]
struct QwenOutput {
    #[serde(default)]
    choices: Vec<Choice>,
}

/// Parse a response body into its summary text.
pub fn parse_response(flavor: BackendFlavor, body: &[u8]) -> Result<String, LlmError> {
    let choices = match flavor {
        BackendFlavor::OpenAiChat => {
            serde_json::from_slice::<OpenAiResponse>(body)
                .map_err(|e| LlmError::InvalidResponse(e.to_string()))?
                .choices
        }
        BackendFlavor::Qwen => {
            serde_json::from_slice::<QwenResponse>(body)
                .map_err(|e| LlmError::InvalidResponse(e.to_string()))?
                .output
                .choices
        }
    };
    first_choice_content(choices)
}

/// Shared "first choice's message content" extraction for both flavors.
fn first_choice_content(choices: Vec<Choice>) -> Result<String, LlmError> {
    choices
        .into_iter()
        .next()
        .map(|c| c.message.content)
        .ok_or(LlmError::NoChoices)
}

// ── Client ──────────────────────────────────────────────────────────

/// HTTP client for the summarization backend. Holds the process-wide
/// `reqwest::Client` (constructed once with a 30s timeout).
pub struct LlmClient {
    client: reqwest::Client,
    endpoint: String,
    token: String,
    model: String,
    flavor: BackendFlavor,
}

impl LlmClient {
    pub fn new(client: reqwest::Client, settings: &LlmSettings) -> Self {
        Self {
            client,
            endpoint: format!("{}{}", settings.host, settings.api),
            token: settings.token.clone(),
            model: settings.model.clone(),
            flavor: BackendFlavor::for_model(&settings.model),
        }
    }
}

#[async_trait]
impl Summarizer for LlmClient {
    async fn summarize(&self, prompt: &str) -> Result<String, LlmError> {
        let request = build_request(self.flavor, &self.model, prompt)?;
        debug!(model = %self.model, flavor = ?self.flavor, "calling summarization backend");

        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.token)
            .json(&request)
            .send()
            .await
            .map_err(|e| LlmError::Request(e.to_string()))?;

        let status = response.status();
        let body = response
            .bytes()
            .await
            .map_err(|e| LlmError::Request(e.to_string()))?;

        if !status.is_success() {
            return Err(LlmError::Request(format!(
                "HTTP {status}: {}",
                String::from_utf8_lossy(&body)
            )));
        }

        parse_response(self.flavor, &body)
    }
}
