use std::time::Duration;

use openai::chat::{ChatCompletionMessage, ChatCompletionMessageRole};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tokio::time;
use tracing::{debug, error, warn};

/// Connection parameters for the chat completion endpoint.
#[derive(Debug, Clone)]
pub struct OpenAiSettings {
    pub api_key: Option<String>,
    /// Base URL without trailing slash, e.g. `https://api.openai.com`.
    pub api_base: String,
    pub model: String,
    pub max_tokens: u32,
    pub temperature: f32,
    /// Additional attempts after a network failure or a 5xx answer.
    pub retries: usize,
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: &'a [ChatCompletionMessage],
    max_tokens: u32,
    temperature: f32,
}

#[derive(Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: ResponseMessage,
}

#[derive(Deserialize)]
struct ResponseMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(thiserror::Error, Debug)]
pub enum PromptError {
    #[error("OpenAI API key is not configured")]
    MissingApiKey,
    #[error("network error: {0}")]
    Network(String),
    #[error("http error: {0}")]
    Http(u16),
    #[error("parse error: {0}")]
    Parse(String),
    #[error("empty answer")]
    EmptyAnswer,
}

pub fn msg(role: ChatCompletionMessageRole, txt: &str) -> ChatCompletionMessage {
    ChatCompletionMessage {
        role,
        content: Some(txt.to_string()),
        ..Default::default()
    }
}

/// Send chat messages to OpenAI and return the assistant's answer.
///
/// `max_tokens` and `temperature` fall back to the values from `settings`.
/// Network failures and 5xx answers are retried with exponential backoff;
/// any other non-success status is returned as [`PromptError::Http`].
pub async fn call_openai_chat(
    client: &Client,
    settings: &OpenAiSettings,
    messages: Vec<ChatCompletionMessage>,
    max_tokens: Option<u32>,
    temperature: Option<f32>,
) -> Result<String, PromptError> {
    let key = settings.api_key.as_deref().ok_or(PromptError::MissingApiKey)?;

    let req = ChatRequest {
        model: &settings.model,
        messages: &messages,
        max_tokens: max_tokens.unwrap_or(settings.max_tokens),
        temperature: temperature.unwrap_or(settings.temperature),
    };
    let url = format!("{}/v1/chat/completions", settings.api_base);

    let mut last_err = PromptError::EmptyAnswer;
    for i in 0..=settings.retries {
        debug!(model = req.model, attempt = i, "\u{2192} OpenAI request");
        match client.post(&url).bearer_auth(key).json(&req).send().await {
            Ok(res) => {
                let status = res.status();
                let bytes = res
                    .bytes()
                    .await
                    .map_err(|e| PromptError::Network(e.to_string()))?;
                debug!(
                    %status,
                    "\u{2190} body = {}",
                    String::from_utf8_lossy(&bytes[..bytes.len().min(1024)])
                );

                if status.is_server_error() {
                    warn!(%status, retry = i, "OpenAI server error");
                    last_err = PromptError::Http(status.as_u16());
                } else if !status.is_success() {
                    return Err(PromptError::Http(status.as_u16()));
                } else {
                    let chat: ChatResponse =
                        serde_json::from_slice(&bytes).map_err(|e| PromptError::Parse(e.to_string()))?;
                    return chat
                        .choices
                        .into_iter()
                        .next()
                        .and_then(|c| c.message.content)
                        .map(|c| c.trim().to_string())
                        .filter(|c| !c.is_empty())
                        .ok_or(PromptError::EmptyAnswer);
                }
            }
            Err(e) => {
                error!("network error to OpenAI: {e}");
                last_err = PromptError::Network(e.to_string());
            }
        }
        if i < settings.retries {
            let wait = 100 * (1u64 << i.min(3));
            time::sleep(Duration::from_millis(wait)).await;
        }
    }
    Err(last_err)
}
