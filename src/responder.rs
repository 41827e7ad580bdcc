//! Chat-completion response generator

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};

use crate::conversation::{ChatMessage, Reply, ResponseGenerator, ResponseRequest, Role};
use crate::{Error, Result};

/// Default chat-completions endpoint
pub const DEFAULT_API_URL: &str = "https://api.openai.com/v1/chat/completions";

/// Used when the endpoint returns no choices
pub const NO_RESPONSE: &str = "Yanıt alınamadı.";

/// Chat model settings
#[derive(Debug, Clone, PartialEq)]
pub struct LlmConfig {
    /// Model identifier
    pub model: String,
    /// Sampling temperature
    pub temperature: f32,
    /// Completion length cap
    pub max_tokens: u32,
    /// Chat-completions endpoint
    pub api_url: String,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            model: "gpt-4o".to_string(),
            temperature: 0.7,
            max_tokens: 500,
            api_url: DEFAULT_API_URL.to_string(),
        }
    }
}

/// Answers questions about a meeting over an OpenAI-compatible endpoint
pub struct ChatResponder {
    client: Client,
    api_key: SecretString,
    config: LlmConfig,
    language: String,
}

impl ChatResponder {
    /// Create a responder answering in the language of `locale`
    ///
    /// # Errors
    ///
    /// Returns error if API key is missing
    pub fn new(api_key: SecretString, config: LlmConfig, locale: &str) -> Result<Self> {
        if api_key.expose_secret().is_empty() {
            return Err(Error::Config(
                "OpenAI API key required for responses".to_string(),
            ));
        }

        Ok(Self {
            client: Client::new(),
            api_key,
            config,
            language: language_name(locale).to_string(),
        })
    }

    fn build_request(&self, request: &ResponseRequest) -> ChatCompletionRequest {
        let mut messages = Vec::with_capacity(request.history.len() + 2);
        messages.push(Message {
            role: "system",
            content: system_prompt(&self.language, &request.context),
        });
        messages.extend(request.history.iter().map(Message::from_chat));
        messages.push(Message {
            role: "user",
            content: request.user_text.clone(),
        });

        ChatCompletionRequest {
            model: self.config.model.clone(),
            messages,
            temperature: self.config.temperature,
            max_tokens: self.config.max_tokens,
        }
    }
}

#[async_trait]
impl ResponseGenerator for ChatResponder {
    async fn generate(&self, request: ResponseRequest) -> Result<Reply> {
        let body = self.build_request(&request);
        tracing::debug!(
            model = %self.config.model,
            history = request.history.len(),
            "requesting chat completion"
        );

        let response = self
            .client
            .post(&self.config.api_url)
            .bearer_auth(self.api_key.expose_secret())
            .json(&body)
            .send()
            .await
            .map_err(|e| Error::Response(format!("chat request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(status_error(status, &body));
        }

        let result: ChatCompletionResponse = response
            .json()
            .await
            .map_err(|e| Error::Response(format!("failed to parse chat response: {e}")))?;

        let text = result
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .filter(|content| !content.trim().is_empty())
            .unwrap_or_else(|| NO_RESPONSE.to_string());

        Ok(Reply::text(text))
    }
}

/// Map a failed HTTP status to a descriptive error
fn status_error(status: StatusCode, body: &str) -> Error {
    let detail = serde_json::from_str::<ApiErrorBody>(body)
        .map(|e| e.error.message)
        .unwrap_or_else(|_| body.to_string());

    match status {
        StatusCode::UNAUTHORIZED => Error::Response("API key rejected".to_string()),
        StatusCode::TOO_MANY_REQUESTS => {
            Error::Response("rate limited, too many requests".to_string())
        }
        _ => Error::Response(format!("API error {status}: {detail}")),
    }
}

/// English name of a locale's language, for the prompt
fn language_name(locale: &str) -> &str {
    match locale.split(['-', '_']).next().unwrap_or_default() {
        "tr" => "Turkish",
        "en" => "English",
        "de" => "German",
        "fr" => "French",
        "es" => "Spanish",
        _ => "the user's language",
    }
}

fn system_prompt(language: &str, context: &str) -> String {
    let persona = format!(
        "You are Enerwise AI, a meeting assistant. After a meeting ends, people talk to you \
         by voice and ask questions about it. Answer from the meeting transcript.\n\n\
         Rules:\n\
         1. Answer in {language}.\n\
         2. Keep it short: your answer is spoken aloud, so use at most 2-3 sentences.\n\
         3. Politely steer questions outside the meeting back to the meeting.\n\
         4. If a topic was not discussed, say that it was not covered in the meeting.\n\
         5. Be helpful and professional.\n\
         6. Do not use emoji; your answer will be read aloud."
    );

    if context.trim().is_empty() {
        format!("{persona}\n\n(No meeting transcript is available yet.)")
    } else {
        format!(
            "{persona}\n\n--- MEETING TRANSCRIPT ---\n{}\n--- END OF TRANSCRIPT ---",
            context.trim()
        )
    }
}

#[derive(Serialize)]
struct ChatCompletionRequest {
    model: String,
    messages: Vec<Message>,
    temperature: f32,
    max_tokens: u32,
}

#[derive(Serialize)]
struct Message {
    role: &'static str,
    content: String,
}

impl Message {
    fn from_chat(message: &ChatMessage) -> Self {
        Self {
            role: match message.role {
                Role::User => "user",
                Role::Assistant => "assistant",
            },
            content: message.text.clone(),
        }
    }
}

#[derive(Deserialize)]
struct ChatCompletionResponse {
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: ResponseMessage,
}

#[derive(Deserialize)]
struct ResponseMessage {
    content: Option<String>,
}

#[derive(Deserialize)]
struct ApiErrorBody {
    error: ApiErrorDetail,
}

#[derive(Deserialize)]
struct ApiErrorDetail {
    message: String,
}
