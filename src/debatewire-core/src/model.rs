//! Model invocation.
//!
//! One opaque seam for the turn engine: history in, utterance text out.
//! The OpenAI-compatible implementation retries transient failures with
//! exponential backoff and sanitizes reasoning artifacts out of responses.

use std::time::Duration;

use async_openai::Client;
use async_openai::config::OpenAIConfig;
use async_openai::types::chat::{
    ChatCompletionRequestAssistantMessage, ChatCompletionRequestMessage,
    ChatCompletionRequestSystemMessage, ChatCompletionRequestUserMessage,
    CreateChatCompletionRequestArgs,
};
use async_trait::async_trait;
use tracing::warn;

use crate::config::{SamplingParams, SessionConfig};
use crate::error::DebateError;
use crate::history::{ChatRole, History};

/// Externally hosted language model, as seen by the turn engine.
#[async_trait]
pub trait ModelClient: Send + Sync {
    /// Produce the next utterance from a side's history.
    async fn complete(
        &self,
        model: &str,
        sampling: &SamplingParams,
        history: &History,
    ) -> Result<String, DebateError>;

    /// One-word display name for a debater, avoiding `blacklisted`.
    async fn generate_name(
        &self,
        model: &str,
        sampling: &SamplingParams,
        blacklisted: Option<&str>,
    ) -> Result<String, DebateError>;
}

/// Client for any OpenAI-compatible chat-completion endpoint.
pub struct OpenAiModelClient {
    api_base: String,
    api_key: String,
}

impl OpenAiModelClient {
    pub fn new(api_base: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            api_base: api_base.into(),
            api_key: api_key.into(),
        }
    }

    fn client(&self) -> Result<Client<OpenAIConfig>, DebateError> {
        let http_client = reqwest::Client::builder()
            .timeout(Duration::from_secs(120))
            .connect_timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| DebateError::Config(format!("failed to create HTTP client: {e}")))?;

        let config = OpenAIConfig::new()
            .with_api_key(&self.api_key)
            .with_api_base(&self.api_base);

        Ok(Client::with_config(config).with_http_client(http_client))
    }

    fn request_messages(history: &History) -> Vec<ChatCompletionRequestMessage> {
        history
            .records()
            .iter()
            .map(|record| match record.role {
                ChatRole::System => {
                    ChatCompletionRequestMessage::System(ChatCompletionRequestSystemMessage {
                        content: record.content.clone().into(),
                        name: None,
                    })
                }
                ChatRole::User => {
                    ChatCompletionRequestMessage::User(ChatCompletionRequestUserMessage {
                        content: record.content.clone().into(),
                        name: None,
                    })
                }
                ChatRole::Assistant => {
                    ChatCompletionRequestMessage::Assistant(ChatCompletionRequestAssistantMessage {
                        content: Some(record.content.clone().into()),
                        name: None,
                        tool_calls: None,
                        refusal: None,
                        audio: None,
                        function_call: None,
                    })
                }
            })
            .collect()
    }

    async fn create_with_retry(
        &self,
        model: &str,
        sampling: &SamplingParams,
        messages: Vec<ChatCompletionRequestMessage>,
    ) -> Result<String, DebateError> {
        let client = self.client()?;
        let request = CreateChatCompletionRequestArgs::default()
            .model(model)
            .temperature(sampling.temperature)
            .frequency_penalty(sampling.frequency_penalty)
            .presence_penalty(sampling.presence_penalty)
            .messages(messages)
            .build()?;

        let max_retries = 3;
        let mut last_error = None;

        for attempt in 0..max_retries {
            if attempt > 0 {
                // Exponential backoff: 1s, 2s, 4s
                tokio::time::sleep(Duration::from_secs(1 << attempt)).await;
            }

            match client.chat().create(request.clone()).await {
                Ok(response) => {
                    let content = response
                        .choices
                        .first()
                        .and_then(|c| c.message.content.clone())
                        .unwrap_or_default();
                    return Ok(content);
                }
                Err(e) => {
                    warn!(attempt, model, error = %e, "chat completion failed");
                    last_error = Some(e);
                }
            }
        }

        Err(last_error.map(DebateError::from).unwrap_or_else(|| {
            DebateError::Config("unknown API error after retries".to_string())
        }))
    }
}

#[async_trait]
impl ModelClient for OpenAiModelClient {
    async fn complete(
        &self,
        model: &str,
        sampling: &SamplingParams,
        history: &History,
    ) -> Result<String, DebateError> {
        let raw = self
            .create_with_retry(model, sampling, Self::request_messages(history))
            .await?;
        let sanitized = sanitize_response(&raw);
        if sanitized.is_empty() {
            return Err(DebateError::Config(format!(
                "model '{model}' returned an empty response"
            )));
        }
        Ok(sanitized)
    }

    async fn generate_name(
        &self,
        model: &str,
        sampling: &SamplingParams,
        blacklisted: Option<&str>,
    ) -> Result<String, DebateError> {
        let prompt = match blacklisted {
            Some(taken) => format!(
                "Give me a single-word first name for a person that is not {taken}. \
                 Do not simulate an answer, I only need a name. \
                 The name cannot be a number or a digit."
            ),
            None => "Give me a single-word first name for a person. \
                     Do not simulate an answer, I only need a name. \
                     The name cannot be a number or a digit."
                .to_string(),
        };
        let messages = vec![ChatCompletionRequestMessage::User(
            ChatCompletionRequestUserMessage {
                content: prompt.into(),
                name: None,
            },
        )];
        let raw = self.create_with_retry(model, sampling, messages).await?;
        let name = sanitize_name(&raw);
        if name.is_empty() {
            return Err(DebateError::Config(format!(
                "model '{model}' did not produce a usable name"
            )));
        }
        Ok(name)
    }
}

/// Fill in missing display names by asking each side's own model, the
/// second avoiding a collision with the first.
pub async fn assign_display_names(
    model_client: &dyn ModelClient,
    config: &mut SessionConfig,
) -> Result<(), DebateError> {
    if config.server.name.is_none() {
        let name = model_client
            .generate_name(&config.server.model, &config.sampling, None)
            .await?;
        config.server.name = Some(name);
    }
    if config.client.name.is_none() {
        let name = model_client
            .generate_name(
                &config.client.model,
                &config.sampling,
                config.server.name.as_deref(),
            )
            .await?;
        config.client.name = Some(name);
    }
    Ok(())
}

/// Strip reasoning tags, orphaned markup, and markdown emphasis from a
/// model response; collapse whitespace.
fn sanitize_response(response: &str) -> String {
    let reasoning_tags = [
        "thinking",
        "think",
        "reflection",
        "reasoning",
        "internal",
        "scratchpad",
        "analysis",
        "plan",
    ];

    let mut result = response.to_string();

    for tag in &reasoning_tags {
        let pattern = format!(r"(?is)<{tag}[^>]*>.*?</{tag}>");
        if let Ok(re) = regex::Regex::new(&pattern) {
            result = re.replace_all(&result, "").to_string();
        }
    }

    if let Ok(orphan_re) = regex::Regex::new(r"</?[\w]+[^>]*>") {
        result = orphan_re.replace_all(&result, "").to_string();
    }

    result = result.replace('*', "");

    if let Ok(ws_re) = regex::Regex::new(r"\s+") {
        result = ws_re.replace_all(&result, " ").to_string();
    }

    result.trim().to_string()
}

/// Collapse a generated name to its alphanumeric characters.
fn sanitize_name(raw: &str) -> String {
    raw.chars().filter(|c| c.is_alphanumeric()).collect()
}
