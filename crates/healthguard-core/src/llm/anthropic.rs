use async_trait::async_trait;
use reqwest::{Client, StatusCode, header};
use serde::{Deserialize, Serialize};

use super::{ChatMessage, LanguageModel, Role};
use crate::config::LlmConfig;
use crate::error::ModelError;
use crate::{HealthGuardError, SecretValue, require_env};

pub const ANTHROPIC_MESSAGES_URL: &str = "https://api.anthropic.com/v1/messages";
const API_VERSION: &str = "2023-06-01";

/// Messages API client. Performs exactly one HTTP round-trip per call.
#[derive(Clone)]
pub struct AnthropicModel {
    client: Client,
    endpoint: String,
    model: String,
    max_output_tokens: u32,
}

#[derive(Debug, Serialize)]
struct MessagesRequest<'a> {
    model: &'a str,
    max_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<String>,
    messages: Vec<WireMessage<'a>>,
}

#[derive(Debug, Serialize)]
struct WireMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct MessagesResponse {
    #[serde(default)]
    content: Vec<ContentBlock>,
}

#[derive(Debug, Deserialize)]
struct ContentBlock {
    #[serde(rename = "type")]
    block_type: String,
    #[serde(default)]
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ErrorEnvelope {
    error: ErrorBody,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    message: String,
}

impl AnthropicModel {
    pub fn new(
        api_key: &SecretValue,
        endpoint: impl Into<String>,
        model: impl Into<String>,
        max_output_tokens: u32,
    ) -> Result<Self, HealthGuardError> {
        let mut headers = header::HeaderMap::new();
        headers.insert(
            header::CONTENT_TYPE,
            header::HeaderValue::from_static("application/json"),
        );
        headers.insert(
            "anthropic-version",
            header::HeaderValue::from_static(API_VERSION),
        );
        let mut key = header::HeaderValue::from_str(api_key.expose()).map_err(|err| {
            HealthGuardError::InvalidConfiguration(format!("invalid API key format: {err}"))
        })?;
        key.set_sensitive(true);
        headers.insert("x-api-key", key);

        let client = Client::builder()
            .default_headers(headers)
            .build()
            .map_err(|err| {
                HealthGuardError::InvalidConfiguration(format!(
                    "failed to create HTTP client: {err}"
                ))
            })?;

        Ok(Self {
            client,
            endpoint: endpoint.into(),
            model: model.into(),
            max_output_tokens,
        })
    }

    /// Build from the `[llm]` section; the key is read from `llm.api_key_env`.
    pub fn from_config(config: &LlmConfig) -> Result<Self, HealthGuardError> {
        let api_key = require_env(&config.api_key_env)?;
        Self::new(
            &api_key,
            config.endpoint.clone(),
            config.model.clone(),
            config.max_output_tokens,
        )
    }
}

#[async_trait]
impl LanguageModel for AnthropicModel {
    async fn complete(&self, messages: &[ChatMessage]) -> Result<String, ModelError> {
        let system: Vec<&str> = messages
            .iter()
            .filter(|m| m.role == Role::System)
            .map(|m| m.content.as_str())
            .collect();
        let body = MessagesRequest {
            model: &self.model,
            max_tokens: self.max_output_tokens,
            system: (!system.is_empty()).then(|| system.join("\n\n")),
            messages: messages
                .iter()
                .filter_map(|m| match m.role {
                    Role::System => None,
                    Role::User => Some(WireMessage {
                        role: "user",
                        content: &m.content,
                    }),
                    Role::Assistant => Some(WireMessage {
                        role: "assistant",
                        content: &m.content,
                    }),
                })
                .collect(),
        };

        let response = self
            .client
            .post(&self.endpoint)
            .json(&body)
            .send()
            .await
            .map_err(|err| ModelError::Transient(format!("request failed: {err}")))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            let message = serde_json::from_str::<ErrorEnvelope>(&text)
                .map(|envelope| envelope.error.message)
                .unwrap_or(text);
            return Err(classify_failure(status, message));
        }

        let parsed: MessagesResponse = response
            .json()
            .await
            .map_err(|err| ModelError::Transient(format!("invalid response body: {err}")))?;

        Ok(parsed
            .content
            .into_iter()
            .filter(|block| block.block_type == "text")
            .filter_map(|block| block.text)
            .collect::<Vec<_>>()
            .join(""))
    }

    fn model_name(&self) -> &str {
        &self.model
    }
}

fn classify_failure(status: StatusCode, message: String) -> ModelError {
    let lowered = message.to_lowercase();
    let mentions_size = lowered.contains("too long") || lowered.contains("token");
    match status {
        StatusCode::BAD_REQUEST | StatusCode::PAYLOAD_TOO_LARGE if mentions_size => {
            ModelError::PromptTooLong(message)
        }
        StatusCode::PAYLOAD_TOO_LARGE => ModelError::PromptTooLong(message),
        StatusCode::TOO_MANY_REQUESTS | StatusCode::REQUEST_TIMEOUT => {
            ModelError::Transient(format!("HTTP {}: {message}", status.as_u16()))
        }
        status if status.is_server_error() => {
            ModelError::Transient(format!("HTTP {}: {message}", status.as_u16()))
        }
        status => ModelError::Rejected(format!("HTTP {}: {message}", status.as_u16())),
    }
}
