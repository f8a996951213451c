//! Language model capability and the gateway that governs access to it.

mod anthropic;
mod gateway;
mod tokens;

pub use anthropic::{ANTHROPIC_MESSAGES_URL, AnthropicModel};
pub use gateway::{GatewayPolicy, LanguageModelGateway};
pub use tokens::{
    CharRatioEstimator, TRUNCATION_NOTICE_PREFIX, TokenEstimator, Truncation, truncate_prompt,
};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::ModelError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }
}

/// Remote text completion. One call is one attempt; retries live in the gateway.
#[async_trait]
pub trait LanguageModel: Send + Sync {
    async fn complete(&self, messages: &[ChatMessage]) -> Result<String, ModelError>;

    fn model_name(&self) -> &str;
}
