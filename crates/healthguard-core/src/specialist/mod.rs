//! Specialist capability and the per-invocation sink it reports progress through.
//!
//! A specialist receives the refined research prompt and answers with text. While
//! it works it may surface tool activity and partial text through its
//! [`SpecialistSink`]; the dispatcher owns the sink and reads the tool tally back
//! once the invocation resolves.

mod http;
mod model;

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

pub use http::HttpSpecialist;
pub use model::ModelSpecialist;

use crate::error::SpecialistError;
use crate::events::EventSender;
use crate::llm::LanguageModelGateway;
use crate::registry::SpecialistDescriptor;

/// One independent research capability.
#[async_trait]
pub trait Specialist: Send + Sync {
    fn name(&self) -> &str;

    /// Research `prompt` and return the final answer text.
    async fn invoke(&self, prompt: &str, sink: &mut SpecialistSink)
    -> Result<String, SpecialistError>;
}

/// Event outlet and private tool tally for a single specialist invocation.
pub struct SpecialistSink {
    name: String,
    events: EventSender,
    tool_names: Vec<String>,
}

impl SpecialistSink {
    pub fn new(name: impl Into<String>, events: EventSender) -> Self {
        Self {
            name: name.into(),
            events,
            tool_names: Vec::new(),
        }
    }

    pub fn tool_call(&mut self, tool_name: impl Into<String>, args: Value) {
        let tool_name = tool_name.into();
        self.tool_names.push(tool_name.clone());
        self.events.tool_call(&self.name, tool_name, args);
    }

    pub fn tool_response(&self, content: impl Into<String>) {
        self.events.tool_response(&self.name, content);
    }

    /// Surface intermediate text. The final answer is returned from `invoke`
    /// instead and published by the dispatcher.
    pub fn message(&self, content: impl Into<String>) {
        self.events.agent_message(&self.name, content);
    }

    pub fn tool_names(&self) -> &[String] {
        &self.tool_names
    }

    pub fn into_tool_names(self) -> Vec<String> {
        self.tool_names
    }
}

/// Build the transport matching a descriptor: HTTP when an endpoint is
/// configured, otherwise a direct language model call.
pub fn specialist_for(
    descriptor: Arc<SpecialistDescriptor>,
    gateway: Arc<LanguageModelGateway>,
    client: reqwest::Client,
) -> Arc<dyn Specialist> {
    match descriptor.endpoint.clone() {
        Some(endpoint) => Arc::new(HttpSpecialist::new(descriptor, endpoint, client)),
        None => Arc::new(ModelSpecialist::new(descriptor, gateway)),
    }
}
