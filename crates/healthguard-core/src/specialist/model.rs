use std::sync::Arc;

use async_trait::async_trait;

use super::{Specialist, SpecialistSink};
use crate::error::SpecialistError;
use crate::llm::LanguageModelGateway;
use crate::registry::SpecialistDescriptor;

/// Specialist answered by the language model alone, with the descriptor's
/// instructions as system prompt. Reports no tool activity.
pub struct ModelSpecialist {
    descriptor: Arc<SpecialistDescriptor>,
    gateway: Arc<LanguageModelGateway>,
}

impl ModelSpecialist {
    pub fn new(descriptor: Arc<SpecialistDescriptor>, gateway: Arc<LanguageModelGateway>) -> Self {
        Self {
            descriptor,
            gateway,
        }
    }
}

#[async_trait]
impl Specialist for ModelSpecialist {
    fn name(&self) -> &str {
        &self.descriptor.name
    }

    async fn invoke(
        &self,
        prompt: &str,
        _sink: &mut SpecialistSink,
    ) -> Result<String, SpecialistError> {
        let text = self
            .gateway
            .complete_with_system(&self.descriptor.instructions, prompt)
            .await
            .map_err(|err| SpecialistError::Model {
                name: self.descriptor.name.clone(),
                reason: err.to_string(),
            })?;

        let text = text.trim();
        if text.is_empty() {
            return Ok("No results".to_string());
        }
        Ok(text.to_string())
    }
}
