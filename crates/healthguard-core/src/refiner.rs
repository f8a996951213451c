use std::sync::Arc;

use tracing::{info, instrument};

use crate::HealthGuardError;
use crate::llm::LanguageModelGateway;
use crate::registry::SpecialistDescriptor;

/// Rewrites the user query into one research prompt shared by every selected
/// specialist. One gateway call per request.
#[derive(Clone)]
pub struct PromptRefiner {
    gateway: Arc<LanguageModelGateway>,
}

impl PromptRefiner {
    pub fn new(gateway: Arc<LanguageModelGateway>) -> Self {
        Self { gateway }
    }

    #[instrument(name = "pipeline.refine", skip_all, fields(specialists = specialists.len()))]
    pub async fn refine(
        &self,
        query: &str,
        specialists: &[Arc<SpecialistDescriptor>],
    ) -> Result<String, HealthGuardError> {
        let prompt = build_refinement_prompt(query, specialists);
        let refined = self.gateway.complete(&prompt).await?;
        let refined = refined.trim();
        if refined.is_empty() {
            return Err(HealthGuardError::EmptyModelResponse("research prompt"));
        }
        info!(chars = refined.len(), "research prompt ready");
        Ok(refined.to_string())
    }
}

pub fn build_refinement_prompt(query: &str, specialists: &[Arc<SpecialistDescriptor>]) -> String {
    let audience = specialists
        .iter()
        .map(|d| format!("- {} ({})", d.name, d.description))
        .collect::<Vec<_>>()
        .join("\n");

    format!(
        "You are a health data research coordinator. Analyze this user query and create a single, \
focused research prompt that can be given to multiple specialized health data agents.

User Query: \"{query}\"

The prompt should:
1. Clearly state what data and insights are needed
2. Be specific enough to guide research but general enough for different data sources
3. Include any relevant geographic, temporal, or demographic parameters
4. Specify the type of analysis or correlations to look for

Create a prompt that each of these specialized agents can interpret and act upon with their \
specific tools and data sources:
{audience}

Respond with just the prompt text, no additional formatting or explanation."
    )
}
