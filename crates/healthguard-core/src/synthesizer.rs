use std::fmt::Write as _;
use std::sync::Arc;

use tracing::{info, instrument};

use crate::HealthGuardError;
use crate::dispatcher::{DispatchResults, SpecialistOutcome};
use crate::llm::LanguageModelGateway;

const MAX_LISTED_TOOLS: usize = 5;

/// Merges every specialist outcome, failures included, into the final report.
#[derive(Clone)]
pub struct Synthesizer {
    gateway: Arc<LanguageModelGateway>,
}

impl Synthesizer {
    pub fn new(gateway: Arc<LanguageModelGateway>) -> Self {
        Self { gateway }
    }

    #[instrument(name = "pipeline.synthesize", skip_all, fields(outcomes = results.len()))]
    pub async fn synthesize(
        &self,
        query: &str,
        results: &DispatchResults,
    ) -> Result<String, HealthGuardError> {
        let prompt = build_synthesis_prompt(query, results);
        let report = self.gateway.complete(&prompt).await?;
        if report.trim().is_empty() {
            return Err(HealthGuardError::EmptyModelResponse("report"));
        }
        info!(chars = report.len(), "final report synthesized");
        Ok(report)
    }
}

/// Per-specialist summary block, in plan order.
pub fn summarize_results(results: &DispatchResults) -> String {
    let mut summary = String::new();
    for report in results.iter() {
        let _ = writeln!(summary, "\n## {} ({})", report.name, report.description);
        let _ = writeln!(summary, "**Success**: {}", report.outcome.is_success());
        match &report.outcome {
            SpecialistOutcome::Success {
                text,
                tool_invocation_count,
                tool_names,
            } => {
                let listed = tool_names
                    .iter()
                    .take(MAX_LISTED_TOOLS)
                    .map(String::as_str)
                    .collect::<Vec<_>>()
                    .join(", ");
                let _ = writeln!(summary, "**Tools Used**: {tool_invocation_count} - {listed}");
                let _ = writeln!(summary, "**Key Findings**:\n{text}");
            }
            SpecialistOutcome::Failure { error } => {
                let _ = writeln!(summary, "**Error**: {error}");
            }
        }
    }
    summary
}

pub fn build_synthesis_prompt(query: &str, results: &DispatchResults) -> String {
    let summary = summarize_results(results);
    format!(
        "You are a health data research coordinator. Synthesize the findings from multiple \
specialized agents into a comprehensive final report.

Original User Query: \"{query}\"

Agent Research Results:
{summary}

Create a comprehensive final report that:
1. Provides an executive summary answering the user's query
2. Integrates findings across all data sources
3. Identifies patterns and correlations between environmental, health, and healthcare data
4. Provides actionable insights and recommendations
5. Notes any data limitations or gaps, including agents that failed to report
6. Includes specific data points and statistics from the agents' findings, attributed to the \
agent that supplied them

Structure your response as a well-formatted markdown report with clear sections."
    )
}
