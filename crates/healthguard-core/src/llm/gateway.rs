use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, warn};

use super::tokens::{CharRatioEstimator, TokenEstimator, Truncation, truncate_prompt};
use super::{ChatMessage, LanguageModel};
use crate::error::{GatewayError, ModelError};
use crate::metrics;

/// Size and retry envelope applied to every model call.
#[derive(Debug, Clone)]
pub struct GatewayPolicy {
    /// Estimated token count above which prompts are truncated.
    pub token_ceiling: usize,
    /// Total attempts per call, including the first one.
    pub max_attempts: usize,
    /// Fixed pause between attempts after a transient failure.
    pub retry_backoff: Duration,
    /// Upper bound for a single attempt.
    pub request_timeout: Duration,
}

impl Default for GatewayPolicy {
    fn default() -> Self {
        Self {
            token_ceiling: 160_000,
            max_attempts: 3,
            retry_backoff: Duration::from_secs(1),
            request_timeout: Duration::from_secs(120),
        }
    }
}

/// Stateless front door to the language model: truncation plus retries.
///
/// Cheap to share behind an `Arc`; concurrent calls are independent.
pub struct LanguageModelGateway {
    model: Arc<dyn LanguageModel>,
    estimator: Arc<dyn TokenEstimator>,
    policy: GatewayPolicy,
}

impl LanguageModelGateway {
    pub fn new(model: Arc<dyn LanguageModel>, policy: GatewayPolicy) -> Self {
        Self {
            model,
            estimator: Arc::new(CharRatioEstimator::default()),
            policy,
        }
    }

    pub fn with_estimator(mut self, estimator: Arc<dyn TokenEstimator>) -> Self {
        self.estimator = estimator;
        self
    }

    pub fn policy(&self) -> &GatewayPolicy {
        &self.policy
    }

    pub fn model_name(&self) -> &str {
        self.model.model_name()
    }

    /// Apply the configured ceiling to `prompt` without calling the model.
    pub fn prepare(&self, prompt: &str) -> Truncation {
        truncate_prompt(prompt, self.policy.token_ceiling, self.estimator.as_ref())
    }

    pub async fn complete(&self, prompt: &str) -> Result<String, GatewayError> {
        self.complete_with_retries(prompt, self.policy.max_attempts)
            .await
    }

    pub async fn complete_with_retries(
        &self,
        prompt: &str,
        max_attempts: usize,
    ) -> Result<String, GatewayError> {
        self.run(None, prompt, max_attempts).await
    }

    /// Like [`complete`](Self::complete) but with a system instruction. Only the
    /// user prompt is subject to truncation.
    pub async fn complete_with_system(
        &self,
        system: &str,
        prompt: &str,
    ) -> Result<String, GatewayError> {
        self.run(Some(system), prompt, self.policy.max_attempts)
            .await
    }

    async fn run(
        &self,
        system: Option<&str>,
        prompt: &str,
        max_attempts: usize,
    ) -> Result<String, GatewayError> {
        let max_attempts = max_attempts.max(1);
        let estimator = self.estimator.as_ref();

        let prepared = self.prepare(prompt);
        if prepared.truncated {
            warn!(
                original_tokens = prepared.original_tokens,
                ceiling = self.policy.token_ceiling,
                "prompt exceeds token ceiling; truncating"
            );
            metrics::record_truncation();
        }
        let mut prompt_text = prepared.text;
        let mut last_error = ModelError::Transient("no attempt made".to_string());

        for attempt in 1..=max_attempts {
            let mut messages = Vec::with_capacity(2);
            if let Some(system) = system {
                messages.push(ChatMessage::system(system));
            }
            messages.push(ChatMessage::user(prompt_text.clone()));

            debug!(
                attempt,
                max_attempts,
                model = self.model.model_name(),
                prompt_chars = prompt_text.len(),
                "calling language model"
            );

            let result = match tokio::time::timeout(
                self.policy.request_timeout,
                self.model.complete(&messages),
            )
            .await
            {
                Ok(result) => result,
                Err(_) => Err(ModelError::Timeout(self.policy.request_timeout)),
            };

            match result {
                Ok(text) => {
                    metrics::record_gateway_attempt("success");
                    return Ok(text);
                }
                Err(err) if err.is_prompt_too_long() => {
                    metrics::record_gateway_attempt("too_long");
                    let current = estimator.estimate(&prompt_text);
                    let reduced = current.saturating_mul(4) / 5;
                    warn!(
                        attempt,
                        current_tokens = current,
                        reduced_ceiling = reduced,
                        "model rejected prompt as too long; shrinking before retry"
                    );
                    prompt_text = truncate_prompt(&prompt_text, reduced, estimator).text;
                    metrics::record_truncation();
                    last_error = err;
                }
                Err(err) => {
                    metrics::record_gateway_attempt("error");
                    warn!(attempt, max_attempts, error = %err, "model call failed");
                    last_error = err;
                    if attempt < max_attempts {
                        tokio::time::sleep(self.policy.retry_backoff).await;
                    }
                }
            }
        }

        Err(GatewayError::Exhausted {
            attempts: max_attempts,
            last_error,
        })
    }
}
