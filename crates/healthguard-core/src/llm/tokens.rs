/// Best-effort prompt size estimate in model tokens.
pub trait TokenEstimator: Send + Sync {
    fn estimate(&self, text: &str) -> usize;
}

/// Fixed characters-per-token approximation (`chars / 4` by default).
#[derive(Debug, Clone, Copy)]
pub struct CharRatioEstimator {
    chars_per_token: usize,
}

impl CharRatioEstimator {
    pub fn new(chars_per_token: usize) -> Self {
        Self {
            chars_per_token: chars_per_token.max(1),
        }
    }
}

impl Default for CharRatioEstimator {
    fn default() -> Self {
        Self::new(4)
    }
}

impl TokenEstimator for CharRatioEstimator {
    fn estimate(&self, text: &str) -> usize {
        text.chars().count() / self.chars_per_token
    }
}

/// Result of applying the size ceiling to a prompt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Truncation {
    pub text: String,
    pub original_tokens: usize,
    pub truncated: bool,
}

pub const TRUNCATION_NOTICE_PREFIX: &str = "[Note: Prompt truncated from";

/// Cut `prompt` down to roughly 90% of `max_tokens` and append a visible notice.
///
/// Prompts already within the ceiling are returned unchanged.
pub fn truncate_prompt(
    prompt: &str,
    max_tokens: usize,
    estimator: &dyn TokenEstimator,
) -> Truncation {
    let current_tokens = estimator.estimate(prompt);
    if current_tokens <= max_tokens {
        return Truncation {
            text: prompt.to_string(),
            original_tokens: current_tokens,
            truncated: false,
        };
    }

    let total_chars = prompt.chars().count();
    let chars_per_token = total_chars as f64 / current_tokens as f64;
    let target_chars = (max_tokens as f64 * chars_per_token * 0.9) as usize;

    let cut = prompt
        .char_indices()
        .nth(target_chars)
        .map(|(idx, _)| idx)
        .unwrap_or(prompt.len());

    let mut text = String::with_capacity(cut + 96);
    text.push_str(&prompt[..cut]);
    text.push_str(&format!(
        "\n\n{TRUNCATION_NOTICE_PREFIX} {current_tokens} to ~{max_tokens} tokens due to length limits]"
    ));

    Truncation {
        text,
        original_tokens: current_tokens,
        truncated: true,
    }
}
