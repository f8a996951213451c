use std::{path::PathBuf, time::Duration};

use thiserror::Error;

/// Core error type for HealthGuard.
#[derive(Debug, Error)]
pub enum HealthGuardError {
    #[error("configuration error: {0}")]
    InvalidConfiguration(String),
    #[error("missing environment variable: {0}")]
    MissingSecret(String),
    #[error("I/O error while reading {path}: {source}")]
    ConfigIo {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("specialist registry error: {0}")]
    Registry(String),
    #[error(transparent)]
    Gateway(#[from] GatewayError),
    #[error("language model returned an empty {0}")]
    EmptyModelResponse(&'static str),
    #[error("invalid phase transition from {from} to {to}")]
    Phase { from: String, to: String },
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl HealthGuardError {
    pub fn config_io(path: PathBuf, source: std::io::Error) -> Self {
        Self::ConfigIo { path, source }
    }

    pub fn registry(message: impl Into<String>) -> Self {
        Self::Registry(message.into())
    }
}

/// Failure reported by a language model backend for a single attempt.
#[derive(Debug, Clone, Error)]
pub enum ModelError {
    #[error("transient model failure: {0}")]
    Transient(String),
    /// The remote rejected the request for exceeding its context window.
    #[error("prompt too long: {0}")]
    PromptTooLong(String),
    #[error("model rejected request: {0}")]
    Rejected(String),
    #[error("model call timed out after {0:?}")]
    Timeout(Duration),
}

impl ModelError {
    pub fn is_prompt_too_long(&self) -> bool {
        matches!(self, ModelError::PromptTooLong(_))
    }
}

/// Terminal failure of the language model gateway after its retry envelope.
#[derive(Debug, Clone, Error)]
pub enum GatewayError {
    #[error("language model unavailable after {attempts} attempts: {last_error}")]
    Exhausted { attempts: usize, last_error: ModelError },
}

/// Failure of one specialist invocation. Always converted into a `Failure` outcome.
#[derive(Debug, Clone, Error)]
pub enum SpecialistError {
    #[error("{name} timed out after {after:?}")]
    Timeout { name: String, after: Duration },
    #[error("Connection error to {name}: {reason}")]
    Transport { name: String, reason: String },
    #[error("HTTP {status} from {name}")]
    Http { name: String, status: u16 },
    #[error("malformed response from {name}: {reason}")]
    Malformed { name: String, reason: String },
    #[error("{name} aborted unexpectedly: {reason}")]
    Panicked { name: String, reason: String },
    #[error("{name} failed: {reason}")]
    Model { name: String, reason: String },
}
