use std::{
    env, fs,
    path::{Path, PathBuf},
    time::Duration,
};

use serde::Deserialize;

use crate::audit::{AuditLog, DEFAULT_LOG_DIR, DEFAULT_RETENTION_DAYS};
use crate::llm::{ANTHROPIC_MESSAGES_URL, GatewayPolicy};
use crate::registry::{
    CompoundTrigger, SpecialistDescriptor, SpecialistRegistry, builtin_compound_triggers,
    builtin_default_set, builtin_specialists,
};
use crate::reports::{DEFAULT_REPORTS_DIR, ReportStore};
use crate::HealthGuardError;

const DEFAULT_CONFIG_PATH: &str = "healthguard.toml";
const CONFIG_PATH_ENV: &str = "HEALTHGUARD_CONFIG";

/// Top-level configuration. Every section is optional; omitted values take the
/// built-in defaults.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    pub llm: LlmConfig,
    pub dispatch: DispatchConfig,
    pub stream: StreamConfig,
    pub reports: ReportsConfig,
    pub audit: AuditConfig,
    pub logging: LoggingConfig,
    pub router: RouterConfig,
    pub specialists: Vec<SpecialistDescriptor>,
}

impl Config {
    /// Build the specialist registry. Without a `[[specialists]]` table the
    /// built-in deployment is used, including its default set and triggers
    /// unless `[router]` overrides them.
    pub fn registry(&self) -> Result<SpecialistRegistry, HealthGuardError> {
        let builtin = self.specialists.is_empty();
        let specialists = if builtin {
            builtin_specialists()
        } else {
            self.specialists.clone()
        };
        let default_set = match (&self.router.default, builtin) {
            (Some(names), _) => names.clone(),
            (None, true) => builtin_default_set(),
            (None, false) => Vec::new(),
        };
        let compound = match (&self.router.compound, builtin) {
            (Some(triggers), _) => triggers.clone(),
            (None, true) => builtin_compound_triggers(),
            (None, false) => Vec::new(),
        };
        SpecialistRegistry::new(specialists, default_set, compound)
    }

    pub fn report_store(&self) -> Option<ReportStore> {
        self.reports
            .enabled
            .then(|| ReportStore::new(&self.reports.dir))
    }

    pub fn audit_log(&self) -> Option<AuditLog> {
        self.audit
            .enabled
            .then(|| AuditLog::new(&self.audit.log_dir, self.audit.retention_days))
    }
}

/// Helper to load configuration with guard rails.
pub struct ConfigLoader;

impl ConfigLoader {
    /// Load configuration from a provided path or discoverable defaults.
    ///
    /// Resolution order:
    /// 1. Explicit `path` argument.
    /// 2. `HEALTHGUARD_CONFIG` environment variable.
    /// 3. `healthguard.toml` in the current working directory, if present.
    /// 4. Built-in defaults.
    pub fn load(path: Option<PathBuf>) -> Result<Config, HealthGuardError> {
        match resolve_path(path) {
            Some(candidate) => {
                let raw = fs::read_to_string(&candidate)
                    .map_err(|err| HealthGuardError::config_io(candidate.clone(), err))?;
                Self::parse(&raw)
            }
            None => {
                let config = Config::default();
                Self::validate(&config)?;
                Ok(config)
            }
        }
    }

    pub fn parse(raw: &str) -> Result<Config, HealthGuardError> {
        let config: Config = toml::from_str(raw)
            .map_err(|err| HealthGuardError::InvalidConfiguration(err.to_string()))?;
        Self::validate(&config)?;
        Ok(config)
    }

    fn validate(config: &Config) -> Result<(), HealthGuardError> {
        if config.llm.api_key_env.trim().is_empty() {
            return Err(HealthGuardError::InvalidConfiguration(
                "llm.api_key_env must reference an environment variable".into(),
            ));
        }
        if !config.llm.provider.eq_ignore_ascii_case("anthropic") {
            return Err(HealthGuardError::InvalidConfiguration(format!(
                "unsupported llm.provider `{}`",
                config.llm.provider
            )));
        }
        if config.llm.max_attempts == 0 {
            return Err(HealthGuardError::InvalidConfiguration(
                "llm.max_attempts must be at least 1".into(),
            ));
        }
        if config.llm.token_ceiling == 0 {
            return Err(HealthGuardError::InvalidConfiguration(
                "llm.token_ceiling must be positive".into(),
            ));
        }
        if config.dispatch.specialist_timeout_secs == 0 {
            return Err(HealthGuardError::InvalidConfiguration(
                "dispatch.specialist_timeout_secs must be positive".into(),
            ));
        }
        if config.stream.keepalive_ms == 0 {
            return Err(HealthGuardError::InvalidConfiguration(
                "stream.keepalive_ms must be positive".into(),
            ));
        }

        config.registry()?;
        Ok(())
    }
}

fn resolve_path(path: Option<PathBuf>) -> Option<PathBuf> {
    if let Some(path) = path {
        return Some(path);
    }

    if let Ok(from_env) = env::var(CONFIG_PATH_ENV) {
        if !from_env.trim().is_empty() {
            return Some(PathBuf::from(from_env));
        }
    }

    let local = Path::new(DEFAULT_CONFIG_PATH);
    local.exists().then(|| local.to_path_buf())
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    pub provider: String,
    pub model: String,
    pub api_key_env: String,
    pub endpoint: String,
    pub max_output_tokens: u32,
    pub token_ceiling: usize,
    pub max_attempts: usize,
    pub retry_backoff_ms: u64,
    pub request_timeout_ms: u64,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: "anthropic".to_string(),
            model: "claude-3-5-sonnet-latest".to_string(),
            api_key_env: "ANTHROPIC_API_KEY".to_string(),
            endpoint: ANTHROPIC_MESSAGES_URL.to_string(),
            max_output_tokens: 4_096,
            token_ceiling: 160_000,
            max_attempts: 3,
            retry_backoff_ms: 1_000,
            request_timeout_ms: 120_000,
        }
    }
}

impl LlmConfig {
    pub fn gateway_policy(&self) -> GatewayPolicy {
        GatewayPolicy {
            token_ceiling: self.token_ceiling,
            max_attempts: self.max_attempts,
            retry_backoff: Duration::from_millis(self.retry_backoff_ms),
            request_timeout: Duration::from_millis(self.request_timeout_ms),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DispatchConfig {
    pub specialist_timeout_secs: u64,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            specialist_timeout_secs: 300,
        }
    }
}

impl DispatchConfig {
    pub fn specialist_timeout(&self) -> Duration {
        Duration::from_secs(self.specialist_timeout_secs)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StreamConfig {
    pub keepalive_ms: u64,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self { keepalive_ms: 500 }
    }
}

impl StreamConfig {
    pub fn keepalive(&self) -> Duration {
        Duration::from_millis(self.keepalive_ms)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ReportsConfig {
    pub enabled: bool,
    pub dir: PathBuf,
}

impl Default for ReportsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            dir: PathBuf::from(DEFAULT_REPORTS_DIR),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AuditConfig {
    pub enabled: bool,
    pub log_dir: PathBuf,
    pub retention_days: u64,
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            log_dir: PathBuf::from(DEFAULT_LOG_DIR),
            retention_days: DEFAULT_RETENTION_DAYS,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct RouterConfig {
    pub default: Option<Vec<String>>,
    pub compound: Option<Vec<CompoundTrigger>>,
}
