use anyhow::{Context, Result};
use std::env;

#[derive(Clone, Debug)]
pub struct ApiConfig {
    pub listen_addr: String,
    pub max_concurrent_runs: usize,
    /// Finished runs kept for `GET /runs/:id`; the oldest is evicted first.
    pub max_retained_runs: usize,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            listen_addr: Self::DEFAULT_LISTEN_ADDR.to_string(),
            max_concurrent_runs: Self::DEFAULT_MAX_CONCURRENT_RUNS,
            max_retained_runs: Self::DEFAULT_MAX_RETAINED_RUNS,
        }
    }
}

impl ApiConfig {
    const DEFAULT_LISTEN_ADDR: &'static str = "0.0.0.0:8080";
    const DEFAULT_MAX_CONCURRENT_RUNS: usize = 5;
    const DEFAULT_MAX_RETAINED_RUNS: usize = 200;

    pub fn from_env() -> Result<Self> {
        let listen_addr = env::var("HEALTHGUARD_API_ADDR")
            .ok()
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty())
            .unwrap_or_else(|| Self::DEFAULT_LISTEN_ADDR.to_string());

        let max_concurrent_runs = match env::var("HEALTHGUARD_MAX_CONCURRENT_RUNS") {
            Ok(value) => parse_limit(&value)
                .with_context(|| "HEALTHGUARD_MAX_CONCURRENT_RUNS must be a positive integer")?,
            Err(_) => Self::DEFAULT_MAX_CONCURRENT_RUNS,
        };

        let max_retained_runs = match env::var("HEALTHGUARD_MAX_RETAINED_RUNS") {
            Ok(value) => parse_limit(&value)
                .with_context(|| "HEALTHGUARD_MAX_RETAINED_RUNS must be a positive integer")?,
            Err(_) => Self::DEFAULT_MAX_RETAINED_RUNS,
        };

        Ok(Self {
            listen_addr,
            max_concurrent_runs,
            max_retained_runs,
        })
    }
}

fn parse_limit(input: &str) -> Result<usize> {
    let limit: usize = input.trim().parse()?;
    anyhow::ensure!(limit > 0, "limit must be at least 1");
    Ok(limit)
}
