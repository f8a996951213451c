//! Redacted JSONL run log with monthly partitioning and retention.

use anyhow::{Context, Result};
use chrono::{Datelike, Utc};
use once_cell::sync::Lazy;
use regex::{Captures, Regex};
use serde::Serialize;
use std::collections::BTreeSet;
use std::fs::{self, File, OpenOptions, create_dir_all};
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};
use tracing::warn;

pub const DEFAULT_LOG_DIR: &str = "data/logs";
pub const DEFAULT_RETENTION_DAYS: u64 = 90;

const RUNS_FILE: &str = "runs.jsonl";
const AUDIT_FILE: &str = "audit.jsonl";

static REDACTION_PATTERNS: Lazy<Vec<(&'static str, Regex)>> = Lazy::new(|| {
    vec![
        (
            "api_key",
            Regex::new(r"(?i)(api[_-]?key\s*[:=]\s*)([A-Za-z0-9\-_.+/]+)")
                .expect("invalid api_key regex"),
        ),
        (
            "secret",
            Regex::new(r"(?i)(secret\s*[:=]\s*)([A-Za-z0-9\-_.+/]+)")
                .expect("invalid secret regex"),
        ),
        (
            "bearer",
            Regex::new(r"(?i)(bearer\s+)([A-Za-z0-9\-_.+=/]+)").expect("invalid bearer regex"),
        ),
        (
            "sk_token",
            Regex::new(r"(sk-[A-Za-z0-9\-_]{16,})").expect("invalid sk_token regex"),
        ),
    ]
});

/// Summary of one finished run, before redaction.
#[derive(Debug, Clone)]
pub struct RunLogInput {
    pub run_id: String,
    pub query: String,
    pub refined_prompt: String,
    pub specialists: Vec<(String, bool)>,
    pub report_chars: usize,
    pub report_path: Option<String>,
}

#[derive(Serialize)]
struct SpecialistEntry {
    name: String,
    success: bool,
}

#[derive(Serialize)]
struct RunLogRecord {
    timestamp: String,
    run_id: String,
    query: String,
    refined_prompt: String,
    specialists: Vec<SpecialistEntry>,
    report_chars: usize,
    report_path: Option<String>,
    redactions: Vec<String>,
}

#[derive(Serialize)]
struct AuditLogRecord {
    timestamp: String,
    run_id: String,
    redactions: Vec<String>,
}

/// Append-only run log rooted at `base_dir` (`<base>/<YYYY>/<MM>/runs.jsonl`).
#[derive(Debug, Clone)]
pub struct AuditLog {
    base_dir: PathBuf,
    retention_days: u64,
}

impl AuditLog {
    /// `retention_days == 0` disables pruning.
    pub fn new(base_dir: impl Into<PathBuf>, retention_days: u64) -> Self {
        Self {
            base_dir: base_dir.into(),
            retention_days,
        }
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    pub fn log_run(&self, input: RunLogInput) -> Result<PathBuf> {
        let timestamp = Utc::now();
        let mut redactions = BTreeSet::new();

        let query = sanitize_text(&input.query, &mut redactions);
        let refined_prompt = sanitize_text(&input.refined_prompt, &mut redactions);

        let record = RunLogRecord {
            timestamp: timestamp.to_rfc3339(),
            run_id: input.run_id.clone(),
            query,
            refined_prompt,
            specialists: input
                .specialists
                .into_iter()
                .map(|(name, success)| SpecialistEntry { name, success })
                .collect(),
            report_chars: input.report_chars,
            report_path: input.report_path,
            redactions: redactions.iter().map(|name| name.to_string()).collect(),
        };

        let month_dir = self
            .base_dir
            .join(format!("{:04}", timestamp.year()))
            .join(format!("{:02}", timestamp.month()));
        let runs_path = month_dir.join(RUNS_FILE);
        append_json_line(&runs_path, &record)?;

        if !record.redactions.is_empty() {
            let audit = AuditLogRecord {
                timestamp: record.timestamp.clone(),
                run_id: input.run_id.clone(),
                redactions: record.redactions.clone(),
            };
            append_json_line(&month_dir.join(AUDIT_FILE), &audit)?;
            warn!(
                run_id = %input.run_id,
                fields = ?record.redactions,
                "redacted potential secrets from run log"
            );
        }

        self.enforce_retention()?;
        Ok(runs_path)
    }

    /// Delete every record of `run_id`, dropping files and directories left empty.
    pub fn remove_run_logs(&self, run_id: &str) -> Result<()> {
        if !self.base_dir.exists() {
            return Ok(());
        }

        for year_entry in fs::read_dir(&self.base_dir)? {
            let year_entry = year_entry?;
            if !year_entry.file_type()?.is_dir() {
                continue;
            }
            for month_entry in fs::read_dir(year_entry.path())? {
                let month_entry = month_entry?;
                if !month_entry.file_type()?.is_dir() {
                    continue;
                }
                for file in [RUNS_FILE, AUDIT_FILE] {
                    let path = month_entry.path().join(file);
                    rewrite_jsonl_without(&path, run_id)?;
                    cleanup_empty_file(&path)?;
                }
                if month_entry.path().read_dir()?.next().is_none() {
                    fs::remove_dir(month_entry.path()).ok();
                }
            }
            if year_entry.path().read_dir()?.next().is_none() {
                fs::remove_dir(year_entry.path()).ok();
            }
        }

        Ok(())
    }

    fn enforce_retention(&self) -> Result<()> {
        if self.retention_days == 0 || !self.base_dir.exists() {
            return Ok(());
        }
        let cutoff = SystemTime::now()
            .checked_sub(Duration::from_secs(
                self.retention_days.saturating_mul(86_400),
            ))
            .unwrap_or(SystemTime::UNIX_EPOCH);
        prune_directory(&self.base_dir, cutoff)
    }
}

pub(crate) fn sanitize_text(input: &str, redactions: &mut BTreeSet<&'static str>) -> String {
    let mut output = input.to_string();
    for (name, regex) in REDACTION_PATTERNS.iter() {
        let mut matched = false;
        output = regex
            .replace_all(&output, |caps: &Captures| {
                matched = true;
                if caps.len() > 2 {
                    format!("{}[REDACTED]", &caps[1])
                } else {
                    "[REDACTED]".to_string()
                }
            })
            .to_string();
        if matched {
            redactions.insert(name);
        }
    }
    output
}

fn append_json_line<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    if let Some(parent) = path.parent() {
        create_dir_all(parent)
            .with_context(|| format!("failed to create log directory {}", parent.display()))?;
    }

    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .with_context(|| format!("failed to open log file {}", path.display()))?;
    let mut writer = BufWriter::new(file);
    let line = serde_json::to_string(value)?;
    writeln!(writer, "{line}")
        .with_context(|| format!("failed to append log entry to {}", path.display()))?;
    writer.flush()?;
    Ok(())
}

fn prune_directory(dir: &Path, cutoff: SystemTime) -> Result<()> {
    if !dir.exists() {
        return Ok(());
    }

    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();
        let metadata = entry.metadata()?;
        if metadata.is_dir() {
            prune_directory(&path, cutoff)?;
            if path.read_dir()?.next().is_none() {
                fs::remove_dir(&path).ok();
            }
        } else if metadata.is_file()
            && metadata
                .modified()
                .map(|time| time < cutoff)
                .unwrap_or(false)
        {
            fs::remove_file(&path).ok();
        }
    }

    Ok(())
}

fn rewrite_jsonl_without(path: &Path, run_id: &str) -> Result<()> {
    if !path.exists() {
        return Ok(());
    }

    let file =
        File::open(path).with_context(|| format!("failed to open log file {}", path.display()))?;
    let mut retained = Vec::new();
    let mut removed = false;
    for line in BufReader::new(file).lines() {
        let line = line?;
        if let Ok(value) = serde_json::from_str::<serde_json::Value>(&line) {
            if value.get("run_id").and_then(|v| v.as_str()) == Some(run_id) {
                removed = true;
                continue;
            }
        }
        retained.push(line);
    }

    if removed {
        let file = File::create(path)
            .with_context(|| format!("failed to rewrite log file {}", path.display()))?;
        let mut writer = BufWriter::new(file);
        for line in retained {
            writeln!(writer, "{line}")?;
        }
        writer.flush()?;
    }

    Ok(())
}

fn cleanup_empty_file(path: &Path) -> Result<()> {
    if path.exists() && path.metadata()?.len() == 0 {
        fs::remove_file(path).ok();
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Value;
    use tempfile::TempDir;

    fn input(run_id: &str, query: &str) -> RunLogInput {
        RunLogInput {
            run_id: run_id.to_string(),
            query: query.to_string(),
            refined_prompt: "Investigate PM2.5 with bearer abc.def".to_string(),
            specialists: vec![("EPHT_Agent".into(), true), ("OpenData_Agent".into(), false)],
            report_chars: 1_024,
            report_path: Some("reports/research_x.md".into()),
        }
    }

    #[test]
    fn run_logging_sanitizes_and_persists() -> Result<()> {
        let temp = TempDir::new().expect("temp dir");
        let log = AuditLog::new(temp.path(), 0);

        let path = log.log_run(input("run-1", "asthma data api_key=abcd1234"))?;
        assert!(path.ends_with(RUNS_FILE));

        let line = fs::read_to_string(&path)?;
        let record: Value = serde_json::from_str(line.trim()).unwrap();
        assert_eq!(record["run_id"], "run-1");
        assert_eq!(record["query"], "asthma data api_key=[REDACTED]");
        assert!(record["refined_prompt"].as_str().unwrap().contains("bearer [REDACTED]"));
        assert_eq!(record["specialists"][1]["success"], false);
        let redactions: Vec<_> = record["redactions"]
            .as_array()
            .unwrap()
            .iter()
            .map(|v| v.as_str().unwrap().to_string())
            .collect();
        assert_eq!(redactions, vec!["api_key", "bearer"]);

        assert!(path.with_file_name(AUDIT_FILE).exists());
        Ok(())
    }

    #[test]
    fn clean_runs_skip_the_audit_file() -> Result<()> {
        let temp = TempDir::new().expect("temp dir");
        let log = AuditLog::new(temp.path(), 0);
        let mut clean = input("run-2", "covid trends");
        clean.refined_prompt = "Summarize covid trends".into();
        let path = log.log_run(clean)?;
        assert!(!path.with_file_name(AUDIT_FILE).exists());
        Ok(())
    }

    #[test]
    fn removing_a_run_keeps_the_others() -> Result<()> {
        let temp = TempDir::new().expect("temp dir");
        let log = AuditLog::new(temp.path(), 0);
        let path = log.log_run(input("keep", "q"))?;
        log.log_run(input("drop", "q"))?;

        log.remove_run_logs("drop")?;
        let contents = fs::read_to_string(&path)?;
        assert_eq!(contents.lines().count(), 1);
        assert!(contents.contains("\"keep\""));

        log.remove_run_logs("keep")?;
        assert!(!path.exists());
        Ok(())
    }
}
