use anyhow::{Context, Result};
use chrono::{DateTime, Local, Utc};
use std::fs::{File, create_dir_all};
use std::io::Write;
use std::path::{Path, PathBuf};

pub const DEFAULT_REPORTS_DIR: &str = "reports";

/// Writes finished reports as markdown artifacts.
#[derive(Debug, Clone)]
pub struct ReportStore {
    dir: PathBuf,
}

/// The fields that make up one persisted report.
#[derive(Debug, Clone, Copy)]
pub struct ReportArtifact<'a> {
    pub run_id: &'a str,
    pub query: &'a str,
    pub refined_prompt: &'a str,
    pub content: &'a str,
    pub created_at: DateTime<Utc>,
}

impl ReportStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Persist `artifact` as `research_<YYYYmmdd_HHMMSS>_<run>.md` and return its path.
    pub fn persist(&self, artifact: &ReportArtifact<'_>) -> Result<PathBuf> {
        create_dir_all(&self.dir).with_context(|| {
            format!("failed to create reports directory {}", self.dir.display())
        })?;

        let local = artifact.created_at.with_timezone(&Local);
        let short_run: String = artifact.run_id.chars().take(8).collect();
        let path = self.dir.join(format!(
            "research_{}_{short_run}.md",
            local.format("%Y%m%d_%H%M%S")
        ));

        let mut file = File::create(&path)
            .with_context(|| format!("failed to create report file {}", path.display()))?;
        file.write_all(render_markdown(artifact).as_bytes())
            .with_context(|| format!("failed to write report file {}", path.display()))?;
        Ok(path)
    }
}

pub fn render_markdown(artifact: &ReportArtifact<'_>) -> String {
    let generated = artifact
        .created_at
        .with_timezone(&Local)
        .format("%Y-%m-%d %H:%M:%S");
    format!(
        "# Health Data Research Report\n\n\
         **Generated**: {generated}\n\n\
         **Run**: {}\n\n\
         **Query**: {}\n\n\
         **Specialized Prompt**: {}\n\n\
         ---\n\n\
         {}",
        artifact.run_id, artifact.query, artifact.refined_prompt, artifact.content
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn persists_markdown_with_header_and_body() -> Result<()> {
        let temp = TempDir::new().expect("temp dir");
        let store = ReportStore::new(temp.path().join("reports"));
        let artifact = ReportArtifact {
            run_id: "5f0c1d2e-aaaa-bbbb-cccc-000000000000",
            query: "air quality and asthma in California",
            refined_prompt: "Correlate PM2.5 with asthma ED visits.",
            content: "## Executive Summary\nModerate correlation.",
            created_at: Utc::now(),
        };

        let path = store.persist(&artifact)?;
        let name = path.file_name().unwrap().to_string_lossy().to_string();
        assert!(name.starts_with("research_"));
        assert!(name.ends_with("_5f0c1d2e.md"));

        let body = std::fs::read_to_string(&path)?;
        assert!(body.starts_with("# Health Data Research Report"));
        assert!(body.contains("**Query**: air quality and asthma in California"));
        assert!(body.contains("**Specialized Prompt**: Correlate PM2.5"));
        assert!(body.ends_with("---\n\n## Executive Summary\nModerate correlation."));
        Ok(())
    }
}
