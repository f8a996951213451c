use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use clap::{Args, Parser, Subcommand};
use healthguard_core::{
    Config, ConfigLoader, EventKind, ProgressEvent, ResearchPipeline, StreamItem, TaskRouter,
    TelemetryOptions, init_telemetry,
};
use tokio::runtime::Runtime;
use tracing::{info, warn};

#[derive(Parser, Debug)]
#[command(
    name = "healthguard-cli",
    version,
    about = "Parallel health data research across specialist agents"
)]
struct Cli {
    /// Configuration file (defaults to HEALTHGUARD_CONFIG or ./healthguard.toml).
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Research a query and print the synthesized report.
    Run(RunArgs),
    /// Show which specialists a query would be routed to.
    Route(RouteArgs),
    /// List the configured specialists.
    Specialists,
    /// Delete every run log record of a run.
    Forget(ForgetArgs),
}

#[derive(Args, Debug)]
struct RunArgs {
    /// Query to research.
    #[arg(long)]
    query: String,

    /// Print every progress event as a JSON line instead of a readable trace.
    #[arg(long, default_value_t = false)]
    json: bool,

    /// Only print the final report.
    #[arg(long, default_value_t = false)]
    quiet: bool,
}

#[derive(Args, Debug)]
struct RouteArgs {
    #[arg(long)]
    query: String,
}

#[derive(Args, Debug)]
struct ForgetArgs {
    #[arg(long)]
    run_id: String,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = ConfigLoader::load(cli.config.clone())?;

    init_telemetry(TelemetryOptions {
        env_filter: Some(config.logging.level.clone()),
        stderr: true,
        ..TelemetryOptions::default()
    })?;

    let rt = Runtime::new()?;
    rt.block_on(async move {
        match cli.command {
            Command::Run(args) => run_command(&config, args).await?,
            Command::Route(args) => route_command(&config, args)?,
            Command::Specialists => specialists_command(&config)?,
            Command::Forget(args) => forget_command(&config, args)?,
        }
        Ok::<(), anyhow::Error>(())
    })?;

    Ok(())
}

async fn run_command(config: &Config, args: RunArgs) -> Result<()> {
    if args.query.trim().is_empty() {
        bail!("query must not be empty");
    }
    if let Err(err) = healthguard_core::metrics::init_metrics_from_env("healthguard-cli") {
        warn!(error = %err, "metrics exporter not initialised");
    }

    let pipeline = Arc::new(ResearchPipeline::from_config(config)?);
    info!(query = %args.query, "starting research run");

    let mut run = pipeline.spawn(args.query);
    let mut report = None;
    while let Some(item) = run.stream.next_item().await {
        let StreamItem::Event(event) = item else {
            continue;
        };
        if let EventKind::FinalReport { content } = &event.kind {
            report = Some(content.clone());
        }
        if args.json {
            println!("{}", event.to_json());
        } else if !args.quiet {
            if let Some(line) = render_event(&event) {
                eprintln!("{line}");
            }
        }
    }

    let outcome = run
        .outcome
        .await
        .context("research task aborted")?
        .context("research run failed")?;

    if !args.json {
        if let Some(content) = report {
            println!("{content}");
        }
    }
    if let Some(path) = outcome.report_path {
        info!(path = %path.display(), run_id = %outcome.run_id, "report saved");
    }
    Ok(())
}

/// One readable line per event; the final report itself is printed separately.
fn render_event(event: &ProgressEvent) -> Option<String> {
    let line = match &event.kind {
        EventKind::PhaseUpdate { subject, message } => format!("[{subject}] {message}"),
        EventKind::AgentMessage { subject, content } => {
            format!("[{subject}] {}", preview(content, 160))
        }
        EventKind::ToolCall {
            subject, tool_name, ..
        } => format!("[{subject}] -> {tool_name}"),
        EventKind::ToolResponse { subject, content } => {
            format!("[{subject}] <- {}", preview(content, 120))
        }
        EventKind::Error {
            subject, message, ..
        } => format!("[{subject}] error: {message}"),
        EventKind::FinalReport { .. } => return None,
    };
    Some(line)
}

fn preview(text: &str, limit: usize) -> String {
    let single_line = text.replace('\n', " ");
    if single_line.chars().count() <= limit {
        return single_line;
    }
    let cut: String = single_line.chars().take(limit).collect();
    format!("{cut}...")
}

fn route_command(config: &Config, args: RouteArgs) -> Result<()> {
    let router = TaskRouter::new(Arc::new(config.registry()?));
    for name in router.select(&args.query) {
        println!("{name}");
    }
    Ok(())
}

fn specialists_command(config: &Config) -> Result<()> {
    let registry = config.registry()?;
    for descriptor in registry.iter() {
        let transport = descriptor.endpoint.as_deref().unwrap_or("language model");
        let default = if registry.default_set().contains(&descriptor.name) {
            " (default)"
        } else {
            ""
        };
        println!(
            "{}{default}\n  {}\n  transport: {transport}\n  keywords: {}",
            descriptor.name,
            descriptor.description,
            descriptor.keywords.join(", ")
        );
    }
    Ok(())
}

fn forget_command(config: &Config, args: ForgetArgs) -> Result<()> {
    let Some(log) = config.audit_log() else {
        warn!("audit logging disabled; nothing to remove");
        return Ok(());
    };
    log.remove_run_logs(&args.run_id)?;
    info!(run_id = %args.run_id, "run log records removed");
    Ok(())
}
