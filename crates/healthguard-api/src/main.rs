use std::sync::Arc;

use anyhow::Result;
use healthguard_api::{ApiConfig, AppState, build_router};
use healthguard_core::{ConfigLoader, ResearchPipeline, TelemetryOptions, init_telemetry, metrics};
use tokio::net::TcpListener;
use tracing::{error, info, warn};

#[tokio::main]
async fn main() -> Result<()> {
    let config = ConfigLoader::load(None)?;
    init_telemetry(TelemetryOptions {
        env_filter: Some(config.logging.level.clone()),
        ..TelemetryOptions::default()
    })?;
    if let Err(err) = metrics::init_metrics_from_env("healthguard-api") {
        warn!(error = %err, "metrics exporter not initialised");
    }

    let api = ApiConfig::from_env()?;
    let pipeline = Arc::new(ResearchPipeline::from_config(&config)?);
    info!(
        specialists = pipeline.registry().len(),
        max_concurrent_runs = api.max_concurrent_runs,
        max_retained_runs = api.max_retained_runs,
        "research pipeline ready"
    );

    let state = AppState::new(pipeline, api.max_concurrent_runs)
        .with_max_retained_runs(api.max_retained_runs);
    let app = build_router(state);

    let listener = TcpListener::bind(&api.listen_addr).await?;
    info!(address = %api.listen_addr, "healthguard-api listening");

    axum::serve(listener, app.into_make_service())
        .with_graceful_shutdown(shutdown_signal())
        .await
        .map_err(|err| {
            error!(error = %err, "server shutdown with error");
            err
        })?;

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            error!(error = %err, "failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{SignalKind, signal};
        if let Ok(mut stream) = signal(SignalKind::terminate()) {
            stream.recv().await;
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }

    info!("shutdown signal received");
}
