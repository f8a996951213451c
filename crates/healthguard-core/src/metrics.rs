use anyhow::Result;
use once_cell::sync::OnceCell;
use opentelemetry::metrics::{Counter, Histogram, Meter};
use opentelemetry::{KeyValue, global};
use tracing::info;

struct PipelineMetrics {
    specialist_runs: Counter<u64>,
    specialist_duration_ms: Histogram<f64>,
    gateway_attempts: Counter<u64>,
    truncations: Counter<u64>,
}

static METRICS: OnceCell<PipelineMetrics> = OnceCell::new();

fn handles() -> &'static PipelineMetrics {
    METRICS.get_or_init(|| {
        let meter: Meter = global::meter("healthguard.pipeline");
        PipelineMetrics {
            specialist_runs: meter
                .u64_counter("specialist_runs_total")
                .with_description("Specialist invocations by outcome")
                .init(),
            specialist_duration_ms: meter
                .f64_histogram("specialist_duration_ms")
                .with_description("Specialist wall time in milliseconds")
                .init(),
            gateway_attempts: meter
                .u64_counter("gateway_attempts_total")
                .with_description("Language model attempts by result")
                .init(),
            truncations: meter
                .u64_counter("prompt_truncations_total")
                .with_description("Prompts cut down to fit the token ceiling")
                .init(),
        }
    })
}

/// Hint to operators that OTEL metrics export can be configured externally.
pub fn init_metrics_from_env(service_name: &str) -> Result<()> {
    if std::env::var("HEALTHGUARD_OTEL_METRICS_ENDPOINT").is_ok() {
        info!(
            target = "telemetry",
            "HEALTHGUARD_OTEL_METRICS_ENDPOINT detected for {service_name}. Configure an OTLP meter provider in your deployment to export pipeline metrics."
        );
    }
    Ok(())
}

/// Record one specialist outcome (no-op if no provider installed).
pub fn record_specialist(name: &str, success: bool, duration_ms: u64) {
    let metrics = handles();
    let attrs = [
        KeyValue::new("specialist", name.to_string()),
        KeyValue::new("status", if success { "success" } else { "failure" }),
    ];
    metrics.specialist_runs.add(1, &attrs);
    metrics
        .specialist_duration_ms
        .record(duration_ms as f64, &attrs);
}

pub fn record_gateway_attempt(status: &'static str) {
    handles()
        .gateway_attempts
        .add(1, &[KeyValue::new("status", status)]);
}

pub fn record_truncation() {
    handles().truncations.add(1, &[]);
}
