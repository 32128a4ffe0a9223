//! Telemetry logic.
//! Prometheus metrics for provisioning outcomes and HTTP traffic, plus an
//! optional OTLP log exporter.
use std::time::Instant;

use axum::extract::{MatchedPath, Request};
use axum::middleware::Next;
use axum::response::IntoResponse;
use metrics::Unit;
use metrics_exporter_prometheus::{
    BuildError, Matcher, PrometheusBuilder, PrometheusHandle,
};
use opentelemetry_appender_tracing::layer::OpenTelemetryTracingBridge;
use opentelemetry_otlp::{LogExporter, WithExportConfig};
use opentelemetry_sdk::Resource;
use opentelemetry_sdk::logs::{LogError, SdkLogger, SdkLoggerProvider};

/// Counter of provisioning operations, by operation and outcome.
pub const OPERATIONS_TOTAL: &str = "provisioning_operations_total";
const HTTP_REQUESTS: &str = "http_requests_total";
const HTTP_DURATION: &str = "http_requests_duration_seconds";

/// Forward `tracing` events to an OTLP collector.
pub fn setup_logging(
    endpoint: &str,
) -> Result<OpenTelemetryTracingBridge<SdkLoggerProvider, SdkLogger>, LogError>
{
    let exporter = LogExporter::builder()
        .with_tonic()
        .with_endpoint(endpoint)
        .build()?;
    let provider = SdkLoggerProvider::builder()
        .with_resource(
            Resource::builder()
                .with_service_name(env!("CARGO_PKG_NAME"))
                .build(),
        )
        .with_batch_exporter(exporter)
        .build();
    Ok(OpenTelemetryTracingBridge::new(&provider))
}

/// Install the Prometheus recorder.
pub fn setup_metrics_recorder() -> Result<PrometheusHandle, BuildError> {
    const DIRECTORY_SECONDS: &[f64] =
        &[0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0];

    metrics::describe_counter!(
        OPERATIONS_TOTAL,
        Unit::Count,
        "Provisioning operations by operation and outcome."
    );
    metrics::describe_histogram!(
        HTTP_DURATION,
        Unit::Seconds,
        "Time spent answering a request, directory calls included."
    );

    PrometheusBuilder::new()
        .set_buckets_for_metric(
            Matcher::Full(HTTP_DURATION.to_owned()),
            DIRECTORY_SECONDS,
        )?
        .install_recorder()
}

/// Count one provisioning operation.
pub fn record_operation(operation: &'static str, outcome: &'static str) {
    metrics::counter!(
        OPERATIONS_TOTAL,
        "operation" => operation,
        "outcome" => outcome
    )
    .increment(1);
}

/// Count and time every request by route template.
pub async fn track(req: Request, next: Next) -> impl IntoResponse {
    let start = Instant::now();
    let path = match req.extensions().get::<MatchedPath>() {
        Some(matched) => matched.as_str().to_owned(),
        None => req.uri().path().to_owned(),
    };
    let method = req.method().to_string();

    let response = next.run(req).await;

    let labels = [
        ("method", method),
        ("path", path),
        ("status", response.status().as_u16().to_string()),
    ];
    metrics::counter!(HTTP_REQUESTS, &labels).increment(1);
    metrics::histogram!(HTTP_DURATION, &labels)
        .record(start.elapsed().as_secs_f64());

    response
}
