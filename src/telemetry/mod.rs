//! Logging and OpenTelemetry initialization.
//!
//! The library only emits `tracing` events and OTel metrics; installing a
//! subscriber is the host's call. `init_telemetry` is the one the bundled
//! CLI uses: a fmt layer on stderr (stdout carries command output), plus OTLP
//! export of spans, metrics, and log records when an endpoint is configured.

pub mod metrics;
pub mod queue;

use opentelemetry::trace::TracerProvider as _;
use opentelemetry_appender_tracing::layer::OpenTelemetryTracingBridge;
use opentelemetry_otlp::WithExportConfig as _;
use opentelemetry_sdk::Resource;
use opentelemetry_sdk::logs::SdkLoggerProvider;
use opentelemetry_sdk::metrics::SdkMeterProvider;
use opentelemetry_sdk::trace::SdkTracerProvider;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt as _;
use tracing_subscriber::util::SubscriberInitExt as _;

use crate::error::{Error, Result};

/// Configuration for telemetry initialization.
pub struct TelemetryConfig {
    /// Optional OTLP gRPC endpoint (e.g. "http://localhost:4317").
    pub endpoint: Option<String>,
    /// The service name reported on exported signals.
    pub service_name: String,
    /// Fallback filter directive when `RUST_LOG` is unset (e.g. "info").
    pub log_level: String,
}

/// Providers for the three OTLP signals, sharing one endpoint and resource.
struct OtlpPipelines {
    tracer: SdkTracerProvider,
    meter: SdkMeterProvider,
    logger: SdkLoggerProvider,
}

impl OtlpPipelines {
    fn build(endpoint: &str, service_name: &str) -> Result<Self> {
        let resource = Resource::builder()
            .with_service_name(service_name.to_string())
            .build();

        let spans = opentelemetry_otlp::SpanExporter::builder()
            .with_tonic()
            .with_endpoint(endpoint)
            .build()
            .map_err(|e| exporter_error("span", e))?;
        let metrics = opentelemetry_otlp::MetricExporter::builder()
            .with_tonic()
            .with_endpoint(endpoint)
            .build()
            .map_err(|e| exporter_error("metric", e))?;
        let logs = opentelemetry_otlp::LogExporter::builder()
            .with_tonic()
            .with_endpoint(endpoint)
            .build()
            .map_err(|e| exporter_error("log", e))?;

        Ok(Self {
            tracer: SdkTracerProvider::builder()
                .with_batch_exporter(spans)
                .with_resource(resource.clone())
                .build(),
            meter: SdkMeterProvider::builder()
                .with_periodic_exporter(metrics)
                .with_resource(resource.clone())
                .build(),
            logger: SdkLoggerProvider::builder()
                .with_batch_exporter(logs)
                .with_resource(resource)
                .build(),
        })
    }

    fn force_flush(&self) {
        let _ = self.tracer.force_flush();
        let _ = self.meter.force_flush();
        let _ = self.logger.force_flush();
    }

    // Logs first so records emitted while shutting down spans still export.
    fn shutdown(self) {
        let _ = self.logger.shutdown();
        let _ = self.meter.shutdown();
        let _ = self.tracer.shutdown();
    }
}

fn exporter_error(signal: &str, e: impl std::fmt::Display) -> Error {
    Error::Telemetry(format!("failed to create OTLP {signal} exporter: {e}"))
}

/// Flushes and shuts down the OTLP pipelines on drop. Hold it for the
/// lifetime of the process.
pub struct TelemetryGuard {
    pipelines: Option<OtlpPipelines>,
}

impl TelemetryGuard {
    /// Force-flush every OTLP pipeline. No-op without an endpoint.
    pub fn force_flush(&self) {
        if let Some(pipelines) = &self.pipelines {
            pipelines.force_flush();
        }
    }
}

impl Drop for TelemetryGuard {
    fn drop(&mut self) {
        if let Some(pipelines) = self.pipelines.take() {
            pipelines.shutdown();
        }
    }
}

/// Install the global `tracing` subscriber and, with an endpoint, the OTLP
/// pipelines and global meter provider.
///
/// # Errors
///
/// Returns [`Error::Telemetry`] if an OTLP exporter fails to build or a
/// global subscriber is already set.
pub fn init_telemetry(config: TelemetryConfig) -> Result<TelemetryGuard> {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    let pipelines = config
        .endpoint
        .as_deref()
        .map(|endpoint| OtlpPipelines::build(endpoint, &config.service_name))
        .transpose()?;

    let trace_layer = pipelines.as_ref().map(|p| {
        tracing_opentelemetry::layer().with_tracer(p.tracer.tracer("sqliteworks"))
    });
    let log_layer = pipelines
        .as_ref()
        .map(|p| OpenTelemetryTracingBridge::new(&p.logger));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(trace_layer)
        .with(log_layer)
        .try_init()
        .map_err(|e| Error::Telemetry(format!("failed to init tracing subscriber: {e}")))?;

    if let Some(p) = &pipelines {
        opentelemetry::global::set_meter_provider(p.meter.clone());
    }

    Ok(TelemetryGuard { pipelines })
}
